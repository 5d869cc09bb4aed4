//! Posting new secrets and comments.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use lovisec_crypto::obfuscate;
use lovisec_types::api::{Bucket, NewComment, NewSecret, Table};
use lovisec_types::models::ReactionTally;

use crate::backend::Backend;
use crate::error::{Result, ValidationError};

pub const MAX_CONTENT_CHARS: usize = 500;
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Stored as the content of a post that only carries an image.
pub const IMAGE_ONLY_PLACEHOLDER: &str = "[imagen]";

/// An image picked for attachment, held in memory until upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Load a file, guessing its content type from the extension.
    pub async fn read(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let content_type = content_type_for(&file_name).to_string();

        Ok(Self {
            file_name,
            content_type,
            bytes,
        })
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if !self.content_type.starts_with("image/") {
            return Err(ValidationError::NotAnImage(self.file_name.clone()));
        }
        if self.bytes.len() > MAX_IMAGE_BYTES {
            return Err(ValidationError::ImageTooLarge {
                size: self.bytes.len(),
                max: MAX_IMAGE_BYTES,
            });
        }
        Ok(())
    }

    /// File extension used for the stored object; the content subtype when
    /// the name has none.
    pub fn extension(&self) -> String {
        match self.file_name.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => ext.to_ascii_lowercase(),
            _ => self
                .content_type
                .split_once('/')
                .map(|(_, subtype)| subtype.to_string())
                .unwrap_or_else(|| "bin".to_string()),
        }
    }

    /// A fresh collision-free object name, `{uuid}.{ext}`.
    pub fn storage_name(&self) -> String {
        format!("{}.{}", Uuid::new_v4(), self.extension())
    }
}

fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        _ => "application/octet-stream",
    }
}

/// Check a submission and return the trimmed text.
pub fn validate_submission(
    text: &str,
    image: Option<&ImageUpload>,
) -> std::result::Result<String, ValidationError> {
    let text = text.trim();
    if text.is_empty() && image.is_none() {
        return Err(ValidationError::EmptySubmission);
    }

    let len = text.chars().count();
    if len > MAX_CONTENT_CHARS {
        return Err(ValidationError::TooLong {
            len,
            max: MAX_CONTENT_CHARS,
        });
    }

    if let Some(image) = image {
        image.validate()?;
    }
    Ok(text.to_string())
}

/// Content and obfuscated content columns for validated text.
fn content_columns(text: &str) -> (String, Option<String>) {
    if text.is_empty() {
        return (IMAGE_ONLY_PLACEHOLDER.to_string(), None);
    }

    match obfuscate(text) {
        Ok(encoded) => (text.to_string(), Some(encoded)),
        Err(e) => {
            warn!("Storing post as plaintext only: {}", e);
            (text.to_string(), None)
        }
    }
}

pub struct Composer<B> {
    backend: Arc<B>,
}

impl<B: Backend> Composer<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Post an anonymous secret. New rows reach open feeds through the change
    /// feed, not through this call.
    pub async fn submit_secret(&self, text: &str, image: Option<ImageUpload>) -> Result<NewSecret> {
        let text = validate_submission(text, image.as_ref())?;
        let image_url = self.upload(Bucket::SecretImages, image).await?;
        let (content, encrypted_content) = content_columns(&text);

        let row = NewSecret {
            content,
            encrypted_content,
            image_url,
            user_id: None,
            reactions: ReactionTally::default(),
        };
        self.backend.insert(Table::Secrets, &row).await?;

        info!("Posted secret ({} chars)", text.chars().count());
        Ok(row)
    }

    /// Post a comment under `secret_id`, signed with the current user when
    /// there is one.
    pub async fn submit_comment(
        &self,
        secret_id: &str,
        text: &str,
        image: Option<ImageUpload>,
    ) -> Result<NewComment> {
        let text = validate_submission(text, image.as_ref())?;
        let image_url = self.upload(Bucket::CommentImages, image).await?;
        let (content, encrypted_content) = content_columns(&text);

        let row = NewComment {
            secret_id: secret_id.to_string(),
            content,
            encrypted_content,
            image_url,
            user_id: self.backend.session().map(|s| s.user_id),
            reactions: ReactionTally::default(),
        };
        self.backend.insert(Table::Comments, &row).await?;

        info!("Posted comment on {}", secret_id);
        Ok(row)
    }

    async fn upload(&self, bucket: Bucket, image: Option<ImageUpload>) -> Result<Option<String>> {
        let Some(image) = image else {
            return Ok(None);
        };

        let name = image.storage_name();
        let url = self
            .backend
            .upload_image(bucket, &name, &image.content_type, image.bytes)
            .await?;
        Ok(Some(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(size: usize) -> ImageUpload {
        ImageUpload::new("cat.PNG", "image/png", vec![0; size])
    }

    #[test]
    fn empty_submission_is_rejected() {
        assert_eq!(
            validate_submission("   \n", None),
            Err(ValidationError::EmptySubmission)
        );
        assert_eq!(validate_submission("", Some(&png(10))), Ok(String::new()));
    }

    #[test]
    fn length_is_counted_in_characters() {
        let accented = "é".repeat(MAX_CONTENT_CHARS);
        assert!(validate_submission(&accented, None).is_ok());

        let long = "a".repeat(MAX_CONTENT_CHARS + 1);
        assert_eq!(
            validate_submission(&long, None),
            Err(ValidationError::TooLong {
                len: MAX_CONTENT_CHARS + 1,
                max: MAX_CONTENT_CHARS
            })
        );
    }

    #[test]
    fn images_are_checked() {
        let doc = ImageUpload::new("notes.txt", "text/plain", vec![1]);
        assert_eq!(
            doc.validate(),
            Err(ValidationError::NotAnImage("notes.txt".into()))
        );
        assert!(png(MAX_IMAGE_BYTES).validate().is_ok());
        assert!(matches!(
            png(MAX_IMAGE_BYTES + 1).validate(),
            Err(ValidationError::ImageTooLarge { .. })
        ));
    }

    #[test]
    fn storage_names_keep_the_extension() {
        let name = png(1).storage_name();
        assert!(name.ends_with(".png"));
        assert_eq!(name.len(), 36 + 4);

        let bare = ImageUpload::new("photo", "image/jpeg", vec![]);
        assert_eq!(bare.extension(), "jpeg");
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for("a.JPG"), "image/jpeg");
        assert_eq!(content_type_for("a.webp"), "image/webp");
        assert_eq!(content_type_for("a"), "application/octet-stream");
    }

    #[test]
    fn columns_for_text_and_image_only() {
        let (content, encoded) = content_columns("hola");
        assert_eq!(content, "hola");
        assert_eq!(lovisec_crypto::reveal(&encoded.unwrap()), "hola");

        assert_eq!(
            content_columns(""),
            (IMAGE_ONLY_PLACEHOLDER.to_string(), None)
        );
        // Outside Latin-1, so only the plaintext column is filled.
        assert_eq!(content_columns("秘密"), ("秘密".to_string(), None));
    }
}
