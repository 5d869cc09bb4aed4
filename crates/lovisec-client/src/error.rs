use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0}")]
    Invalid(#[from] ValidationError),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend rejected {operation}: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not signed in")]
    NotSignedIn,

    #[error("username is already taken")]
    UsernameTaken,

    #[error("realtime channel error: {0}")]
    Realtime(String),

    #[error("malformed backend payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("local state error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("item {0} is not loaded in this feed")]
    UnknownItem(String),

    #[error("could not read file: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn backend(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            operation,
            message: message.into(),
        }
    }
}

/// Input rejected before any request is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("write something or attach an image before posting")]
    EmptySubmission,

    #[error("text is too long ({len} characters, max {max})")]
    TooLong { len: usize, max: usize },

    #[error("'{0}' is not an image")]
    NotAnImage(String),

    #[error("image is too large ({size} bytes, max {max})")]
    ImageTooLarge { size: usize, max: usize },

    #[error("username must be at least {min} characters")]
    UsernameTooShort { min: usize },

    #[error("password must be at least {min} characters")]
    PasswordTooShort { min: usize },

    #[error("email is required")]
    MissingEmail,
}
