use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::warn;

use lovisec_avatar::{Avatar, DEFAULT_SIZE};
use lovisec_client::{Account, Backend, Composer, Feed, FeedItem, ImageUpload};
use lovisec_store::{LocalStore, Theme};
use lovisec_types::models::ReactionKind;

use crate::render::{self, Render};

const DEFAULT_SEARCH_PAGES: usize = 5;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the newest secrets
    Feed {
        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Show the feed, then follow new secrets and reactions live
    Watch,
    /// Post an anonymous secret
    Post {
        #[arg(default_value = "")]
        text: String,
        /// Attach an image (max 5 MB)
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Show the comments on a secret
    Comments {
        secret_id: String,
        #[arg(long, default_value_t = 1)]
        pages: usize,
        /// Keep following new comments
        #[arg(long)]
        watch: bool,
    },
    /// Comment on a secret
    Comment {
        secret_id: String,
        #[arg(default_value = "")]
        text: String,
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// React to a secret (turbio, impresionante, noMeGusta); repeat to undo
    React {
        secret_id: String,
        reaction: ReactionKind,
        /// Most pages to search for the secret
        #[arg(long, default_value_t = DEFAULT_SEARCH_PAGES)]
        pages: usize,
    },
    /// React to a comment; repeat to undo
    ReactComment {
        secret_id: String,
        comment_id: String,
        reaction: ReactionKind,
        #[arg(long, default_value_t = DEFAULT_SEARCH_PAGES)]
        pages: usize,
    },
    /// Draw the pixel avatar for a seed
    Avatar {
        seed: String,
        #[arg(long, default_value_t = DEFAULT_SIZE)]
        size: u32,
        /// Write a PNG here instead of printing a data URL
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Create an account
    Signup {
        email: String,
        #[arg(long, env = "LOVISEC_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign in
    Login {
        email: String,
        #[arg(long, env = "LOVISEC_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out and forget the saved session
    Logout,
    /// Show the signed-in profile
    Whoami,
    /// Change your username
    Rename { username: String },
    /// Pick a new random avatar
    RerollAvatar,
    /// Show or set the colour theme (light, dark, matrix)
    Theme { theme: Option<Theme> },
}

impl Command {
    /// Whether the command talks to the backend.
    pub fn needs_backend(&self) -> bool {
        !matches!(self, Self::Avatar { .. } | Self::Theme { .. })
    }
}

/// Commands that only touch local state.
pub async fn run_local(command: Command, store: &LocalStore) -> Result<()> {
    match command {
        Command::Avatar { seed, size, out } => avatar(&seed, size, out).await,
        Command::Theme { theme: Some(theme) } => {
            store.set_theme(theme)?;
            println!("Theme set to {theme}");
            Ok(())
        }
        Command::Theme { theme: None } => {
            println!("{}", store.theme()?);
            Ok(())
        }
        other => anyhow::bail!("{other:?} needs a backend"),
    }
}

pub async fn run<B: Backend>(
    command: Command,
    backend: Arc<B>,
    store: Arc<LocalStore>,
    page_size: usize,
) -> Result<()> {
    // Restores the saved session so posts and comments are signed.
    let account = Account::new(backend.clone(), store.clone())?;

    match command {
        Command::Feed { pages } => {
            let mut feed = Feed::secrets(backend, store, page_size)?;
            load_pages(&mut feed, pages).await?;
            print_feed(&feed);
        }
        Command::Watch => {
            let mut feed = Feed::secrets(backend, store, page_size)?;
            watch(&mut feed).await?;
        }
        Command::Post { text, image } => {
            let image = read_image(image).await?;
            Composer::new(backend).submit_secret(&text, image).await?;
            println!("Secret posted");
        }
        Command::Comments {
            secret_id,
            pages,
            watch: follow,
        } => {
            let mut thread = Feed::comments(backend, store, &secret_id, page_size)?;
            if follow {
                watch(&mut thread).await?;
            } else {
                load_pages(&mut thread, pages).await?;
                print_feed(&thread);
            }
        }
        Command::Comment {
            secret_id,
            text,
            image,
        } => {
            let image = read_image(image).await?;
            Composer::new(backend)
                .submit_comment(&secret_id, &text, image)
                .await?;
            println!("Comment posted");
        }
        Command::React {
            secret_id,
            reaction,
            pages,
        } => {
            let mut feed = Feed::secrets(backend, store, page_size)?;
            react(&mut feed, &secret_id, reaction, pages).await?;
        }
        Command::ReactComment {
            secret_id,
            comment_id,
            reaction,
            pages,
        } => {
            let mut thread = Feed::comments(backend, store, &secret_id, page_size)?;
            react(&mut thread, &comment_id, reaction, pages).await?;
        }
        Command::Signup { email, password } => {
            let session = account.sign_up(&email, &password).await?;
            println!("Account created, signed in as {}", session.user_id);
        }
        Command::Login { email, password } => {
            let session = account.sign_in(&email, &password).await?;
            println!("Signed in as {}", session.email.as_deref().unwrap_or(&email));
        }
        Command::Logout => {
            account.sign_out().await?;
            println!("Signed out");
        }
        Command::Whoami => {
            let profile = account.profile().await?;
            print!("{}", render::avatar_grid(&Avatar::from_seed(&profile.avatar_seed)));
            println!("{} ({})", profile.username, profile.id);
            if let Some(email) = account.session().and_then(|s| s.email) {
                println!("{email}");
            }
        }
        Command::Rename { username } => {
            let username = account.rename(&username).await?;
            println!("Username changed to {username}");
        }
        Command::RerollAvatar => {
            let seed = account.reroll_avatar().await?;
            print!("{}", render::avatar_grid(&Avatar::from_seed(&seed)));
        }
        local @ (Command::Avatar { .. } | Command::Theme { .. }) => {
            run_local(local, &store).await?;
        }
    }

    Ok(())
}

async fn load_pages<B: Backend, T: FeedItem>(feed: &mut Feed<B, T>, pages: usize) -> Result<()> {
    feed.load_initial().await?;
    for _ in 1..pages {
        if !feed.has_more() {
            break;
        }
        feed.load_more().await?;
    }
    Ok(())
}

fn print_feed<B: Backend, T: FeedItem + Render>(feed: &Feed<B, T>) {
    let view = feed.view();
    if view.is_empty() {
        println!("Nothing here yet");
        return;
    }

    for entry in view {
        println!("{}", entry.item.render(entry.user_reaction));
    }
    if feed.has_more() {
        println!("(more available, use --pages)");
    }
}

/// Print the first page, then every change until the feed closes or Ctrl-C.
async fn watch<B: Backend, T: FeedItem + Render>(feed: &mut Feed<B, T>) -> Result<()> {
    let mut changes = feed.subscribe().await?;
    feed.load_initial().await?;
    print_feed(feed);

    loop {
        tokio::select! {
            event = changes.next() => {
                let Some(event) = event else {
                    warn!("Change feed closed");
                    break;
                };

                match feed.apply_event(&event).await {
                    Ok(true) => {
                        let id = event.column("id").unwrap_or_default();
                        if let Some(item) = feed.state().get(id) {
                            println!("{}", item.render(feed.user_reaction(id)));
                        }
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Skipping change: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

/// Page through at most `pages` pages of `feed` looking for `item_id`, then
/// toggle `kind` on it.
async fn react<B: Backend, T: FeedItem>(
    feed: &mut Feed<B, T>,
    item_id: &str,
    kind: ReactionKind,
    pages: usize,
) -> Result<()> {
    feed.load_initial().await?;
    let mut loaded = 1;
    while feed.state().get(item_id).is_none() && feed.has_more() && loaded < pages {
        feed.load_more().await?;
        loaded += 1;
    }

    let tally = feed
        .react(item_id, kind)
        .await
        .with_context(|| format!("{item_id} is not in the newest {loaded} pages"))?;
    println!("{}", render::tally(&tally, feed.user_reaction(item_id)));
    Ok(())
}

async fn read_image(path: Option<PathBuf>) -> Result<Option<ImageUpload>> {
    match path {
        Some(path) => {
            let image = ImageUpload::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(Some(image))
        }
        None => Ok(None),
    }
}

async fn avatar(seed: &str, size: u32, out: Option<PathBuf>) -> Result<()> {
    let avatar = Avatar::from_seed(seed);
    match out {
        Some(path) => {
            let png = avatar.to_png(size)?;
            tokio::fs::write(&path, png)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}px avatar to {}", size, path.display());
        }
        None => {
            print!("{}", render::avatar_grid(&avatar));
            println!("{}", avatar.to_data_url(size)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lovisec_client::MemoryBackend;
    use lovisec_types::api::Table;
    use serde_json::json;

    #[tokio::test]
    async fn react_pages_until_the_item_is_found() {
        let backend = Arc::new(MemoryBackend::new());
        let base = chrono::Utc::now();
        for i in 0..5 {
            backend.seed(
                Table::Secrets,
                json!({ "id": format!("s{i}"), "content": "x" }),
                base + chrono::Duration::seconds(i),
            );
        }
        let store = Arc::new(LocalStore::open_in_memory().unwrap());

        run(
            Command::React {
                secret_id: "s0".into(),
                reaction: ReactionKind::Turbio,
                pages: 3,
            },
            backend.clone(),
            store,
            2,
        )
        .await
        .unwrap();

        assert_eq!(
            backend.row(Table::Secrets, "s0").unwrap()["reactions"]["turbio"],
            1
        );
    }

    #[tokio::test]
    async fn react_stops_after_the_page_limit() {
        let backend = Arc::new(MemoryBackend::new());
        let base = chrono::Utc::now();
        for i in 0..5 {
            backend.seed(
                Table::Secrets,
                json!({ "id": format!("s{i}"), "content": "x" }),
                base + chrono::Duration::seconds(i),
            );
        }
        let store = Arc::new(LocalStore::open_in_memory().unwrap());

        let result = run(
            Command::React {
                secret_id: "s0".into(),
                reaction: ReactionKind::Turbio,
                pages: 2,
            },
            backend.clone(),
            store,
            2,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(
            backend.row(Table::Secrets, "s0").unwrap()["reactions"]["turbio"],
            0
        );
    }

    #[tokio::test]
    async fn theme_is_stored_locally() {
        let store = LocalStore::open_in_memory().unwrap();
        run_local(
            Command::Theme {
                theme: Some(Theme::Matrix),
            },
            &store,
        )
        .await
        .unwrap();
        assert_eq!(store.theme().unwrap(), Theme::Matrix);
    }

    #[test]
    fn offline_commands_skip_the_backend() {
        assert!(!Command::Theme { theme: None }.needs_backend());
        assert!(Command::Whoami.needs_backend());
    }
}
