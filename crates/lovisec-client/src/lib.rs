pub mod backend;
pub mod compose;
pub mod config;
pub mod error;
pub mod feed;
pub mod memory;
pub mod reactions;
pub mod realtime;
pub mod rest;
pub mod session;

pub use backend::{Backend, Collection, PageRange, Subscription};
pub use compose::{Composer, ImageUpload};
pub use config::Config;
pub use error::{ClientError, Result, ValidationError};
pub use feed::{CommentThread, Feed, FeedItem, FeedState, FeedView, SecretFeed};
pub use memory::MemoryBackend;
pub use reactions::{ReactionController, ReactionOutcome, apply_reaction};
pub use rest::RestBackend;
pub use session::Account;
