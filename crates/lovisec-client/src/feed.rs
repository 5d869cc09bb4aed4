//! Newest-first feeds merging paged loads with the live change stream.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use lovisec_crypto::reveal;
use lovisec_store::{LocalStore, ReactionRecord};
use lovisec_types::events::{ChangeEvent, ChangeKind};
use lovisec_types::models::{Comment, Profile, ReactionKind, ReactionTally, Secret};

use crate::backend::{Backend, Collection, PageRange, Subscription};
use crate::error::{ClientError, Result};
use crate::reactions::ReactionController;

/// A row that can live in a [`Feed`].
pub trait FeedItem: DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn reactions(&self) -> &ReactionTally;
    fn set_reactions(&mut self, tally: ReactionTally);

    fn user_id(&self) -> Option<&str>;
    fn profile(&self) -> Option<&Profile>;
    fn set_profile(&mut self, profile: Option<Profile>);

    /// Replace the display content with the revealed obfuscated column, when
    /// the row has one.
    fn resolve_content(&mut self);
}

impl FeedItem for Secret {
    fn id(&self) -> &str {
        &self.id
    }

    fn reactions(&self) -> &ReactionTally {
        &self.reactions
    }

    fn set_reactions(&mut self, tally: ReactionTally) {
        self.reactions = tally;
    }

    fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    fn set_profile(&mut self, profile: Option<Profile>) {
        self.profile = profile;
    }

    fn resolve_content(&mut self) {
        if let Some(encoded) = self.encrypted_content.as_deref() {
            self.content = reveal(encoded);
        }
    }
}

impl FeedItem for Comment {
    fn id(&self) -> &str {
        &self.id
    }

    fn reactions(&self) -> &ReactionTally {
        &self.reactions
    }

    fn set_reactions(&mut self, tally: ReactionTally) {
        self.reactions = tally;
    }

    fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    fn set_profile(&mut self, profile: Option<Profile>) {
        self.profile = profile;
    }

    fn resolve_content(&mut self) {
        if let Some(encoded) = self.encrypted_content.as_deref() {
            self.content = reveal(encoded);
        }
    }
}

/// The ordered item list and its paging flags, without any I/O.
///
/// Items are unique by id whatever their source. A page load is split into
/// [`begin_page`](Self::begin_page) and [`finish_page`](Self::finish_page) so
/// live changes can land while the request is out.
#[derive(Debug)]
pub struct FeedState<T> {
    items: Vec<T>,
    page_size: usize,
    has_more: bool,
    loading: bool,
}

impl<T: FeedItem> FeedState<T> {
    pub fn new(page_size: usize) -> Self {
        Self {
            items: Vec::new(),
            page_size: page_size.max(1),
            has_more: false,
            loading: false,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Start the first-page load. Always allowed; any in-flight flag left by
    /// an abandoned request is taken over.
    pub fn begin_initial(&mut self) -> PageRange {
        self.loading = true;
        PageRange {
            offset: 0,
            limit: self.page_size,
        }
    }

    /// Replace the list with the first page.
    pub fn finish_initial(&mut self, rows: Vec<T>) -> usize {
        self.items.clear();
        self.finish_page(rows)
    }

    /// Reserve the next page, or `None` while a load is in flight or the end
    /// has been reached. The offset is the number of items held right now.
    pub fn begin_page(&mut self) -> Option<PageRange> {
        if self.loading || !self.has_more {
            return None;
        }

        self.loading = true;
        Some(PageRange {
            offset: self.items.len(),
            limit: self.page_size,
        })
    }

    /// Append a fetched page, skipping ids already held. Returns how many
    /// items were added.
    ///
    /// A full page means there may be more; a short one means the end.
    pub fn finish_page(&mut self, rows: Vec<T>) -> usize {
        self.loading = false;
        self.has_more = rows.len() == self.page_size;

        let before = self.items.len();
        for mut row in rows {
            if self.position(row.id()).is_some() {
                debug!("Skipping duplicate item {}", row.id());
                continue;
            }
            row.resolve_content();
            self.items.push(row);
        }
        self.items.len() - before
    }

    /// Give up on the in-flight page; items and `has_more` stay as they were.
    pub fn abort_page(&mut self) {
        self.loading = false;
    }

    /// Prepend a live insert. An id already held is replaced where it sits.
    pub fn insert_live(&mut self, mut item: T) {
        item.resolve_content();
        match self.position(item.id()) {
            Some(index) => self.replace(index, item),
            None => self.items.insert(0, item),
        }
    }

    /// Replace the item with the same id. Returns `false` for unknown ids.
    pub fn update_live(&mut self, mut item: T) -> bool {
        let Some(index) = self.position(item.id()) else {
            return false;
        };
        item.resolve_content();
        self.replace(index, item);
        true
    }

    /// Change rows carry no joined profile, so the held one survives as long
    /// as the author is the same.
    fn replace(&mut self, index: usize, mut item: T) {
        let held = &self.items[index];
        if item.profile().is_none() && item.user_id() == held.user_id() {
            item.set_profile(held.profile().cloned());
        }
        self.items[index] = item;
    }

    pub fn set_reactions(&mut self, id: &str, tally: ReactionTally) -> bool {
        match self.items.iter_mut().find(|item| item.id() == id) {
            Some(item) => {
                item.set_reactions(tally);
                true
            }
            None => false,
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }
}

/// One item with the viewer's own reaction to it.
#[derive(Debug, Clone)]
pub struct FeedView<'a, T> {
    pub item: &'a T,
    pub user_reaction: Option<ReactionKind>,
}

/// A live feed of one collection, backed by `B`.
///
/// If a `load_initial`/`load_more` future is dropped before completion the
/// in-flight flag stays set; the next `load_initial` clears it.
pub struct Feed<B, T> {
    backend: Arc<B>,
    collection: Collection,
    state: FeedState<T>,
    reactions: ReactionController<B>,
}

pub type SecretFeed<B> = Feed<B, Secret>;
pub type CommentThread<B> = Feed<B, Comment>;

impl<B: Backend> Feed<B, Secret> {
    pub fn secrets(backend: Arc<B>, store: Arc<LocalStore>, page_size: usize) -> Result<Self> {
        Self::new(backend, store, Collection::secrets(), page_size)
    }
}

impl<B: Backend> Feed<B, Comment> {
    pub fn comments(
        backend: Arc<B>,
        store: Arc<LocalStore>,
        secret_id: &str,
        page_size: usize,
    ) -> Result<Self> {
        Self::new(backend, store, Collection::comments_of(secret_id), page_size)
    }
}

impl<B: Backend, T: FeedItem> Feed<B, T> {
    pub fn new(
        backend: Arc<B>,
        store: Arc<LocalStore>,
        collection: Collection,
        page_size: usize,
    ) -> Result<Self> {
        let record = ReactionRecord::load(store, collection.namespace())?;
        let reactions = ReactionController::new(backend.clone(), collection.table, record);

        Ok(Self {
            backend,
            collection,
            state: FeedState::new(page_size),
            reactions,
        })
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn state(&self) -> &FeedState<T> {
        &self.state
    }

    pub fn items(&self) -> &[T] {
        self.state.items()
    }

    pub fn has_more(&self) -> bool {
        self.state.has_more()
    }

    pub fn is_loading(&self) -> bool {
        self.state.is_loading()
    }

    /// Fetch the first page, replacing whatever is held. On failure the
    /// previous items are kept.
    pub async fn load_initial(&mut self) -> Result<usize> {
        let range = self.state.begin_initial();
        match self.backend.fetch_page::<T>(&self.collection, range).await {
            Ok(rows) => {
                let added = self.state.finish_initial(rows);
                info!(
                    "Loaded {} {} (more: {})",
                    added,
                    self.collection.table,
                    self.state.has_more()
                );
                Ok(added)
            }
            Err(e) => {
                self.state.abort_page();
                error!("Failed to load {}: {}", self.collection.table, e);
                Err(e)
            }
        }
    }

    /// Fetch and append the next page. Returns `Ok(0)` without a request when
    /// a load is already running or there is nothing more to fetch.
    pub async fn load_more(&mut self) -> Result<usize> {
        let Some(range) = self.state.begin_page() else {
            debug!("No page to load for {}", self.collection.table);
            return Ok(0);
        };

        match self.backend.fetch_page::<T>(&self.collection, range).await {
            Ok(rows) => {
                let added = self.state.finish_page(rows);
                debug!(
                    "Page at {} added {} {}",
                    range.offset, added, self.collection.table
                );
                Ok(added)
            }
            Err(e) => {
                self.state.abort_page();
                error!(
                    "Failed to load {} at offset {}: {}",
                    self.collection.table, range.offset, e
                );
                Err(e)
            }
        }
    }

    pub async fn subscribe(&self) -> Result<Subscription> {
        self.backend.subscribe(&self.collection).await
    }

    /// Fold one change-feed event into the list. Returns whether the list
    /// changed; events for other collections are ignored.
    ///
    /// New rows by a signed-in author get their profile fetched before they
    /// are shown. If that lookup fails the row is shown without one.
    pub async fn apply_event(&mut self, event: &ChangeEvent) -> Result<bool> {
        if !self.collection.matches(event) {
            return Ok(false);
        }

        let mut item: T = event.decode().map_err(|e| {
            warn!("Undecodable {} change: {}", self.collection.table, e);
            ClientError::from(e)
        })?;

        Ok(match event.kind {
            ChangeKind::Insert => {
                self.join_author(&mut item).await;
                self.state.insert_live(item);
                true
            }
            ChangeKind::Update => self.state.update_live(item),
        })
    }

    async fn join_author(&self, item: &mut T) {
        if item.profile().is_some() {
            return;
        }
        let Some(user_id) = item.user_id() else {
            return;
        };

        match self.backend.fetch_profile(user_id).await {
            Ok(profile) => item.set_profile(profile),
            Err(e) => warn!(
                "No author profile for {} {}: {}",
                self.collection.table,
                item.id(),
                e
            ),
        }
    }

    /// Toggle the viewer's `kind` reaction on `item_id` and return the new
    /// tally. Local state only changes once the backend has stored it.
    pub async fn react(&mut self, item_id: &str, kind: ReactionKind) -> Result<ReactionTally> {
        let current = match self.state.get(item_id) {
            Some(item) => *item.reactions(),
            None => return Err(ClientError::UnknownItem(item_id.to_string())),
        };

        let outcome = self.reactions.toggle(item_id, &current, kind).await?;
        self.state.set_reactions(item_id, outcome.tally);
        Ok(outcome.tally)
    }

    pub fn user_reaction(&self, item_id: &str) -> Option<ReactionKind> {
        self.reactions.recorded(item_id)
    }

    pub fn view(&self) -> Vec<FeedView<'_, T>> {
        self.state
            .items()
            .iter()
            .map(|item| FeedView {
                item,
                user_reaction: self.reactions.recorded(item.id()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn secret(id: &str, content: &str) -> Secret {
        Secret {
            id: id.to_string(),
            content: content.to_string(),
            encrypted_content: None,
            image_url: None,
            category: None,
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            user_id: None,
            reactions: ReactionTally::default(),
            profile: None,
        }
    }

    fn page(ids: &[&str]) -> Vec<Secret> {
        ids.iter().map(|id| secret(id, "x")).collect()
    }

    fn ids(state: &FeedState<Secret>) -> Vec<&str> {
        state.items().iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn full_first_page_means_more() {
        let mut state = FeedState::new(2);
        let range = state.begin_initial();
        assert_eq!(range, PageRange { offset: 0, limit: 2 });
        assert!(state.is_loading());

        state.finish_initial(page(&["a", "b"]));
        assert!(state.has_more());
        assert!(!state.is_loading());

        let next = state.begin_page().unwrap();
        assert_eq!(next.offset, 2);
        state.finish_page(page(&["c"]));
        assert!(!state.has_more());
        assert_eq!(state.begin_page(), None);
    }

    #[test]
    fn empty_feed_has_nothing_more() {
        let mut state = FeedState::<Secret>::new(10);
        state.begin_initial();
        state.finish_initial(Vec::new());
        assert!(state.items().is_empty());
        assert!(!state.has_more());
    }

    #[test]
    fn only_one_page_in_flight() {
        let mut state = FeedState::new(1);
        state.begin_initial();
        state.finish_initial(page(&["a"]));

        assert!(state.begin_page().is_some());
        assert_eq!(state.begin_page(), None);
        state.abort_page();
        assert!(state.begin_page().is_some());
    }

    #[test]
    fn live_changes_interleave_with_pages() {
        let mut state = FeedState::new(2);
        state.begin_initial();
        state.finish_initial(page(&["b", "a"]));

        let range = state.begin_page().unwrap();
        assert_eq!(range.offset, 2);

        // A new post arrives while the page request is out, shifting the
        // server's offsets by one so the page repeats "a".
        state.insert_live(secret("c", "new"));
        state.finish_page(page(&["a", "z"]));

        assert_eq!(ids(&state), ["c", "b", "a", "z"]);
    }

    #[test]
    fn live_insert_of_known_id_replaces_in_place() {
        let mut state = FeedState::new(10);
        state.begin_initial();
        state.finish_initial(page(&["b", "a"]));

        state.insert_live(secret("a", "edited"));
        assert_eq!(ids(&state), ["b", "a"]);
        assert_eq!(state.get("a").unwrap().content, "edited");
    }

    #[test]
    fn updates_ignore_unknown_ids() {
        let mut state = FeedState::new(10);
        state.begin_initial();
        state.finish_initial(page(&["a"]));

        let mut changed = secret("a", "x");
        changed.reactions = ReactionTally::new(1, 0, 0);
        assert!(state.update_live(changed));
        assert_eq!(state.get("a").unwrap().reactions.turbio, 1);

        assert!(!state.update_live(secret("ghost", "x")));
        assert_eq!(state.items().len(), 1);
    }

    #[test]
    fn content_is_revealed_on_every_path() {
        let encoded = lovisec_crypto::obfuscate("hola").unwrap();
        let mut hidden = secret("a", "plaintext");
        hidden.encrypted_content = Some(encoded.clone());

        let mut state = FeedState::new(10);
        state.begin_initial();
        state.finish_initial(vec![hidden.clone()]);
        assert_eq!(state.get("a").unwrap().content, "hola");

        let mut live = secret("b", "plaintext");
        live.encrypted_content = Some(encoded);
        state.insert_live(live);
        assert_eq!(state.get("b").unwrap().content, "hola");
    }

    #[test]
    fn updates_keep_the_joined_author() {
        let author = Profile {
            id: "u1".into(),
            username: "luna".into(),
            avatar_seed: "seed".into(),
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        };
        let mut joined = secret("a", "x");
        joined.user_id = Some("u1".into());
        joined.profile = Some(author.clone());

        let mut state = FeedState::new(10);
        state.begin_initial();
        state.finish_initial(vec![joined]);

        let mut bare = secret("a", "x");
        bare.user_id = Some("u1".into());
        bare.reactions = ReactionTally::new(0, 1, 0);
        assert!(state.update_live(bare.clone()));
        assert_eq!(state.get("a").unwrap().profile.as_ref(), Some(&author));
        assert_eq!(state.get("a").unwrap().reactions.impresionante, 1);

        // A different author never inherits the old profile.
        bare.user_id = Some("u2".into());
        state.insert_live(bare);
        assert_eq!(state.get("a").unwrap().profile, None);
    }
}
