use std::sync::Arc;

use tracing::{debug, error, warn};

use lovisec_store::ReactionRecord;
use lovisec_types::api::Table;
use lovisec_types::models::{ReactionKind, ReactionTally};

use crate::backend::Backend;
use crate::error::Result;

/// Result of applying one reaction click to a tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactionOutcome {
    pub tally: ReactionTally,
    /// The viewer's reaction after the click; `None` after a toggle-off.
    pub recorded: Option<ReactionKind>,
}

/// Move the viewer's single reaction to `requested`.
///
/// The previous reaction (if any) is withdrawn first, floored at zero.
/// Clicking the reaction already held only withdraws it.
pub fn apply_reaction(
    mut tally: ReactionTally,
    previous: Option<ReactionKind>,
    requested: ReactionKind,
) -> ReactionOutcome {
    if let Some(prev) = previous {
        let count = tally.get_mut(prev);
        *count = count.saturating_sub(1);
    }

    if previous == Some(requested) {
        return ReactionOutcome {
            tally,
            recorded: None,
        };
    }

    let count = tally.get_mut(requested);
    *count = count.saturating_add(1);
    ReactionOutcome {
        tally,
        recorded: Some(requested),
    }
}

/// Applies reactions for one feed: computes the new tally, writes it to the
/// backend, then records the viewer's choice locally.
///
/// The whole tally is overwritten on every click, so two viewers reacting to
/// the same item at once can lose one of the updates.
pub struct ReactionController<B> {
    backend: Arc<B>,
    table: Table,
    record: ReactionRecord,
}

impl<B: Backend> ReactionController<B> {
    pub fn new(backend: Arc<B>, table: Table, record: ReactionRecord) -> Self {
        Self {
            backend,
            table,
            record,
        }
    }

    /// The viewer's current reaction to `item_id`.
    pub fn recorded(&self, item_id: &str) -> Option<ReactionKind> {
        self.record.get(item_id)
    }

    /// Apply `kind` to the item whose current tally is `current` and return
    /// the persisted tally. Nothing local changes unless the backend accepts
    /// the write.
    pub async fn toggle(
        &mut self,
        item_id: &str,
        current: &ReactionTally,
        kind: ReactionKind,
    ) -> Result<ReactionOutcome> {
        let outcome = apply_reaction(*current, self.record.get(item_id), kind);

        if let Err(e) = self
            .backend
            .update_reactions(self.table, item_id, &outcome.tally)
            .await
        {
            error!("Failed to save reaction on {} {}: {}", self.table, item_id, e);
            return Err(e);
        }

        if let Err(e) = self.record.record(item_id, outcome.recorded) {
            warn!("Reaction on {} saved but not remembered locally: {}", item_id, e);
        }

        debug!(
            "{} {} reaction now {:?}",
            self.table, item_id, outcome.recorded
        );
        Ok(outcome)
    }
}
