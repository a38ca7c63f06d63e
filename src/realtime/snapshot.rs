// Initial board state: where it is loaded from and how it is reduced per viewer
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use crate::board::authz;
use crate::board::models::*;
use crate::db::{BoardStore, StoreError};
use crate::realtime::filter::{restrict_results, NoteVisibility};

/// Loads the full state of a board. The hub only calls this once the board's
/// upstream subscription exists, so nothing published afterwards is missed.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn load(&self, board: BoardId) -> Result<FullBoard, StoreError>;
}

pub struct StoreSnapshots {
    store: Arc<dyn BoardStore>,
}

impl StoreSnapshots {
    pub fn new(store: Arc<dyn BoardStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SnapshotSource for StoreSnapshots {
    async fn load(&self, board: BoardId) -> Result<FullBoard, StoreError> {
        self.store.get_full_board(board).await
    }
}

/// Reduce a full board to what `viewer` may see on connect.
///
/// Only the most recent voting is kept. Its votes are kept when the voting
/// is closed, or when they belong to the viewer. Moderators get everything
/// else untouched; participants additionally get the note visibility rules,
/// visible columns only, results recomputed over the notes they can see,
/// other voters' ids replaced by the nil id, and no join requests.
pub fn build_initial_view(full: &FullBoard, viewer: UserId) -> InitialView {
    let latest = full.votings.iter().max_by_key(|v| v.created_at).cloned();
    let votes = match &latest {
        Some(voting) => full
            .votes
            .iter()
            .filter(|vote| vote.voting == voting.id && (!voting.is_open() || vote.user == viewer))
            .copied()
            .collect(),
        None => Vec::new(),
    };

    let mut view = InitialView {
        board: full.board.clone(),
        participants: full.participants.clone(),
        columns: full.columns.clone(),
        notes: full.notes.clone(),
        reactions: full.reactions.clone(),
        votings: latest.into_iter().collect(),
        votes,
        requests: full.requests.clone(),
    };

    if authz::is_moderator(viewer, &full.participants) {
        return view;
    }

    let visibility = NoteVisibility::new(viewer, &full.board, &full.columns);
    view.columns.retain(|c| c.visible);
    view.notes = visibility.apply(&full.notes);

    let surviving: HashSet<NoteId> = view.notes.iter().map(|n| n.id).collect();
    for voting in &mut view.votings {
        if let Some(results) = &voting.results {
            voting.results = Some(restrict_results(results, &surviving));
        }
    }
    view.votes.retain(|v| surviving.contains(&v.note));
    for vote in &mut view.votes {
        if vote.user != viewer {
            vote.user = UserId::nil();
        }
    }
    view.reactions.retain(|r| surviving.contains(&r.note));
    view.requests.clear();

    view
}
