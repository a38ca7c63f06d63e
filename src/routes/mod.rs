pub mod boards;
pub mod notes;
pub mod reactions;
pub mod votings;
pub mod ws;

use axum::Router;

use crate::board::events::BoardEvent;
use crate::board::models::{Board, BoardId, Participant, UserId};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(boards::router())
        .merge(notes::router())
        .merge(reactions::router())
        .merge(votings::router())
        .merge(ws::router())
}

// --- Shared helpers ---

/// The caller's participant record, or 403.
async fn require_participant(
    state: &AppState,
    board: BoardId,
    user: UserId,
) -> AppResult<Participant> {
    state
        .store
        .get_participant(board, user)
        .await?
        .ok_or(AppError::Forbidden)
}

async fn require_moderator(
    state: &AppState,
    board: BoardId,
    user: UserId,
) -> AppResult<Participant> {
    let participant = require_participant(state, board, user).await?;
    if participant.role.is_moderator() {
        Ok(participant)
    } else {
        Err(AppError::Forbidden)
    }
}

/// Locked boards only accept note changes from moderators.
fn ensure_unlocked(board: &Board, participant: &Participant) -> AppResult<()> {
    if board.is_locked && !participant.role.is_moderator() {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

async fn publish(state: &AppState, board: BoardId, event: BoardEvent) -> AppResult<()> {
    tracing::debug!(%board, kind = event.kind(), "Publishing board event");
    state.broker.publish_event(board, &event).await?;
    Ok(())
}
