use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{post, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::board::events::BoardEvent;
use crate::board::models::*;
use crate::error::{AppError, AppResult};
use crate::extractors::Viewer;
use crate::routes::{publish, require_participant};
use crate::state::AppState;

// --- Requests ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRequest {
    pub reaction_type: ReactionType,
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/boards/{board}/notes/{note}/reactions", post(add_reaction))
        .route(
            "/boards/{board}/reactions/{reaction}",
            put(update_reaction).delete(delete_reaction),
        )
}

// --- Handlers ---

async fn add_reaction(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path((board, note)): Path<(BoardId, NoteId)>,
    Json(req): Json<ReactionRequest>,
) -> AppResult<(StatusCode, Json<Reaction>)> {
    require_participant(&state, board, user).await?;
    let reaction = Reaction {
        id: ReactionId::generate(),
        note,
        user,
        reaction_type: req.reaction_type,
    };
    state.store.add_reaction(board, &reaction).await?;
    publish(&state, board, BoardEvent::ReactionAdded(reaction.clone())).await?;
    Ok((StatusCode::CREATED, Json(reaction)))
}

/// Reactions belong to whoever left them; moderators get no override.
async fn require_own(
    state: &AppState,
    board: BoardId,
    reaction: ReactionId,
    user: UserId,
) -> AppResult<()> {
    require_participant(state, board, user).await?;
    let current = state.store.get_reaction(board, reaction).await?;
    if current.user != user {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

async fn update_reaction(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path((board, reaction)): Path<(BoardId, ReactionId)>,
    Json(req): Json<ReactionRequest>,
) -> AppResult<Json<Reaction>> {
    require_own(&state, board, reaction, user).await?;
    let updated = state
        .store
        .update_reaction(board, reaction, req.reaction_type)
        .await?;
    publish(&state, board, BoardEvent::ReactionUpdated(updated.clone())).await?;
    Ok(Json(updated))
}

async fn delete_reaction(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path((board, reaction)): Path<(BoardId, ReactionId)>,
) -> AppResult<StatusCode> {
    require_own(&state, board, reaction, user).await?;
    state.store.delete_reaction(board, reaction).await?;
    publish(&state, board, BoardEvent::ReactionDeleted(reaction)).await?;
    Ok(StatusCode::NO_CONTENT)
}
