use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{post, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::board::events::BoardEvent;
use crate::board::models::*;
use crate::error::AppResult;
use crate::extractors::Viewer;
use crate::routes::{publish, require_moderator, require_participant};
use crate::state::AppState;

// --- Requests ---

#[derive(Deserialize)]
pub struct VoteRequest {
    pub note: NoteId,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct RevokeQuery {
    /// Revoke one vote on this note; without it every vote of the caller goes
    pub note: Option<NoteId>,
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/boards/{board}/votings", post(create_voting))
        .route("/boards/{board}/votings/{voting}", put(close_voting))
        .route(
            "/boards/{board}/votings/{voting}/votes",
            post(add_vote).delete(revoke_votes),
        )
}

// --- Handlers ---

async fn create_voting(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path(board): Path<BoardId>,
    Json(settings): Json<VotingSettings>,
) -> AppResult<(StatusCode, Json<Voting>)> {
    require_moderator(&state, board, user).await?;
    let voting = state.store.create_voting(board, &settings).await?;
    publish(&state, board, BoardEvent::VotingCreated(voting.clone())).await?;
    Ok((StatusCode::CREATED, Json(voting)))
}

async fn close_voting(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path((board, voting)): Path<(BoardId, VotingId)>,
) -> AppResult<Json<Voting>> {
    require_moderator(&state, board, user).await?;
    let update = state.store.close_voting(board, voting).await?;
    let closed = update.voting.clone();
    publish(&state, board, BoardEvent::VotingUpdated(update)).await?;
    Ok(Json(closed))
}

/// Votes are private while a voting is open, so adding one publishes nothing.
async fn add_vote(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path((board, voting)): Path<(BoardId, VotingId)>,
    Json(req): Json<VoteRequest>,
) -> AppResult<(StatusCode, Json<Vote>)> {
    require_participant(&state, board, user).await?;
    let vote = Vote {
        voting,
        note: req.note,
        user,
    };
    state.store.add_vote(board, &vote).await?;
    Ok((StatusCode::CREATED, Json(vote)))
}

async fn revoke_votes(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path((board, voting)): Path<(BoardId, VotingId)>,
    Query(query): Query<RevokeQuery>,
) -> AppResult<Json<Vec<Vote>>> {
    require_participant(&state, board, user).await?;
    let removed = match query.note {
        Some(note) => {
            state
                .store
                .remove_vote(board, &Vote { voting, note, user })
                .await?
        }
        None => state.store.delete_votes(board, voting, user).await?,
    };

    if !removed.is_empty() {
        publish(&state, board, BoardEvent::VotesDeleted(removed.clone())).await?;
    }
    Ok(Json(removed))
}
