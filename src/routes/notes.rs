use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{post, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::board::events::{BoardEvent, NoteDeleted};
use crate::board::models::*;
use crate::db::repository::NoteUpdate;
use crate::error::{AppError, AppResult};
use crate::extractors::Viewer;
use crate::routes::{ensure_unlocked, publish, require_participant};
use crate::state::AppState;

// --- Requests ---

#[derive(Deserialize)]
pub struct CreateNoteRequest {
    pub column: ColumnId,
    pub text: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteNoteQuery {
    pub delete_stack: bool,
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/boards/{board}/notes", post(create_note))
        .route(
            "/boards/{board}/notes/{note}",
            put(update_note).delete(delete_note),
        )
}

// --- Handlers ---

async fn create_note(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path(board): Path<BoardId>,
    Json(req): Json<CreateNoteRequest>,
) -> AppResult<(StatusCode, Json<Note>)> {
    let participant = require_participant(&state, board, user).await?;
    ensure_unlocked(&state.store.get_board(board).await?, &participant)?;

    let (note, notes) = state
        .store
        .create_note(board, user, req.column, &req.text)
        .await?;
    publish(&state, board, BoardEvent::NotesUpdated(notes)).await?;
    Ok((StatusCode::CREATED, Json(note)))
}

/// Edit text and/or move. Only the author or a moderator may edit text;
/// anyone on the board may move notes unless stacking is disabled.
async fn update_note(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path((board, note)): Path<(BoardId, NoteId)>,
    Json(update): Json<NoteUpdate>,
) -> AppResult<Json<Vec<Note>>> {
    let participant = require_participant(&state, board, user).await?;
    let settings = state.store.get_board(board).await?;
    ensure_unlocked(&settings, &participant)?;

    let moderator = participant.role.is_moderator();
    if update.text.is_some() && !moderator {
        let current = state.store.list_notes(board).await?;
        let author = current
            .iter()
            .find(|n| n.id == note)
            .map(|n| n.author)
            .ok_or(AppError::NotFound)?;
        if author != user {
            return Err(AppError::Forbidden);
        }
    }
    let stacking = update.position.is_some_and(|p| p.stack.is_some());
    if stacking && !settings.allow_stacking && !moderator {
        return Err(AppError::Forbidden);
    }

    let notes = state.store.update_note(board, note, &update).await?;
    publish(&state, board, BoardEvent::NotesUpdated(notes.clone())).await?;
    Ok(Json(notes))
}

async fn delete_note(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path((board, note)): Path<(BoardId, NoteId)>,
    Query(query): Query<DeleteNoteQuery>,
) -> AppResult<StatusCode> {
    let participant = require_participant(&state, board, user).await?;
    ensure_unlocked(&state.store.get_board(board).await?, &participant)?;

    if !participant.role.is_moderator() {
        let current = state.store.list_notes(board).await?;
        match current.iter().find(|n| n.id == note) {
            Some(n) if n.author == user => {}
            Some(_) => return Err(AppError::Forbidden),
            None => return Err(AppError::NotFound),
        }
    }

    let deletion = state
        .store
        .delete_note(board, note, query.delete_stack)
        .await?;

    publish(
        &state,
        board,
        BoardEvent::NoteDeleted(NoteDeleted {
            note,
            delete_stack: query.delete_stack,
        }),
    )
    .await?;
    publish(&state, board, BoardEvent::NotesUpdated(deletion.notes)).await?;
    if !deletion.votes.is_empty() {
        publish(&state, board, BoardEvent::VotesDeleted(deletion.votes)).await?;
    }

    tracing::debug!(%board, %note, removed = deletion.removed.len(), "Note deleted");
    Ok(StatusCode::NO_CONTENT)
}
