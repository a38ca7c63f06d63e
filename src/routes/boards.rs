use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{post, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::board::events::BoardEvent;
use crate::board::models::*;
use crate::error::{AppError, AppResult};
use crate::extractors::Viewer;
use crate::realtime::snapshot::build_initial_view;
use crate::routes::{publish, require_moderator, require_participant};
use crate::state::AppState;

// --- Requests ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBoardRequest {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
    /// Display name of the creating user
    pub owner_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateColumnRequest {
    pub name: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

#[derive(Deserialize)]
pub struct JoinRequestBody {
    pub name: String,
}

#[derive(Deserialize)]
pub struct RoleUpdate {
    pub role: Role,
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/boards", post(create_board))
        .route(
            "/boards/{board}",
            put(update_board).get(get_board).delete(delete_board),
        )
        .route("/boards/{board}/participants", post(join_board))
        .route("/boards/{board}/participants/{user}", put(update_role))
        .route("/boards/{board}/columns", post(create_column))
        .route("/boards/{board}/columns/{column}", put(update_column))
}

// --- Handlers ---

async fn create_board(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Json(req): Json<CreateBoardRequest>,
) -> AppResult<(StatusCode, Json<Board>)> {
    let board = Board::new(BoardId::generate(), req.name);
    state.store.create_board(&board).await?;
    state
        .store
        .upsert_participant(&Participant::new(board.id, user, req.owner_name, Role::Owner))
        .await?;
    for name in &req.columns {
        state.store.create_column(board.id, name, true).await?;
    }

    tracing::info!(board = %board.id, owner = %user, "Board created");
    Ok((StatusCode::CREATED, Json(board)))
}

async fn get_board(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path(board): Path<BoardId>,
) -> AppResult<Json<InitialView>> {
    require_participant(&state, board, user).await?;
    let full = state.store.get_full_board(board).await?;
    Ok(Json(build_initial_view(&full, user)))
}

/// Settings change: the new settings go out first, then a notes resync so
/// participants' note visibility catches up.
async fn update_board(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path(board): Path<BoardId>,
    Json(settings): Json<BoardSettings>,
) -> AppResult<Json<Board>> {
    require_moderator(&state, board, user).await?;
    let updated = state.store.update_board(board, &settings).await?;
    publish(&state, board, BoardEvent::BoardUpdated(updated.clone())).await?;

    if settings.affects_note_visibility() {
        let notes = state.store.list_notes(board).await?;
        publish(&state, board, BoardEvent::NotesSync(notes)).await?;
    }
    Ok(Json(updated))
}

async fn delete_board(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path(board): Path<BoardId>,
) -> AppResult<StatusCode> {
    let participant = require_participant(&state, board, user).await?;
    if participant.role != Role::Owner {
        return Err(AppError::Forbidden);
    }
    state.store.delete_board(board).await?;
    publish(&state, board, BoardEvent::BoardDeleted).await?;
    tracing::info!(%board, "Board deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn join_board(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path(board): Path<BoardId>,
    Json(req): Json<JoinRequestBody>,
) -> AppResult<(StatusCode, Json<Participant>)> {
    if let Some(existing) = state.store.get_participant(board, user).await? {
        return Ok((StatusCode::OK, Json(existing)));
    }
    state.store.get_board(board).await?;

    let participant = Participant::new(board, user, req.name, Role::Participant);
    state.store.upsert_participant(&participant).await?;
    publish(
        &state,
        board,
        BoardEvent::ParticipantCreated(participant.clone()),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(participant)))
}

async fn update_role(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path((board, target)): Path<(BoardId, UserId)>,
    Json(req): Json<RoleUpdate>,
) -> AppResult<Json<Participant>> {
    require_moderator(&state, board, user).await?;
    let mut participant = require_participant(&state, board, target).await?;
    // ownership is not transferable through this route
    if participant.role == Role::Owner || req.role == Role::Owner {
        return Err(AppError::Forbidden);
    }

    participant.role = req.role;
    state.store.upsert_participant(&participant).await?;
    publish(
        &state,
        board,
        BoardEvent::ParticipantUpdated(participant.clone()),
    )
    .await?;
    Ok(Json(participant))
}

async fn create_column(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path(board): Path<BoardId>,
    Json(req): Json<CreateColumnRequest>,
) -> AppResult<(StatusCode, Json<Column>)> {
    require_moderator(&state, board, user).await?;
    let column = state.store.create_column(board, &req.name, req.visible).await?;
    let columns = state.store.get_full_board(board).await?.columns;
    publish(&state, board, BoardEvent::ColumnsUpdated(columns)).await?;
    Ok((StatusCode::CREATED, Json(column)))
}

async fn update_column(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path((board, column)): Path<(BoardId, ColumnId)>,
    Json(update): Json<ColumnUpdate>,
) -> AppResult<Json<Vec<Column>>> {
    require_moderator(&state, board, user).await?;
    let columns = state.store.update_column(board, column, &update).await?;
    publish(&state, board, BoardEvent::ColumnsUpdated(columns.clone())).await?;

    if update.visible.is_some() {
        let notes = state.store.list_notes(board).await?;
        publish(&state, board, BoardEvent::NotesSync(notes)).await?;
    }
    Ok(Json(columns))
}
