use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::board::models::*;

/// Envelope carried by the publish/subscribe transport: a type tag plus an
/// untyped payload. Decoded into [`BoardEvent`] exactly once, at the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBoardEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl RawBoardEvent {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("malformed {kind} event: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDeleted {
    pub note: NoteId,
    pub delete_stack: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingUpdate {
    pub voting: Voting,
    pub notes: Vec<Note>,
}

/// Every event a board can emit, each with its typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BoardEvent {
    /// Outbound only: the per-viewer initial state.
    BoardInit(Box<InitialView>),
    BoardUpdated(Board),
    BoardDeleted,
    ColumnsUpdated(Vec<Column>),
    ColumnDeleted(ColumnId),
    NotesUpdated(Vec<Note>),
    NotesSync(Vec<Note>),
    NoteDeleted(NoteDeleted),
    ParticipantCreated(Participant),
    ParticipantUpdated(Participant),
    ParticipantsUpdated(Vec<Participant>),
    ReactionAdded(Reaction),
    ReactionUpdated(Reaction),
    ReactionDeleted(ReactionId),
    VotingCreated(Voting),
    VotingUpdated(VotingUpdate),
    VotesDeleted(Vec<Vote>),
    RequestCreated(JoinRequest),
    RequestUpdated(JoinRequest),
}

impl BoardEvent {
    /// Wire tag of this event
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BoardInit(_) => "BOARD_INIT",
            Self::BoardUpdated(_) => "BOARD_UPDATED",
            Self::BoardDeleted => "BOARD_DELETED",
            Self::ColumnsUpdated(_) => "COLUMNS_UPDATED",
            Self::ColumnDeleted(_) => "COLUMN_DELETED",
            Self::NotesUpdated(_) => "NOTES_UPDATED",
            Self::NotesSync(_) => "NOTES_SYNC",
            Self::NoteDeleted(_) => "NOTE_DELETED",
            Self::ParticipantCreated(_) => "PARTICIPANT_CREATED",
            Self::ParticipantUpdated(_) => "PARTICIPANT_UPDATED",
            Self::ParticipantsUpdated(_) => "PARTICIPANTS_UPDATED",
            Self::ReactionAdded(_) => "REACTION_ADDED",
            Self::ReactionUpdated(_) => "REACTION_UPDATED",
            Self::ReactionDeleted(_) => "REACTION_DELETED",
            Self::VotingCreated(_) => "VOTING_CREATED",
            Self::VotingUpdated(_) => "VOTING_UPDATED",
            Self::VotesDeleted(_) => "VOTES_DELETED",
            Self::RequestCreated(_) => "REQUEST_CREATED",
            Self::RequestUpdated(_) => "REQUEST_UPDATED",
        }
    }

    pub fn encode(&self) -> Result<RawBoardEvent, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        let data = value
            .as_object_mut()
            .and_then(|obj| obj.remove("data"))
            .unwrap_or(Value::Null);
        Ok(RawBoardEvent::new(self.kind(), data))
    }

    pub fn decode(raw: RawBoardEvent) -> Result<Self, EventDecodeError> {
        let RawBoardEvent { kind, data } = raw;
        let mut envelope = serde_json::Map::with_capacity(2);
        envelope.insert("type".to_string(), Value::String(kind.clone()));
        if !data.is_null() {
            envelope.insert("data".to_string(), data);
        }
        serde_json::from_value(Value::Object(envelope))
            .map_err(|source| EventDecodeError::Malformed { kind, source })
    }
}
