// Domain types - plain data, no I/O
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Fresh time-ordered identifier
            pub fn generate() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn nil() -> Self {
                Self(Uuid::nil())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

id_type!(BoardId);
id_type!(ColumnId);
id_type!(NoteId);
id_type!(
    /// Identity of a person; the nil value marks an anonymized author.
    UserId
);
id_type!(VotingId);
id_type!(ReactionId);

/// Raised when a stored enum tag does not match any known variant
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $tag:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $tag,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($tag => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessPolicy {
    Public,
    ByPassphrase,
    ByInvite,
}

string_enum!(AccessPolicy, "access policy", {
    Public => "PUBLIC",
    ByPassphrase => "BY_PASSPHRASE",
    ByInvite => "BY_INVITE",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: BoardId,
    pub name: Option<String>,
    pub access_policy: AccessPolicy,
    pub show_authors: bool,
    pub show_notes_of_other_users: bool,
    pub show_note_reactions: bool,
    pub allow_stacking: bool,
    pub is_locked: bool,
}

impl Board {
    /// A public board with every visibility toggle switched on.
    pub fn new(id: BoardId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: Some(name.into()),
            access_policy: AccessPolicy::Public,
            show_authors: true,
            show_notes_of_other_users: true,
            show_note_reactions: true,
            allow_stacking: true,
            is_locked: false,
        }
    }

    pub fn apply(&mut self, settings: &BoardSettings) {
        if let Some(name) = &settings.name {
            self.name = Some(name.clone());
        }
        if let Some(policy) = settings.access_policy {
            self.access_policy = policy;
        }
        if let Some(v) = settings.show_authors {
            self.show_authors = v;
        }
        if let Some(v) = settings.show_notes_of_other_users {
            self.show_notes_of_other_users = v;
        }
        if let Some(v) = settings.show_note_reactions {
            self.show_note_reactions = v;
        }
        if let Some(v) = settings.allow_stacking {
            self.allow_stacking = v;
        }
        if let Some(v) = settings.is_locked {
            self.is_locked = v;
        }
    }
}

/// Partial update of a board's settings; absent fields stay as they are.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BoardSettings {
    pub name: Option<String>,
    pub access_policy: Option<AccessPolicy>,
    pub show_authors: Option<bool>,
    pub show_notes_of_other_users: Option<bool>,
    pub show_note_reactions: Option<bool>,
    pub allow_stacking: Option<bool>,
    pub is_locked: Option<bool>,
}

impl BoardSettings {
    /// Settings that change what participants are allowed to see.
    pub fn affects_note_visibility(&self) -> bool {
        self.show_authors.is_some() || self.show_notes_of_other_users.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Participant,
    Moderator,
    Owner,
}

string_enum!(Role, "role", {
    Participant => "PARTICIPANT",
    Moderator => "MODERATOR",
    Owner => "OWNER",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user: UserId,
    pub board: BoardId,
    pub name: String,
    pub role: Role,
    pub connected: bool,
    pub ready: bool,
    pub raised_hand: bool,
    pub show_hidden_columns: bool,
}

impl Participant {
    pub fn new(board: BoardId, user: UserId, name: impl Into<String>, role: Role) -> Self {
        Self {
            user,
            board,
            name: name.into(),
            role,
            connected: false,
            ready: false,
            raised_hand: false,
            show_hidden_columns: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: ColumnId,
    pub board: BoardId,
    pub name: String,
    pub visible: bool,
    pub index: u32,
}

/// Partial update of a column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColumnUpdate {
    pub name: Option<String>,
    pub visible: Option<bool>,
    pub index: Option<u32>,
}

/// Where a note sits: its column, the stack root it belongs to (if any),
/// and its zero-based rank inside that grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePosition {
    pub column: ColumnId,
    pub stack: Option<NoteId>,
    pub rank: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    pub author: UserId,
    pub text: String,
    pub edited: bool,
    pub position: NotePosition,
}

impl Note {
    pub fn is_stack_root(&self) -> bool {
        self.position.stack.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VotingStatus {
    Open,
    Closed,
}

string_enum!(VotingStatus, "voting status", {
    Open => "OPEN",
    Closed => "CLOSED",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingResultsPerNote {
    pub total: u32,
}

/// Aggregated outcome of a closed voting: per-note counts only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingResults {
    pub total: u32,
    pub votes: BTreeMap<NoteId, VotingResultsPerNote>,
}

impl VotingResults {
    pub fn from_counts(counts: impl IntoIterator<Item = (NoteId, u32)>) -> Self {
        let votes: BTreeMap<_, _> = counts
            .into_iter()
            .filter(|(_, total)| *total > 0)
            .map(|(note, total)| (note, VotingResultsPerNote { total }))
            .collect();
        let total = votes.values().map(|v| v.total).sum();
        Self { total, votes }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voting {
    pub id: VotingId,
    pub board: BoardId,
    pub vote_limit: u32,
    pub allow_multiple_votes: bool,
    pub show_votes_of_others: bool,
    pub status: VotingStatus,
    pub results: Option<VotingResults>,
    pub created_at: DateTime<Utc>,
}

impl Voting {
    pub fn is_open(&self) -> bool {
        self.status == VotingStatus::Open
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VotingSettings {
    pub vote_limit: u32,
    pub allow_multiple_votes: bool,
    pub show_votes_of_others: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub voting: VotingId,
    pub note: NoteId,
    pub user: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionType {
    Thinking,
    Heart,
    Like,
    Dislike,
    Joy,
    Celebration,
    Poop,
}

string_enum!(ReactionType, "reaction", {
    Thinking => "thinking",
    Heart => "heart",
    Like => "like",
    Dislike => "dislike",
    Joy => "joy",
    Celebration => "celebration",
    Poop => "poop",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub id: ReactionId,
    pub note: NoteId,
    pub user: UserId,
    pub reaction_type: ReactionType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

string_enum!(RequestStatus, "request status", {
    Pending => "PENDING",
    Accepted => "ACCEPTED",
    Rejected => "REJECTED",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub user: UserId,
    pub board: BoardId,
    pub status: RequestStatus,
}

/// Everything a viewer needs to render a board.
///
/// Loaded unfiltered from storage; the initial view sent to a viewer has the
/// same shape after authorization reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullBoard {
    pub board: Board,
    pub participants: Vec<Participant>,
    pub columns: Vec<Column>,
    pub notes: Vec<Note>,
    pub reactions: Vec<Reaction>,
    pub votings: Vec<Voting>,
    pub votes: Vec<Vote>,
    pub requests: Vec<JoinRequest>,
}

/// Per-viewer reduction of a [`FullBoard`]
pub type InitialView = FullBoard;
