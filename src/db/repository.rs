// Repository pattern - isolates all database side effects
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::board::events::VotingUpdate;
use crate::board::models::*;
use crate::board::ranks::{self, NewNote, RankError};
use crate::state::DbPool;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid position: {0}")]
    Position(#[from] RankError),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Edit of a note's text and/or position
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NoteUpdate {
    pub text: Option<String>,
    pub position: Option<NotePosition>,
}

/// Outcome of a note deletion: what went away and the surviving notes.
#[derive(Debug, Clone)]
pub struct NoteDeletion {
    pub removed: Vec<NoteId>,
    pub notes: Vec<Note>,
    /// Votes that were cast on the removed notes
    pub votes: Vec<Vote>,
}

/// Persistence collaborator for boards and everything on them.
///
/// Note mutations return the board's complete post-state note list, which is
/// what gets published as `NOTES_UPDATED`.
#[async_trait]
pub trait BoardStore: Send + Sync {
    async fn get_full_board(&self, board: BoardId) -> Result<FullBoard, StoreError>;

    async fn get_board(&self, board: BoardId) -> Result<Board, StoreError>;

    /// Notes in the given columns; an empty filter means every column.
    async fn get_notes(&self, board: BoardId, columns: &[ColumnId])
        -> Result<Vec<Note>, StoreError>;

    async fn list_notes(&self, board: BoardId) -> Result<Vec<Note>, StoreError> {
        self.get_notes(board, &[]).await
    }

    async fn get_participant(
        &self,
        board: BoardId,
        user: UserId,
    ) -> Result<Option<Participant>, StoreError>;

    async fn create_board(&self, board: &Board) -> Result<(), StoreError>;

    async fn delete_board(&self, board: BoardId) -> Result<(), StoreError>;

    async fn update_board(
        &self,
        board: BoardId,
        settings: &BoardSettings,
    ) -> Result<Board, StoreError>;

    async fn create_column(
        &self,
        board: BoardId,
        name: &str,
        visible: bool,
    ) -> Result<Column, StoreError>;

    /// Returns the board's full column list after the update.
    async fn update_column(
        &self,
        board: BoardId,
        column: ColumnId,
        update: &ColumnUpdate,
    ) -> Result<Vec<Column>, StoreError>;

    async fn upsert_participant(&self, participant: &Participant) -> Result<(), StoreError>;

    async fn set_participant_connected(
        &self,
        board: BoardId,
        user: UserId,
        connected: bool,
    ) -> Result<Participant, StoreError>;

    async fn create_note(
        &self,
        board: BoardId,
        author: UserId,
        column: ColumnId,
        text: &str,
    ) -> Result<(Note, Vec<Note>), StoreError>;

    async fn update_note(
        &self,
        board: BoardId,
        note: NoteId,
        update: &NoteUpdate,
    ) -> Result<Vec<Note>, StoreError>;

    async fn delete_note(
        &self,
        board: BoardId,
        note: NoteId,
        delete_stack: bool,
    ) -> Result<NoteDeletion, StoreError>;

    async fn get_reaction(&self, board: BoardId, reaction: ReactionId)
        -> Result<Reaction, StoreError>;

    async fn add_reaction(&self, board: BoardId, reaction: &Reaction) -> Result<(), StoreError>;

    async fn update_reaction(
        &self,
        board: BoardId,
        reaction: ReactionId,
        reaction_type: ReactionType,
    ) -> Result<Reaction, StoreError>;

    async fn delete_reaction(
        &self,
        board: BoardId,
        reaction: ReactionId,
    ) -> Result<Reaction, StoreError>;

    async fn create_voting(
        &self,
        board: BoardId,
        settings: &VotingSettings,
    ) -> Result<Voting, StoreError>;

    /// Close an open voting and aggregate its results.
    async fn close_voting(
        &self,
        board: BoardId,
        voting: VotingId,
    ) -> Result<VotingUpdate, StoreError>;

    async fn add_vote(&self, board: BoardId, vote: &Vote) -> Result<(), StoreError>;

    /// Remove one matching vote; returns what was removed.
    async fn remove_vote(&self, board: BoardId, vote: &Vote) -> Result<Vec<Vote>, StoreError>;

    /// Revoke every vote `user` cast in `voting`.
    async fn delete_votes(
        &self,
        board: BoardId,
        voting: VotingId,
        user: UserId,
    ) -> Result<Vec<Vote>, StoreError>;
}

/// SQLite implementation
pub struct SqliteBoardStore {
    pool: DbPool,
}

impl SqliteBoardStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Load the board's notes, apply `f`, and persist whatever changed in
    /// one transaction.
    fn mutate_notes<T>(
        &self,
        board: BoardId,
        f: impl FnOnce(&Connection, &mut Vec<Note>) -> Result<T, StoreError>,
    ) -> Result<(T, Vec<Note>), StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let before = load_notes(&tx, board)?;
        let mut notes = before.clone();
        let out = f(&tx, &mut notes)?;
        debug_assert!(ranks::check_invariants(&notes).is_ok());
        persist_notes(&tx, board, &before, &notes)?;

        let notes = load_notes(&tx, board)?;
        tx.commit()?;
        Ok((out, notes))
    }
}

const BOARD_FIELDS: &str = "id, name, access_policy, show_authors, show_notes_of_other_users, \
                            show_note_reactions, allow_stacking, is_locked";

fn board_from_row(row: &Row) -> rusqlite::Result<Board> {
    Ok(Board {
        id: row.get(0)?,
        name: row.get(1)?,
        access_policy: row.get(2)?,
        show_authors: row.get(3)?,
        show_notes_of_other_users: row.get(4)?,
        show_note_reactions: row.get(5)?,
        allow_stacking: row.get(6)?,
        is_locked: row.get(7)?,
    })
}

const PARTICIPANT_FIELDS: &str =
    "user_id, board_id, name, role, connected, ready, raised_hand, show_hidden_columns";

fn participant_from_row(row: &Row) -> rusqlite::Result<Participant> {
    Ok(Participant {
        user: row.get(0)?,
        board: row.get(1)?,
        name: row.get(2)?,
        role: row.get(3)?,
        connected: row.get(4)?,
        ready: row.get(5)?,
        raised_hand: row.get(6)?,
        show_hidden_columns: row.get(7)?,
    })
}

fn column_from_row(row: &Row) -> rusqlite::Result<Column> {
    Ok(Column {
        id: row.get(0)?,
        board: row.get(1)?,
        name: row.get(2)?,
        visible: row.get(3)?,
        index: row.get(4)?,
    })
}

fn note_from_row(row: &Row) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        author: row.get(1)?,
        text: row.get(2)?,
        edited: row.get(3)?,
        position: NotePosition {
            column: row.get(4)?,
            stack: row.get(5)?,
            rank: row.get(6)?,
        },
    })
}

struct VotingRow {
    id: VotingId,
    board: BoardId,
    vote_limit: u32,
    allow_multiple_votes: bool,
    show_votes_of_others: bool,
    status: VotingStatus,
    results_json: Option<String>,
    created_at: i64,
}

impl VotingRow {
    const FIELDS: &'static str = "id, board_id, vote_limit, allow_multiple_votes, \
                                  show_votes_of_others, status, results_json, created_at";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            board: row.get(1)?,
            vote_limit: row.get(2)?,
            allow_multiple_votes: row.get(3)?,
            show_votes_of_others: row.get(4)?,
            status: row.get(5)?,
            results_json: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_voting(self) -> Result<Voting, StoreError> {
        let results = self
            .results_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let created_at = DateTime::<Utc>::from_timestamp_millis(self.created_at)
            .ok_or_else(|| StoreError::Corrupt(format!("voting {} timestamp", self.id)))?;
        Ok(Voting {
            id: self.id,
            board: self.board,
            vote_limit: self.vote_limit,
            allow_multiple_votes: self.allow_multiple_votes,
            show_votes_of_others: self.show_votes_of_others,
            status: self.status,
            results,
            created_at,
        })
    }
}

fn load_board(conn: &Connection, board: BoardId) -> Result<Board, StoreError> {
    conn.query_row(
        &format!("SELECT {BOARD_FIELDS} FROM boards WHERE id = ?1"),
        params![board],
        board_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(format!("board {board}")))
}

fn load_columns(conn: &Connection, board: BoardId) -> Result<Vec<Column>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, board_id, name, visible, idx FROM columns WHERE board_id = ?1 ORDER BY idx",
    )?;
    let columns = stmt
        .query_map(params![board], column_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

fn load_notes(conn: &Connection, board: BoardId) -> Result<Vec<Note>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT n.id, n.author_id, n.text, n.edited, n.column_id, n.stack_id, n.rank
         FROM notes n
         JOIN columns c ON c.id = n.column_id
         WHERE n.board_id = ?1
         ORDER BY c.idx, n.stack_id IS NOT NULL, n.stack_id, n.rank",
    )?;
    let notes = stmt
        .query_map(params![board], note_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(notes)
}

fn load_participant(
    conn: &Connection,
    board: BoardId,
    user: UserId,
) -> Result<Option<Participant>, StoreError> {
    let participant = conn
        .query_row(
            &format!(
                "SELECT {PARTICIPANT_FIELDS} FROM participants WHERE board_id = ?1 AND user_id = ?2"
            ),
            params![board, user],
            participant_from_row,
        )
        .optional()?;
    Ok(participant)
}

fn load_voting(
    conn: &Connection,
    board: BoardId,
    voting: VotingId,
) -> Result<Voting, StoreError> {
    conn.query_row(
        &format!(
            "SELECT {} FROM votings WHERE id = ?1 AND board_id = ?2",
            VotingRow::FIELDS
        ),
        params![voting, board],
        VotingRow::from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(format!("voting {voting}")))?
    .into_voting()
}

fn ensure_note(conn: &Connection, board: BoardId, note: NoteId) -> Result<(), StoreError> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM notes WHERE id = ?1 AND board_id = ?2",
        params![note, board],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(StoreError::NotFound(format!("note {note}")))
    }
}

fn load_reaction(
    conn: &Connection,
    board: BoardId,
    reaction: ReactionId,
) -> Result<Reaction, StoreError> {
    conn.query_row(
        "SELECT r.id, r.note_id, r.user_id, r.reaction_type
         FROM reactions r
         JOIN notes n ON n.id = r.note_id
         WHERE r.id = ?1 AND n.board_id = ?2",
        params![reaction, board],
        |row| {
            Ok(Reaction {
                id: row.get(0)?,
                note: row.get(1)?,
                user: row.get(2)?,
                reaction_type: row.get(3)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(format!("reaction {reaction}")))
}

fn ensure_column(conn: &Connection, board: BoardId, column: ColumnId) -> Result<(), StoreError> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM columns WHERE id = ?1 AND board_id = ?2",
        params![column, board],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(StoreError::NotFound(format!("column {column}")))
    }
}

fn votes_on_notes(conn: &Connection, notes: &[NoteId]) -> Result<Vec<Vote>, StoreError> {
    let mut stmt = conn.prepare("SELECT voting_id, note_id, user_id FROM votes WHERE note_id = ?1")?;
    let mut votes = Vec::new();
    for note in notes {
        let rows = stmt.query_map(params![note], |row| {
            Ok(Vote {
                voting: row.get(0)?,
                note: row.get(1)?,
                user: row.get(2)?,
            })
        })?;
        for vote in rows {
            votes.push(vote?);
        }
    }
    Ok(votes)
}

/// Write the difference between two note lists of one board.
fn persist_notes(
    conn: &Connection,
    board: BoardId,
    before: &[Note],
    after: &[Note],
) -> Result<(), StoreError> {
    let previous: HashMap<NoteId, &Note> = before.iter().map(|n| (n.id, n)).collect();
    let surviving: HashSet<NoteId> = after.iter().map(|n| n.id).collect();

    for note in before.iter().filter(|n| !surviving.contains(&n.id)) {
        conn.execute("DELETE FROM notes WHERE id = ?1", params![note.id])?;
    }

    for note in after {
        match previous.get(&note.id) {
            Some(old) if *old == note => continue,
            Some(_) => {
                conn.execute(
                    "UPDATE notes SET text = ?2, edited = ?3, column_id = ?4, stack_id = ?5, rank = ?6
                     WHERE id = ?1",
                    params![
                        note.id,
                        note.text,
                        note.edited,
                        note.position.column,
                        note.position.stack,
                        note.position.rank
                    ],
                )?;
            }
            None => {
                conn.execute(
                    "INSERT INTO notes (id, board_id, author_id, text, edited, column_id, stack_id, rank)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        note.id,
                        board,
                        note.author,
                        note.text,
                        note.edited,
                        note.position.column,
                        note.position.stack,
                        note.position.rank
                    ],
                )?;
            }
        }
    }

    Ok(())
}

#[async_trait]
impl BoardStore for SqliteBoardStore {
    async fn get_full_board(&self, board: BoardId) -> Result<FullBoard, StoreError> {
        let conn = self.pool.get()?;

        let board_row = load_board(&conn, board)?;

        let participants = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PARTICIPANT_FIELDS} FROM participants WHERE board_id = ?1 ORDER BY name"
            ))?;
            let rows = stmt.query_map(params![board], participant_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let reactions = {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.note_id, r.user_id, r.reaction_type
                 FROM reactions r
                 JOIN notes n ON n.id = r.note_id
                 WHERE n.board_id = ?1
                 ORDER BY r.created_at",
            )?;
            let rows = stmt.query_map(params![board], |row| {
                Ok(Reaction {
                    id: row.get(0)?,
                    note: row.get(1)?,
                    user: row.get(2)?,
                    reaction_type: row.get(3)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let votings = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM votings WHERE board_id = ?1 ORDER BY created_at",
                VotingRow::FIELDS
            ))?;
            let rows = stmt.query_map(params![board], VotingRow::from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(VotingRow::into_voting)
                .collect::<Result<Vec<_>, _>>()?
        };

        let votes = {
            let mut stmt = conn.prepare(
                "SELECT v.voting_id, v.note_id, v.user_id
                 FROM votes v
                 JOIN votings vt ON vt.id = v.voting_id
                 WHERE vt.board_id = ?1
                 ORDER BY v.created_at",
            )?;
            let rows = stmt.query_map(params![board], |row| {
                Ok(Vote {
                    voting: row.get(0)?,
                    note: row.get(1)?,
                    user: row.get(2)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let requests = {
            let mut stmt = conn.prepare(
                "SELECT user_id, board_id, status FROM join_requests
                 WHERE board_id = ?1 AND status = 'PENDING'
                 ORDER BY created_at",
            )?;
            let rows = stmt.query_map(params![board], |row| {
                Ok(JoinRequest {
                    user: row.get(0)?,
                    board: row.get(1)?,
                    status: row.get(2)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        Ok(FullBoard {
            board: board_row,
            participants,
            columns: load_columns(&conn, board)?,
            notes: load_notes(&conn, board)?,
            reactions,
            votings,
            votes,
            requests,
        })
    }

    async fn get_board(&self, board: BoardId) -> Result<Board, StoreError> {
        let conn = self.pool.get()?;
        load_board(&conn, board)
    }

    async fn get_notes(
        &self,
        board: BoardId,
        columns: &[ColumnId],
    ) -> Result<Vec<Note>, StoreError> {
        let conn = self.pool.get()?;
        let notes = load_notes(&conn, board)?;
        if columns.is_empty() {
            return Ok(notes);
        }
        Ok(notes
            .into_iter()
            .filter(|n| columns.contains(&n.position.column))
            .collect())
    }

    async fn get_participant(
        &self,
        board: BoardId,
        user: UserId,
    ) -> Result<Option<Participant>, StoreError> {
        let conn = self.pool.get()?;
        load_participant(&conn, board, user)
    }

    async fn create_board(&self, board: &Board) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            &format!("INSERT INTO boards ({BOARD_FIELDS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                board.id,
                board.name,
                board.access_policy,
                board.show_authors,
                board.show_notes_of_other_users,
                board.show_note_reactions,
                board.allow_stacking,
                board.is_locked
            ],
        )?;
        Ok(())
    }

    async fn delete_board(&self, board: BoardId) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let rows = conn.execute("DELETE FROM boards WHERE id = ?1", params![board])?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("board {board}")));
        }
        Ok(())
    }

    async fn update_board(
        &self,
        board: BoardId,
        settings: &BoardSettings,
    ) -> Result<Board, StoreError> {
        let conn = self.pool.get()?;
        let mut updated = load_board(&conn, board)?;
        updated.apply(settings);
        conn.execute(
            "UPDATE boards SET name = ?2, access_policy = ?3, show_authors = ?4,
                 show_notes_of_other_users = ?5, show_note_reactions = ?6,
                 allow_stacking = ?7, is_locked = ?8
             WHERE id = ?1",
            params![
                updated.id,
                updated.name,
                updated.access_policy,
                updated.show_authors,
                updated.show_notes_of_other_users,
                updated.show_note_reactions,
                updated.allow_stacking,
                updated.is_locked
            ],
        )?;
        Ok(updated)
    }

    async fn create_column(
        &self,
        board: BoardId,
        name: &str,
        visible: bool,
    ) -> Result<Column, StoreError> {
        let conn = self.pool.get()?;
        load_board(&conn, board)?;
        let index = load_columns(&conn, board)?.len() as u32;
        let column = Column {
            id: ColumnId::generate(),
            board,
            name: name.to_string(),
            visible,
            index,
        };
        conn.execute(
            "INSERT INTO columns (id, board_id, name, visible, idx) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![column.id, board, column.name, column.visible, column.index],
        )?;
        Ok(column)
    }

    async fn update_column(
        &self,
        board: BoardId,
        column: ColumnId,
        update: &ColumnUpdate,
    ) -> Result<Vec<Column>, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let mut columns = load_columns(&tx, board)?;
        let pos = columns
            .iter()
            .position(|c| c.id == column)
            .ok_or_else(|| StoreError::NotFound(format!("column {column}")))?;

        let mut target = columns.remove(pos);
        if let Some(name) = &update.name {
            target.name = name.clone();
        }
        if let Some(visible) = update.visible {
            target.visible = visible;
        }
        // indices stay contiguous: reinsert at the requested slot and renumber
        let slot = update
            .index
            .map(|i| (i as usize).min(columns.len()))
            .unwrap_or(pos);
        columns.insert(slot, target);

        for (i, c) in columns.iter_mut().enumerate() {
            c.index = i as u32;
            tx.execute(
                "UPDATE columns SET name = ?2, visible = ?3, idx = ?4 WHERE id = ?1",
                params![c.id, c.name, c.visible, c.index],
            )?;
        }

        tx.commit()?;
        Ok(columns)
    }

    async fn upsert_participant(&self, participant: &Participant) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            &format!(
                "INSERT INTO participants ({PARTICIPANT_FIELDS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(board_id, user_id) DO UPDATE SET
                   name = excluded.name,
                   role = excluded.role,
                   connected = excluded.connected,
                   ready = excluded.ready,
                   raised_hand = excluded.raised_hand,
                   show_hidden_columns = excluded.show_hidden_columns"
            ),
            params![
                participant.user,
                participant.board,
                participant.name,
                participant.role,
                participant.connected,
                participant.ready,
                participant.raised_hand,
                participant.show_hidden_columns
            ],
        )?;
        Ok(())
    }

    async fn set_participant_connected(
        &self,
        board: BoardId,
        user: UserId,
        connected: bool,
    ) -> Result<Participant, StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE participants SET connected = ?3 WHERE board_id = ?1 AND user_id = ?2",
            params![board, user, connected],
        )?;
        load_participant(&conn, board, user)?
            .ok_or_else(|| StoreError::NotFound(format!("participant {user}")))
    }

    async fn create_note(
        &self,
        board: BoardId,
        author: UserId,
        column: ColumnId,
        text: &str,
    ) -> Result<(Note, Vec<Note>), StoreError> {
        self.mutate_notes(board, |conn, notes| {
            ensure_column(conn, board, column)?;
            Ok(ranks::create_note(
                notes,
                NewNote {
                    id: NoteId::generate(),
                    author,
                    column,
                    text: text.to_string(),
                },
            ))
        })
    }

    async fn update_note(
        &self,
        board: BoardId,
        note: NoteId,
        update: &NoteUpdate,
    ) -> Result<Vec<Note>, StoreError> {
        let (_, notes) = self.mutate_notes(board, |conn, notes| {
            let current = notes
                .iter_mut()
                .find(|n| n.id == note)
                .ok_or_else(|| StoreError::NotFound(format!("note {note}")))?;

            if let Some(text) = &update.text {
                if *text != current.text {
                    current.text = text.clone();
                    current.edited = true;
                }
            }

            if let Some(position) = update.position {
                if position.stack.is_none() {
                    ensure_column(conn, board, position.column)?;
                }
                ranks::move_note(notes, note, position)?;
            }
            Ok(())
        })?;
        Ok(notes)
    }

    async fn delete_note(
        &self,
        board: BoardId,
        note: NoteId,
        delete_stack: bool,
    ) -> Result<NoteDeletion, StoreError> {
        let ((removed, votes), notes) = self.mutate_notes(board, |conn, notes| {
            if !notes.iter().any(|n| n.id == note) {
                return Err(StoreError::NotFound(format!("note {note}")));
            }
            let removed = ranks::delete_note(notes, note, delete_stack)?;
            let votes = votes_on_notes(conn, &removed)?;
            Ok((removed, votes))
        })?;
        Ok(NoteDeletion {
            removed,
            notes,
            votes,
        })
    }

    async fn get_reaction(
        &self,
        board: BoardId,
        reaction: ReactionId,
    ) -> Result<Reaction, StoreError> {
        let conn = self.pool.get()?;
        load_reaction(&conn, board, reaction)
    }

    async fn add_reaction(&self, board: BoardId, reaction: &Reaction) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        ensure_note(&conn, board, reaction.note)?;
        conn.execute(
            "INSERT INTO reactions (id, note_id, user_id, reaction_type) VALUES (?1, ?2, ?3, ?4)",
            params![
                reaction.id,
                reaction.note,
                reaction.user,
                reaction.reaction_type
            ],
        )?;
        Ok(())
    }

    async fn update_reaction(
        &self,
        board: BoardId,
        reaction: ReactionId,
        reaction_type: ReactionType,
    ) -> Result<Reaction, StoreError> {
        let conn = self.pool.get()?;
        let mut current = load_reaction(&conn, board, reaction)?;
        conn.execute(
            "UPDATE reactions SET reaction_type = ?2 WHERE id = ?1",
            params![reaction, reaction_type],
        )?;
        current.reaction_type = reaction_type;
        Ok(current)
    }

    async fn delete_reaction(
        &self,
        board: BoardId,
        reaction: ReactionId,
    ) -> Result<Reaction, StoreError> {
        let conn = self.pool.get()?;
        let removed = load_reaction(&conn, board, reaction)?;
        conn.execute("DELETE FROM reactions WHERE id = ?1", params![reaction])?;
        Ok(removed)
    }

    async fn create_voting(
        &self,
        board: BoardId,
        settings: &VotingSettings,
    ) -> Result<Voting, StoreError> {
        let conn = self.pool.get()?;
        load_board(&conn, board)?;

        let open: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM votings WHERE board_id = ?1 AND status = 'OPEN'",
            params![board],
            |row| row.get(0),
        )?;
        if open {
            return Err(StoreError::Conflict(
                "board already has an open voting".into(),
            ));
        }

        let voting = Voting {
            id: VotingId::generate(),
            board,
            vote_limit: settings.vote_limit,
            allow_multiple_votes: settings.allow_multiple_votes,
            show_votes_of_others: settings.show_votes_of_others,
            status: VotingStatus::Open,
            results: None,
            created_at: Utc::now(),
        };
        conn.execute(
            &format!(
                "INSERT INTO votings ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7)",
                VotingRow::FIELDS
            ),
            params![
                voting.id,
                board,
                voting.vote_limit,
                voting.allow_multiple_votes,
                voting.show_votes_of_others,
                voting.status,
                voting.created_at.timestamp_millis()
            ],
        )?;
        Ok(voting)
    }

    async fn close_voting(
        &self,
        board: BoardId,
        voting: VotingId,
    ) -> Result<VotingUpdate, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let mut closed = load_voting(&tx, board, voting)?;
        if !closed.is_open() {
            return Err(StoreError::Conflict(format!("voting {voting} is closed")));
        }

        let counts = {
            let mut stmt = tx.prepare(
                "SELECT note_id, COUNT(*) FROM votes WHERE voting_id = ?1 GROUP BY note_id",
            )?;
            let rows = stmt.query_map(params![voting], |row| {
                Ok((row.get::<_, NoteId>(0)?, row.get::<_, u32>(1)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        closed.status = VotingStatus::Closed;
        closed.results = Some(VotingResults::from_counts(counts));
        tx.execute(
            "UPDATE votings SET status = ?2, results_json = ?3 WHERE id = ?1",
            params![
                voting,
                closed.status,
                serde_json::to_string(&closed.results)?
            ],
        )?;

        let notes = load_notes(&tx, board)?;
        tx.commit()?;

        Ok(VotingUpdate {
            voting: closed,
            notes,
        })
    }

    async fn add_vote(&self, board: BoardId, vote: &Vote) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let voting = load_voting(&conn, board, vote.voting)?;
        if !voting.is_open() {
            return Err(StoreError::Conflict(format!("voting {} is closed", voting.id)));
        }

        ensure_note(&conn, board, vote.note)?;

        let (cast, on_note): (u32, u32) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(note_id = ?3), 0) FROM votes
             WHERE voting_id = ?1 AND user_id = ?2",
            params![vote.voting, vote.user, vote.note],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if cast >= voting.vote_limit {
            return Err(StoreError::Conflict("vote limit reached".into()));
        }
        if on_note > 0 && !voting.allow_multiple_votes {
            return Err(StoreError::Conflict(
                "multiple votes per note are not allowed".into(),
            ));
        }

        conn.execute(
            "INSERT INTO votes (voting_id, note_id, user_id) VALUES (?1, ?2, ?3)",
            params![vote.voting, vote.note, vote.user],
        )?;
        Ok(())
    }

    async fn remove_vote(&self, board: BoardId, vote: &Vote) -> Result<Vec<Vote>, StoreError> {
        let conn = self.pool.get()?;
        let voting = load_voting(&conn, board, vote.voting)?;
        if !voting.is_open() {
            return Err(StoreError::Conflict(format!("voting {} is closed", voting.id)));
        }

        let rows = conn.execute(
            "DELETE FROM votes WHERE rowid = (
                SELECT rowid FROM votes
                WHERE voting_id = ?1 AND note_id = ?2 AND user_id = ?3
                LIMIT 1
             )",
            params![vote.voting, vote.note, vote.user],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound("vote".into()));
        }
        Ok(vec![*vote])
    }

    async fn delete_votes(
        &self,
        board: BoardId,
        voting: VotingId,
        user: UserId,
    ) -> Result<Vec<Vote>, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let current = load_voting(&tx, board, voting)?;
        if !current.is_open() {
            return Err(StoreError::Conflict(format!("voting {voting} is closed")));
        }

        let votes = {
            let mut stmt = tx.prepare(
                "SELECT voting_id, note_id, user_id FROM votes
                 WHERE voting_id = ?1 AND user_id = ?2
                 ORDER BY created_at",
            )?;
            let rows = stmt.query_map(params![voting, user], |row| {
                Ok(Vote {
                    voting: row.get(0)?,
                    note: row.get(1)?,
                    user: row.get(2)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        tx.execute(
            "DELETE FROM votes WHERE voting_id = ?1 AND user_id = ?2",
            params![voting, user],
        )?;
        tx.commit()?;
        Ok(votes)
    }
}
