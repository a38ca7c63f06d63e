use std::collections::{HashMap, HashSet};

use crate::board::authz;
use crate::board::events::BoardEvent;
use crate::board::models::*;

/// The slice of board state the filter needs, owned by one board task.
///
/// Seeded from the snapshot loaded at attach time and afterwards refreshed
/// only from upstream events. List-valued fields are replaced wholesale, so
/// applying the same event twice leaves the cache unchanged.
#[derive(Debug, Clone)]
pub struct BoardStateCache {
    board: Board,
    columns: Vec<Column>,
    notes: Vec<Note>,
    participants: HashMap<UserId, Participant>,
}

impl BoardStateCache {
    pub fn from_snapshot(full: &FullBoard) -> Self {
        Self {
            board: full.board.clone(),
            columns: full.columns.clone(),
            notes: full.notes.clone(),
            participants: full
                .participants
                .iter()
                .map(|p| (p.user, p.clone()))
                .collect(),
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn note(&self, id: NoteId) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }

    pub fn participant(&self, user: UserId) -> Option<&Participant> {
        self.participants.get(&user)
    }

    pub fn is_moderator(&self, user: UserId) -> bool {
        authz::is_moderator(user, self.participants.values())
    }

    pub fn visible_columns(&self) -> HashSet<ColumnId> {
        self.columns
            .iter()
            .filter(|c| c.visible)
            .map(|c| c.id)
            .collect()
    }

    /// Fold an unfiltered upstream event into the cache.
    pub fn apply(&mut self, event: &BoardEvent) {
        match event {
            BoardEvent::BoardUpdated(board) => self.board = board.clone(),
            BoardEvent::ColumnsUpdated(columns) => self.columns = columns.clone(),
            BoardEvent::ColumnDeleted(id) => {
                self.columns.retain(|c| c.id != *id);
                self.notes.retain(|n| n.position.column != *id);
            }
            BoardEvent::NotesUpdated(notes) | BoardEvent::NotesSync(notes) => {
                self.notes = notes.clone()
            }
            BoardEvent::NoteDeleted(deleted) => {
                let id = deleted.note;
                if deleted.delete_stack {
                    self.notes
                        .retain(|n| n.id != id && n.position.stack != Some(id));
                } else {
                    self.notes.retain(|n| n.id != id);
                }
            }
            BoardEvent::ParticipantCreated(p) | BoardEvent::ParticipantUpdated(p) => {
                self.participants.insert(p.user, p.clone());
            }
            BoardEvent::ParticipantsUpdated(all) => {
                self.participants = all.iter().map(|p| (p.user, p.clone())).collect();
            }
            BoardEvent::VotingUpdated(update) => self.notes = update.notes.clone(),
            _ => {}
        }
    }
}
