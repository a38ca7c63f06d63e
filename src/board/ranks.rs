// Note ordering - ranks are 0..k within each column or stack, stacks are one level deep
// and children share their root's column. Operations leave the list passing check_invariants.
use std::collections::HashMap;

use crate::board::models::{ColumnId, Note, NoteId, NotePosition, UserId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RankError {
    #[error("note {0} not found")]
    UnknownNote(NoteId),

    #[error("note {0} cannot be stacked onto itself")]
    SelfStack(NoteId),

    #[error("note {target} is already part of a stack")]
    NestedStack { target: NoteId },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RankViolation {
    #[error("ranks in {group:?} are not contiguous: {ranks:?}")]
    NotContiguous { group: Group, ranks: Vec<u32> },

    #[error("note {note} is stacked onto itself")]
    SelfStacked { note: NoteId },

    #[error("note {note} is stacked onto missing note {stack}")]
    DanglingStack { note: NoteId, stack: NoteId },

    #[error("note {note} is stacked onto {stack}, which is itself stacked")]
    NestedStack { note: NoteId, stack: NoteId },

    #[error("note {note} is not in the same column as its stack root {stack}")]
    ColumnMismatch { note: NoteId, stack: NoteId },
}

/// The ordering scope a note's rank is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    Column(ColumnId),
    Stack(NoteId),
}

impl Group {
    pub fn of(note: &Note) -> Self {
        match note.position.stack {
            Some(root) => Group::Stack(root),
            None => Group::Column(note.position.column),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewNote {
    pub id: NoteId,
    pub author: UserId,
    pub column: ColumnId,
    pub text: String,
}

/// Indices of the notes in `group`, in rank order.
fn members(notes: &[Note], group: Group) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..notes.len())
        .filter(|&i| Group::of(&notes[i]) == group)
        .collect();
    idx.sort_by_key(|&i| (notes[i].position.rank, notes[i].id));
    idx
}

fn member_ids(notes: &[Note], group: Group) -> Vec<NoteId> {
    members(notes, group)
        .into_iter()
        .map(|i| notes[i].id)
        .collect()
}

fn densify(notes: &mut [Note], group: Group) {
    for (rank, i) in members(notes, group).into_iter().enumerate() {
        notes[i].position.rank = rank as u32;
    }
}

fn index_of(notes: &[Note], id: NoteId) -> Result<usize, RankError> {
    notes
        .iter()
        .position(|n| n.id == id)
        .ok_or(RankError::UnknownNote(id))
}

/// Append a new root note after the existing roots of its column.
pub fn create_note(notes: &mut Vec<Note>, new: NewNote) -> Note {
    let rank = members(notes, Group::Column(new.column)).len() as u32;
    let note = Note {
        id: new.id,
        author: new.author,
        text: new.text,
        edited: false,
        position: NotePosition {
            column: new.column,
            stack: None,
            rank,
        },
    };
    notes.push(note.clone());
    note
}

/// Move, stack or unstack a note.
///
/// `target.rank` is clamped to the size of the destination grouping. When
/// `target.stack` is set, `target.column` is ignored in favour of the stack
/// root's column. A stack root that joins another stack brings its children
/// along, placed directly after it.
pub fn move_note(notes: &mut [Note], id: NoteId, target: NotePosition) -> Result<(), RankError> {
    let idx = index_of(notes, id)?;

    let (column, group) = match target.stack {
        Some(root) if root == id => return Err(RankError::SelfStack(id)),
        Some(root) => {
            let r = index_of(notes, root)?;
            if !notes[r].is_stack_root() {
                return Err(RankError::NestedStack { target: root });
            }
            (notes[r].position.column, Group::Stack(root))
        }
        None => (target.column, Group::Column(target.column)),
    };

    let old_group = Group::of(&notes[idx]);
    let carried = if target.stack.is_some() {
        member_ids(notes, Group::Stack(id))
    } else {
        Vec::new()
    };

    let mut order: Vec<NoteId> = member_ids(notes, group)
        .into_iter()
        .filter(|n| *n != id)
        .collect();
    let rank = (target.rank as usize).min(order.len());
    order.insert(rank, id);
    order.splice(rank + 1..rank + 1, carried);

    for (r, note_id) in order.iter().enumerate() {
        let i = index_of(notes, *note_id)?;
        notes[i].position = NotePosition {
            column,
            stack: target.stack,
            rank: r as u32,
        };
    }

    if old_group != group {
        densify(notes, old_group);
    }

    for note in notes.iter_mut().filter(|n| n.position.stack == Some(id)) {
        note.position.column = column;
    }

    Ok(())
}

/// Delete a note and return the ids that were removed.
///
/// Without `delete_stack`, the first child of a deleted stack root takes the
/// root's place and the remaining children re-parent onto it.
pub fn delete_note(
    notes: &mut Vec<Note>,
    id: NoteId,
    delete_stack: bool,
) -> Result<Vec<NoteId>, RankError> {
    let idx = index_of(notes, id)?;
    let deleted = notes[idx].clone();
    let children = member_ids(notes, Group::Stack(id));

    let mut removed = vec![id];
    let mut heir = None;
    if delete_stack {
        removed.extend(children.iter().copied());
    } else if let Some((&first, rest)) = children.split_first() {
        let h = index_of(notes, first)?;
        notes[h].position = NotePosition {
            column: deleted.position.column,
            stack: None,
            rank: deleted.position.rank,
        };
        for child in rest {
            let c = index_of(notes, *child)?;
            notes[c].position.stack = Some(first);
        }
        heir = Some(first);
    }

    notes.retain(|n| !removed.contains(&n.id));
    densify(notes, Group::of(&deleted));
    if let Some(heir) = heir {
        densify(notes, Group::Stack(heir));
    }

    Ok(removed)
}

pub fn check_invariants(notes: &[Note]) -> Result<(), RankViolation> {
    let by_id: HashMap<NoteId, &Note> = notes.iter().map(|n| (n.id, n)).collect();
    let mut groups: HashMap<Group, Vec<u32>> = HashMap::new();

    for note in notes {
        if let Some(stack) = note.position.stack {
            if stack == note.id {
                return Err(RankViolation::SelfStacked { note: note.id });
            }
            let root = by_id
                .get(&stack)
                .ok_or(RankViolation::DanglingStack {
                    note: note.id,
                    stack,
                })?;
            if !root.is_stack_root() {
                return Err(RankViolation::NestedStack {
                    note: note.id,
                    stack,
                });
            }
            if root.position.column != note.position.column {
                return Err(RankViolation::ColumnMismatch {
                    note: note.id,
                    stack,
                });
            }
        }
        groups
            .entry(Group::of(note))
            .or_default()
            .push(note.position.rank);
    }

    for (group, mut ranks) in groups {
        ranks.sort_unstable();
        let contiguous = ranks.iter().enumerate().all(|(i, r)| *r == i as u32);
        if !contiguous {
            return Err(RankViolation::NotContiguous { group, ranks });
        }
    }

    Ok(())
}
