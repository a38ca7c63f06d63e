// Per-viewer projection of board events - hides or redacts, never reorders
use std::collections::HashSet;

use crate::board::events::{BoardEvent, VotingUpdate};
use crate::board::models::*;
use crate::realtime::cache::BoardStateCache;

/// What a single viewer should receive for one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Forward the shared event as is
    Unchanged,
    /// Forward this viewer-specific rewrite instead
    Rewritten(BoardEvent),
    Suppressed,
}

/// Which notes a participant may see and how their authorship is shown.
#[derive(Debug, Clone)]
pub struct NoteVisibility {
    viewer: UserId,
    visible_columns: HashSet<ColumnId>,
    show_notes_of_other_users: bool,
    show_authors: bool,
}

impl NoteVisibility {
    pub fn new(viewer: UserId, board: &Board, columns: &[Column]) -> Self {
        Self {
            viewer,
            visible_columns: columns.iter().filter(|c| c.visible).map(|c| c.id).collect(),
            show_notes_of_other_users: board.show_notes_of_other_users,
            show_authors: board.show_authors,
        }
    }

    pub fn for_cache(viewer: UserId, cache: &BoardStateCache) -> Self {
        Self {
            viewer,
            visible_columns: cache.visible_columns(),
            show_notes_of_other_users: cache.board().show_notes_of_other_users,
            show_authors: cache.board().show_authors,
        }
    }

    /// A note in an unknown column counts as hidden.
    pub fn allows(&self, note: &Note) -> bool {
        self.visible_columns.contains(&note.position.column)
            && (self.show_notes_of_other_users || note.author == self.viewer)
    }

    pub fn redact(&self, mut note: Note) -> Note {
        if !self.show_authors && note.author != self.viewer {
            note.author = UserId::nil();
        }
        note
    }

    pub fn apply(&self, notes: &[Note]) -> Vec<Note> {
        notes
            .iter()
            .filter(|n| self.allows(n))
            .map(|n| self.redact(n.clone()))
            .collect()
    }
}

/// Voting results recomputed over the notes a viewer can see.
pub fn restrict_results(results: &VotingResults, notes: &HashSet<NoteId>) -> VotingResults {
    VotingResults::from_counts(
        results
            .votes
            .iter()
            .filter(|(note, _)| notes.contains(note))
            .map(|(note, per_note)| (*note, per_note.total)),
    )
}

fn restrict_voting(update: &VotingUpdate, visibility: &NoteVisibility) -> VotingUpdate {
    let notes = visibility.apply(&update.notes);
    let surviving: HashSet<NoteId> = notes.iter().map(|n| n.id).collect();
    let mut voting = update.voting.clone();
    voting.results = voting
        .results
        .as_ref()
        .map(|results| restrict_results(results, &surviving));
    VotingUpdate { voting, notes }
}

/// Decide what `viewer` receives for `event`, given the cache state after the
/// event has been applied.
pub fn filter_event(event: &BoardEvent, viewer: UserId, cache: &BoardStateCache) -> Delivery {
    if let BoardEvent::VotesDeleted(votes) = event {
        return if votes.iter().all(|v| v.user == viewer) {
            Delivery::Unchanged
        } else {
            Delivery::Rewritten(BoardEvent::VotesDeleted(
                votes.iter().filter(|v| v.user == viewer).copied().collect(),
            ))
        };
    }

    if cache.is_moderator(viewer) {
        return Delivery::Unchanged;
    }

    match event {
        BoardEvent::ColumnsUpdated(columns) => Delivery::Rewritten(BoardEvent::ColumnsUpdated(
            columns.iter().filter(|c| c.visible).cloned().collect(),
        )),
        BoardEvent::NotesUpdated(notes) => {
            let visibility = NoteVisibility::for_cache(viewer, cache);
            Delivery::Rewritten(BoardEvent::NotesUpdated(visibility.apply(notes)))
        }
        BoardEvent::NotesSync(notes) => {
            let visibility = NoteVisibility::for_cache(viewer, cache);
            Delivery::Rewritten(BoardEvent::NotesSync(visibility.apply(notes)))
        }
        BoardEvent::VotingUpdated(update) if !update.voting.is_open() => {
            let visibility = NoteVisibility::for_cache(viewer, cache);
            Delivery::Rewritten(BoardEvent::VotingUpdated(restrict_voting(
                update,
                &visibility,
            )))
        }
        BoardEvent::ReactionAdded(reaction) | BoardEvent::ReactionUpdated(reaction) => {
            let visibility = NoteVisibility::for_cache(viewer, cache);
            match cache.note(reaction.note) {
                Some(note) if visibility.allows(note) => Delivery::Unchanged,
                _ => Delivery::Suppressed,
            }
        }
        BoardEvent::RequestCreated(_) | BoardEvent::RequestUpdated(_) => Delivery::Suppressed,
        _ => Delivery::Unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct Fixture {
        full: FullBoard,
        moderator: UserId,
        participant: UserId,
        visible: ColumnId,
        hidden: ColumnId,
    }

    fn fixture() -> Fixture {
        let board = BoardId::generate();
        let moderator = UserId::generate();
        let participant = UserId::generate();
        let visible = ColumnId::generate();
        let hidden = ColumnId::generate();
        let mut settings = Board::new(board, "retro");
        settings.show_notes_of_other_users = false;

        Fixture {
            full: FullBoard {
                board: settings,
                participants: vec![
                    Participant::new(board, moderator, "mod", Role::Moderator),
                    Participant::new(board, participant, "alice", Role::Participant),
                ],
                columns: vec![
                    Column {
                        id: visible,
                        board,
                        name: "C1".into(),
                        visible: true,
                        index: 0,
                    },
                    Column {
                        id: hidden,
                        board,
                        name: "C2".into(),
                        visible: false,
                        index: 1,
                    },
                ],
                notes: vec![],
                reactions: vec![],
                votings: vec![],
                votes: vec![],
                requests: vec![],
            },
            moderator,
            participant,
            visible,
            hidden,
        }
    }

    fn note(author: UserId, column: ColumnId, rank: u32) -> Note {
        Note {
            id: NoteId::generate(),
            author,
            text: "text".into(),
            edited: false,
            position: NotePosition {
                column,
                stack: None,
                rank,
            },
        }
    }

    fn rewritten(delivery: Delivery) -> BoardEvent {
        match delivery {
            Delivery::Rewritten(event) => event,
            other => panic!("expected a rewrite, got {other:?}"),
        }
    }

    #[test]
    fn hidden_column_and_foreign_notes_are_withheld_from_participants() {
        let f = fixture();
        let n1 = note(f.participant, f.visible, 0);
        let n2 = note(f.moderator, f.hidden, 0);
        let event = BoardEvent::NotesUpdated(vec![n1.clone(), n2]);
        let cache = BoardStateCache::from_snapshot(&f.full);

        assert_eq!(
            rewritten(filter_event(&event, f.participant, &cache)),
            BoardEvent::NotesUpdated(vec![n1])
        );
        assert_eq!(filter_event(&event, f.moderator, &cache), Delivery::Unchanged);
    }

    #[test]
    fn closed_voting_results_are_restricted_to_visible_notes() {
        let f = fixture();
        let n1 = note(f.participant, f.visible, 0);
        let n2 = note(f.moderator, f.hidden, 0);
        let voting = Voting {
            id: VotingId::generate(),
            board: f.full.board.id,
            vote_limit: 5,
            allow_multiple_votes: true,
            show_votes_of_others: false,
            status: VotingStatus::Closed,
            results: Some(VotingResults::from_counts([(n1.id, 2), (n2.id, 1)])),
            created_at: Utc::now(),
        };
        let event = BoardEvent::VotingUpdated(VotingUpdate {
            voting,
            notes: vec![n1.clone(), n2],
        });
        let cache = BoardStateCache::from_snapshot(&f.full);

        let BoardEvent::VotingUpdated(update) = rewritten(filter_event(&event, f.participant, &cache))
        else {
            panic!("wrong event kind");
        };
        assert_eq!(update.notes, vec![n1.clone()]);
        let results = update.voting.results.unwrap();
        assert_eq!(results.total, 2);
        assert_eq!(results.votes.len(), 1);
        assert_eq!(results.votes[&n1.id].total, 2);
    }

    #[test]
    fn open_voting_passes_through() {
        let f = fixture();
        let voting = Voting {
            id: VotingId::generate(),
            board: f.full.board.id,
            vote_limit: 3,
            allow_multiple_votes: false,
            show_votes_of_others: false,
            status: VotingStatus::Open,
            results: None,
            created_at: Utc::now(),
        };
        let event = BoardEvent::VotingUpdated(VotingUpdate {
            voting,
            notes: vec![note(f.moderator, f.hidden, 0)],
        });
        let cache = BoardStateCache::from_snapshot(&f.full);
        assert_eq!(filter_event(&event, f.participant, &cache), Delivery::Unchanged);
    }

    #[test]
    fn columns_are_reduced_to_visible_ones() {
        let f = fixture();
        let event = BoardEvent::ColumnsUpdated(f.full.columns.clone());
        let cache = BoardStateCache::from_snapshot(&f.full);

        let BoardEvent::ColumnsUpdated(columns) =
            rewritten(filter_event(&event, f.participant, &cache))
        else {
            panic!("wrong event kind");
        };
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].id, f.visible);
        assert_eq!(filter_event(&event, f.moderator, &cache), Delivery::Unchanged);
    }

    #[test]
    fn authors_are_redacted_when_hidden() {
        let mut f = fixture();
        f.full.board.show_notes_of_other_users = true;
        f.full.board.show_authors = false;
        let mine = note(f.participant, f.visible, 0);
        let theirs = note(f.moderator, f.visible, 1);
        let event = BoardEvent::NotesSync(vec![mine.clone(), theirs.clone()]);
        let cache = BoardStateCache::from_snapshot(&f.full);

        let BoardEvent::NotesSync(notes) = rewritten(filter_event(&event, f.participant, &cache))
        else {
            panic!("wrong event kind");
        };
        assert_eq!(notes[0].author, f.participant);
        assert_eq!(notes[1].author, UserId::nil());
        assert_eq!(notes[1].position, theirs.position);
    }

    #[test]
    fn redaction_is_idempotent() {
        let mut f = fixture();
        f.full.board.show_authors = false;
        f.full.board.show_notes_of_other_users = true;
        let visibility = NoteVisibility::new(f.participant, &f.full.board, &f.full.columns);
        let notes = vec![
            note(f.moderator, f.visible, 0),
            note(f.participant, f.visible, 1),
        ];
        let once = visibility.apply(&notes);
        let twice = visibility.apply(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn note_in_unknown_column_is_hidden() {
        let f = fixture();
        let stray = note(f.participant, ColumnId::generate(), 0);
        let visibility = NoteVisibility::new(f.participant, &f.full.board, &f.full.columns);
        assert!(!visibility.allows(&stray));
    }

    #[test]
    fn viewers_only_learn_about_their_own_revoked_votes() {
        let f = fixture();
        let voting = VotingId::generate();
        let mine = Vote {
            voting,
            note: NoteId::generate(),
            user: f.participant,
        };
        let theirs = Vote {
            voting,
            note: NoteId::generate(),
            user: f.moderator,
        };
        let event = BoardEvent::VotesDeleted(vec![mine, theirs]);
        let cache = BoardStateCache::from_snapshot(&f.full);

        assert_eq!(
            rewritten(filter_event(&event, f.participant, &cache)),
            BoardEvent::VotesDeleted(vec![mine])
        );
        assert_eq!(
            rewritten(filter_event(&event, f.moderator, &cache)),
            BoardEvent::VotesDeleted(vec![theirs])
        );
    }

    #[test]
    fn reactions_on_hidden_notes_are_suppressed() {
        let mut f = fixture();
        let hidden_note = note(f.moderator, f.hidden, 0);
        let visible_note = note(f.participant, f.visible, 0);
        f.full.notes = vec![hidden_note.clone(), visible_note.clone()];
        let cache = BoardStateCache::from_snapshot(&f.full);

        let reaction = |note: NoteId| Reaction {
            id: ReactionId::generate(),
            note,
            user: f.moderator,
            reaction_type: ReactionType::Heart,
        };
        let hidden = BoardEvent::ReactionAdded(reaction(hidden_note.id));
        let shown = BoardEvent::ReactionAdded(reaction(visible_note.id));
        let unknown = BoardEvent::ReactionUpdated(reaction(NoteId::generate()));

        assert_eq!(filter_event(&hidden, f.participant, &cache), Delivery::Suppressed);
        assert_eq!(filter_event(&unknown, f.participant, &cache), Delivery::Suppressed);
        assert_eq!(filter_event(&shown, f.participant, &cache), Delivery::Unchanged);
        assert_eq!(filter_event(&hidden, f.moderator, &cache), Delivery::Unchanged);
    }

    #[test]
    fn join_requests_reach_moderators_only() {
        let f = fixture();
        let event = BoardEvent::RequestCreated(JoinRequest {
            user: UserId::generate(),
            board: f.full.board.id,
            status: RequestStatus::Pending,
        });
        let cache = BoardStateCache::from_snapshot(&f.full);
        assert_eq!(filter_event(&event, f.participant, &cache), Delivery::Suppressed);
        assert_eq!(filter_event(&event, f.moderator, &cache), Delivery::Unchanged);
    }

    #[test]
    fn unknown_viewers_are_filtered_like_participants() {
        let f = fixture();
        let event = BoardEvent::ColumnsUpdated(f.full.columns.clone());
        let cache = BoardStateCache::from_snapshot(&f.full);
        assert!(matches!(
            filter_event(&event, UserId::generate(), &cache),
            Delivery::Rewritten(_)
        ));
    }

    #[test]
    fn board_and_participant_events_pass_through() {
        let f = fixture();
        let cache = BoardStateCache::from_snapshot(&f.full);
        let board = BoardEvent::BoardUpdated(f.full.board.clone());
        let participant = BoardEvent::ParticipantUpdated(f.full.participants[0].clone());
        assert_eq!(filter_event(&board, f.participant, &cache), Delivery::Unchanged);
        assert_eq!(filter_event(&participant, f.participant, &cache), Delivery::Unchanged);
    }
}
