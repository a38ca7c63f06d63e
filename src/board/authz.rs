// The one place that decides who counts as a moderator.
use crate::board::models::{Participant, Role, UserId};

impl Role {
    /// Moderators and owners are equivalent for everything visibility-related.
    pub fn is_moderator(self) -> bool {
        matches!(self, Role::Moderator | Role::Owner)
    }
}

pub fn role_of<'a>(
    user: UserId,
    participants: impl IntoIterator<Item = &'a Participant>,
) -> Option<Role> {
    participants
        .into_iter()
        .find(|p| p.user == user)
        .map(|p| p.role)
}

/// Unknown users are never moderators.
pub fn is_moderator<'a>(
    user: UserId,
    participants: impl IntoIterator<Item = &'a Participant>,
) -> bool {
    role_of(user, participants).is_some_and(Role::is_moderator)
}
