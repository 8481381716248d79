//! Per-connection session state: what a connection is allowed to do next.

use imap_server_types::CommandGroup;

/// Tracks whether a session is mid-IDLE and, if so, which tag the eventual
/// `DONE` completion response must carry (the tag is `IDLE`'s, not `DONE`'s).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleState {
    NotIdling,
    Idling { tag: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotAuthenticated,
    Authenticated,
    Selected,
    Logout,
}

impl SessionState {
    /// Whether a command in `group` is legal to dispatch from this state.
    /// AnyState commands are always legal; Selected-only commands are also
    /// legal from Selected (there is no narrower-than-Selected state).
    pub fn permits(&self, group: CommandGroup) -> bool {
        match (self, group) {
            (_, CommandGroup::AnyState) => true,
            (SessionState::NotAuthenticated, CommandGroup::NotAuthenticated) => true,
            (SessionState::Authenticated, CommandGroup::Authenticated) => true,
            (SessionState::Selected, CommandGroup::Authenticated) => true,
            (SessionState::Selected, CommandGroup::Selected) => true,
            _ => false,
        }
    }
}

/// Per-connection mutable state threaded through the session loop and
/// dispatcher. `id` is the key the [`crate::registry::ConnectionRegistry`]
/// uses to address this connection from another task.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub id: u64,
    pub state: SessionState,
    pub username: Option<String>,
    pub selected_mailbox: Option<String>,
    pub read_write: bool,
    pub idle: IdleState,
}

impl SessionContext {
    pub fn new(id: u64) -> Self {
        SessionContext {
            id,
            state: SessionState::NotAuthenticated,
            username: None,
            selected_mailbox: None,
            read_write: false,
            idle: IdleState::NotIdling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_authenticated_rejects_authenticated_commands() {
        let s = SessionState::NotAuthenticated;
        assert!(!s.permits(CommandGroup::Authenticated));
        assert!(s.permits(CommandGroup::NotAuthenticated));
        assert!(s.permits(CommandGroup::AnyState));
    }

    #[test]
    fn selected_permits_both_authenticated_and_selected_commands() {
        let s = SessionState::Selected;
        assert!(s.permits(CommandGroup::Authenticated));
        assert!(s.permits(CommandGroup::Selected));
        assert!(!s.permits(CommandGroup::NotAuthenticated));
    }
}
