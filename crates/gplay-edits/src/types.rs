//! Edit transaction records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditState {
    /// Open and accepting changes
    Draft,
    /// Server-side validation in progress
    Validating,
    /// Changes published; terminal
    Committed,
    /// Discarded; terminal
    Aborted,
}

impl EditState {
    /// Whether no further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, EditState::Committed | EditState::Aborted)
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: EditState) -> bool {
        use EditState::*;
        matches!(
            (self, next),
            (Draft, Validating)
                | (Validating, Draft)
                | (Draft, Committed)
                | (Draft, Aborted)
                | (Validating, Aborted)
        )
    }
}

impl std::fmt::Display for EditState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditState::Draft => write!(f, "draft"),
            EditState::Validating => write!(f, "validating"),
            EditState::Committed => write!(f, "committed"),
            EditState::Aborted => write!(f, "aborted"),
        }
    }
}

/// Locally tracked edit transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    /// Caller-facing handle, unique per package
    pub handle: String,

    /// Identifier assigned by the Play Developer API
    pub server_id: String,

    /// Application package name
    pub package_name: String,

    /// When the edit was opened
    pub created_at: DateTime<Utc>,

    /// Last time the edit was kept open by a command
    pub last_used_at: DateTime<Utc>,

    /// Current state
    pub state: EditState,
}

impl Edit {
    /// New draft edit. The handle is the server id.
    pub fn new(package_name: impl Into<String>, server_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        let server_id = server_id.into();
        Self {
            handle: server_id.clone(),
            server_id,
            package_name: package_name.into(),
            created_at: now,
            last_used_at: now,
            state: EditState::Draft,
        }
    }

    /// Content token bound into the commit idempotency key
    pub fn commit_token(&self) -> String {
        self.created_at.to_rfc3339()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        use EditState::*;
        assert!(Draft.can_transition_to(Validating));
        assert!(Validating.can_transition_to(Draft));
        assert!(Draft.can_transition_to(Committed));
        assert!(Validating.can_transition_to(Aborted));

        assert!(!Validating.can_transition_to(Committed));
        assert!(!Committed.can_transition_to(Draft));
        assert!(!Aborted.can_transition_to(Draft));
        assert!(!Committed.can_transition_to(Aborted));
    }

    #[test]
    fn test_terminal_states() {
        assert!(EditState::Committed.is_terminal());
        assert!(EditState::Aborted.is_terminal());
        assert!(!EditState::Draft.is_terminal());
        assert!(!EditState::Validating.is_terminal());
    }

    #[test]
    fn test_edit_serialization_shape() {
        let now = Utc::now();
        let edit = Edit::new("com.example.app", "srv-1", now);
        let json = serde_json::to_value(&edit).unwrap();
        assert_eq!(json["state"], "draft");
        assert_eq!(json["handle"], "srv-1");
        let back: Edit = serde_json::from_value(json).unwrap();
        assert_eq!(back, edit);
    }
}
