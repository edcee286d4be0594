//! Lifecycle states for daemon-managed objects.

use std::fmt;

use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Lifecycle state of a workspace.
///
/// A workspace starts PENDING when admitted, moves to CREATING on its first
/// build (or UPDATING on a rebuild), and ends ACTIVE or FAILED. FAILED is only
/// left by an explicit new build job; nothing transitions out of it on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkspaceState {
    /// Admitted, build job queued.
    Pending,

    /// First build in progress.
    Creating,

    /// Rebuild of an existing workspace in progress.
    Updating,

    /// Build succeeded; image, network and files are all usable.
    Active,

    /// The builder raised; no partial state is exposed.
    Failed,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl WorkspaceState {
    /// Whether a direct transition from `self` to `next` is part of the
    /// workspace state machine.
    pub fn can_transition_to(&self, next: WorkspaceState) -> bool {
        use WorkspaceState::*;
        matches!(
            (self, next),
            (Pending, Creating)
                | (Pending, Updating)
                | (Creating, Active)
                | (Creating, Failed)
                | (Updating, Active)
                | (Updating, Failed)
                | (Active, Pending)
                | (Active, Updating)
                | (Failed, Pending)
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for WorkspaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkspaceState::Pending => "PENDING",
            WorkspaceState::Creating => "CREATING",
            WorkspaceState::Updating => "UPDATING",
            WorkspaceState::Active => "ACTIVE",
            WorkspaceState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use WorkspaceState::*;
        assert!(Pending.can_transition_to(Creating));
        assert!(Creating.can_transition_to(Active));
        assert!(Active.can_transition_to(Updating));
        assert!(Updating.can_transition_to(Active));
    }

    #[test]
    fn test_failure_transitions() {
        use WorkspaceState::*;
        assert!(Creating.can_transition_to(Failed));
        assert!(Updating.can_transition_to(Failed));
        // FAILED is only left through an explicit new job (PENDING).
        assert!(Failed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Active));
        assert!(!Failed.can_transition_to(Creating));
    }

    #[test]
    fn test_no_skipping_states() {
        use WorkspaceState::*;
        assert!(!Pending.can_transition_to(Active));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Active.can_transition_to(Failed));
    }
}
