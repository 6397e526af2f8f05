/// Lifecycle states of a crawl job
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Submitted, workers not started
    Created,

    Running,

    /// Workers stopped, pending work checkpointed
    Paused,

    // ===== Terminal States =====
    /// Frontier drained
    Completed,

    /// Halted by a systemic failure
    Failed,

    Cancelled,
}

impl JobStatus {
    /// Terminal states absorb every further transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether `self -> next` is a legal lifecycle transition
    pub fn can_transition(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Created, Running)
                | (Created, Cancelled)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Cancelled)
        )
    }

    /// Converts the status to its database representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a status from the database; `None` for unknown strings
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Created,
            Self::Running,
            Self::Paused,
            Self::Completed,
            Self::Failed,
            Self::Cancelled,
        ]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(!JobStatus::Created.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());

        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_terminal_states_absorb() {
        for from in JobStatus::all_states().into_iter().filter(|s| s.is_terminal()) {
            for to in JobStatus::all_states() {
                assert!(!from.can_transition(to), "{} -> {} allowed", from, to);
            }
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        assert!(JobStatus::Created.can_transition(JobStatus::Running));
        assert!(JobStatus::Running.can_transition(JobStatus::Paused));
        assert!(JobStatus::Paused.can_transition(JobStatus::Running));
        assert!(JobStatus::Paused.can_transition(JobStatus::Cancelled));

        assert!(!JobStatus::Created.can_transition(JobStatus::Paused));
        assert!(!JobStatus::Created.can_transition(JobStatus::Completed));
        assert!(!JobStatus::Paused.can_transition(JobStatus::Completed));
        assert!(!JobStatus::Running.can_transition(JobStatus::Running));
    }

    #[test]
    fn test_roundtrip_db_string() {
        for state in JobStatus::all_states() {
            assert_eq!(JobStatus::from_db_string(state.to_db_string()), Some(state));
        }
        assert_eq!(JobStatus::from_db_string("invalid"), None);
    }

    #[test]
    fn test_serde_matches_db_string() {
        let json = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }
}
