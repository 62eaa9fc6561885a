use std::fmt;
use std::time::Instant;
use uuid::Uuid;

/// Lifecycle of one ingested file.
///
/// `Validating -> StoredPending -> Committed` on success,
/// `Validating -> Rejected` or `StoredPending -> RolledBack` on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Validating,
    StoredPending,
    Committed,
    Rejected,
    RolledBack,
}

impl IngestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Rejected | Self::RolledBack)
    }

    /// Whether `next` may follow `self`
    pub fn can_transition_to(self, next: IngestState) -> bool {
        matches!(
            (self, next),
            (Self::Validating, Self::StoredPending)
                | (Self::Validating, Self::Rejected)
                | (Self::StoredPending, Self::Committed)
                | (Self::StoredPending, Self::RolledBack)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::StoredPending => "stored_pending",
            Self::Committed => "committed",
            Self::Rejected => "rejected",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks and logs the state of a single file through ingestion
#[derive(Debug)]
pub(crate) struct IngestProgress {
    project_id: Uuid,
    filename: String,
    state: IngestState,
    started: Instant,
}

impl IngestProgress {
    pub(crate) fn start(project_id: Uuid, filename: &str) -> Self {
        tracing::debug!(
            project_id = %project_id,
            filename = %filename,
            state = %IngestState::Validating,
            "Ingest started"
        );
        Self {
            project_id,
            filename: filename.to_string(),
            state: IngestState::Validating,
            started: Instant::now(),
        }
    }

    pub(crate) fn state(&self) -> IngestState {
        self.state
    }

    /// Record the file's final name once it is known
    pub(crate) fn rename(&mut self, filename: &str) {
        self.filename = filename.to_string();
    }

    pub(crate) fn advance(&mut self, next: IngestState) {
        if !self.state.can_transition_to(next) {
            tracing::error!(
                project_id = %self.project_id,
                filename = %self.filename,
                from = %self.state,
                to = %next,
                "Invalid ingest state transition"
            );
            return;
        }
        self.state = next;

        let duration_ms = self.started.elapsed().as_millis() as u64;
        match next {
            IngestState::Rejected | IngestState::RolledBack => tracing::warn!(
                project_id = %self.project_id,
                filename = %self.filename,
                state = %next,
                duration_ms,
                "Ingest failed"
            ),
            _ => tracing::info!(
                project_id = %self.project_id,
                filename = %self.filename,
                state = %next,
                duration_ms,
                "Ingest state changed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use IngestState::*;
        assert!(Validating.can_transition_to(StoredPending));
        assert!(Validating.can_transition_to(Rejected));
        assert!(StoredPending.can_transition_to(Committed));
        assert!(StoredPending.can_transition_to(RolledBack));

        assert!(!Validating.can_transition_to(Committed));
        assert!(!StoredPending.can_transition_to(Rejected));
        assert!(!Committed.can_transition_to(RolledBack));
        assert!(!RolledBack.can_transition_to(StoredPending));
    }

    #[test]
    fn test_terminal_states() {
        assert!(IngestState::Committed.is_terminal());
        assert!(IngestState::Rejected.is_terminal());
        assert!(IngestState::RolledBack.is_terminal());
        assert!(!IngestState::Validating.is_terminal());
        assert!(!IngestState::StoredPending.is_terminal());
    }

    #[test]
    fn test_progress_ignores_invalid_transition() {
        let mut progress = IngestProgress::start(Uuid::new_v4(), "kick.wav");
        progress.advance(IngestState::Committed);
        assert_eq!(progress.state(), IngestState::Validating);
        progress.advance(IngestState::StoredPending);
        progress.advance(IngestState::Committed);
        assert_eq!(progress.state(), IngestState::Committed);
    }
}
