use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Success,
    Failed,
    SkippedMonitor,
    SkippedPinned,
    SkippedLocal,
    NoUpdate,
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::SkippedMonitor => "skipped_monitor",
            Self::SkippedPinned => "skipped_pinned",
            Self::SkippedLocal => "skipped_local",
            Self::NoUpdate => "no_update",
        };
        f.write_str(label)
    }
}

/// One container's fate in one scan tick.
#[derive(Debug, Clone)]
pub struct UpdateResult {
    pub container_id: String,
    pub container_name: String,
    pub old_image_id: String,
    pub new_image_id: Option<String>,
    pub outcome: UpdateOutcome,
    pub error: Option<String>,
    pub old_digest: Option<String>,
    pub new_digest: Option<String>,
}

impl UpdateResult {
    pub fn new(container_id: &str, container_name: &str, old_image_id: &str) -> Self {
        Self {
            container_id: container_id.to_string(),
            container_name: container_name.to_string(),
            old_image_id: old_image_id.to_string(),
            new_image_id: None,
            outcome: UpdateOutcome::NoUpdate,
            error: None,
            old_digest: None,
            new_digest: None,
        }
    }

    pub fn with_outcome(mut self, outcome: UpdateOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.outcome = UpdateOutcome::Failed;
        self.error = Some(error.to_string());
        self
    }

    pub fn with_digests(mut self, old: Option<String>, new: Option<String>) -> Self {
        self.old_digest = old;
        self.new_digest = new;
        self
    }

    /// Whether drift was actually observed, whatever happened afterwards.
    pub fn saw_update(&self) -> bool {
        matches!(
            self.outcome,
            UpdateOutcome::Success | UpdateOutcome::SkippedMonitor
        ) || (self.outcome == UpdateOutcome::Failed && self.new_digest.is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Completed,
    PartialFailure,
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::PartialFailure => "partial_failure",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Aggregate of one scan tick, finalized when the tick ends.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub scanned: usize,
    pub with_updates: usize,
    pub updated: usize,
    pub failed: usize,
    pub results: Vec<UpdateResult>,
    pub status: SessionStatus,
}

impl SessionReport {
    pub fn begin() -> Self {
        let now = Utc::now();
        let random = Uuid::new_v4().simple().to_string();
        Self {
            session_id: format!("{}-{}", now.timestamp_millis(), &random[..8]),
            start_time: now,
            end_time: None,
            scanned: 0,
            with_updates: 0,
            updated: 0,
            failed: 0,
            results: Vec::new(),
            status: SessionStatus::Running,
        }
    }

    pub fn record(&mut self, result: UpdateResult) {
        self.scanned += 1;
        if result.saw_update() {
            self.with_updates += 1;
        }
        match result.outcome {
            UpdateOutcome::Success => self.updated += 1,
            UpdateOutcome::Failed => self.failed += 1,
            _ => {}
        }
        self.results.push(result);
    }

    pub fn finalize(&mut self) {
        self.end_time = Some(Utc::now());
        self.status = if self.failed == 0 {
            SessionStatus::Completed
        } else if self.updated > 0 {
            SessionStatus::PartialFailure
        } else {
            SessionStatus::Failed
        };
    }

    /// One-line digest for logs and notification bodies.
    pub fn summary(&self) -> String {
        format!(
            "session {}: scanned {}, updates available {}, updated {}, failed {} ({})",
            self.session_id, self.scanned, self.with_updates, self.updated, self.failed, self.status
        )
    }
}
