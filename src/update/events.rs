use crate::notify::Notifier;
use crate::update::session::{SessionReport, UpdateResult};
use std::fmt;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl FromStr for EventLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown notification level '{other}'")),
        }
    }
}

/// State-machine transitions the update engine announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStage {
    Checking,
    UpdateAvailable,
    Pulling,
    Stopping,
    Starting,
    Success,
    Failed,
    Skipped,
}

impl UpdateStage {
    pub fn level(&self) -> EventLevel {
        match self {
            Self::Checking | Self::Skipped => EventLevel::Debug,
            Self::UpdateAvailable
            | Self::Pulling
            | Self::Stopping
            | Self::Starting
            | Self::Success => EventLevel::Info,
            Self::Failed => EventLevel::Error,
        }
    }
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Checking => "checking",
            Self::UpdateAvailable => "update_available",
            Self::Pulling => "pulling",
            Self::Stopping => "stopping",
            Self::Starting => "starting",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct UpdateEvent {
    pub container_name: String,
    pub image: String,
    pub stage: UpdateStage,
    pub message: Option<String>,
}

impl UpdateEvent {
    pub fn new(container_name: &str, image: &str, stage: UpdateStage) -> Self {
        Self {
            container_name: container_name.to_string(),
            image: image.to_string(),
            stage,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl fmt::Display) -> Self {
        self.message = Some(message.to_string());
        self
    }

    pub fn level(&self) -> EventLevel {
        self.stage.level()
    }

    pub fn render(&self) -> String {
        match &self.message {
            Some(message) => format!(
                "{} ({}): {} - {}",
                self.container_name, self.image, self.stage, message
            ),
            None => format!("{} ({}): {}", self.container_name, self.image, self.stage),
        }
    }
}

/// Receives events from many update tasks, aggregates the session report,
/// and forwards to the configured notifiers above the minimum level.
pub struct EventSink {
    report: Mutex<SessionReport>,
    notifiers: Vec<Notifier>,
    http: reqwest::Client,
    min_level: EventLevel,
    report_enabled: bool,
}

impl EventSink {
    pub fn new(notifiers: Vec<Notifier>, min_level: EventLevel, report_enabled: bool) -> Self {
        Self {
            report: Mutex::new(SessionReport::begin()),
            notifiers,
            http: reqwest::Client::new(),
            min_level,
            report_enabled,
        }
    }

    pub async fn publish(&self, event: UpdateEvent) {
        match event.level() {
            EventLevel::Debug => debug!(container = event.container_name, stage = %event.stage, "{}", event.render()),
            EventLevel::Info => info!(container = event.container_name, stage = %event.stage, "{}", event.render()),
            EventLevel::Warn => warn!(container = event.container_name, stage = %event.stage, "{}", event.render()),
            EventLevel::Error => error!(container = event.container_name, stage = %event.stage, "{}", event.render()),
        }
        if event.level() < self.min_level {
            return;
        }
        for notifier in &self.notifiers {
            if let Err(err) = notifier.send_event(&self.http, &event).await {
                warn!(error = %err, "Notification dispatch failed");
            }
        }
    }

    pub async fn record(&self, result: UpdateResult) {
        self.report.lock().await.record(result);
    }

    /// Close out the tick: finalize the report, dispatch it if configured,
    /// and start a fresh one for the next tick.
    pub async fn finalize(&self) -> SessionReport {
        let mut guard = self.report.lock().await;
        guard.finalize();
        let finished = std::mem::replace(&mut *guard, SessionReport::begin());
        drop(guard);

        if self.report_enabled {
            for notifier in &self.notifiers {
                if let Err(err) = notifier.send_report(&self.http, &finished).await {
                    warn!(error = %err, "Report dispatch failed");
                }
            }
        }
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::session::UpdateOutcome;

    #[test]
    fn test_levels_are_ordered() {
        assert!(EventLevel::Debug < EventLevel::Info);
        assert!(EventLevel::Info < EventLevel::Warn);
        assert!(EventLevel::Warn < EventLevel::Error);
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("WARN".parse::<EventLevel>().unwrap(), EventLevel::Warn);
        assert!("verbose".parse::<EventLevel>().is_err());
    }

    #[tokio::test]
    async fn test_finalize_resets_the_report() {
        let sink = EventSink::new(Vec::new(), EventLevel::Info, false);
        sink.record(
            crate::update::session::UpdateResult::new("cid", "web", "sha256:old")
                .with_outcome(UpdateOutcome::Success),
        )
        .await;
        let first = sink.finalize().await;
        assert_eq!(first.scanned, 1);
        let second = sink.finalize().await;
        assert_eq!(second.scanned, 0);
        assert_ne!(first.session_id, second.session_id);
    }
}
