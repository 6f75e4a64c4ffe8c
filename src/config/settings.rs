use crate::engine::client::DEFAULT_HOST;
use crate::selector::Selector;
use crate::update::engine::UpdateOptions;
use clap::Parser;
use std::time::Duration;

const DEFAULT_INTERVAL_SECS: u64 = 86_400;

/// Process-wide configuration, immutable after startup.
///
/// Precedence is CLI over environment over defaults.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "watchz",
    version,
    about = "Watches containers and rebuilds them when their base images drift upstream"
)]
pub struct Settings {
    /// Seconds between scans.
    #[arg(short = 'i', long, env = "WATCHZ_POLL_INTERVAL", default_value_t = DEFAULT_INTERVAL_SECS)]
    pub interval: u64,

    /// Scan once and exit.
    #[arg(short = 'R', long)]
    pub run_once: bool,

    /// Remove the old image after a successful update.
    #[arg(short = 'c', long, env = "WATCHZ_CLEANUP")]
    pub cleanup: bool,

    /// Also scan stopped containers.
    #[arg(short = 'S', long)]
    pub include_stopped: bool,

    /// Start containers that were stopped when their image was updated.
    #[arg(long)]
    pub revive_stopped: bool,

    /// Debug logging.
    #[arg(short = 'd', long, env = "WATCHZ_DEBUG")]
    pub debug: bool,

    /// Trace logging (wins over --debug).
    #[arg(long)]
    pub trace: bool,

    /// Report drift without mutating anything.
    #[arg(long, env = "WATCHZ_MONITOR_ONLY")]
    pub monitor_only: bool,

    /// Recreate from the already-pulled image; never pull.
    #[arg(long)]
    pub no_pull: bool,

    /// Pull fresh images but never stop or recreate containers.
    #[arg(long)]
    pub no_restart: bool,

    /// Serialize updates with a pause in between instead of fanning out.
    #[arg(long)]
    pub rolling_restart: bool,

    /// Seconds the engine waits before hard-killing on stop.
    #[arg(long, default_value_t = 10)]
    pub stop_timeout: u64,

    /// Watch only containers carrying the enable=true label.
    #[arg(long, env = "WATCHZ_LABEL_ENABLE")]
    pub label_enable: bool,

    /// Watch only containers whose scope label matches.
    #[arg(long, env = "WATCHZ_SCOPE")]
    pub scope: Option<String>,

    /// Engine host URI; only unix:// stream sockets are supported.
    #[arg(short = 'H', long, env = "DOCKER_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Pin the engine API version instead of negotiating it.
    #[arg(short = 'a', long, env = "WATCHZ_API_VERSION")]
    pub api_version: Option<String>,

    /// Accepted for drop-in CLI compatibility; TCP+TLS engine hosts are
    /// not supported by this build.
    #[arg(long)]
    pub tlsverify: bool,

    /// Notification URLs (service://...), comma separated.
    #[arg(long, env = "WATCHZ_NOTIFICATION_URL", value_delimiter = ',')]
    pub notification_url: Vec<String>,

    /// Minimum event level forwarded to notifiers.
    #[arg(long, env = "WATCHZ_NOTIFICATION_LEVEL", default_value = "info")]
    pub notification_level: String,

    /// Send the session report after each scan.
    #[arg(long, env = "WATCHZ_NOTIFICATION_REPORT")]
    pub notification_report: bool,

    /// Explicit container names to watch; empty watches everything.
    pub containers: Vec<String>,
}

impl Settings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn selector(&self) -> Selector {
        Selector {
            names: self.containers.clone(),
            label_enable: self.label_enable,
            scope: self.scope.clone(),
            monitor_only: self.monitor_only,
            no_pull: self.no_pull,
        }
    }

    pub fn update_options(&self) -> UpdateOptions {
        UpdateOptions {
            include_stopped: self.include_stopped,
            revive_stopped: self.revive_stopped,
            cleanup: self.cleanup,
            no_restart: self.no_restart,
            rolling_restart: self.rolling_restart,
            stop_timeout: self.stop_timeout,
        }
    }

    pub fn log_directive(&self) -> &'static str {
        if self.trace {
            "trace"
        } else if self.debug {
            "debug"
        } else {
            "info"
        }
    }
}
