use tokio::sync::watch;
use tracing::info;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};

/// Cooperative cancellation: one trigger, any number of observers.
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation is requested; never resolves otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Trigger dropped without firing; park forever.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Deliver SIGTERM/SIGINT into the trigger so the scheduler's sleep and
/// in-flight work can wind down cleanly.
#[cfg(unix)]
pub fn install_signal_handler(trigger: ShutdownTrigger) {
    tokio::spawn(async move {
        let mut sigterm_stream = match unix_signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(_) => return,
        };
        let mut sigint_stream = match unix_signal(SignalKind::interrupt()) {
            Ok(stream) => stream,
            Err(_) => return,
        };
        tokio::select! {
            _ = sigterm_stream.recv() => {
                info!("SIGTERM received, shutting down gracefully");
            }
            _ = sigint_stream.recv() => {
                info!("SIGINT received, shutting down gracefully");
            }
        }
        trigger.trigger();
    });
}

#[cfg(not(unix))]
pub fn install_signal_handler(trigger: ShutdownTrigger) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down gracefully");
            trigger.trigger();
        }
    });
}
