use clap::Parser;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use watchz::config::settings::Settings;
use watchz::engine::{DockerEngine, Engine};
use watchz::notify::Notifier;
use watchz::registry::{CredentialStore, RegistryClient};
use watchz::scheduler;
use watchz::system::signals::{install_signal_handler, shutdown_channel};
use watchz::update::engine::UpdateEngine;
use watchz::update::events::{EventLevel, EventSink};

fn init_logger(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("watchz={},info", settings.log_directive())));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_credentials() -> CredentialStore {
    let mut store = CredentialStore::load_default();
    if let (Ok(username), Ok(password)) =
        (env::var("DOCKER_USERNAME"), env::var("DOCKER_PASSWORD"))
    {
        store.add("docker.io", &username, &password);
    }
    store
}

fn build_notifiers(settings: &Settings) -> Result<Vec<Notifier>, ExitCode> {
    let mut notifiers = Vec::new();
    for raw in &settings.notification_url {
        match Notifier::from_url(raw) {
            Ok(notifier) => notifiers.push(notifier),
            Err(err) => {
                error!(url = raw, error = %err, "Invalid notification URL");
                return Err(ExitCode::FAILURE);
            }
        }
    }
    Ok(notifiers)
}

#[tokio::main]
async fn main() -> ExitCode {
    let settings = Settings::parse();
    init_logger(&settings);

    let min_level = match settings.notification_level.parse::<EventLevel>() {
        Ok(level) => level,
        Err(err) => {
            error!(error = err, "Invalid notification level");
            return ExitCode::FAILURE;
        }
    };
    let notifiers = match build_notifiers(&settings) {
        Ok(notifiers) => notifiers,
        Err(code) => return code,
    };

    let engine: Arc<dyn Engine> =
        match DockerEngine::new(&settings.host, settings.api_version.clone()) {
            Ok(engine) => Arc::new(engine),
            Err(err) => {
                error!(host = settings.host, error = %err, "Engine host rejected");
                return ExitCode::FAILURE;
            }
        };
    if let Err(err) = engine.ping().await {
        error!(host = settings.host, error = %err, "Cannot reach the container engine");
        return ExitCode::FAILURE;
    }
    match engine.version().await {
        Ok(version) => info!(
            engine = version.version,
            api_version = version.api_version,
            "Connected to container engine"
        ),
        Err(err) => {
            error!(error = %err, "Engine version probe failed");
            return ExitCode::FAILURE;
        }
    }

    let credentials = Arc::new(load_credentials());
    let registry = match RegistryClient::new(credentials.clone()) {
        Ok(registry) => Arc::new(registry),
        Err(err) => {
            error!(error = %err, "Registry client construction failed");
            return ExitCode::FAILURE;
        }
    };

    let sink = Arc::new(EventSink::new(
        notifiers,
        min_level,
        settings.notification_report,
    ));
    let (trigger, shutdown) = shutdown_channel();
    install_signal_handler(trigger);

    let update_engine = Arc::new(UpdateEngine::new(
        engine,
        registry,
        credentials,
        settings.selector(),
        settings.update_options(),
        sink,
        shutdown.clone(),
    ));

    let tick = move || {
        let update_engine = update_engine.clone();
        async move { update_engine.run_tick().await.map(|_| ()) }
    };

    if settings.run_once {
        info!("Running a single scan");
        scheduler::run_once(tick).await;
    } else {
        info!(interval_secs = settings.interval, "Starting periodic scans");
        scheduler::run_periodic(settings.interval(), shutdown, tick).await;
    }
    ExitCode::SUCCESS
}
