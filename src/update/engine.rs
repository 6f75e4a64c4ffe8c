use crate::engine::{Container, ContainerDetails, CreateContainerBody, Engine, EngineError};
use crate::image::ImageReference;
use crate::registry::{CheckRequest, CredentialStore, RegistryClient};
use crate::selector::{Selection, Selector};
use crate::system::signals::Shutdown;
use crate::update::events::{EventSink, UpdateEvent, UpdateStage};
use crate::update::session::{SessionReport, UpdateOutcome, UpdateResult};
use futures::StreamExt;
use futures::stream;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause between serialized updates under rolling restart.
const ROLLING_RESTART_GAP: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub include_stopped: bool,
    pub revive_stopped: bool,
    pub cleanup: bool,
    pub no_restart: bool,
    pub rolling_restart: bool,
    pub stop_timeout: u64,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            include_stopped: false,
            revive_stopped: false,
            cleanup: false,
            no_restart: false,
            rolling_restart: false,
            stop_timeout: 10,
        }
    }
}

/// A watched container whose drift check came back positive.
pub(crate) struct PendingUpdate {
    pub(crate) container: Container,
    pub(crate) selection: Selection,
    pub(crate) details: ContainerDetails,
    pub(crate) current_digest: String,
    pub(crate) latest_digest: String,
}

/// What the engine knows about a container's current image identity.
enum CurrentImage {
    /// Locally built or untagged; nothing to compare upstream.
    Local,
    Digest(String),
}

/// Drives one scan tick: list, select, check, update, report.
pub struct UpdateEngine {
    engine: Arc<dyn Engine>,
    registry: Arc<RegistryClient>,
    credentials: Arc<CredentialStore>,
    selector: Selector,
    options: UpdateOptions,
    sink: Arc<EventSink>,
    shutdown: Shutdown,
}

impl UpdateEngine {
    pub fn new(
        engine: Arc<dyn Engine>,
        registry: Arc<RegistryClient>,
        credentials: Arc<CredentialStore>,
        selector: Selector,
        options: UpdateOptions,
        sink: Arc<EventSink>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            engine,
            registry,
            credentials,
            selector,
            options,
            sink,
            shutdown,
        }
    }

    /// One full pass; only an unreachable engine aborts the tick.
    pub async fn run_tick(&self) -> Result<SessionReport, EngineError> {
        let containers = self.engine.list_containers(self.options.include_stopped).await?;
        debug!(count = containers.len(), "Listed containers");

        let mut candidates = Vec::new();
        for container in containers {
            let selection = self.selector.select(&container);
            if selection.watch {
                candidates.push((container, selection));
            }
        }
        info!(watched = candidates.len(), "Scanning watched containers");

        // Check phase: inspect container and image, resolve the current
        // manifest digest, batch the registry lookups.
        let mut checkable = Vec::new();
        let mut requests = Vec::new();
        for (container, selection) in candidates {
            self.sink
                .publish(UpdateEvent::new(
                    &container.name,
                    &container.image,
                    UpdateStage::Checking,
                ))
                .await;

            let details = match self.engine.inspect_container(&container.id).await {
                Ok(details) => details,
                Err(err) => {
                    self.record_failure(&container, format!("inspect: {err}"), None, None)
                        .await;
                    continue;
                }
            };

            match self.current_image(&container).await {
                CurrentImage::Local => {
                    self.record_skip(&container, UpdateOutcome::SkippedLocal, "local image")
                        .await;
                }
                CurrentImage::Digest(current) => {
                    requests.push(CheckRequest {
                        image: container.image.clone(),
                        current_digest: current.clone(),
                    });
                    checkable.push((container, selection, details, current));
                }
            }
        }

        let checks = self.registry.check_many(requests).await;

        let mut pending = Vec::new();
        for ((container, selection, details, current), check) in
            checkable.into_iter().zip(checks)
        {
            let check = match check {
                Ok(check) => check,
                Err(err) => {
                    self.record_failure(&container, err.to_string(), Some(current), None)
                        .await;
                    continue;
                }
            };
            match check.message {
                Some("digest-pinned") => {
                    self.record_skip(&container, UpdateOutcome::SkippedPinned, "digest-pinned")
                        .await;
                    continue;
                }
                Some(message) => {
                    self.record_skip(&container, UpdateOutcome::SkippedLocal, message)
                        .await;
                    continue;
                }
                None => {}
            }
            if !check.has_update {
                self.sink
                    .record(
                        UpdateResult::new(&container.id, &container.name, &container.image_id)
                            .with_outcome(UpdateOutcome::NoUpdate)
                            .with_digests(Some(check.current), check.latest),
                    )
                    .await;
                continue;
            }

            self.sink
                .publish(
                    UpdateEvent::new(&container.name, &container.image, UpdateStage::UpdateAvailable)
                        .with_message(format!(
                            "{} -> {}",
                            check.current,
                            check.latest.as_deref().unwrap_or("?")
                        )),
                )
                .await;

            if selection.monitor_only {
                self.sink
                    .publish(
                        UpdateEvent::new(&container.name, &container.image, UpdateStage::Skipped)
                            .with_message("monitor-only"),
                    )
                    .await;
                self.sink
                    .record(
                        UpdateResult::new(&container.id, &container.name, &container.image_id)
                            .with_outcome(UpdateOutcome::SkippedMonitor)
                            .with_digests(Some(check.current), check.latest),
                    )
                    .await;
                continue;
            }

            let latest = check.latest.clone().unwrap_or_default();
            pending.push(PendingUpdate {
                container,
                selection,
                details,
                current_digest: check.current,
                latest_digest: latest,
            });
        }

        for result in self.run_updates(pending).await {
            self.sink.record(result).await;
        }

        let report = self.sink.finalize().await;
        info!("{}", report.summary());
        Ok(report)
    }

    /// Single-container drift probe, outside the batched tick flow.
    pub async fn needs_update(&self, container: &Container) -> Result<bool, EngineError> {
        let current = match self.current_image(container).await {
            CurrentImage::Local => return Ok(false),
            CurrentImage::Digest(current) => current,
        };
        match self.registry.check_for_update(&current, &container.image).await {
            Ok(check) => Ok(check.has_update),
            Err(err) => {
                warn!(container = container.name, error = %err, "Drift check failed");
                Ok(false)
            }
        }
    }

    /// Resolve the manifest digest the engine recorded for this image.
    async fn current_image(&self, container: &Container) -> CurrentImage {
        let info = match self.engine.inspect_image(&container.image).await {
            Ok(info) => info,
            Err(err) => {
                // Degraded mode: compare the listing's image id directly.
                warn!(
                    container = container.name,
                    image = container.image,
                    error = %err,
                    "Image inspect failed, comparing the content-store id"
                );
                return CurrentImage::Digest(container.image_id.clone());
            }
        };
        if info.repo_digests.is_empty() {
            return CurrentImage::Local;
        }
        CurrentImage::Digest(pick_repo_digest(&info.repo_digests, &container.image))
    }

    /// Batch policy: rolling restart (or a single update) serializes with
    /// a gap; otherwise updates fan out bounded by the host parallelism.
    pub(crate) async fn run_updates(&self, pending: Vec<PendingUpdate>) -> Vec<UpdateResult> {
        if pending.is_empty() {
            return Vec::new();
        }
        if self.options.rolling_restart || pending.len() == 1 {
            let mut results = Vec::with_capacity(pending.len());
            for (index, update) in pending.iter().enumerate() {
                if index > 0 {
                    tokio::time::sleep(ROLLING_RESTART_GAP).await;
                }
                results.push(self.update_container(update).await);
            }
            results
        } else {
            let parallelism = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4);
            stream::iter(pending.iter())
                .map(|update| self.update_container(update))
                .buffer_unordered(parallelism)
                .collect()
                .await
        }
    }

    /// The per-container state machine. Strictly ordered; rollback on
    /// remove and start failures, terminal everywhere else.
    async fn update_container(&self, update: &PendingUpdate) -> UpdateResult {
        let container = &update.container;
        let details = &update.details;
        let base = UpdateResult::new(&container.id, &container.name, &container.image_id)
            .with_digests(
                Some(update.current_digest.clone()),
                Some(update.latest_digest.clone()),
            );

        if self.shutdown.is_cancelled() {
            return base.with_error("shutdown requested before the update began");
        }

        if !update.selection.no_pull {
            self.publish(container, UpdateStage::Pulling, None).await;
            let auth = ImageReference::parse(&container.image)
                .ok()
                .and_then(|reference| self.credentials.lookup(&reference.registry))
                .map(|credential| credential.pull_auth());
            if let Err(err) = self.engine.pull_image(&container.image, auth.as_ref()).await {
                self.publish(container, UpdateStage::Failed, Some(format!("pull: {err}")))
                    .await;
                return base.with_error(format!("pull: {err}"));
            }
        }

        if self.options.no_restart {
            // The fresh image is staged, but the workload is left alone.
            self.publish(container, UpdateStage::Skipped, Some("no-restart".into()))
                .await;
            return base.with_outcome(UpdateOutcome::Success);
        }

        if self.shutdown.is_cancelled() {
            return base.with_error("shutdown requested before the restart began");
        }

        self.publish(container, UpdateStage::Stopping, None).await;
        if let Err(err) = self
            .engine
            .stop_container(
                &container.id,
                self.options.stop_timeout,
                update.selection.stop_signal.as_deref(),
            )
            .await
        {
            self.publish(container, UpdateStage::Failed, Some(format!("stop: {err}")))
                .await;
            return base.with_error(format!("stop: {err}"));
        }

        if let Err(err) = self.engine.remove_container(&container.id, false).await {
            // The old container still exists; put it back in service.
            warn!(container = container.name, error = %err, "Remove failed, restarting the original");
            if let Err(rollback_err) = self.engine.start_container(&container.id).await {
                warn!(container = container.name, error = %rollback_err, "Rollback start failed");
            }
            self.publish(container, UpdateStage::Failed, Some(format!("remove: {err}")))
                .await;
            return base.with_error(format!("remove: {err}"));
        }

        let body = CreateContainerBody::from_details(details, &container.image);
        let new_id = match self.engine.create_container(details.name(), &body).await {
            Ok(new_id) => new_id,
            Err(err) => {
                // The old container is gone; this is a lost workload.
                self.publish(
                    container,
                    UpdateStage::Failed,
                    Some(format!("create: {err} (original container already removed)")),
                )
                .await;
                return base.with_error(format!("create: {err} (original container already removed)"));
            }
        };

        self.reattach_networks(details, &new_id).await;

        let should_start = details.state.running || self.options.revive_stopped;
        if should_start {
            self.publish(container, UpdateStage::Starting, None).await;
            if let Err(err) = self.engine.start_container(&new_id).await {
                if let Err(cleanup_err) = self.engine.remove_container(&new_id, false).await {
                    warn!(container = container.name, error = %cleanup_err, "Rollback remove failed");
                }
                self.publish(container, UpdateStage::Failed, Some(format!("start: {err}")))
                    .await;
                return base.with_error(format!("start: {err}"));
            }
        }

        let new_image_id = self
            .engine
            .inspect_image(&container.image)
            .await
            .ok()
            .map(|info| info.id);

        if self.options.cleanup
            && new_image_id.as_deref() != Some(container.image_id.as_str())
            && let Err(err) = self.engine.remove_image(&container.image_id).await
        {
            debug!(image = container.image_id, error = %err, "Old image cleanup failed");
        }

        self.publish(container, UpdateStage::Success, None).await;
        let mut result = base.with_outcome(UpdateOutcome::Success);
        result.new_image_id = new_image_id;
        result
    }

    /// The create call carries at most the default network; detach it and
    /// reconnect the original set, scrubbing the old short-id alias.
    async fn reattach_networks(&self, old: &ContainerDetails, new_id: &str) {
        let network_mode = old.host_config.network_mode.as_deref().unwrap_or("default");
        if network_mode == "host" || old.network_settings.networks.is_empty() {
            return;
        }

        let initial = match network_mode {
            "default" | "bridge" => "bridge",
            other => other,
        };
        if let Err(err) = self.engine.disconnect_network(initial, new_id, false).await {
            debug!(network = initial, error = %err, "Initial network detach skipped");
        }

        let old_alias = old.short_id().to_string();
        for (name, endpoint) in &old.network_settings.networks {
            let mut endpoint = endpoint.clone();
            if let Some(aliases) = endpoint.aliases.take() {
                let filtered: Vec<String> =
                    aliases.into_iter().filter(|alias| *alias != old_alias).collect();
                endpoint.aliases = (!filtered.is_empty()).then_some(filtered);
            }
            let target = if endpoint.network_id.is_empty() {
                name.clone()
            } else {
                endpoint.network_id.clone()
            };
            if let Err(err) = self
                .engine
                .connect_network(&target, new_id, Some(&endpoint))
                .await
            {
                // Reattach failures degrade the workload but never abort it.
                warn!(network = name, error = %err, "Network reattach failed");
            }
        }
    }

    async fn publish(&self, container: &Container, stage: UpdateStage, message: Option<String>) {
        let mut event = UpdateEvent::new(&container.name, &container.image, stage);
        if let Some(message) = message {
            event = event.with_message(message);
        }
        self.sink.publish(event).await;
    }

    async fn record_skip(&self, container: &Container, outcome: UpdateOutcome, reason: &str) {
        self.sink
            .publish(
                UpdateEvent::new(&container.name, &container.image, UpdateStage::Skipped)
                    .with_message(reason),
            )
            .await;
        self.sink
            .record(
                UpdateResult::new(&container.id, &container.name, &container.image_id)
                    .with_outcome(outcome),
            )
            .await;
    }

    async fn record_failure(
        &self,
        container: &Container,
        error: String,
        old_digest: Option<String>,
        new_digest: Option<String>,
    ) {
        self.sink
            .publish(
                UpdateEvent::new(&container.name, &container.image, UpdateStage::Failed)
                    .with_message(&error),
            )
            .await;
        self.sink
            .record(
                UpdateResult::new(&container.id, &container.name, &container.image_id)
                    .with_error(error)
                    .with_digests(old_digest, new_digest),
            )
            .await;
    }
}

/// Pick the repo digest matching the image's registry and repository
/// path, falling back to the first entry when none matches.
fn pick_repo_digest(repo_digests: &[String], image: &str) -> String {
    let candidates: Vec<String> = match ImageReference::parse(image) {
        Ok(reference) => {
            let path = reference.repository_path();
            let mut candidates = vec![path.clone(), format!("{}/{}", reference.registry, path)];
            if reference.registry == crate::image::reference::DEFAULT_REGISTRY {
                candidates.push(format!("docker.io/{path}"));
            }
            candidates
        }
        Err(_) => Vec::new(),
    };

    for repo_digest in repo_digests {
        if let Some((prefix, digest)) = repo_digest.rsplit_once('@')
            && candidates.iter().any(|candidate| candidate == prefix)
        {
            return digest.to_string();
        }
    }
    repo_digests[0]
        .rsplit_once('@')
        .map(|(_, digest)| digest.to_string())
        .unwrap_or_else(|| repo_digests[0].clone())
}
