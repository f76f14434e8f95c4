use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::OrchestratorConfig;
use crate::errors::{LauncherError, Result};
use crate::models::{
    InstallFileRequest, Instance, LaunchOutcome, LaunchSession, LaunchStatus, LoaderUpdate,
    LoaderVersion, ModFile, ModUpdate, Notice, NoticeLevel, OverlayState, ProgressPayload,
    RejectReason, RunningInstance, StopOutcome,
};
use crate::services::backend::{BackendEvent, LauncherBackend};
use crate::services::download_queue::{DownloadQueue, QueueItemRequest};
use crate::services::event_hub::{emit_best_effort, EventSink, LauncherEvent};
use crate::services::stage_telemetry::split_stage;
use crate::services::transfer_stats::{merge_progress, TransferStats};
use crate::services::update_prompt::{UpdateAction, UpdatePromptBroker};
use crate::utils::{compare_versions, is_newer, now_ms};

const STAGE_CHECKING_UPDATES: &str = "Checking for updates";
const STAGE_AWAITING_CHOICE: &str = "Waiting for update decision";
const STAGE_APPLYING_UPDATES: &str = "Applying updates";
const STAGE_PREPARING: &str = "Preparing launch";
const STAGE_LAUNCHED: &str = "Launched";

#[derive(Default)]
struct OrchestratorState {
    instances: HashMap<String, Instance>,
    running: HashMap<String, RunningInstance>,
    sessions: HashMap<String, LaunchSession>,
    // Launch order of the active sessions, oldest first.
    order: Vec<String>,
    stopping: HashSet<String>,
    featured: Option<String>,
    overlay: OverlayState,
    overlay_stats: TransferStats,
    session_stats: HashMap<String, TransferStats>,
}

// The state mutex is never held across an `.await`.
#[derive(Clone)]
pub struct LaunchOrchestrator {
    backend: Arc<dyn LauncherBackend>,
    queue: DownloadQueue,
    prompts: Arc<UpdatePromptBroker>,
    sink: Arc<dyn EventSink>,
    config: OrchestratorConfig,
    state: Arc<Mutex<OrchestratorState>>,
}

impl LaunchOrchestrator {
    pub fn new(
        backend: Arc<dyn LauncherBackend>,
        queue: DownloadQueue,
        sink: Arc<dyn EventSink>,
        config: OrchestratorConfig,
    ) -> Self {
        let state = OrchestratorState {
            overlay_stats: config.transfer_stats(),
            ..OrchestratorState::default()
        };
        Self {
            backend,
            queue,
            prompts: Arc::new(UpdatePromptBroker::new(sink.clone())),
            sink,
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn queue(&self) -> &DownloadQueue {
        &self.queue
    }

    pub fn prompts(&self) -> &Arc<UpdatePromptBroker> {
        &self.prompts
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn instances(&self) -> Vec<Instance> {
        let mut instances: Vec<Instance> = self.lock().instances.values().cloned().collect();
        instances.sort_by(|a, b| a.name.cmp(&b.name));
        instances
    }

    pub fn running(&self) -> HashMap<String, RunningInstance> {
        self.lock().running.clone()
    }

    pub fn sessions(&self) -> Vec<LaunchSession> {
        let state = self.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.sessions.get(id).cloned())
            .collect()
    }

    pub fn session(&self, instance_id: &str) -> Option<LaunchSession> {
        self.lock().sessions.get(instance_id).cloned()
    }

    pub fn overlay(&self) -> OverlayState {
        self.lock().overlay.clone()
    }

    pub fn featured(&self) -> Option<String> {
        self.lock().featured.clone()
    }

    pub fn is_launching(&self, instance_id: &str) -> bool {
        self.lock().sessions.contains_key(instance_id)
    }

    pub fn is_stopping(&self, instance_id: &str) -> bool {
        self.lock().stopping.contains(instance_id)
    }

    pub async fn launch(&self, instance_id: &str) -> LaunchOutcome {
        let name = self.display_name(instance_id);
        if let Err(reason) = self.begin_launch(instance_id) {
            tracing::info!(instance_id, reason = ?reason, "launch rejected");
            self.notify(NoticeLevel::Info, reason.describe(&name));
            return LaunchOutcome::Rejected { reason };
        }

        let outcome = match self.run_launch(instance_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(instance_id, error = %err, "launch failed");
                self.set_status(instance_id, LaunchStatus::Failed, None);
                let name = self.display_name(instance_id);
                self.notify(NoticeLevel::Error, format!("Failed to launch {name}: {err}"));
                LaunchOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };

        self.finish_launch(instance_id);
        outcome
    }

    pub async fn stop(&self, instance_id: &str) -> StopOutcome {
        let name = self.display_name(instance_id);
        let accepted = self.lock().stopping.insert(instance_id.to_string());
        if !accepted {
            tracing::info!(instance_id, "stop rejected, already stopping");
            self.notify(NoticeLevel::Info, RejectReason::Stopping.describe(&name));
            return StopOutcome::Rejected;
        }

        tracing::info!(instance_id, "stopping instance");
        let outcome = match self.backend.stop_instance(instance_id).await {
            Ok(message) => {
                self.lock().running.remove(instance_id);
                let message = if message.trim().is_empty() {
                    format!("{name} stopped.")
                } else {
                    message
                };
                self.notify(NoticeLevel::Success, message.clone());
                StopOutcome::Stopped { message }
            }
            Err(err) => {
                tracing::error!(instance_id, error = %err, "stop failed");
                self.notify(NoticeLevel::Error, format!("Failed to stop {name}: {err}"));
                StopOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };

        if let Err(err) = self.refresh_running().await {
            tracing::warn!(instance_id, error = %err, "running set refresh after stop failed");
        }
        self.lock().stopping.remove(instance_id);
        outcome
    }

    pub async fn refresh_instances(&self) -> Result<Vec<Instance>> {
        let instances = self.backend.get_instances().await?;
        let mut state = self.lock();
        state.instances = instances
            .iter()
            .map(|instance| (instance.id.clone(), instance.clone()))
            .collect();
        Ok(instances)
    }

    pub async fn refresh_running(&self) -> Result<HashMap<String, RunningInstance>> {
        let running = self.backend.get_running_instances().await?;
        self.lock().running = running.clone();
        Ok(running)
    }

    pub async fn handle_refresh_instances(&self) {
        let (instances, running) =
            futures_util::future::join(self.refresh_instances(), self.refresh_running()).await;
        if let Err(err) = instances {
            tracing::warn!(error = %err, "instance refresh failed");
        }
        if let Err(err) = running {
            tracing::warn!(error = %err, "running set refresh failed");
        }
    }

    pub async fn handle_backend_event(&self, event: BackendEvent) {
        match event {
            BackendEvent::DownloadProgress(payload) => {
                self.handle_download_progress_at(&payload, now_ms());
            }
            BackendEvent::LaunchProgress(payload) => {
                self.handle_launch_progress_at(&payload, now_ms());
            }
            BackendEvent::RefreshInstances => self.handle_refresh_instances().await,
        }
    }

    pub fn handle_launch_progress_at(&self, payload: &ProgressPayload, now_ms: i64) -> bool {
        let Some(instance_id) = payload.instance_id.as_deref() else {
            tracing::debug!(stage = %payload.stage, "launch progress without instance id dropped");
            return false;
        };

        let (session, overlay) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let Some(session) = state.sessions.get_mut(instance_id) else {
                tracing::debug!(instance_id, "launch progress for inactive instance dropped");
                return false;
            };
            let stats = state
                .session_stats
                .entry(instance_id.to_string())
                .or_insert_with(|| self.config.transfer_stats());
            merge_progress(&mut session.progress, payload, stats, now_ms);
            let session = session.clone();

            let overlay = if state.featured.as_deref() == Some(instance_id) {
                merge_progress(&mut state.overlay.progress, payload, &mut state.overlay_stats, now_ms);
                Some(state.overlay.clone())
            } else {
                None
            };
            (session, overlay)
        };

        self.publish(LauncherEvent::LaunchSession(session));
        if let Some(overlay) = overlay {
            self.publish(LauncherEvent::Overlay(overlay));
        }
        true
    }

    pub fn handle_download_progress_at(&self, payload: &ProgressPayload, now_ms: i64) -> bool {
        let tracked = self.queue.receive_global_progress(payload, now_ms);

        let overlay = {
            let mut guard = self.lock();
            let state = &mut *guard;
            if state.featured.is_some() {
                merge_progress(&mut state.overlay.progress, payload, &mut state.overlay_stats, now_ms);
                Some(state.overlay.clone())
            } else {
                None
            }
        };

        let mirrored = overlay.is_some();
        if let Some(overlay) = overlay {
            self.publish(LauncherEvent::Overlay(overlay));
        }
        tracked || mirrored
    }

    pub fn dispose(&self) {
        self.prompts.dispose();
    }

    pub fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            NoticeLevel::Error => tracing::error!(notice = %message),
            NoticeLevel::Warning => tracing::warn!(notice = %message),
            NoticeLevel::Info | NoticeLevel::Success => tracing::info!(notice = %message),
        }
        self.publish(LauncherEvent::Notice(Notice { level, message }));
    }

    fn begin_launch(&self, instance_id: &str) -> std::result::Result<(), RejectReason> {
        let (session, overlay) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            if state.running.contains_key(instance_id) {
                return Err(RejectReason::AlreadyRunning);
            }
            if state.sessions.contains_key(instance_id) {
                return Err(RejectReason::AlreadyLaunching);
            }
            if state.stopping.contains(instance_id) {
                return Err(RejectReason::Stopping);
            }

            let session = LaunchSession::new(instance_id, now_ms());
            state.sessions.insert(instance_id.to_string(), session.clone());
            state.order.push(instance_id.to_string());
            state
                .session_stats
                .insert(instance_id.to_string(), self.config.transfer_stats());

            let overlay = if state.featured.is_none() {
                state.featured = Some(instance_id.to_string());
                state.overlay = OverlayState::featuring(Some(instance_id));
                state.overlay_stats.reset();
                Some(state.overlay.clone())
            } else {
                None
            };
            (session, overlay)
        };

        tracing::info!(
            instance_id,
            attempt_id = %session.attempt_id,
            featured = overlay.is_some(),
            "launch started"
        );
        self.publish(LauncherEvent::LaunchSession(session));
        if let Some(overlay) = overlay {
            self.publish(LauncherEvent::Overlay(overlay));
        }
        Ok(())
    }

    async fn run_launch(&self, instance_id: &str) -> Result<LaunchOutcome> {
        let instance = self.resolve_instance(instance_id).await?;
        let name = instance.display_name().to_string();

        if instance.checks_updates_on_launch() {
            self.set_status(instance_id, LaunchStatus::CheckingUpdates, Some(STAGE_CHECKING_UPDATES));
            let (mod_updates, loader_update) = self.scan_updates(&instance).await;

            if !mod_updates.is_empty() || loader_update.is_some() {
                self.set_status(instance_id, LaunchStatus::AwaitingUserChoice, Some(STAGE_AWAITING_CHOICE));
                let response = self
                    .prompts
                    .request(&instance, mod_updates.clone(), loader_update.clone())
                    .await;
                if response.disable_future_checks {
                    self.disable_update_checks(instance_id).await;
                }

                match response.action {
                    UpdateAction::Cancel => {
                        tracing::info!(instance_id, "launch cancelled at update prompt");
                        self.set_status(instance_id, LaunchStatus::Idle, None);
                        self.notify(NoticeLevel::Info, format!("Launch of {name} cancelled."));
                        return Ok(LaunchOutcome::Cancelled);
                    }
                    UpdateAction::Ignore => {
                        tracing::info!(instance_id, "updates skipped for this launch");
                    }
                    UpdateAction::Update => {
                        self.set_status(instance_id, LaunchStatus::ApplyingUpdates, Some(STAGE_APPLYING_UPDATES));
                        self.apply_updates(&instance, &mod_updates, loader_update.as_ref())
                            .await;
                    }
                }
            }
        }

        self.set_status(instance_id, LaunchStatus::Preparing, Some(STAGE_PREPARING));
        if let Err(err) = self.backend.clear_instance_log(instance_id).await {
            tracing::warn!(instance_id, error = %err, "clearing previous log failed");
        }

        let message = self.backend.launch_instance(instance_id).await?;
        let message = if message.trim().is_empty() {
            format!("{name} launched.")
        } else {
            message
        };
        self.mark_launched(instance_id);
        self.notify(NoticeLevel::Success, message.clone());

        if let Err(err) = self.refresh_running().await {
            tracing::warn!(instance_id, error = %err, "running set refresh after launch failed");
        }
        tokio::time::sleep(self.config.success_hold()).await;
        Ok(LaunchOutcome::Launched { message })
    }

    async fn resolve_instance(&self, instance_id: &str) -> Result<Instance> {
        let cached = self.lock().instances.get(instance_id).cloned();
        if let Some(instance) = cached {
            return Ok(instance);
        }
        self.refresh_instances()
            .await?
            .into_iter()
            .find(|instance| instance.id == instance_id)
            .ok_or_else(|| LauncherError::NotFound(format!("instance {instance_id}")))
    }

    async fn scan_updates(&self, instance: &Instance) -> (Vec<ModUpdate>, Option<LoaderUpdate>) {
        let name = instance.display_name();
        let mod_updates = match self.backend.scan_mod_updates(&instance.id).await {
            Ok(updates) => updates,
            Err(err) => {
                tracing::warn!(instance_id = %instance.id, error = %err, "mod update scan failed");
                self.notify(
                    NoticeLevel::Warning,
                    format!("Could not check mod updates for {name}: {err}"),
                );
                Vec::new()
            }
        };

        let loader_update = match (instance.loader.as_deref(), instance.loader_version.as_deref()) {
            (Some(loader), Some(current)) if self.config.supports_loader(loader) => {
                match self
                    .backend
                    .get_loader_versions(loader, &instance.game_version)
                    .await
                {
                    Ok(versions) => find_loader_update(loader, current, &versions),
                    Err(err) => {
                        tracing::warn!(instance_id = %instance.id, loader, error = %err, "loader version scan failed");
                        self.notify(
                            NoticeLevel::Warning,
                            format!("Could not check {loader} updates for {name}: {err}"),
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        tracing::info!(
            instance_id = %instance.id,
            mod_updates = mod_updates.len(),
            loader_update = loader_update.is_some(),
            "update scan finished"
        );
        (mod_updates, loader_update)
    }

    async fn apply_updates(&self, instance: &Instance, mod_updates: &[ModUpdate], loader_update: Option<&LoaderUpdate>) {
        let mut updated = 0usize;
        let mut failed = 0usize;

        for update in mod_updates {
            if self.apply_mod_update(instance, update).await {
                updated += 1;
            } else {
                failed += 1;
            }
        }
        if let Some(loader_update) = loader_update {
            if self.apply_loader_update(instance, loader_update).await {
                updated += 1;
            } else {
                failed += 1;
            }
        }

        let name = instance.display_name();
        tracing::info!(instance_id = %instance.id, updated, failed, "updates applied");
        if failed == 0 {
            self.notify(
                NoticeLevel::Success,
                format!("Updated {updated} item(s) for {name}."),
            );
        } else {
            self.notify(
                NoticeLevel::Warning,
                format!("Updated {updated} item(s) for {name}; {failed} failed."),
            );
        }
    }

    async fn apply_mod_update(&self, instance: &Instance, update: &ModUpdate) -> bool {
        let queue_id = format!("update:{}:{}", instance.id, update.project_id);
        self.queue.enqueue(
            QueueItemRequest::new(&queue_id, &update.name)
                .with_icon(update.icon.clone())
                .with_status("Resolving..."),
        );

        match self.install_mod_update(instance, update, &queue_id).await {
            Ok(file) => {
                self.queue.update_status(&queue_id, "Installed");
                let superseded = update.current_filename.trim();
                if self.config.delete_superseded_files && !superseded.is_empty() && superseded != file.filename {
                    if let Err(err) = self.backend.delete_instance_file(&instance.id, superseded).await {
                        tracing::warn!(
                            instance_id = %instance.id,
                            filename = superseded,
                            error = %err,
                            "removing superseded file failed"
                        );
                    }
                }
                self.queue.dequeue(&queue_id, true);
                true
            }
            Err(err) => {
                tracing::warn!(
                    instance_id = %instance.id,
                    project_id = %update.project_id,
                    error = %err,
                    "mod update failed"
                );
                self.queue.update_status(&queue_id, format!("Failed: {err}"));
                self.queue.dequeue(&queue_id, false);
                false
            }
        }
    }

    async fn install_mod_update(&self, instance: &Instance, update: &ModUpdate, queue_id: &str) -> Result<ModFile> {
        let file = match update.latest_file.clone() {
            Some(file) => file,
            None => self.backend.resolve_latest_file(&instance.id, update).await?,
        };
        self.queue.update_status(queue_id, "Downloading update...");

        let request = InstallFileRequest {
            instance_id: instance.id.clone(),
            project_id: update.project_id.clone(),
            file: file.clone(),
            replaces: Some(update.current_filename.clone()).filter(|name| !name.trim().is_empty()),
        };
        self.backend.install_file(&request).await?;
        Ok(file)
    }

    async fn apply_loader_update(&self, instance: &Instance, update: &LoaderUpdate) -> bool {
        let queue_id = format!("loader:{}", instance.id);
        self.queue.enqueue(
            QueueItemRequest::new(&queue_id, &format!("{} {}", update.loader, update.latest_version))
                .with_status("Resolving..."),
        );
        self.queue.update_status(&queue_id, "Downloading loader...");

        match self
            .backend
            .install_loader(&instance.id, &update.loader, &update.latest_version)
            .await
        {
            Ok(()) => {
                self.queue.update_status(&queue_id, "Installed");
                self.queue.dequeue(&queue_id, true);
                if let Some(cached) = self.lock().instances.get_mut(&instance.id) {
                    cached.loader_version = Some(update.latest_version.clone());
                }
                true
            }
            Err(err) => {
                tracing::warn!(
                    instance_id = %instance.id,
                    loader = %update.loader,
                    error = %err,
                    "loader update failed"
                );
                self.queue.update_status(&queue_id, format!("Failed: {err}"));
                self.queue.dequeue(&queue_id, false);
                false
            }
        }
    }

    async fn disable_update_checks(&self, instance_id: &str) {
        {
            let mut state = self.lock();
            if let Some(cached) = state.instances.get_mut(instance_id) {
                cached.check_updates_on_launch = Some(false);
            }
        }
        if let Err(err) = self.backend.set_update_check_on_launch(instance_id, false).await {
            tracing::warn!(instance_id, error = %err, "persisting update-check preference failed");
        }
    }

    fn set_status(&self, instance_id: &str, status: LaunchStatus, stage: Option<&str>) {
        let (session, overlay) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let Some(session) = state.sessions.get_mut(instance_id) else {
                return;
            };
            session.status = status;
            let parts = stage.map(split_stage);
            if let Some(parts) = parts.as_ref() {
                session.progress.telemetry.stage_label = parts.stage_label.clone();
                session.progress.telemetry.current_item = parts.current_item.clone();
            }
            let session = session.clone();

            let overlay = match parts {
                Some(parts) if state.featured.as_deref() == Some(instance_id) => {
                    state.overlay.progress.telemetry.stage_label = parts.stage_label;
                    state.overlay.progress.telemetry.current_item = parts.current_item;
                    Some(state.overlay.clone())
                }
                _ => None,
            };
            (session, overlay)
        };

        tracing::info!(instance_id, status = %status, "launch status changed");
        self.publish(LauncherEvent::LaunchSession(session));
        if let Some(overlay) = overlay {
            self.publish(LauncherEvent::Overlay(overlay));
        }
    }

    fn mark_launched(&self, instance_id: &str) {
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            if let Some(session) = state.sessions.get_mut(instance_id) {
                session.progress.progress_percent = 100.0;
                session.progress.telemetry.speed_bps = 0.0;
            }
            if state.featured.as_deref() == Some(instance_id) {
                state.overlay.progress.progress_percent = 100.0;
                state.overlay.progress.telemetry.speed_bps = 0.0;
            }
        }
        self.set_status(instance_id, LaunchStatus::Launched, Some(STAGE_LAUNCHED));
    }

    fn finish_launch(&self, instance_id: &str) {
        let overlay = {
            let mut guard = self.lock();
            let state = &mut *guard;
            state.sessions.remove(instance_id);
            state.session_stats.remove(instance_id);
            state.order.retain(|id| id != instance_id);

            // A featured launch hands the overlay to the next-oldest session,
            // re-seeded from that session's own snapshot. From then on every
            // global download-progress event is mirrored into the new owner.
            if state.featured.as_deref() == Some(instance_id) {
                let next = state.order.first().cloned();
                state.overlay = OverlayState::featuring(next.as_deref());
                if let Some(session) = next.as_ref().and_then(|id| state.sessions.get(id)) {
                    state.overlay.progress = session.progress.clone();
                    state.overlay.progress.telemetry.speed_bps = 0.0;
                }
                state.overlay_stats.reset();
                state.featured = next;
                Some(state.overlay.clone())
            } else {
                None
            }
        };

        tracing::info!(instance_id, "launch session ended");
        self.publish(LauncherEvent::LaunchSessionEnded {
            instance_id: instance_id.to_string(),
        });
        if let Some(overlay) = overlay {
            tracing::debug!(featured = ?overlay.instance_id, "featured launch handed off");
            self.publish(LauncherEvent::Overlay(overlay));
        }
    }

    fn display_name(&self, instance_id: &str) -> String {
        self.lock()
            .instances
            .get(instance_id)
            .map(|instance| instance.display_name().to_string())
            .unwrap_or_else(|| instance_id.to_string())
    }

    fn publish(&self, event: LauncherEvent) {
        emit_best_effort(self.sink.as_ref(), event);
    }

    fn lock(&self) -> MutexGuard<'_, OrchestratorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Newest stable loader version strictly newer than `current`.
pub fn find_loader_update(loader: &str, current: &str, versions: &[LoaderVersion]) -> Option<LoaderUpdate> {
    let latest = versions
        .iter()
        .filter(|candidate| candidate.stable != Some(false))
        .max_by(|a, b| compare_versions(&a.version, &b.version))?;
    if !is_newer(&latest.version, current) {
        return None;
    }
    Some(LoaderUpdate {
        loader: loader.to_string(),
        current_version: current.to_string(),
        latest_version: latest.version.clone(),
    })
}
