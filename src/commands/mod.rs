//! Tauri command surface and wiring for the orchestration core.

pub mod downloads;
pub mod launch;

use std::path::Path;
use std::sync::Arc;

use tauri::{AppHandle, Listener};

use crate::config::OrchestratorConfig;
use crate::errors::Result;
use crate::services::backend::{
    BackendEvent, LauncherBackend, EVENT_DOWNLOAD_PROGRESS, EVENT_LAUNCH_PROGRESS,
    EVENT_REFRESH_INSTANCES,
};
use crate::services::download_queue::DownloadQueue;
use crate::services::event_hub::{EventSink, TauriEventSink};
use crate::services::launch_orchestrator::LaunchOrchestrator;

pub const MAIN_WINDOW_ID: &str = "main";

/// Builds the orchestrator for `app` and subscribes it to backend events.
/// The caller manages the returned handle as tauri state.
pub fn build_orchestrator(
    app: &AppHandle,
    backend: Arc<dyn LauncherBackend>,
    config_dir: Option<&Path>,
) -> Result<Arc<LaunchOrchestrator>> {
    let config = OrchestratorConfig::load(config_dir)?;
    let sink: Arc<dyn EventSink> = Arc::new(TauriEventSink::new(app.clone()));
    let queue = DownloadQueue::with_capacity(
        MAIN_WINDOW_ID,
        sink.clone(),
        config.history_capacity,
        config.transfer_stats(),
    );
    let orchestrator = Arc::new(LaunchOrchestrator::new(backend, queue, sink, config));

    for name in [EVENT_DOWNLOAD_PROGRESS, EVENT_LAUNCH_PROGRESS, EVENT_REFRESH_INSTANCES] {
        let orchestrator = orchestrator.clone();
        app.listen(name, move |event| {
            let payload = serde_json::from_str(event.payload()).unwrap_or(serde_json::Value::Null);
            match BackendEvent::from_parts(name, payload) {
                Ok(parsed) => {
                    let orchestrator = orchestrator.clone();
                    tauri::async_runtime::spawn(async move {
                        orchestrator.handle_backend_event(parsed).await;
                    });
                }
                Err(err) => tracing::warn!(event = name, error = %err, "malformed backend event"),
            }
        });
    }

    tracing::info!("launch orchestrator ready");
    Ok(orchestrator)
}
