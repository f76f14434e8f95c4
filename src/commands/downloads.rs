use std::sync::Arc;

use tauri::State;

use crate::services::download_queue::{DownloadHistoryEntry, DownloadQueueItem};
use crate::services::launch_orchestrator::LaunchOrchestrator;

#[tauri::command]
pub fn get_download_queue(state: State<'_, Arc<LaunchOrchestrator>>) -> Vec<DownloadQueueItem> {
    state.queue().items()
}

#[tauri::command]
pub fn get_download_history(state: State<'_, Arc<LaunchOrchestrator>>) -> Vec<DownloadHistoryEntry> {
    state.queue().history()
}

#[tauri::command]
pub fn dismiss_download(
    id: String,
    state: State<'_, Arc<LaunchOrchestrator>>,
) -> Result<DownloadQueueItem, String> {
    state
        .queue()
        .dequeue(&id, false)
        .ok_or_else(|| format!("Download {id} is not queued"))
}
