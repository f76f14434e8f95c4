pub mod backend;
pub mod download_queue;
pub mod event_hub;
pub mod launch_orchestrator;
pub mod stage_telemetry;
pub mod transfer_stats;
pub mod update_prompt;

pub use backend::{BackendEvent, LauncherBackend};
pub use download_queue::{
    DownloadHistoryEntry, DownloadQueue, DownloadQueueItem, QueueItemPatch, QueueItemRequest, StatusUpdate,
};
pub use event_hub::{EventHub, EventSink, LauncherEvent};
#[cfg(feature = "tauri")]
pub use event_hub::TauriEventSink;
pub use launch_orchestrator::LaunchOrchestrator;
pub use transfer_stats::TransferStats;
pub use update_prompt::{UpdateAction, UpdatePromptBroker, UpdatePromptRequest, UpdatePromptResponse};
