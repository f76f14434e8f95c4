use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::errors::{LauncherError, Result};
use crate::models::{LaunchSession, Notice, OverlayState};
use crate::services::download_queue::{DownloadHistoryEntry, DownloadQueueItem};
use crate::services::update_prompt::UpdatePromptRequest;

pub const EVENT_CHANNEL_CAPACITY: usize = 256;

pub const EVENT_NOTICE: &str = "launcher-notice";
pub const EVENT_LAUNCH_SESSION: &str = "launch-session";
pub const EVENT_LAUNCH_SESSION_ENDED: &str = "launch-session-ended";
pub const EVENT_OVERLAY: &str = "launch-overlay";
pub const EVENT_UPDATE_PROMPT: &str = "update-prompt";
pub const EVENT_SYNC_DOWNLOAD_QUEUE: &str = "sync-download-queue";
pub const EVENT_SYNC_DOWNLOAD_HISTORY: &str = "sync-download-history";

// Sync variants replace the receiver's copy wholesale; last write wins.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum LauncherEvent {
    Notice(Notice),
    LaunchSession(LaunchSession),
    LaunchSessionEnded {
        instance_id: String,
    },
    Overlay(OverlayState),
    UpdatePrompt(Option<UpdatePromptRequest>),
    SyncDownloadQueue {
        origin: String,
        items: Vec<DownloadQueueItem>,
    },
    SyncDownloadHistory {
        origin: String,
        entries: Vec<DownloadHistoryEntry>,
    },
}

impl LauncherEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LauncherEvent::Notice(_) => EVENT_NOTICE,
            LauncherEvent::LaunchSession(_) => EVENT_LAUNCH_SESSION,
            LauncherEvent::LaunchSessionEnded { .. } => EVENT_LAUNCH_SESSION_ENDED,
            LauncherEvent::Overlay(_) => EVENT_OVERLAY,
            LauncherEvent::UpdatePrompt(_) => EVENT_UPDATE_PROMPT,
            LauncherEvent::SyncDownloadQueue { .. } => EVENT_SYNC_DOWNLOAD_QUEUE,
            LauncherEvent::SyncDownloadHistory { .. } => EVENT_SYNC_DOWNLOAD_HISTORY,
        }
    }

    /// The JSON body a webview listener sees. Sync events carry the bare
    /// list; `origin` never leaves the process.
    pub fn payload(&self) -> Result<Value> {
        match self {
            LauncherEvent::SyncDownloadQueue { items, .. } => Ok(serde_json::to_value(items)?),
            LauncherEvent::SyncDownloadHistory { entries, .. } => Ok(serde_json::to_value(entries)?),
            _ => {
                let mut value = serde_json::to_value(self)?;
                Ok(value
                    .get_mut("payload")
                    .map(Value::take)
                    .unwrap_or(Value::Null))
            }
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: LauncherEvent) -> Result<()>;
}

#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<LauncherEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LauncherEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for EventHub {
    fn emit(&self, event: LauncherEvent) -> Result<()> {
        let name = event.name();
        self.tx
            .send(event)
            .map(|_| ())
            .map_err(|_| LauncherError::Event(format!("no listeners for {name}")))
    }
}

#[cfg(feature = "tauri")]
#[derive(Clone)]
pub struct TauriEventSink {
    app: tauri::AppHandle,
}

#[cfg(feature = "tauri")]
impl TauriEventSink {
    pub fn new(app: tauri::AppHandle) -> Self {
        Self { app }
    }
}

#[cfg(feature = "tauri")]
impl EventSink for TauriEventSink {
    fn emit(&self, event: LauncherEvent) -> Result<()> {
        use tauri::Emitter;

        let payload = event.payload()?;
        self.app
            .emit(event.name(), payload)
            .map_err(|err| LauncherError::Event(format!("{}: {}", event.name(), err)))
    }
}

/// Emits and swallows failures; replication and notices are best effort.
pub(crate) fn emit_best_effort(sink: &dyn EventSink, event: LauncherEvent) {
    let name = event.name();
    if let Err(err) = sink.emit(event) {
        tracing::debug!(event = name, error = %err, "event emit dropped");
    }
}
