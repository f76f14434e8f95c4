use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_HISTORY_CAPACITY;
use crate::models::ProgressPayload;
use crate::services::event_hub::{emit_best_effort, EventSink, LauncherEvent};
use crate::services::stage_telemetry::{clamp_progress, split_stage};
use crate::services::transfer_stats::TransferStats;

pub const QUEUED_STATUS: &str = "Queued";
pub const PENDING_STATUS: &str = "Pending...";
pub const COMPLETED_STATUS: &str = "Completed";

// Substring rules on backend wording. Tests in this module pin them; a
// wording change on the backend side silently breaks attribution.
const TRACKING_MARKER: &str = "downloading";
const TERMINAL_MARKERS: [&str; 4] = ["complete", "installed", "failed", "error"];

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadQueueItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub status: String,
    pub progress: f64,
    #[serde(default)]
    pub track_backend_progress: bool,
    #[serde(default)]
    pub stage_label: Option<String>,
    #[serde(default)]
    pub current_item: Option<String>,
    #[serde(default)]
    pub downloaded_bytes: Option<u64>,
    #[serde(default)]
    pub total_bytes: Option<u64>,
    #[serde(default)]
    pub current: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub speed_bps: Option<f64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadHistoryEntry {
    #[serde(flatten)]
    pub item: DownloadQueueItem,
    pub finished_at: String,
}

/// Caller fields for `enqueue`; unset fields take the queue defaults.
#[derive(Clone, Debug, Default)]
pub struct QueueItemRequest {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub status: Option<String>,
    pub progress: Option<f64>,
}

impl QueueItemRequest {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_icon(mut self, icon: Option<String>) -> Self {
        self.icon = icon;
        self
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = Some(status.to_string());
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct QueueItemPatch {
    pub status: Option<String>,
    pub progress: Option<f64>,
    pub name: Option<String>,
    pub icon: Option<String>,
}

#[derive(Clone, Debug)]
pub enum StatusUpdate {
    Text(String),
    Patch(QueueItemPatch),
}

impl From<&str> for StatusUpdate {
    fn from(value: &str) -> Self {
        StatusUpdate::Text(value.to_string())
    }
}

impl From<String> for StatusUpdate {
    fn from(value: String) -> Self {
        StatusUpdate::Text(value)
    }
}

impl From<QueueItemPatch> for StatusUpdate {
    fn from(value: QueueItemPatch) -> Self {
        StatusUpdate::Patch(value)
    }
}

fn normalize_status(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        PENDING_STATUS.to_string()
    } else {
        trimmed.to_string()
    }
}

/// `Some(true)` starts tracking, `Some(false)` stops it, `None` leaves it.
fn tracking_for_status(status: &str) -> Option<bool> {
    let lowered = status.to_lowercase();
    if TERMINAL_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return Some(false);
    }
    if lowered.contains(TRACKING_MARKER) {
        return Some(true);
    }
    None
}

struct QueueState {
    items: Vec<DownloadQueueItem>,
    history: Vec<DownloadHistoryEntry>,
    tracked_stats: TransferStats,
}

#[derive(Clone)]
pub struct DownloadQueue {
    window_id: String,
    history_capacity: usize,
    sink: Arc<dyn EventSink>,
    state: Arc<Mutex<QueueState>>,
}

impl DownloadQueue {
    pub fn new(window_id: &str, sink: Arc<dyn EventSink>) -> Self {
        Self::with_capacity(window_id, sink, DEFAULT_HISTORY_CAPACITY, TransferStats::default())
    }

    pub fn with_capacity(
        window_id: &str,
        sink: Arc<dyn EventSink>,
        history_capacity: usize,
        tracked_stats: TransferStats,
    ) -> Self {
        Self {
            window_id: window_id.to_string(),
            history_capacity: history_capacity.max(1),
            sink,
            state: Arc::new(Mutex::new(QueueState {
                items: Vec::new(),
                history: Vec::new(),
                tracked_stats,
            })),
        }
    }

    pub fn window_id(&self) -> &str {
        &self.window_id
    }

    pub fn items(&self) -> Vec<DownloadQueueItem> {
        self.lock().items.clone()
    }

    pub fn history(&self) -> Vec<DownloadHistoryEntry> {
        self.lock().history.clone()
    }

    pub fn get(&self, id: &str) -> Option<DownloadQueueItem> {
        self.lock().items.iter().find(|item| item.id == id).cloned()
    }

    pub fn tracked_item(&self) -> Option<DownloadQueueItem> {
        self.lock()
            .items
            .iter()
            .find(|item| item.track_backend_progress)
            .cloned()
    }

    /// Returns false when the id is already queued.
    pub fn enqueue(&self, request: QueueItemRequest) -> bool {
        let snapshot = {
            let mut state = self.lock();
            if state.items.iter().any(|item| item.id == request.id) {
                return false;
            }
            state.items.push(DownloadQueueItem {
                id: request.id.clone(),
                name: request.name,
                icon: request.icon,
                status: request
                    .status
                    .map(|status| normalize_status(&status))
                    .unwrap_or_else(|| QUEUED_STATUS.to_string()),
                progress: request.progress.map(clamp_progress).unwrap_or(0.0),
                ..DownloadQueueItem::default()
            });
            state.items.clone()
        };
        tracing::debug!(id = %request.id, "download queued");
        self.replicate_queue(snapshot);
        true
    }

    pub fn dequeue(&self, id: &str, add_to_history: bool) -> Option<DownloadQueueItem> {
        let (removed, items, history) = {
            let mut state = self.lock();
            let index = state.items.iter().position(|item| item.id == id)?;
            let removed = state.items.remove(index);
            if removed.track_backend_progress {
                state.tracked_stats.reset();
            }

            let history = if add_to_history {
                let mut finished = removed.clone();
                finished.status = COMPLETED_STATUS.to_string();
                finished.progress = 100.0;
                finished.track_backend_progress = false;
                finished.speed_bps = None;
                state.history.retain(|entry| entry.item.id != id);
                state.history.insert(
                    0,
                    DownloadHistoryEntry {
                        item: finished,
                        finished_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                    },
                );
                state.history.truncate(self.history_capacity);
                Some(state.history.clone())
            } else {
                None
            };
            (removed, state.items.clone(), history)
        };

        self.replicate_queue(items);
        if let Some(entries) = history {
            self.replicate_history(entries);
        }
        Some(removed)
    }

    pub fn update_status(&self, id: &str, update: impl Into<StatusUpdate>) -> bool {
        let patch = match update.into() {
            StatusUpdate::Text(status) => QueueItemPatch {
                status: Some(status),
                ..QueueItemPatch::default()
            },
            StatusUpdate::Patch(patch) => patch,
        };

        let snapshot = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let Some(index) = state.items.iter().position(|item| item.id == id) else {
                return false;
            };

            if let Some(status) = patch.status.as_deref() {
                let normalized = normalize_status(status);
                match tracking_for_status(&normalized) {
                    Some(true) => {
                        if !state.items[index].track_backend_progress {
                            state.tracked_stats.reset();
                        }
                        for (position, item) in state.items.iter_mut().enumerate() {
                            item.track_backend_progress = position == index;
                        }
                    }
                    Some(false) => {
                        if state.items[index].track_backend_progress {
                            state.tracked_stats.reset();
                        }
                        state.items[index].track_backend_progress = false;
                    }
                    None => {}
                }
                state.items[index].status = normalized;
            }

            let item = &mut state.items[index];
            if let Some(progress) = patch.progress {
                item.progress = clamp_progress(progress);
            }
            if let Some(name) = patch.name {
                item.name = name;
            }
            if let Some(icon) = patch.icon {
                item.icon = Some(icon);
            }
            state.items.clone()
        };

        self.replicate_queue(snapshot);
        true
    }

    pub fn receive_global_progress(&self, payload: &ProgressPayload, now_ms: i64) -> bool {
        let snapshot = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let Some(item) = state
                .items
                .iter_mut()
                .find(|item| item.track_backend_progress)
            else {
                tracing::debug!(stage = %payload.stage, "global progress dropped, no tracked download");
                return false;
            };

            if !payload.stage.trim().is_empty() {
                let parts = split_stage(&payload.stage);
                item.stage_label = Some(parts.stage_label);
                item.current_item = Some(parts.current_item).filter(|value| !value.is_empty());
            }
            if payload.has_percent() {
                item.progress = payload.percent();
            }
            if payload.downloaded_bytes.is_some() {
                item.downloaded_bytes = payload.downloaded_bytes;
            }
            if payload.total_bytes.is_some() {
                item.total_bytes = payload.total_bytes;
            }
            if payload.current.is_some() {
                item.current = payload.current;
            }
            if payload.total.is_some() {
                item.total = payload.total;
            }
            let estimated =
                state
                    .tracked_stats
                    .update(payload.downloaded_bytes, payload.total_bytes, now_ms);
            item.speed_bps = Some(
                payload
                    .speed_bps
                    .filter(|speed| speed.is_finite() && *speed >= 0.0)
                    .unwrap_or(estimated),
            );
            state.items.clone()
        };

        self.replicate_queue(snapshot);
        true
    }

    // Own echoes are ignored.
    pub fn apply_remote(&self, event: &LauncherEvent) -> bool {
        match event {
            LauncherEvent::SyncDownloadQueue { origin, items } if *origin != self.window_id => {
                let mut state = self.lock();
                state.items = items.clone();
                true
            }
            LauncherEvent::SyncDownloadHistory { origin, entries } if *origin != self.window_id => {
                let mut state = self.lock();
                state.history = entries.clone();
                state.history.truncate(self.history_capacity);
                true
            }
            _ => false,
        }
    }

    fn replicate_queue(&self, items: Vec<DownloadQueueItem>) {
        emit_best_effort(
            self.sink.as_ref(),
            LauncherEvent::SyncDownloadQueue {
                origin: self.window_id.clone(),
                items,
            },
        );
    }

    fn replicate_history(&self, entries: Vec<DownloadHistoryEntry>) {
        emit_best_effort(
            self.sink.as_ref(),
            LauncherEvent::SyncDownloadHistory {
                origin: self.window_id.clone(),
                entries,
            },
        );
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// Test support: a second in-process queue following the first over one hub.
// Tauri windows replicate through the webview `sync-download-*` events.
#[cfg(test)]
impl DownloadQueue {
    pub fn spawn_replica(
        &self,
        hub: &crate::services::event_hub::EventHub,
    ) -> tokio::task::JoinHandle<()> {
        use tokio::sync::broadcast::error::RecvError;

        let mut rx = hub.subscribe();
        let queue = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        queue.apply_remote(&event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            window = %queue.window_id,
                            skipped,
                            "download queue replica lagged behind"
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::event_hub::EventHub;
    use proptest::prelude::*;

    fn queue(window: &str) -> (DownloadQueue, EventHub) {
        let hub = EventHub::new(64);
        let sink: Arc<dyn EventSink> = Arc::new(hub.clone());
        (DownloadQueue::new(window, sink), hub)
    }

    #[test]
    fn enqueue_applies_defaults_and_ignores_duplicates() {
        let (queue, _hub) = queue("main");
        assert!(queue.enqueue(QueueItemRequest::new("a", "Sodium")));
        assert!(!queue.enqueue(QueueItemRequest::new("a", "Other name")));

        let items = queue.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Sodium");
        assert_eq!(items[0].status, QUEUED_STATUS);
        assert_eq!(items[0].progress, 0.0);
        assert!(!items[0].track_backend_progress);
    }

    #[test]
    fn status_text_drives_tracking_flag() {
        let (queue, _hub) = queue("main");
        queue.enqueue(QueueItemRequest::new("a", "Sodium"));

        queue.update_status("a", "  Downloading update...  ");
        let item = queue.get("a").expect("item a");
        assert_eq!(item.status, "Downloading update...");
        assert!(item.track_backend_progress);

        queue.update_status("a", "Verifying");
        assert!(queue.get("a").expect("item a").track_backend_progress);

        queue.update_status("a", "Installed");
        assert!(!queue.get("a").expect("item a").track_backend_progress);

        queue.update_status("a", "Downloading again");
        queue.update_status("a", "Download failed");
        assert!(!queue.get("a").expect("item a").track_backend_progress);

        queue.update_status("a", "   ");
        assert_eq!(queue.get("a").expect("item a").status, PENDING_STATUS);
        assert!(!queue.update_status("missing", "Downloading"));
    }

    #[test]
    fn patch_clamps_progress_and_keeps_status_when_absent() {
        let (queue, _hub) = queue("main");
        queue.enqueue(QueueItemRequest::new("a", "Sodium").with_status("Resolving"));
        queue.update_status(
            "a",
            QueueItemPatch {
                progress: Some(180.0),
                ..QueueItemPatch::default()
            },
        );
        let item = queue.get("a").expect("item a");
        assert_eq!(item.progress, 100.0);
        assert_eq!(item.status, "Resolving");
    }

    #[test]
    fn global_progress_lands_on_tracked_item() {
        let (queue, _hub) = queue("main");
        queue.enqueue(QueueItemRequest::new("a", "Sodium"));
        queue.update_status("a", "Downloading update...");

        let payload = ProgressPayload::stage("Downloading libraries", 40.0);
        assert!(queue.receive_global_progress(&payload, 1_000));

        let item = queue.get("a").expect("item a");
        assert_eq!(item.progress, 40.0);
        assert!(item.track_backend_progress);
        assert_eq!(item.stage_label.as_deref(), Some("Downloading libraries"));
        assert_eq!(item.current_item, None);
    }

    #[test]
    fn global_progress_without_tracked_item_is_dropped() {
        let (queue, _hub) = queue("main");
        queue.enqueue(QueueItemRequest::new("a", "Sodium"));
        let payload = ProgressPayload::stage("Downloading assets", 70.0);
        assert!(!queue.receive_global_progress(&payload, 0));
        assert_eq!(queue.get("a").expect("item a").progress, 0.0);
    }

    #[test]
    fn tracked_speed_comes_from_smoothed_samples() {
        let (queue, _hub) = queue("main");
        queue.enqueue(QueueItemRequest::new("a", "Sodium"));
        queue.update_status("a", "Downloading");
        queue.receive_global_progress(&ProgressPayload::stage("Downloading x.jar", 10.0).with_bytes(0, 10_000), 0);
        queue.receive_global_progress(
            &ProgressPayload::stage("Downloading x.jar", 20.0).with_bytes(2_000, 10_000),
            1_000,
        );
        let item = queue.get("a").expect("item a");
        assert_eq!(item.speed_bps, Some(2_000.0));
        assert_eq!(item.current_item.as_deref(), Some("x.jar"));
        assert_eq!(item.downloaded_bytes, Some(2_000));
    }

    #[test]
    fn dequeue_records_history_newest_first_without_duplicates() {
        let (queue, _hub) = queue("main");
        for id in ["a", "b", "a"] {
            queue.enqueue(QueueItemRequest::new(id, id));
            queue.dequeue(id, true);
        }
        let ids: Vec<String> = queue.history().into_iter().map(|entry| entry.item.id).collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(queue.history()[0].item.status, COMPLETED_STATUS);

        queue.enqueue(QueueItemRequest::new("c", "c"));
        assert!(queue.dequeue("c", false).is_some());
        assert_eq!(queue.history().len(), 2);
        assert!(queue.dequeue("c", true).is_none());
    }

    #[test]
    fn mutations_are_broadcast_and_replayed_by_other_windows() {
        let (main, hub) = queue("main");
        let sink: Arc<dyn EventSink> = Arc::new(hub.clone());
        let library = DownloadQueue::new("library", sink);
        let mut rx = hub.subscribe();

        main.enqueue(QueueItemRequest::new("a", "Sodium"));
        main.dequeue("a", true);

        while let Ok(event) = rx.try_recv() {
            assert!(!main.apply_remote(&event), "own echoes are ignored");
            library.apply_remote(&event);
        }
        assert!(library.items().is_empty());
        assert_eq!(library.history().len(), 1);
        assert_eq!(library.history()[0].item.id, "a");
    }

    #[tokio::test]
    async fn replica_task_follows_the_hub() {
        let (main, hub) = queue("main");
        let sink: Arc<dyn EventSink> = Arc::new(hub.clone());
        let overlay = DownloadQueue::new("overlay", sink);
        let handle = overlay.spawn_replica(&hub);

        main.enqueue(QueueItemRequest::new("a", "Sodium"));
        for _ in 0..50 {
            if !overlay.items().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(overlay.items().len(), 1);
        handle.abort();
    }

    #[derive(Clone, Debug)]
    enum Op {
        Enqueue(u8),
        Dequeue(u8, bool),
        Status(u8, &'static str),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let statuses = prop::sample::select(vec![
            "Downloading update...",
            "Downloading",
            "Verifying",
            "Installed",
            "Failed",
            "Complete",
            "",
            "Error: disk full",
        ]);
        prop_oneof![
            (0u8..15).prop_map(Op::Enqueue),
            (0u8..15, any::<bool>()).prop_map(|(id, keep)| Op::Dequeue(id, keep)),
            (0u8..15, statuses).prop_map(|(id, status)| Op::Status(id, status)),
        ]
    }

    proptest! {
        #[test]
        fn queue_invariants_hold(ops in proptest::collection::vec(op_strategy(), 1..120)) {
            let (queue, _hub) = queue("main");
            for op in ops {
                match op {
                    Op::Enqueue(id) => {
                        queue.enqueue(QueueItemRequest::new(&id.to_string(), "item"));
                    }
                    Op::Dequeue(id, keep) => {
                        queue.dequeue(&id.to_string(), keep);
                    }
                    Op::Status(id, status) => {
                        queue.update_status(&id.to_string(), status);
                    }
                }

                let tracked = queue.items().iter().filter(|item| item.track_backend_progress).count();
                prop_assert!(tracked <= 1);

                let history = queue.history();
                prop_assert!(history.len() <= DEFAULT_HISTORY_CAPACITY);
                let mut ids: Vec<&str> = history.iter().map(|entry| entry.item.id.as_str()).collect();
                let before = ids.len();
                ids.sort_unstable();
                ids.dedup();
                prop_assert_eq!(ids.len(), before);
                for pair in history.windows(2) {
                    prop_assert!(pair[0].finished_at >= pair[1].finished_at);
                }
            }
        }
    }
}
