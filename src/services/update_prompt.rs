use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::models::{Instance, LoaderUpdate, ModUpdate};
use crate::services::event_hub::{emit_best_effort, EventSink, LauncherEvent};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UpdateAction {
    Update,
    Ignore,
    Cancel,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePromptResponse {
    pub action: UpdateAction,
    pub disable_future_checks: bool,
}

impl UpdatePromptResponse {
    pub fn dismissed() -> Self {
        Self {
            action: UpdateAction::Ignore,
            disable_future_checks: false,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UpdateEntryKind {
    Mod,
    Loader,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEntry {
    pub kind: UpdateEntryKind,
    pub name: String,
    pub from_version: String,
    pub to_version: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePromptRequest {
    pub instance_id: String,
    pub instance_name: String,
    pub mod_updates: Vec<ModUpdate>,
    pub loader_update: Option<LoaderUpdate>,
    pub entries: Vec<UpdateEntry>,
    pub disable_future_checks: bool,
}

impl UpdatePromptRequest {
    pub fn new(instance: &Instance, mod_updates: Vec<ModUpdate>, loader_update: Option<LoaderUpdate>) -> Self {
        let mut entries: Vec<UpdateEntry> = mod_updates
            .iter()
            .map(|update| UpdateEntry {
                kind: UpdateEntryKind::Mod,
                name: update.name.clone(),
                from_version: update.current_version.clone(),
                to_version: update.latest_version.clone(),
            })
            .collect();
        if let Some(loader) = loader_update.as_ref() {
            entries.push(UpdateEntry {
                kind: UpdateEntryKind::Loader,
                name: loader.loader.clone(),
                from_version: loader.current_version.clone(),
                to_version: loader.latest_version.clone(),
            });
        }

        Self {
            instance_id: instance.id.clone(),
            instance_name: instance.display_name().to_string(),
            mod_updates,
            loader_update,
            entries,
            disable_future_checks: false,
        }
    }
}

struct PendingPrompt {
    request: UpdatePromptRequest,
    responder: oneshot::Sender<UpdatePromptResponse>,
}

/// Single-slot update prompt. Every request is answered exactly once.
pub struct UpdatePromptBroker {
    slot: Mutex<Option<PendingPrompt>>,
    sink: Arc<dyn EventSink>,
}

impl UpdatePromptBroker {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            slot: Mutex::new(None),
            sink,
        }
    }

    pub fn pending(&self) -> Option<UpdatePromptRequest> {
        self.lock().as_ref().map(|pending| pending.request.clone())
    }

    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }

    pub async fn request(
        &self,
        instance: &Instance,
        mod_updates: Vec<ModUpdate>,
        loader_update: Option<LoaderUpdate>,
    ) -> UpdatePromptResponse {
        let request = UpdatePromptRequest::new(instance, mod_updates, loader_update);
        let (responder, receiver) = oneshot::channel();

        let stale = self.lock().replace(PendingPrompt {
            request: request.clone(),
            responder,
        });
        if let Some(stale) = stale {
            tracing::warn!(
                instance_id = %stale.request.instance_id,
                replaced_by = %request.instance_id,
                "update prompt replaced before it was answered"
            );
            let _ = stale.responder.send(UpdatePromptResponse::dismissed());
        }

        tracing::info!(
            instance_id = %request.instance_id,
            updates = request.entries.len(),
            "awaiting update decision"
        );
        self.publish(Some(request));

        receiver
            .await
            .unwrap_or_else(|_| UpdatePromptResponse::dismissed())
    }

    pub fn set_disable_future_checks(&self, disable: bool) -> bool {
        let snapshot = {
            let mut slot = self.lock();
            let Some(pending) = slot.as_mut() else {
                return false;
            };
            pending.request.disable_future_checks = disable;
            pending.request.clone()
        };
        self.publish(Some(snapshot));
        true
    }

    pub fn resolve(&self, action: UpdateAction) -> bool {
        let Some(pending) = self.lock().take() else {
            return false;
        };
        let response = UpdatePromptResponse {
            action,
            disable_future_checks: pending.request.disable_future_checks,
        };
        tracing::info!(
            instance_id = %pending.request.instance_id,
            action = ?action,
            disable_future_checks = response.disable_future_checks,
            "update prompt answered"
        );
        let _ = pending.responder.send(response);
        self.publish(None);
        true
    }

    pub fn dispose(&self) {
        let pending = self.lock().take();
        if let Some(pending) = pending {
            tracing::info!(
                instance_id = %pending.request.instance_id,
                "update prompt dismissed on teardown"
            );
            let _ = pending.responder.send(UpdatePromptResponse::dismissed());
            self.publish(None);
        }
    }

    fn publish(&self, request: Option<UpdatePromptRequest>) {
        emit_best_effort(self.sink.as_ref(), LauncherEvent::UpdatePrompt(request));
    }

    fn lock(&self) -> MutexGuard<'_, Option<PendingPrompt>> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for UpdatePromptBroker {
    fn drop(&mut self) {
        let slot = match self.slot.get_mut() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(pending) = slot.take() {
            let _ = pending.responder.send(UpdatePromptResponse::dismissed());
        }
    }
}
