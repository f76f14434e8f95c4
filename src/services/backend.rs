use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::{LauncherError, Result};
use crate::models::{InstallFileRequest, Instance, LoaderVersion, ModFile, ModUpdate, ProgressPayload, RunningInstance};

pub const EVENT_DOWNLOAD_PROGRESS: &str = "download-progress";
pub const EVENT_LAUNCH_PROGRESS: &str = "launch-progress";
pub const EVENT_REFRESH_INSTANCES: &str = "refresh-instances";

/// Command surface of the privileged launcher process.
#[async_trait]
pub trait LauncherBackend: Send + Sync {
    async fn get_instances(&self) -> Result<Vec<Instance>>;

    async fn get_running_instances(&self) -> Result<HashMap<String, RunningInstance>>;

    /// Returns the backend's human-readable result message.
    async fn launch_instance(&self, instance_id: &str) -> Result<String>;

    async fn stop_instance(&self, instance_id: &str) -> Result<String>;

    async fn scan_mod_updates(&self, instance_id: &str) -> Result<Vec<ModUpdate>>;

    async fn get_loader_versions(&self, loader: &str, game_version: &str) -> Result<Vec<LoaderVersion>>;

    async fn resolve_latest_file(&self, instance_id: &str, update: &ModUpdate) -> Result<ModFile>;

    async fn install_file(&self, request: &InstallFileRequest) -> Result<()>;

    async fn install_loader(&self, instance_id: &str, loader: &str, version: &str) -> Result<()>;

    async fn delete_instance_file(&self, instance_id: &str, filename: &str) -> Result<()>;

    async fn clear_instance_log(&self, instance_id: &str) -> Result<()>;

    async fn set_update_check_on_launch(&self, instance_id: &str, enabled: bool) -> Result<()>;
}

/// Push events from the backend. The orchestration core only subscribes.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum BackendEvent {
    DownloadProgress(ProgressPayload),
    LaunchProgress(ProgressPayload),
    RefreshInstances,
}

impl BackendEvent {
    pub fn from_parts(name: &str, payload: Value) -> Result<Self> {
        match name {
            EVENT_DOWNLOAD_PROGRESS => Ok(BackendEvent::DownloadProgress(serde_json::from_value(payload)?)),
            EVENT_LAUNCH_PROGRESS => Ok(BackendEvent::LaunchProgress(serde_json::from_value(payload)?)),
            EVENT_REFRESH_INSTANCES => Ok(BackendEvent::RefreshInstances),
            other => Err(LauncherError::Event(format!("unknown backend event {other}"))),
        }
    }
}
