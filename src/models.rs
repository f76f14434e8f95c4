use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::stage_telemetry::clamp_progress_opt;

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default, alias = "mcVersion")]
    pub game_version: String,
    #[serde(default)]
    pub loader: Option<String>,
    #[serde(default)]
    pub loader_version: Option<String>,
    #[serde(default, alias = "check_updates_on_launch")]
    pub check_updates_on_launch: Option<bool>,
}

impl Instance {
    /// Unset means enabled; only an explicit `false` skips the update gate.
    pub fn checks_updates_on_launch(&self) -> bool {
        self.check_updates_on_launch != Some(false)
    }

    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunningInstance {
    pub pid: u32,
    #[serde(alias = "start_time")]
    pub start_time: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModFile {
    pub file_id: String,
    pub filename: String,
    #[serde(default)]
    pub url: Option<String>,
    pub version: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModUpdate {
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub current_version: String,
    pub latest_version: String,
    #[serde(default)]
    pub current_filename: String,
    #[serde(default)]
    pub latest_file: Option<ModFile>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoaderVersion {
    pub version: String,
    #[serde(default)]
    pub stable: Option<bool>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoaderUpdate {
    pub loader: String,
    pub current_version: String,
    pub latest_version: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallFileRequest {
    pub instance_id: String,
    pub project_id: String,
    pub file: ModFile,
    #[serde(default)]
    pub replaces: Option<String>,
}

/// Payload shared by `download-progress` and `launch-progress`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ProgressPayload {
    #[serde(default, alias = "instanceId")]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default, alias = "downloadedBytes")]
    pub downloaded_bytes: Option<u64>,
    #[serde(default, alias = "totalBytes")]
    pub total_bytes: Option<u64>,
    #[serde(default)]
    pub current: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default, alias = "speedBps")]
    pub speed_bps: Option<f64>,
}

impl ProgressPayload {
    pub fn stage(stage: &str, percentage: f64) -> Self {
        Self {
            stage: stage.to_string(),
            percentage: Some(percentage),
            ..Self::default()
        }
    }

    pub fn for_instance(mut self, instance_id: &str) -> Self {
        self.instance_id = Some(instance_id.to_string());
        self
    }

    pub fn with_bytes(mut self, downloaded: u64, total: u64) -> Self {
        self.downloaded_bytes = Some(downloaded);
        self.total_bytes = Some(total);
        self
    }

    pub fn with_count(mut self, current: u64, total: u64) -> Self {
        self.current = Some(current);
        self.total = Some(total);
        self
    }

    pub fn has_percent(&self) -> bool {
        self.percentage.is_some() || self.progress.is_some()
    }

    /// `percentage` wins over `progress`; the result is always within [0, 100].
    pub fn percent(&self) -> f64 {
        clamp_progress_opt(self.percentage.or(self.progress))
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counter {
    pub current: u64,
    pub total: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchTelemetry {
    pub stage_label: String,
    pub current_item: String,
    pub speed_bps: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub progress_percent: f64,
    pub bytes: Counter,
    pub file_count: Counter,
    pub telemetry: LaunchTelemetry,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LaunchStatus {
    Idle,
    Starting,
    CheckingUpdates,
    AwaitingUserChoice,
    ApplyingUpdates,
    Preparing,
    Launched,
    Failed,
}

impl LaunchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchStatus::Idle => "idle",
            LaunchStatus::Starting => "starting",
            LaunchStatus::CheckingUpdates => "checking_updates",
            LaunchStatus::AwaitingUserChoice => "awaiting_user_choice",
            LaunchStatus::ApplyingUpdates => "applying_updates",
            LaunchStatus::Preparing => "preparing",
            LaunchStatus::Launched => "launched",
            LaunchStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for LaunchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSession {
    pub instance_id: String,
    /// Distinguishes retries of the same instance in logs and views.
    pub attempt_id: String,
    pub status: LaunchStatus,
    pub started_at_ms: i64,
    #[serde(flatten)]
    pub progress: ProgressSnapshot,
}

impl LaunchSession {
    pub fn new(instance_id: &str, started_at_ms: i64) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            attempt_id: Uuid::new_v4().to_string(),
            status: LaunchStatus::Starting,
            started_at_ms,
            progress: ProgressSnapshot::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverlayState {
    pub instance_id: Option<String>,
    #[serde(flatten)]
    pub progress: ProgressSnapshot,
}

impl OverlayState {
    pub fn featuring(instance_id: Option<&str>) -> Self {
        Self {
            instance_id: instance_id.map(ToString::to_string),
            progress: ProgressSnapshot::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    AlreadyRunning,
    AlreadyLaunching,
    Stopping,
}

impl RejectReason {
    pub fn describe(&self, name: &str) -> String {
        match self {
            RejectReason::AlreadyRunning => format!("{name} is already running."),
            RejectReason::AlreadyLaunching => format!("{name} is already launching."),
            RejectReason::Stopping => format!("{name} is currently stopping."),
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LaunchOutcome {
    Launched { message: String },
    Rejected { reason: RejectReason },
    Cancelled,
    Failed { error: String },
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped { message: String },
    Rejected,
    Failed { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_payload_accepts_either_percent_field() {
        let from_percentage: ProgressPayload =
            serde_json::from_str(r#"{"stage":"Downloading libraries","percentage":40}"#)
                .expect("percentage payload");
        assert_eq!(from_percentage.percent(), 40.0);

        let from_progress: ProgressPayload = serde_json::from_str(
            r#"{"instance_id":"x","stage":"Preparing","progress":140,"downloaded_bytes":10,"total_bytes":20}"#,
        )
        .expect("progress payload");
        assert_eq!(from_progress.percent(), 100.0);
        assert_eq!(from_progress.instance_id.as_deref(), Some("x"));
        assert_eq!(from_progress.downloaded_bytes, Some(10));

        let empty = ProgressPayload::default();
        assert!(!empty.has_percent());
        assert_eq!(empty.percent(), 0.0);
    }

    #[test]
    fn only_explicit_false_disables_update_gate() {
        let mut instance: Instance =
            serde_json::from_str(r#"{"id":"a","name":"Alpha"}"#).expect("instance");
        assert!(instance.checks_updates_on_launch());
        instance.check_updates_on_launch = Some(true);
        assert!(instance.checks_updates_on_launch());
        instance.check_updates_on_launch = Some(false);
        assert!(!instance.checks_updates_on_launch());
    }

    #[test]
    fn session_serializes_flat_progress_fields() {
        let session = LaunchSession::new("inst", 5);
        let value = serde_json::to_value(&session).expect("serialize session");
        assert_eq!(value["status"], "starting");
        assert_eq!(value["attemptId"].as_str().map(str::len), Some(36));
        assert_eq!(value["progressPercent"], 0.0);
        assert_eq!(value["fileCount"]["total"], 0);
        assert_eq!(value["telemetry"]["stageLabel"], "");
    }
}
