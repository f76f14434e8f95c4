use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{LauncherError, Result};
use crate::services::transfer_stats::{TransferStats, MIN_SAMPLE_INTERVAL_MS, SPEED_SMOOTHING};

pub const CONFIG_FILE_NAME: &str = "orchestrator.json";
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;
pub const DEFAULT_SUCCESS_HOLD_MS: u64 = 800;
const MAX_HISTORY_CAPACITY: usize = 100;
const MAX_SUCCESS_HOLD_MS: u64 = 10_000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestratorConfig {
    pub history_capacity: usize,
    pub success_hold_ms: u64,
    pub min_sample_interval_ms: i64,
    pub speed_smoothing: f64,
    pub supported_loaders: Vec<String>,
    pub delete_superseded_files: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            success_hold_ms: DEFAULT_SUCCESS_HOLD_MS,
            min_sample_interval_ms: MIN_SAMPLE_INTERVAL_MS,
            speed_smoothing: SPEED_SMOOTHING,
            supported_loaders: ["fabric", "quilt", "forge", "neoforge"]
                .iter()
                .map(|loader| loader.to_string())
                .collect(),
            delete_superseded_files: true,
        }
    }
}

impl OrchestratorConfig {
    /// Reads `orchestrator.json` from `dir` when present, then applies
    /// `LAUNCHER_*` environment overrides.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let mut config = match dir.map(|dir| dir.join(CONFIG_FILE_NAME)) {
            Some(path) if path.is_file() => read_config_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config.normalized())
    }

    pub fn success_hold(&self) -> Duration {
        Duration::from_millis(self.success_hold_ms)
    }

    pub fn transfer_stats(&self) -> TransferStats {
        TransferStats::with_params(self.min_sample_interval_ms, self.speed_smoothing)
    }

    pub fn supports_loader(&self, loader: &str) -> bool {
        let normalized = loader.trim().to_ascii_lowercase();
        self.supported_loaders
            .iter()
            .any(|candidate| candidate.trim().eq_ignore_ascii_case(&normalized))
    }

    fn apply_env_overrides(&mut self) {
        self.history_capacity = read_env_usize("LAUNCHER_HISTORY_CAPACITY", self.history_capacity);
        self.success_hold_ms = read_env_u64("LAUNCHER_SUCCESS_HOLD_MS", self.success_hold_ms);
        self.delete_superseded_files =
            read_env_bool("LAUNCHER_DELETE_SUPERSEDED_FILES", self.delete_superseded_files);
        if let Some(loaders) = std::env::var("LAUNCHER_SUPPORTED_LOADERS")
            .ok()
            .map(|value| {
                value
                    .split(',')
                    .map(|item| item.trim().to_ascii_lowercase())
                    .filter(|item| !item.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|items| !items.is_empty())
        {
            self.supported_loaders = loaders;
        }
    }

    fn normalized(mut self) -> Self {
        self.history_capacity = self.history_capacity.clamp(1, MAX_HISTORY_CAPACITY);
        self.success_hold_ms = self.success_hold_ms.min(MAX_SUCCESS_HOLD_MS);
        self.min_sample_interval_ms = self.min_sample_interval_ms.max(0);
        if !self.speed_smoothing.is_finite() || self.speed_smoothing <= 0.0 || self.speed_smoothing > 1.0 {
            self.speed_smoothing = SPEED_SMOOTHING;
        }
        self
    }
}

fn read_config_file(path: &Path) -> Result<OrchestratorConfig> {
    let raw = fs::read_to_string(path).map_err(|err| {
        LauncherError::Config(format!("unable to read {}: {}", path.display(), err))
    })?;
    serde_json::from_str(&raw)
        .map_err(|err| LauncherError::Config(format!("invalid {}: {}", path.display(), err)))
}

fn read_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn read_env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_config_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("launcher-orchestrator-config-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp config directory");
        dir
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = temp_config_dir();
        let config = OrchestratorConfig::load(Some(&dir)).expect("load defaults");
        assert_eq!(config.history_capacity, DEFAULT_HISTORY_CAPACITY);
        assert!(config.supports_loader("Fabric"));
        assert!(config.supports_loader(" neoforge "));
        assert!(!config.supports_loader("liteloader"));
    }

    #[test]
    fn file_values_are_read_and_clamped() {
        let dir = temp_config_dir();
        std::fs::write(
            dir.join(CONFIG_FILE_NAME),
            r#"{ "historyCapacity": 0, "successHoldMs": 250, "speedSmoothing": 4.0, "deleteSupersededFiles": false }"#,
        )
        .expect("write config");

        let config = OrchestratorConfig::load(Some(&dir)).expect("load config");
        assert_eq!(config.history_capacity, 1);
        assert_eq!(config.success_hold(), Duration::from_millis(250));
        assert_eq!(config.speed_smoothing, SPEED_SMOOTHING);
        assert!(!config.delete_superseded_files);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = temp_config_dir();
        std::fs::write(dir.join(CONFIG_FILE_NAME), "{ not json").expect("write config");
        let err = OrchestratorConfig::load(Some(&dir)).expect_err("malformed config must fail");
        assert!(matches!(err, LauncherError::Config(_)));
    }
}
