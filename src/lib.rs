//! Launch and transfer orchestration core for a desktop game launcher.
//!
//! Drives per-instance launches through an interactive update gate, keeps a
//! replicated download queue with bounded history, and smooths throughput
//! telemetry from backend progress events. The backend process itself sits
//! behind [`services::LauncherBackend`].

#[cfg(feature = "tauri")]
pub mod commands;
pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod services;
pub mod utils;

pub use config::OrchestratorConfig;
pub use errors::{LauncherError, Result};
pub use services::{DownloadQueue, EventHub, LaunchOrchestrator, LauncherBackend};
