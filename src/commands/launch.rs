use std::sync::Arc;

use tauri::State;

use crate::models::{Instance, LaunchOutcome, LaunchSession, OverlayState, StopOutcome};
use crate::services::launch_orchestrator::LaunchOrchestrator;
use crate::services::update_prompt::{UpdateAction, UpdatePromptRequest};

#[tauri::command]
pub async fn launch_instance(
    instance_id: String,
    state: State<'_, Arc<LaunchOrchestrator>>,
) -> Result<LaunchOutcome, String> {
    Ok(state.launch(&instance_id).await)
}

#[tauri::command]
pub async fn stop_instance(
    instance_id: String,
    state: State<'_, Arc<LaunchOrchestrator>>,
) -> Result<StopOutcome, String> {
    Ok(state.stop(&instance_id).await)
}

#[tauri::command]
pub async fn refresh_instances(state: State<'_, Arc<LaunchOrchestrator>>) -> Result<Vec<Instance>, String> {
    state.refresh_instances().await.map_err(|err| err.to_string())
}

#[tauri::command]
pub fn get_launch_sessions(state: State<'_, Arc<LaunchOrchestrator>>) -> Vec<LaunchSession> {
    state.sessions()
}

#[tauri::command]
pub fn get_launch_overlay(state: State<'_, Arc<LaunchOrchestrator>>) -> OverlayState {
    state.overlay()
}

#[tauri::command]
pub fn get_update_prompt(state: State<'_, Arc<LaunchOrchestrator>>) -> Option<UpdatePromptRequest> {
    state.prompts().pending()
}

#[tauri::command]
pub fn set_update_prompt_disable_checks(
    disable: bool,
    state: State<'_, Arc<LaunchOrchestrator>>,
) -> Result<(), String> {
    if state.prompts().set_disable_future_checks(disable) {
        Ok(())
    } else {
        Err("No update prompt is open".to_string())
    }
}

#[tauri::command]
pub fn resolve_update_prompt(
    action: UpdateAction,
    state: State<'_, Arc<LaunchOrchestrator>>,
) -> Result<(), String> {
    if state.prompts().resolve(action) {
        Ok(())
    } else {
        Err("No update prompt is open".to_string())
    }
}
