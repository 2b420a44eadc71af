use std::path::Path;

use serde::Serialize;
use serde_json::{json, Value};

use crate::data::repository;
use crate::error::{AppError, EngineError};
use crate::models::action::{ActionId, Plan};
use crate::models::job::{JobResult, JobSummary};
use crate::models::phase::Phase;
use crate::services::{command_mapper, phase_splitter};
use crate::state::AppState;

pub fn load_plan(path: &Path) -> Result<Plan, AppError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn new_job_id() -> String {
    format!("job-{}", uuid::Uuid::new_v4().simple())
}

pub async fn run_plan(
    state: &AppState,
    plan_path: &Path,
    job_id: Option<String>,
) -> Result<JobResult, AppError> {
    let plan = load_plan(plan_path)?;
    let job_id = job_id.unwrap_or_else(new_job_id);
    let result = state.executor.execute(&job_id, &plan).await;
    repository::insert_job_run(&state.db(), &result)?;
    Ok(result)
}

#[derive(Debug, Serialize)]
pub struct SkippedAction {
    pub action: ActionId,
    pub kind: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct PhasePreview {
    pub total_commands: usize,
    pub phases: Vec<Phase>,
    pub skipped: Vec<SkippedAction>,
}

/// Maps and splits a plan without contacting the scene service.
pub fn preview_phases(state: &AppState, plan_path: &Path) -> Result<PhasePreview, AppError> {
    let plan = load_plan(plan_path)?;
    let mapped = command_mapper::map_plan(&plan);
    let skipped = mapped
        .skipped
        .iter()
        .map(|(id, err)| SkippedAction {
            action: *id,
            kind: plan
                .actions
                .get(*id)
                .map(|a| a.kind().to_string())
                .unwrap_or_default(),
            error: err.to_string(),
        })
        .collect();
    let total_commands = mapped.commands.len();
    let phases = phase_splitter::split(mapped.commands, state.executor.split_rules());
    Ok(PhasePreview {
        total_commands,
        phases,
        skipped,
    })
}

/// Runs the undo plan of `job_id`, from memory or else from the archive, and
/// marks it used.
pub async fn undo_job(state: &AppState, job_id: &str) -> Result<JobResult, AppError> {
    let result = match state.executor.execute_undo(job_id).await {
        Some(result) => result,
        None => {
            let plan = repository::get_undo_plan(&state.db(), job_id)?
                .ok_or_else(|| AppError::General(format!("nothing to undo for {job_id}")))?;
            state.executor.execute_undo_plan(job_id, &plan).await
        }
    };

    let db = state.db();
    repository::mark_undo_consumed(&db, job_id)?;
    repository::insert_job_run(&db, &result)?;
    Ok(result)
}

pub fn job_history(state: &AppState, limit: usize) -> Result<Vec<JobSummary>, AppError> {
    repository::list_job_runs(&state.db(), limit)
}

pub async fn ping(state: &AppState) -> Result<Value, AppError> {
    let url = state.config.transport.server_url.clone();
    state
        .transport
        .ping()
        .await
        .map_err(EngineError::from)?;
    Ok(json!({"server_url": url, "reachable": true}))
}
