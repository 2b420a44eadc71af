use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::models::action::{ActionId, Plan};
use crate::models::command::Command;
use crate::models::job::{CommandStatus, JobKind, JobResult, JobStatus, JobSummary};
use crate::models::phase::Phase;
use crate::models::progress::ProgressCallback;
use crate::services::appearance_cache::{AppearanceCache, SceneLookup};
use crate::services::batch_runner::{BatchRunner, RunnerSettings};
use crate::services::command_mapper;
use crate::services::error_classifier::{ErrorClassifier, PatternClassifier};
use crate::services::import_service;
use crate::services::mcp_service::SceneTransport;
use crate::services::phase_splitter::{self, SplitRules};
use crate::services::undo_service;
use crate::state::EngineState;

/// Runs plans as jobs: maps, splits, executes phase by phase, then records
/// the undo plan and history entry.
///
/// Jobs on one executor may run concurrently; the only shared state is the
/// [`EngineState`] tables and the [`SceneLookup`].
pub struct PlanExecutor {
    transport: Arc<dyn SceneTransport>,
    settings: RunnerSettings,
    split_rules: SplitRules,
    project_root: Option<PathBuf>,
    state: Arc<EngineState>,
    lookup: Arc<dyn SceneLookup>,
    classifier: Arc<dyn ErrorClassifier>,
    progress: Option<ProgressCallback>,
}

impl PlanExecutor {
    pub fn new(config: &EngineConfig, transport: Arc<dyn SceneTransport>) -> Self {
        Self {
            transport,
            settings: RunnerSettings::from(config),
            split_rules: SplitRules::from(&config.execution),
            project_root: config.project.root.clone(),
            state: Arc::new(EngineState::new(&config.retention)),
            lookup: Arc::new(AppearanceCache::new()),
            classifier: Arc::new(PatternClassifier::new()),
            progress: None,
        }
    }

    pub fn with_state(mut self, state: Arc<EngineState>) -> Self {
        self.state = state;
        self
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn SceneLookup>) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    pub fn split_rules(&self) -> &SplitRules {
        &self.split_rules
    }

    /// Executes `plan` as job `job_id`. Failures are reported in the result,
    /// never returned as errors.
    pub async fn execute(&self, job_id: &str, plan: &Plan) -> JobResult {
        self.run(job_id, plan, JobKind::Forward).await
    }

    /// Runs and consumes the undo plan recorded for `job_id`. `None` when no
    /// plan is held for it.
    pub async fn execute_undo(&self, job_id: &str) -> Option<JobResult> {
        let plan = self.state.take_undo(job_id)?;
        Some(self.execute_undo_plan(job_id, &plan).await)
    }

    /// Runs an undo plan obtained elsewhere, e.g. from the job archive.
    pub async fn execute_undo_plan(&self, job_id: &str, plan: &Plan) -> JobResult {
        self.run(&format!("undo-{job_id}"), plan, JobKind::Undo).await
    }

    pub fn undo_plan(&self, job_id: &str) -> Option<Plan> {
        self.state.undo_plan(job_id)
    }

    async fn run(&self, job_id: &str, plan: &Plan, kind: JobKind) -> JobResult {
        let started = Instant::now();
        let mut result = JobResult::new(job_id, kind);
        tracing::info!(
            job = job_id,
            kind = %kind,
            actions = plan.actions.len(),
            "job started"
        );

        result.status = JobStatus::Validating;
        let prior = match kind {
            JobKind::Forward => self.lookup.prior_appearance(plan),
            JobKind::Undo => HashMap::new(),
        };
        result
            .errors
            .extend(import_service::stage_imports(plan, self.project_root.as_deref()));

        let mapped = command_mapper::map_plan(plan);
        for (id, err) in &mapped.skipped {
            let action_kind = plan
                .actions
                .get(*id)
                .map(|a| a.kind().to_string())
                .unwrap_or_default();
            result.skipped_actions.push(action_kind);
            result.errors.push(format!("action {id}: {err}"));
        }
        let expected = commands_per_action(&mapped.commands);
        result.total_commands = mapped.commands.len();
        let phases = phase_splitter::split(mapped.commands, &self.split_rules);

        result.status = JobStatus::Executing;
        self.run_phases(job_id, &phases, &mut result).await;

        result.success_count = result.batch_results.iter().map(|b| b.success_count).sum();
        result.fail_count = result.batch_results.iter().map(|b| b.fail_count).sum();
        result.status = final_status(&result);

        let succeeded = succeeded_actions(&result, &expected);
        if kind == JobKind::Forward {
            if let Some(undo) = undo_service::synthesize(plan, &succeeded, &prior) {
                self.state.store_undo(job_id, undo.clone());
                result.undo_plan = Some(undo);
            }
        }
        self.lookup.observe(plan, &succeeded);

        if result.fail_count > 0 || result.halted || !result.skipped_actions.is_empty() {
            let error_text = result.errors.join("; ");
            let known_targets = self.lookup.known_targets();
            result.error_classification =
                Some(self.classifier.classify(&error_text, plan, &known_targets));
        }

        result.completed_at = Some(Utc::now());
        result.duration_ms = started.elapsed().as_millis() as u64;
        self.state.record(JobSummary::from(&result));

        tracing::info!(
            job = job_id,
            status = %result.status,
            succeeded = result.success_count,
            failed = result.fail_count,
            errors = result.errors.len(),
            duration_ms = result.duration_ms,
            "job finished"
        );
        result
    }

    async fn run_phases(&self, job_id: &str, phases: &[Phase], result: &mut JobResult) {
        let runner = BatchRunner::new(
            self.transport.as_ref(),
            &self.settings,
            job_id,
            result.total_commands,
        )
        .with_progress(self.progress.as_ref());

        let mut next_index = 0;
        for (i, phase) in phases.iter().enumerate() {
            let phase_no = i + 1;
            let run = runner.run(phase_no, phase, next_index).await;
            next_index += phase.len();
            result.batch_results.extend(run.batches);
            result.errors.extend(run.errors);

            if let Some(fatal) = run.fatal {
                let remaining: usize = phases[phase_no..].iter().map(Phase::len).sum();
                tracing::error!(
                    job = job_id,
                    phase = phase_no,
                    remaining,
                    error = %fatal,
                    "halting job"
                );
                result.halted = true;
                result.errors.push(format!(
                    "halted after phase {phase_no}: {fatal}; {remaining} command(s) not attempted"
                ));
                break;
            }
        }
    }
}

fn commands_per_action(commands: &[Command]) -> HashMap<ActionId, usize> {
    let mut counts = HashMap::new();
    for command in commands {
        *counts.entry(command.origin).or_insert(0) += 1;
    }
    counts
}

/// Actions every command of which is known to have succeeded.
fn succeeded_actions(
    result: &JobResult,
    expected: &HashMap<ActionId, usize>,
) -> BTreeSet<ActionId> {
    let mut confirmed: HashMap<ActionId, usize> = HashMap::new();
    for outcome in result
        .outcomes()
        .filter(|o| o.status == CommandStatus::Succeeded)
    {
        *confirmed.entry(outcome.origin).or_insert(0) += 1;
    }
    expected
        .iter()
        .filter(|(id, count)| confirmed.get(*id) == Some(*count))
        .map(|(id, _)| *id)
        .collect()
}

fn final_status(result: &JobResult) -> JobStatus {
    if result.halted {
        return JobStatus::Failed;
    }
    if result.total_commands == 0 {
        return if result.skipped_actions.is_empty() {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
    }
    match (result.success_count, result.fail_count) {
        (_, 0) => JobStatus::Completed,
        (0, _) => JobStatus::Failed,
        _ => JobStatus::Partial,
    }
}
