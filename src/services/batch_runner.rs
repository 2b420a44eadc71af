use std::time::Duration;

use tokio::time::{timeout, Instant};

use crate::config::EngineConfig;
use crate::error::{EngineError, TransportError};
use crate::models::command::Command;
use crate::models::job::{BatchResult, CommandOutcome, CommandStatus};
use crate::models::phase::{Phase, PhaseMode};
use crate::models::progress::{ProgressCallback, ProgressEvent};
use crate::services::mcp_service::SceneTransport;
use crate::services::response_parser::{self, CallReply, ParsedBatch};
use crate::services::retry_policy::{self, RemediationRule, RetryPolicy};

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub max_batch: usize,
    pub call_timeout: Duration,
    pub compile_wait: Duration,
    pub halt_on_barrier_failure: bool,
    pub halt_on_unreachable: bool,
    pub retry: RetryPolicy,
    pub remediation: Vec<RemediationRule>,
}

impl From<&EngineConfig> for RunnerSettings {
    fn from(config: &EngineConfig) -> Self {
        let exec = &config.execution;
        Self {
            max_batch: exec.max_batch.max(1),
            call_timeout: config.transport.timeout(),
            compile_wait: exec.compile_wait(),
            halt_on_barrier_failure: exec.halt_on_barrier_failure,
            halt_on_unreachable: exec.halt_on_unreachable,
            retry: RetryPolicy::from(exec),
            remediation: retry_policy::default_rules(exec.remediation_settle()),
        }
    }
}

/// What running one phase produced.
#[derive(Debug, Default)]
pub struct PhaseRun {
    pub batches: Vec<BatchResult>,
    pub errors: Vec<String>,
    /// Set when the remaining phases must not run.
    pub fatal: Option<TransportError>,
}

impl PhaseRun {
    fn record(&mut self, batch: BatchResult) {
        if let Some(error) = &batch.error {
            self.errors.push(error.clone());
        }
        self.batches.push(batch);
    }
}

/// Executes phases of one job against the scene service.
pub struct BatchRunner<'a> {
    transport: &'a dyn SceneTransport,
    settings: &'a RunnerSettings,
    job_id: &'a str,
    total: usize,
    progress: Option<&'a ProgressCallback>,
}

impl<'a> BatchRunner<'a> {
    pub fn new(
        transport: &'a dyn SceneTransport,
        settings: &'a RunnerSettings,
        job_id: &'a str,
        total: usize,
    ) -> Self {
        Self {
            transport,
            settings,
            job_id,
            total,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<&'a ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Runs `phase`. `first_index` is the job-wide index of its first command.
    pub async fn run(&self, phase_no: usize, phase: &Phase, first_index: usize) -> PhaseRun {
        tracing::info!(
            job = self.job_id,
            phase = phase_no,
            mode = %phase.mode,
            commands = phase.len(),
            "running phase"
        );
        match phase.mode {
            PhaseMode::Batchable => self.run_batchable(phase_no, phase, first_index).await,
            PhaseMode::Singular => self.run_singular(phase_no, phase, first_index).await,
            PhaseMode::SyncBarrier => self.run_barrier(phase_no, phase, first_index).await,
        }
    }

    fn emit(&self, outcome: &CommandOutcome) {
        tracing::debug!(
            job = self.job_id,
            index = outcome.index,
            tool = %outcome.tool,
            status = ?outcome.status,
            "command finished"
        );
        if let Some(progress) = self.progress {
            progress(&ProgressEvent {
                job_id: self.job_id.to_string(),
                command_index: outcome.index,
                total: self.total,
                tool: outcome.tool,
                status: outcome.status,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Batchable
    // -----------------------------------------------------------------------

    async fn run_batchable(&self, phase_no: usize, phase: &Phase, first_index: usize) -> PhaseRun {
        let mut run = PhaseRun::default();
        let mut index = first_index;

        for (batch_no, slice) in phase.commands.chunks(self.settings.max_batch).enumerate() {
            let started = Instant::now();
            let response = match timeout(
                self.settings.call_timeout,
                self.transport.batch_execute(slice),
            )
            .await
            {
                Err(_) => Err(EngineError::from(TransportError::Timeout(
                    self.settings.call_timeout,
                ))),
                Ok(Err(err)) => Err(EngineError::from(err)),
                Ok(Ok(raw)) => response_parser::parse_batch_response(&raw),
            };

            let fatal = match &response {
                Err(EngineError::Transport(err))
                    if err.is_unreachable() && self.settings.halt_on_unreachable =>
                {
                    Some(err.clone())
                }
                _ => None,
            };

            let reconciled = match response {
                Ok(parsed) => reconcile(slice, &parsed, index),
                Err(err) => {
                    tracing::error!(job = self.job_id, phase = phase_no, batch = batch_no, error = %err, "batch failed");
                    Reconciled::uniform(slice, index, CommandStatus::Failed, Some(err.to_string()))
                }
            };
            let batch = batch_result(
                phase_no,
                batch_no,
                PhaseMode::Batchable,
                reconciled,
                started,
                &format!("phase {phase_no} batch {batch_no}"),
            );
            tracing::info!(
                job = self.job_id,
                phase = phase_no,
                batch = batch_no,
                succeeded = batch.success_count,
                size = slice.len(),
                elapsed_ms = batch.elapsed_ms,
                "batch finished"
            );
            for outcome in &batch.per_command {
                self.emit(outcome);
            }
            index += slice.len();
            run.record(batch);

            if fatal.is_some() {
                run.fatal = fatal;
                break;
            }
        }
        run
    }

    // -----------------------------------------------------------------------
    // Singular
    // -----------------------------------------------------------------------

    async fn run_singular(&self, phase_no: usize, phase: &Phase, first_index: usize) -> PhaseRun {
        let mut run = PhaseRun::default();
        let transport = self.transport;
        let call_timeout = self.settings.call_timeout;

        for (position, command) in phase.commands.iter().enumerate() {
            let started = Instant::now();
            let report = retry_policy::execute_with_policy(
                command,
                &self.settings.retry,
                &self.settings.remediation,
                |cmd| call_once(transport, call_timeout, cmd),
            )
            .await;

            let outcome = CommandOutcome {
                index: first_index + position,
                origin: command.origin,
                tool: command.tool,
                status: if report.succeeded {
                    CommandStatus::Succeeded
                } else {
                    CommandStatus::Failed
                },
                attempts: report.attempts,
                remediations: report.remediations,
                error: report.error.clone(),
            };
            let error = report.error.clone().filter(|_| !report.succeeded);
            let batch = batch_result(
                phase_no,
                position,
                PhaseMode::Singular,
                Reconciled::from_outcomes(vec![outcome], error),
                started,
                &format!("phase {phase_no} {}", command.label()),
            );
            self.emit(&batch.per_command[0]);
            run.record(batch);

            if let Some(err) = report.fatal {
                if self.settings.halt_on_unreachable {
                    run.fatal = Some(err);
                    break;
                }
            }
        }
        run
    }

    // -----------------------------------------------------------------------
    // Sync barrier
    // -----------------------------------------------------------------------

    async fn run_barrier(&self, phase_no: usize, phase: &Phase, first_index: usize) -> PhaseRun {
        let mut run = PhaseRun::default();
        let Some(command) = phase.commands.first() else {
            return run;
        };
        let started = Instant::now();
        let result = call_once(self.transport, self.settings.call_timeout, command.clone()).await;

        let transport_error = match &result {
            Err(EngineError::Transport(err)) => Some(err.clone()),
            _ => None,
        };
        let (status, error) = match result {
            Ok(CallReply {
                succeeded: true, ..
            }) => (CommandStatus::Succeeded, None),
            Ok(reply) => (
                CommandStatus::Failed,
                Some(
                    EngineError::RemoteRejection {
                        tool: command.tool,
                        message: reply
                            .error
                            .unwrap_or_else(|| "call reported failure".to_string()),
                    }
                    .to_string(),
                ),
            ),
            Err(err) => (CommandStatus::Failed, Some(err.to_string())),
        };

        tracing::info!(
            job = self.job_id,
            phase = phase_no,
            wait_ms = self.settings.compile_wait.as_millis() as u64,
            "waiting for editor to settle"
        );
        tokio::time::sleep(self.settings.compile_wait).await;

        let outcome = CommandOutcome {
            index: first_index,
            origin: command.origin,
            tool: command.tool,
            status,
            attempts: 1,
            remediations: 0,
            error: error.clone(),
        };
        let batch = batch_result(
            phase_no,
            0,
            PhaseMode::SyncBarrier,
            Reconciled::from_outcomes(vec![outcome], error),
            started,
            &format!("phase {phase_no} {}", command.label()),
        );
        self.emit(&batch.per_command[0]);
        run.record(batch);

        if let Some(err) = transport_error {
            let halt = (err.is_unreachable() && self.settings.halt_on_unreachable)
                || self.settings.halt_on_barrier_failure;
            if halt {
                tracing::error!(job = self.job_id, phase = phase_no, error = %err, "barrier failed, halting job");
                run.fatal = Some(err);
            }
        }
        run
    }
}

async fn call_once(
    transport: &dyn SceneTransport,
    call_timeout: Duration,
    command: Command,
) -> Result<CallReply, EngineError> {
    let raw = match timeout(call_timeout, transport.call(command.tool, &command.params)).await {
        Err(_) => return Err(TransportError::Timeout(call_timeout).into()),
        Ok(result) => result?,
    };
    response_parser::parse_call_response(&raw)
}

fn mark_all(
    slice: &[Command],
    first_index: usize,
    status: CommandStatus,
    error: Option<String>,
) -> Vec<CommandOutcome> {
    slice
        .iter()
        .enumerate()
        .map(|(offset, command)| CommandOutcome {
            index: first_index + offset,
            origin: command.origin,
            tool: command.tool,
            status,
            attempts: 1,
            remediations: 0,
            error: error.clone(),
        })
        .collect()
}

/// Outcomes of one slice with the counts they add up to.
struct Reconciled {
    outcomes: Vec<CommandOutcome>,
    success_count: usize,
    fail_count: usize,
    error: Option<String>,
}

impl Reconciled {
    fn uniform(
        slice: &[Command],
        first_index: usize,
        status: CommandStatus,
        error: Option<String>,
    ) -> Self {
        let outcomes = mark_all(slice, first_index, status, error.clone());
        let (success_count, fail_count) = match status {
            CommandStatus::Succeeded => (slice.len(), 0),
            _ => (0, slice.len()),
        };
        Self {
            outcomes,
            success_count,
            fail_count,
            error,
        }
    }

    fn from_outcomes(outcomes: Vec<CommandOutcome>, error: Option<String>) -> Self {
        let success_count = outcomes.iter().filter(|o| o.succeeded()).count();
        let fail_count = outcomes.len() - success_count;
        Self {
            outcomes,
            success_count,
            fail_count,
            error,
        }
    }
}

/// Attributes a parsed batch response to the commands that were sent.
///
/// Per-command details are zipped positionally only when they line up with
/// the request (same length, matching tool names). Otherwise the reported
/// counts decide: all succeeded, all failed, or unattributed.
fn reconcile(slice: &[Command], parsed: &ParsedBatch, first_index: usize) -> Reconciled {
    let positional = parsed.details.len() == slice.len()
        && slice.iter().zip(&parsed.details).all(|(command, detail)| {
            detail
                .tool
                .as_deref()
                .map_or(true, |tool| tool.is_empty() || tool == command.tool.as_str())
        });

    if positional {
        let outcomes: Vec<CommandOutcome> = slice
            .iter()
            .zip(&parsed.details)
            .enumerate()
            .map(|(offset, (command, detail))| CommandOutcome {
                index: first_index + offset,
                origin: command.origin,
                tool: command.tool,
                status: if detail.succeeded {
                    CommandStatus::Succeeded
                } else {
                    CommandStatus::Failed
                },
                attempts: 1,
                remediations: 0,
                error: if detail.succeeded {
                    None
                } else {
                    Some(
                        detail
                            .error
                            .clone()
                            .unwrap_or_else(|| format!("{} failed", command.label())),
                    )
                },
            })
            .collect();
        let failed: Vec<String> = outcomes
            .iter()
            .filter_map(|o| o.error.as_ref().map(|e| format!("#{} {e}", o.index)))
            .collect();
        let error = parsed
            .error
            .clone()
            .or_else(|| (!failed.is_empty()).then(|| failed.join("; ")));
        return Reconciled::from_outcomes(outcomes, error);
    }

    if !parsed.details.is_empty() {
        tracing::warn!(
            sent = slice.len(),
            reported = parsed.details.len(),
            "batch details do not line up with request, using counts"
        );
    }

    let len = slice.len();
    let succeeded = parsed.success_count.min(len);
    if succeeded == len {
        return Reconciled::uniform(slice, first_index, CommandStatus::Succeeded, None);
    }
    if succeeded == 0 {
        let reason = parsed
            .error
            .clone()
            .unwrap_or_else(|| format!("all {len} commands failed"));
        return Reconciled::uniform(slice, first_index, CommandStatus::Failed, Some(reason));
    }

    let failed = len - succeeded;
    Reconciled {
        outcomes: mark_all(slice, first_index, CommandStatus::Unattributed, None),
        success_count: succeeded,
        fail_count: failed,
        error: Some(
            parsed
                .error
                .clone()
                .unwrap_or_else(|| format!("{failed} of {len} commands failed, positions unknown")),
        ),
    }
}

fn batch_result(
    phase: usize,
    batch: usize,
    mode: PhaseMode,
    reconciled: Reconciled,
    started: Instant,
    context: &str,
) -> BatchResult {
    BatchResult {
        phase,
        batch,
        mode,
        success_count: reconciled.success_count,
        fail_count: reconciled.fail_count,
        per_command: reconciled.outcomes,
        elapsed_ms: started.elapsed().as_millis() as u64,
        error: reconciled.error.map(|e| format!("{context}: {e}")),
    }
}
