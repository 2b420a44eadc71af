use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::action::Plan;
use crate::models::command::ToolKind;
use crate::models::phase::PhaseMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Validating,
    Executing,
    Completed,
    Failed,
    Partial,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Partial)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Validating => write!(f, "validating"),
            Self::Executing => write!(f, "executing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Partial => write!(f, "partial"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "validating" => Ok(Self::Validating),
            "executing" => Ok(Self::Executing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "partial" => Ok(Self::Partial),
            _ => Err(format!("unknown job status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Forward,
    Undo,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Undo => write!(f, "undo"),
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward" => Ok(Self::Forward),
            "undo" => Ok(Self::Undo),
            _ => Err(format!("unknown job kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Succeeded,
    Failed,
    /// The batch reported mixed counts without per-command detail.
    Unattributed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// Position of the command across the whole job.
    pub index: usize,
    /// Plan action the command was derived from.
    pub origin: usize,
    pub tool: ToolKind,
    pub status: CommandStatus,
    pub attempts: u32,
    pub remediations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == CommandStatus::Succeeded
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub phase: usize,
    pub batch: usize,
    pub mode: PhaseMode,
    pub success_count: usize,
    pub fail_count: usize,
    pub per_command: Vec<CommandOutcome>,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    #[serde(rename = "E1_PARSE_FAIL")]
    ParseFail,
    #[serde(rename = "E2_OBJECT_NOT_FOUND")]
    ObjectNotFound,
    #[serde(rename = "E3_MCP_DISCONNECTED")]
    Disconnected,
    #[serde(rename = "E4_POSITION_CONFLICT")]
    PositionConflict,
    #[serde(rename = "E5_SCHEMA_ERROR")]
    SchemaError,
    #[serde(rename = "E6_BATCH_LIMIT")]
    BatchLimit,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            Self::ParseFail => "E1_PARSE_FAIL",
            Self::ObjectNotFound => "E2_OBJECT_NOT_FOUND",
            Self::Disconnected => "E3_MCP_DISCONNECTED",
            Self::PositionConflict => "E4_POSITION_CONFLICT",
            Self::SchemaError => "E5_SCHEMA_ERROR",
            Self::BatchLimit => "E6_BATCH_LIMIT",
        };
        f.write_str(code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub label: String,
    pub fix_plan: String,
}

impl Suggestion {
    pub fn new(label: impl Into<String>, fix_plan: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            fix_plan: fix_plan.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub category: ErrorCategory,
    pub root_cause: String,
    pub suggestions: Vec<Suggestion>,
    pub auto_fixable: bool,
}

// ---------------------------------------------------------------------------
// Job results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub total_commands: usize,
    pub success_count: usize,
    pub fail_count: usize,
    pub batch_results: Vec<BatchResult>,
    pub errors: Vec<String>,
    /// Kinds of plan actions that could not be mapped and were left out.
    pub skipped_actions: Vec<String>,
    /// Set when an unreachable service stopped the remaining phases.
    pub halted: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub undo_plan: Option<Plan>,
    pub error_classification: Option<ErrorReport>,
}

impl JobResult {
    pub fn new(job_id: impl Into<String>, kind: JobKind) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            status: JobStatus::Pending,
            total_commands: 0,
            success_count: 0,
            fail_count: 0,
            batch_results: Vec::new(),
            errors: Vec::new(),
            skipped_actions: Vec::new(),
            halted: false,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: 0,
            undo_plan: None,
            error_classification: None,
        }
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &CommandOutcome> {
        self.batch_results.iter().flat_map(|b| b.per_command.iter())
    }
}

/// Compact history entry for a finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub total_commands: usize,
    pub success_count: usize,
    pub fail_count: usize,
    pub error_count: usize,
    pub has_undo: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&JobResult> for JobSummary {
    fn from(result: &JobResult) -> Self {
        Self {
            job_id: result.job_id.clone(),
            kind: result.kind,
            status: result.status,
            total_commands: result.total_commands,
            success_count: result.success_count,
            fail_count: result.fail_count,
            error_count: result.errors.len(),
            has_undo: result.undo_plan.is_some(),
            started_at: result.started_at,
            completed_at: result.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Validating,
            JobStatus::Executing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Partial,
        ] {
            assert_eq!(status.to_string().parse::<JobStatus>().unwrap(), status);
        }
        assert!("done".parse::<JobStatus>().is_err());
        assert!(!JobStatus::Executing.is_terminal());
        assert!(JobStatus::Partial.is_terminal());
    }

    #[test]
    fn test_category_serializes_with_code() {
        let json = serde_json::to_string(&ErrorCategory::ObjectNotFound).unwrap();
        assert_eq!(json, "\"E2_OBJECT_NOT_FOUND\"");
        assert_eq!(ErrorCategory::BatchLimit.to_string(), "E6_BATCH_LIMIT");
    }

    #[test]
    fn test_summary_from_result() {
        let mut result = JobResult::new("job-1", JobKind::Forward);
        result.status = JobStatus::Partial;
        result.total_commands = 4;
        result.success_count = 3;
        result.fail_count = 1;
        result.errors.push("boom".to_string());

        let summary = JobSummary::from(&result);
        assert_eq!(summary.job_id, "job-1");
        assert_eq!(summary.status, JobStatus::Partial);
        assert_eq!(summary.error_count, 1);
        assert!(!summary.has_undo);
    }
}
