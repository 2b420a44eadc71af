use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::AppError;
use crate::models::action::Plan;
use crate::models::job::{JobKind, JobResult, JobStatus, JobSummary};

/// Archives a finished job, replacing an earlier record with the same id.
pub fn insert_job_run(conn: &Connection, result: &JobResult) -> Result<i64, AppError> {
    let result_json = serde_json::to_string(result)?;
    let undo_json = result
        .undo_plan
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT OR REPLACE INTO job_runs (job_id, kind, status, total_commands, success_count, fail_count, error_count, result_json, undo_plan, undo_consumed, started_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?11)",
        params![
            result.job_id,
            result.kind.to_string(),
            result.status.to_string(),
            result.total_commands as i64,
            result.success_count as i64,
            result.fail_count as i64,
            result.errors.len() as i64,
            result_json,
            undo_json,
            result.started_at,
            result.completed_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_job_runs(conn: &Connection, limit: usize) -> Result<Vec<JobSummary>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT job_id, kind, status, total_commands, success_count, fail_count, error_count,
                undo_plan IS NOT NULL AND undo_consumed = 0, started_at, completed_at
         FROM job_runs ORDER BY started_at DESC, id DESC LIMIT ?1",
    )?;

    let runs = stmt
        .query_map(params![limit as i64], |row| {
            let kind: String = row.get(1)?;
            let status: String = row.get(2)?;
            let total: i64 = row.get(3)?;
            let succeeded: i64 = row.get(4)?;
            let failed: i64 = row.get(5)?;
            let errors: i64 = row.get(6)?;
            let started_at: DateTime<Utc> = row.get(8)?;

            Ok(JobSummary {
                job_id: row.get(0)?,
                kind: kind.parse::<JobKind>().unwrap_or(JobKind::Forward),
                status: status.parse::<JobStatus>().unwrap_or(JobStatus::Failed),
                total_commands: total as usize,
                success_count: succeeded as usize,
                fail_count: failed as usize,
                error_count: errors as usize,
                has_undo: row.get(7)?,
                started_at,
                completed_at: row.get(9)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    Ok(runs)
}

pub fn get_job_result(conn: &Connection, job_id: &str) -> Result<Option<JobResult>, AppError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT result_json FROM job_runs WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )
        .optional()?;

    Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
}

/// Undo plan of `job_id` unless it has already been run.
pub fn get_undo_plan(conn: &Connection, job_id: &str) -> Result<Option<Plan>, AppError> {
    let raw: Option<Option<String>> = conn
        .query_row(
            "SELECT undo_plan FROM job_runs WHERE job_id = ?1 AND undo_consumed = 0",
            params![job_id],
            |row| row.get(0),
        )
        .optional()?;

    Ok(raw
        .flatten()
        .map(|s| serde_json::from_str(&s))
        .transpose()?)
}

pub fn mark_undo_consumed(conn: &Connection, job_id: &str) -> Result<usize, AppError> {
    let count = conn.execute(
        "UPDATE job_runs SET undo_consumed = 1 WHERE job_id = ?1",
        params![job_id],
    )?;
    Ok(count)
}
