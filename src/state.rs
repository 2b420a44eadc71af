use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::config::{EngineConfig, RetentionConfig};
use crate::models::action::Plan;
use crate::models::job::JobSummary;
use crate::models::progress::ProgressCallback;
use crate::services::job_tracker::PlanExecutor;
use crate::services::mcp_service::SceneTransport;
use crate::services::undo_service::UndoTable;

/// Most recent jobs first, bounded.
#[derive(Debug)]
pub struct JobHistory {
    capacity: usize,
    entries: VecDeque<JobSummary>,
}

impl JobHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, summary: JobSummary) {
        self.entries.push_front(summary);
        self.entries.truncate(self.capacity);
    }

    pub fn recent(&self, limit: usize) -> Vec<JobSummary> {
        self.entries.iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared, process-wide engine bookkeeping.
pub struct EngineState {
    pub undo: Mutex<UndoTable>,
    pub history: Mutex<JobHistory>,
}

impl EngineState {
    pub fn new(retention: &RetentionConfig) -> Self {
        Self {
            undo: Mutex::new(UndoTable::new(retention.undo_capacity)),
            history: Mutex::new(JobHistory::new(retention.history_capacity)),
        }
    }

    pub fn store_undo(&self, job_id: &str, plan: Plan) {
        let mut undo = self
            .undo
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(evicted) = undo.insert(job_id, plan) {
            tracing::debug!(job = %evicted, "undo plan evicted");
        }
    }

    pub fn undo_plan(&self, job_id: &str) -> Option<Plan> {
        self.undo
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(job_id)
            .cloned()
    }

    pub fn take_undo(&self, job_id: &str) -> Option<Plan> {
        self.undo
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take(job_id)
    }

    pub fn record(&self, summary: JobSummary) {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(summary);
    }

    pub fn recent_jobs(&self, limit: usize) -> Vec<JobSummary> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .recent(limit)
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new(&RetentionConfig::default())
    }
}

/// Everything a CLI command needs, built once per process.
pub struct AppState {
    pub config: EngineConfig,
    pub transport: Arc<dyn SceneTransport>,
    pub executor: PlanExecutor,
    pub db: Mutex<rusqlite::Connection>,
}

impl AppState {
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn SceneTransport>,
        db: rusqlite::Connection,
        progress: Option<ProgressCallback>,
    ) -> Self {
        let mut executor = PlanExecutor::new(&config, transport.clone());
        if let Some(progress) = progress {
            executor = executor.with_progress(progress);
        }
        Self {
            config,
            transport,
            executor,
            db: Mutex::new(db),
        }
    }

    pub fn db(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::action::Action;
    use crate::models::job::{JobKind, JobResult};

    fn summary(id: &str) -> JobSummary {
        JobSummary::from(&JobResult::new(id.to_string(), JobKind::Forward))
    }

    #[test]
    fn history_is_newest_first_and_bounded() {
        let state = EngineState::new(&RetentionConfig {
            undo_capacity: 2,
            history_capacity: 3,
        });
        for i in 0..5 {
            state.record(summary(&format!("job-{i}")));
        }

        let ids: Vec<String> = state.recent_jobs(10).into_iter().map(|s| s.job_id).collect();
        assert_eq!(ids, vec!["job-4", "job-3", "job-2"]);
        assert_eq!(state.recent_jobs(1).len(), 1);
    }

    #[test]
    fn undo_plans_are_consumed_once() {
        let state = EngineState::default();
        state.store_undo("job-1", Plan::new(vec![Action::SaveScene]));

        assert!(state.undo_plan("job-1").is_some());
        assert!(state.take_undo("job-1").is_some());
        assert!(state.take_undo("job-1").is_none());
        assert!(state.undo_plan("job-1").is_none());
    }

    #[test]
    fn undo_table_respects_retention() {
        let state = EngineState::new(&RetentionConfig {
            undo_capacity: 1,
            history_capacity: 1,
        });
        state.store_undo("job-1", Plan::new(vec![Action::SaveScene]));
        state.store_undo("job-2", Plan::new(vec![Action::SaveScene]));
        assert!(state.undo_plan("job-1").is_none());
        assert!(state.undo_plan("job-2").is_some());
    }
}
