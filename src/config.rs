use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::command::ToolKind;

/// Hard ceiling of the scene service's batched call.
pub const MAX_BATCH_LIMIT: usize = 25;

pub const CONFIG_FILE_NAME: &str = "scenebatch.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub transport: TransportConfig,
    pub execution: ExecutionConfig,
    pub retention: RetentionConfig,
    pub project: ProjectConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub server_url: String,
    pub timeout_secs: u64,
    pub protocol_version: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080/mcp".to_string(),
            timeout_secs: 60,
            protocol_version: "2025-03-26".to_string(),
        }
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn script_like_tools() -> BTreeSet<ToolKind> {
    [
        ToolKind::CreateScript,
        ToolKind::ManageShader,
        ToolKind::ManageScriptableObject,
        ToolKind::ExecuteMenuItem,
    ]
    .into_iter()
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_batch: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub remediation_settle_ms: u64,
    pub compile_wait_ms: u64,
    pub halt_on_barrier_failure: bool,
    pub halt_on_unreachable: bool,
    pub non_batchable: BTreeSet<ToolKind>,
    pub sync_barrier: BTreeSet<ToolKind>,
    pub retryable: BTreeSet<ToolKind>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_batch: MAX_BATCH_LIMIT,
            max_retries: 3,
            retry_delay_ms: 1000,
            remediation_settle_ms: 500,
            compile_wait_ms: 5000,
            halt_on_barrier_failure: false,
            halt_on_unreachable: true,
            non_batchable: script_like_tools(),
            sync_barrier: [ToolKind::RefreshUnity].into_iter().collect(),
            retryable: script_like_tools(),
        }
    }
}

impl ExecutionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn remediation_settle(&self) -> Duration {
        Duration::from_millis(self.remediation_settle_ms)
    }

    pub fn compile_wait(&self) -> Duration {
        Duration::from_millis(self.compile_wait_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub undo_capacity: usize,
    pub history_capacity: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            undo_capacity: 50,
            history_capacity: 200,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Scene project directory that imported files are staged into.
    pub root: Option<PathBuf>,
    /// Job archive location. Defaults to the user data directory.
    pub database: Option<PathBuf>,
}

impl EngineConfig {
    /// Loads `path` if given, else the per-user config file if it exists,
    /// else defaults. Environment overrides are applied on top.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        dotenvy::dotenv().ok();
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, AppError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("SCENEBATCH_SERVER_URL").or_else(|| non_empty("MCP_SERVER_URL"))
        {
            self.transport.server_url = url;
        }
        if let Some(timeout) = non_empty("MCP_TIMEOUT") {
            match timeout.trim().parse::<f64>() {
                Ok(secs) if secs > 0.0 => self.transport.timeout_secs = secs.ceil() as u64,
                _ => tracing::warn!(value = %timeout, "ignoring invalid MCP_TIMEOUT"),
            }
        }
        if let Some(root) = non_empty("SCENEBATCH_PROJECT_ROOT") {
            self.project.root = Some(PathBuf::from(root));
        }
        if let Some(db) = non_empty("SCENEBATCH_DB") {
            self.project.database = Some(PathBuf::from(db));
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let exec = &self.execution;
        if exec.max_batch == 0 || exec.max_batch > MAX_BATCH_LIMIT {
            return Err(AppError::Config(format!(
                "max_batch must be between 1 and {MAX_BATCH_LIMIT}, got {}",
                exec.max_batch
            )));
        }
        if self.retention.undo_capacity == 0 || self.retention.history_capacity == 0 {
            return Err(AppError::Config(
                "retention capacities must be at least 1".to_string(),
            ));
        }
        if let Some(tool) = exec.non_batchable.intersection(&exec.sync_barrier).next() {
            return Err(AppError::Config(format!(
                "{tool} cannot be both non_batchable and a sync_barrier"
            )));
        }
        if self.transport.timeout_secs == 0 {
            return Err(AppError::Config(
                "timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.project.database.clone().or_else(|| {
            directories::ProjectDirs::from("", "", "scenebatch")
                .map(|dirs| dirs.data_dir().join("scenebatch.db"))
        })
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "scenebatch")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.execution.max_batch, 25);
        assert_eq!(config.execution.compile_wait(), Duration::from_secs(5));
        assert!(config.execution.sync_barrier.contains(&ToolKind::RefreshUnity));
        assert!(config.execution.retryable.contains(&ToolKind::CreateScript));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [execution]
            max_batch = 10
            retryable = ["create_script"]

            [transport]
            server_url = "http://10.0.0.2:9000/mcp"
            "#,
        )
        .unwrap();

        assert_eq!(config.execution.max_batch, 10);
        assert_eq!(config.execution.max_retries, 3);
        assert_eq!(config.execution.retryable.len(), 1);
        assert_eq!(config.transport.server_url, "http://10.0.0.2:9000/mcp");
        assert_eq!(config.transport.timeout_secs, 60);
        assert_eq!(config.retention.undo_capacity, 50);
    }

    #[test]
    fn test_unknown_tool_in_toml_is_rejected() {
        let result = EngineConfig::from_toml(
            r#"
            [execution]
            non_batchable = ["launch_rockets"]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_batch() {
        let mut config = EngineConfig::default();
        config.execution.max_batch = 26;
        assert!(config.validate().is_err());
        config.execution.max_batch = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_overlapping_sets() {
        let mut config = EngineConfig::default();
        config.execution.sync_barrier.insert(ToolKind::CreateScript);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("create_script"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("MCP_SERVER_URL", "http://fallback/mcp"),
            ("MCP_TIMEOUT", "2.5"),
            ("SCENEBATCH_DB", "/tmp/jobs.db"),
            ("SCENEBATCH_PROJECT_ROOT", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.transport.server_url, "http://fallback/mcp");
        assert_eq!(config.transport.timeout_secs, 3);
        assert_eq!(config.project.database, Some(PathBuf::from("/tmp/jobs.db")));
        assert_eq!(config.project.root, None);
    }

    #[test]
    fn test_primary_url_wins_over_fallback() {
        let mut config = EngineConfig::default();
        config.apply_overrides(|key| match key {
            "SCENEBATCH_SERVER_URL" => Some("http://primary/mcp".to_string()),
            "MCP_SERVER_URL" => Some("http://fallback/mcp".to_string()),
            _ => None,
        });
        assert_eq!(config.transport.server_url, "http://primary/mcp");
    }
}
