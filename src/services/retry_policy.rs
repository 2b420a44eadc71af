use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use serde_json::json;

use crate::config::ExecutionConfig;
use crate::error::{EngineError, TransportError};
use crate::models::command::{Command, ToolKind};
use crate::services::response_parser::CallReply;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub eligible: BTreeSet<ToolKind>,
}

impl RetryPolicy {
    pub fn is_eligible(&self, tool: ToolKind) -> bool {
        self.eligible.contains(&tool)
    }

    pub fn attempts_for(&self, tool: ToolKind) -> u32 {
        if self.is_eligible(tool) {
            self.max_attempts.max(1)
        } else {
            1
        }
    }
}

impl From<&ExecutionConfig> for RetryPolicy {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            delay: config.retry_delay(),
            eligible: config.retryable.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationFix {
    /// Delete whatever the failing creation collided with.
    DeleteConflicting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemediationRule {
    /// Matched case-insensitively against the last error text.
    pub error_contains: String,
    pub tools: BTreeSet<ToolKind>,
    pub fix: RemediationFix,
    pub settle: Duration,
}

impl RemediationRule {
    pub fn matches(&self, tool: ToolKind, error: &str) -> bool {
        self.tools.contains(&tool)
            && error
                .to_lowercase()
                .contains(&self.error_contains.to_lowercase())
    }

    /// The corrective command for `failed`, if one can be derived.
    pub fn cleanup_for(&self, failed: &Command) -> Option<Command> {
        match self.fix {
            RemediationFix::DeleteConflicting => delete_conflicting(failed),
        }
    }
}

fn delete_asset(path: String, origin: usize) -> Command {
    let params = json!({"action": "delete", "path": path});
    Command::new(
        ToolKind::ManageAsset,
        params.as_object().cloned().unwrap_or_default(),
        origin,
    )
}

fn delete_conflicting(failed: &Command) -> Option<Command> {
    let origin = failed.origin;
    match (failed.tool, failed.verb()) {
        (ToolKind::CreateScript, _) => {
            let path = failed.str_param("path")?;
            Some(delete_asset(path.to_string(), origin))
        }
        (ToolKind::ManageShader, Some("create")) => {
            let name = failed.str_param("name")?;
            let dir = failed.str_param("path").unwrap_or("Assets/Shaders");
            Some(delete_asset(format!("{dir}/{name}.shader"), origin))
        }
        (ToolKind::ManageScriptableObject, Some("create")) => {
            let asset = failed.str_param("asset_name")?;
            let folder = failed.str_param("folder_path").unwrap_or("Assets");
            Some(delete_asset(format!("{folder}/{asset}.asset"), origin))
        }
        (ToolKind::ManageMaterial, Some("create")) => {
            let path = failed.str_param("material_path")?;
            Some(delete_asset(path.to_string(), origin))
        }
        (ToolKind::ManageGameobject, Some("create")) => {
            let name = failed.str_param("name")?;
            let params = json!({"action": "delete", "target": name, "search_method": "by_name"});
            Some(Command::new(
                ToolKind::ManageGameobject,
                params.as_object().cloned().unwrap_or_default(),
                origin,
            ))
        }
        _ => None,
    }
}

/// Rules applied when a creation collides with an existing resource.
pub fn default_rules(settle: Duration) -> Vec<RemediationRule> {
    vec![RemediationRule {
        error_contains: "already exists".to_string(),
        tools: [
            ToolKind::CreateScript,
            ToolKind::ManageShader,
            ToolKind::ManageScriptableObject,
            ToolKind::ManageMaterial,
            ToolKind::ManageGameobject,
        ]
        .into_iter()
        .collect(),
        fix: RemediationFix::DeleteConflicting,
        settle,
    }]
}

/// How a single command fared under the policy.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptReport {
    pub succeeded: bool,
    pub attempts: u32,
    pub remediations: u32,
    pub error: Option<String>,
    /// Set when the service could not be reached at all.
    pub fatal: Option<TransportError>,
}

enum Step {
    Done,
    Failed(String),
    Fatal(TransportError),
}

fn classify(tool: ToolKind, outcome: Result<CallReply, EngineError>) -> Step {
    match outcome {
        Ok(reply) if reply.succeeded => Step::Done,
        Ok(reply) => Step::Failed(
            EngineError::RemoteRejection {
                tool,
                message: reply.error.unwrap_or_else(|| "call reported failure".to_string()),
            }
            .to_string(),
        ),
        Err(EngineError::Transport(err)) if err.is_unreachable() => Step::Fatal(err),
        Err(err) => Step::Failed(err.to_string()),
    }
}

/// Runs `command` through `invoke` under `policy`.
///
/// Eligible tools get up to `max_attempts` tries with a fixed delay. The
/// first failure whose error matches a rule sends that rule's cleanup once
/// (its outcome ignored) and the next try follows the rule's settle delay
/// instead of the retry delay. A remediated command always gets that try.
pub async fn execute_with_policy<F, Fut>(
    command: &Command,
    policy: &RetryPolicy,
    rules: &[RemediationRule],
    mut invoke: F,
) -> AttemptReport
where
    F: FnMut(Command) -> Fut,
    Fut: Future<Output = Result<CallReply, EngineError>>,
{
    let tool = command.tool;
    let mut max_attempts = policy.attempts_for(tool);
    let mut report = AttemptReport {
        succeeded: false,
        attempts: 0,
        remediations: 0,
        error: None,
        fatal: None,
    };
    let mut wait = Duration::ZERO;

    while report.attempts < max_attempts {
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        report.attempts += 1;
        let message = match classify(tool, invoke(command.clone()).await) {
            Step::Done => {
                report.succeeded = true;
                report.error = None;
                return report;
            }
            Step::Fatal(err) => {
                report.error = Some(err.to_string());
                report.fatal = Some(err);
                return report;
            }
            Step::Failed(message) => message,
        };

        wait = policy.delay;
        if report.remediations == 0 && policy.is_eligible(tool) {
            if let Some((rule, cleanup)) = rules
                .iter()
                .find(|rule| rule.matches(tool, &message))
                .and_then(|rule| rule.cleanup_for(command).map(|cleanup| (rule, cleanup)))
            {
                report.remediations += 1;
                tracing::warn!(
                    command = %command.label(),
                    cleanup = %cleanup.label(),
                    error = %message,
                    "remediating conflict before retrying"
                );
                if let Err(err) = invoke(cleanup).await {
                    tracing::debug!(error = %err, "cleanup call failed");
                }
                wait = rule.settle;
                max_attempts = max_attempts.max(report.attempts + 1);
            }
        }

        if report.attempts < max_attempts {
            tracing::warn!(
                command = %command.label(),
                attempt = report.attempts,
                error = %message,
                "attempt failed, retrying"
            );
        }
        report.error = Some(message);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn command(tool: ToolKind, params: serde_json::Value) -> Command {
        Command::new(tool, params.as_object().cloned().unwrap(), 0)
    }

    fn script() -> Command {
        command(
            ToolKind::CreateScript,
            json!({"path": "Assets/Scripts/Spin.cs", "contents": ""}),
        )
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(1000),
            eligible: [ToolKind::CreateScript].into_iter().collect(),
        }
    }

    fn reply(succeeded: bool, error: &str) -> Result<CallReply, EngineError> {
        Ok(CallReply {
            succeeded,
            error: (!error.is_empty()).then(|| error.to_string()),
        })
    }

    /// Replays `script` in order and records every command sent.
    fn scripted(
        replies: Vec<Result<CallReply, EngineError>>,
        sent: &Mutex<Vec<Command>>,
    ) -> impl FnMut(Command) -> std::future::Ready<Result<CallReply, EngineError>> + '_ {
        let mut replies = replies.into_iter();
        move |cmd| {
            sent.lock().unwrap().push(cmd);
            std::future::ready(replies.next().unwrap_or_else(|| reply(true, "")))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_remediation_fires_on_first_conflict() {
        let sent = Mutex::new(Vec::new());
        let invoke = scripted(
            vec![
                reply(false, "Script at Assets/Scripts/Spin.cs already exists"),
                reply(true, ""), // cleanup
                reply(true, ""),
            ],
            &sent,
        );
        let started = tokio::time::Instant::now();

        let report = execute_with_policy(
            &script(),
            &policy(3),
            &default_rules(Duration::from_millis(500)),
            invoke,
        )
        .await;

        assert!(report.succeeded);
        assert_eq!(report.attempts, 2);
        assert_eq!(report.remediations, 1);
        assert_eq!(report.error, None);
        // settle only, no retry delay
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(500) && waited < Duration::from_millis(600));

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1].tool, ToolKind::ManageAsset);
        assert_eq!(sent[1].str_param("path"), Some("Assets/Scripts/Spin.cs"));
        assert_eq!(sent[2].tool, ToolKind::CreateScript);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remediation_is_not_repeated() {
        let sent = Mutex::new(Vec::new());
        let exists = || reply(false, "already exists");
        let invoke = scripted(vec![exists(), exists(), exists(), exists(), exists()], &sent);

        let report = execute_with_policy(
            &script(),
            &policy(3),
            &default_rules(Duration::ZERO),
            invoke,
        )
        .await;

        assert!(!report.succeeded);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.remediations, 1);
        assert!(report.error.unwrap().contains("already exists"));

        let sent = sent.lock().unwrap();
        let cleanups = sent.iter().filter(|c| c.tool == ToolKind::ManageAsset).count();
        assert_eq!(cleanups, 1);
        assert_eq!(sent.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remediated_command_is_retried_with_single_attempt_policy() {
        let sent = Mutex::new(Vec::new());
        let invoke = scripted(
            vec![reply(false, "already exists"), reply(true, ""), reply(true, "")],
            &sent,
        );

        let report = execute_with_policy(
            &script(),
            &policy(1),
            &default_rules(Duration::ZERO),
            invoke,
        )
        .await;

        assert!(report.succeeded);
        assert_eq!(report.attempts, 2);
        assert_eq!(report.remediations, 1);
        assert_eq!(sent.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_wait_the_configured_delay() {
        let sent = Mutex::new(Vec::new());
        let invoke = scripted(
            vec![reply(false, "compiling"), reply(false, "compiling"), reply(true, "")],
            &sent,
        );
        let started = tokio::time::Instant::now();

        let report = execute_with_policy(&script(), &policy(3), &[], invoke).await;

        assert!(report.succeeded);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.remediations, 0);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(2000) && waited < Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ineligible_tool_gets_one_attempt_and_no_remediation() {
        let sent = Mutex::new(Vec::new());
        let menu = command(ToolKind::ExecuteMenuItem, json!({"menu_path": "Tools/Bake"}));
        let invoke = scripted(vec![reply(false, "already exists")], &sent);

        let report = execute_with_policy(
            &menu,
            &policy(3),
            &default_rules(Duration::ZERO),
            invoke,
        )
        .await;

        assert!(!report.succeeded);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.remediations, 0);
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_stops_immediately() {
        let sent = Mutex::new(Vec::new());
        let down = TransportError::Unreachable {
            url: "http://localhost:8080/mcp".to_string(),
            message: "connection refused".to_string(),
        };
        let invoke = scripted(vec![Err(EngineError::Transport(down.clone()))], &sent);

        let report = execute_with_policy(&script(), &policy(3), &[], invoke).await;

        assert!(!report.succeeded);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.fatal, Some(down));
    }

    #[test]
    fn test_cleanup_paths() {
        let rule = &default_rules(Duration::ZERO)[0];

        let shader = command(
            ToolKind::ManageShader,
            json!({"action": "create", "name": "Glow", "path": "Assets/FX"}),
        );
        assert_eq!(
            rule.cleanup_for(&shader).unwrap().str_param("path"),
            Some("Assets/FX/Glow.shader")
        );

        let asset = command(
            ToolKind::ManageScriptableObject,
            json!({"action": "create", "type_name": "Cfg", "asset_name": "Main",
                   "folder_path": "Assets/Data"}),
        );
        assert_eq!(
            rule.cleanup_for(&asset).unwrap().str_param("path"),
            Some("Assets/Data/Main.asset")
        );

        let object = command(
            ToolKind::ManageGameobject,
            json!({"action": "create", "name": "Tank_A"}),
        );
        let cleanup = rule.cleanup_for(&object).unwrap();
        assert_eq!(cleanup.verb(), Some("delete"));
        assert_eq!(cleanup.str_param("target"), Some("Tank_A"));

        let modify = command(
            ToolKind::ManageGameobject,
            json!({"action": "modify", "target": "Tank_A"}),
        );
        assert!(rule.cleanup_for(&modify).is_none());
        assert!(rule.matches(ToolKind::CreateScript, "Asset ALREADY EXISTS"));
        assert!(!rule.matches(ToolKind::ExecuteMenuItem, "already exists"));
    }
}
