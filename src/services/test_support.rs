//! Scripted in-process scene service for engine tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::TransportError;
use crate::models::command::{Command, Params, ToolKind};
use crate::services::mcp_service::SceneTransport;

type Reply = Result<Value, TransportError>;

/// Replies are consumed in order. With an empty script every batch and call
/// succeeds.
#[derive(Default)]
pub struct ScriptedTransport {
    batch_replies: Mutex<VecDeque<Reply>>,
    call_replies: Mutex<VecDeque<Reply>>,
    pub batches: Mutex<Vec<Vec<Command>>>,
    pub calls: Mutex<Vec<(ToolKind, Params)>>,
    /// Every batched call hangs this long before answering.
    pub batch_latency: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_batch(&self, reply: Reply) -> &Self {
        self.batch_replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn push_call(&self, reply: Reply) -> &Self {
        self.call_replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }

    pub fn call_tools(&self) -> Vec<ToolKind> {
        self.calls.lock().unwrap().iter().map(|(tool, _)| *tool).collect()
    }
}

#[async_trait]
impl SceneTransport for ScriptedTransport {
    async fn batch_execute(&self, commands: &[Command]) -> Result<Value, TransportError> {
        self.batches.lock().unwrap().push(commands.to_vec());
        if let Some(latency) = self.batch_latency {
            tokio::time::sleep(latency).await;
        }
        let scripted = self.batch_replies.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(batch_reply(&vec![true; commands.len()])))
    }

    async fn call(&self, tool: ToolKind, params: &Params) -> Result<Value, TransportError> {
        self.calls.lock().unwrap().push((tool, params.clone()));
        let scripted = self.call_replies.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(call_ok()))
    }

    async fn ping(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

fn tool_text(payload: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": {"content": [{"type": "text", "text": payload.to_string()}]}
    })
}

/// A batch response reporting one entry per element of `outcomes`.
pub fn batch_reply(outcomes: &[bool]) -> Value {
    let succeeded = outcomes.iter().filter(|ok| **ok).count();
    let results: Vec<Value> = outcomes
        .iter()
        .map(|ok| {
            if *ok {
                json!({"tool": "manage_gameobject", "callSucceeded": true})
            } else {
                json!({"tool": "manage_gameobject", "callSucceeded": false,
                       "error": "GameObject 'Ghost' not found"})
            }
        })
        .collect();
    tool_text(json!({
        "success": true,
        "data": {
            "callSuccessCount": succeeded,
            "callFailureCount": outcomes.len() - succeeded,
            "results": results,
        }
    }))
}

pub fn call_ok() -> Value {
    tool_text(json!({"success": true, "message": "ok"}))
}

pub fn call_err(message: &str) -> Value {
    tool_text(json!({"success": false, "error": message}))
}

pub fn unreachable() -> TransportError {
    TransportError::Unreachable {
        url: "http://localhost:8080/mcp".to_string(),
        message: "connection refused".to_string(),
    }
}
