use serde_json::Value;

use crate::error::EngineError;

const RAW_PREVIEW_CHARS: usize = 200;

/// Outcome of one command as reported inside a batch response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDetail {
    pub succeeded: bool,
    pub tool: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedBatch {
    pub success_count: usize,
    pub fail_count: usize,
    /// Per-command outcomes in request order. May be empty or shorter than
    /// the batch when the service does not report them.
    pub details: Vec<CallDetail>,
    /// Batch-level failure reported by the service.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallReply {
    pub succeeded: bool,
    pub error: Option<String>,
}

type BatchStrategy = fn(&Value) -> Option<ParsedBatch>;
type CallStrategy = fn(&Value) -> Option<CallReply>;

/// Unwraps a batched-call response. Envelopes are tried in order; the first
/// one that recognises the shape wins.
pub fn parse_batch_response(raw: &Value) -> Result<ParsedBatch, EngineError> {
    const STRATEGIES: &[BatchStrategy] = &[batch_rpc_error, batch_tool_result, batch_bare_payload];

    STRATEGIES
        .iter()
        .find_map(|strategy| strategy(raw))
        .ok_or_else(|| malformed(raw))
}

/// Unwraps an individual-call response into success plus error text.
pub fn parse_call_response(raw: &Value) -> Result<CallReply, EngineError> {
    const STRATEGIES: &[CallStrategy] = &[call_rpc_error, call_tool_result, call_bare_payload];

    STRATEGIES
        .iter()
        .find_map(|strategy| strategy(raw))
        .ok_or_else(|| malformed(raw))
}

fn malformed(raw: &Value) -> EngineError {
    let rendered = raw.to_string();
    let preview: String = rendered.chars().take(RAW_PREVIEW_CHARS).collect();
    EngineError::MalformedResponse(preview)
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

fn rpc_error_message(raw: &Value) -> Option<String> {
    let object = raw.as_object()?;
    if object.contains_key("result") {
        return None;
    }
    let error = object.get("error")?;
    Some(match error {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    })
}

/// The JSON payload carried by an MCP tool result, plus its `isError` flag.
/// `Err` holds non-JSON text from the first text item.
fn tool_payload(raw: &Value) -> Option<(Result<Value, String>, bool)> {
    let result = raw.get("result")?.as_object()?;
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if let Some(structured) = result.get("structuredContent").filter(|v| v.is_object()) {
        return Some((Ok(structured.clone()), is_error));
    }

    let texts = result
        .get("content")?
        .as_array()?
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|item| item.get("text").and_then(Value::as_str));

    let mut first_plain = None;
    for text in texts {
        match serde_json::from_str::<Value>(text) {
            Ok(value) if value.is_object() => return Some((Ok(value), is_error)),
            _ => {
                if first_plain.is_none() {
                    first_plain = Some(text.to_string());
                }
            }
        }
    }
    first_plain.map(|text| (Err(text), is_error))
}

fn payload_error(payload: &Value) -> Option<String> {
    ["error", "message"]
        .iter()
        .filter_map(|key| payload.get(*key))
        .find_map(|value| match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Object(map) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
}

// ---------------------------------------------------------------------------
// Batch strategies
// ---------------------------------------------------------------------------

fn batch_rpc_error(raw: &Value) -> Option<ParsedBatch> {
    rpc_error_message(raw).map(|message| ParsedBatch {
        error: Some(message),
        ..ParsedBatch::default()
    })
}

fn batch_tool_result(raw: &Value) -> Option<ParsedBatch> {
    let (payload, is_error) = tool_payload(raw)?;
    match payload {
        Ok(payload) => read_batch_payload(&payload).or_else(|| {
            is_error.then(|| ParsedBatch {
                error: Some(payload_error(&payload).unwrap_or_else(|| payload.to_string())),
                ..ParsedBatch::default()
            })
        }),
        Err(text) if is_error => Some(ParsedBatch {
            error: Some(text),
            ..ParsedBatch::default()
        }),
        Err(_) => None,
    }
}

fn batch_bare_payload(raw: &Value) -> Option<ParsedBatch> {
    read_batch_payload(raw)
}

fn read_batch_payload(payload: &Value) -> Option<ParsedBatch> {
    let data = payload
        .get("data")
        .filter(|d| d.is_object())
        .unwrap_or(payload);
    let results = data.get("results").and_then(Value::as_array);
    let success = data.get("callSuccessCount").and_then(Value::as_u64);
    let failure = data.get("callFailureCount").and_then(Value::as_u64);

    if results.is_none() && success.is_none() && failure.is_none() {
        if payload.get("success").and_then(Value::as_bool) == Some(false) {
            return Some(ParsedBatch {
                error: Some(payload_error(payload).unwrap_or_else(|| "batch rejected".to_string())),
                ..ParsedBatch::default()
            });
        }
        return None;
    }

    let details: Vec<CallDetail> = results
        .map(|items| items.iter().map(read_detail).collect())
        .unwrap_or_default();

    let (success_count, fail_count) = match (success, failure) {
        (Some(s), Some(f)) if s > 0 || f > 0 || details.is_empty() => (s as usize, f as usize),
        (Some(s), None) if details.is_empty() => (s as usize, 0),
        (None, Some(f)) if details.is_empty() => (0, f as usize),
        _ => {
            let succeeded = details.iter().filter(|d| d.succeeded).count();
            (succeeded, details.len() - succeeded)
        }
    };

    Some(ParsedBatch {
        success_count,
        fail_count,
        details,
        error: None,
    })
}

fn read_detail(item: &Value) -> CallDetail {
    let succeeded = item
        .get("callSucceeded")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let tool = item
        .get("tool")
        .or_else(|| item.get("toolName"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let error = if succeeded {
        None
    } else {
        payload_error(item).or_else(|| item.get("result").and_then(payload_error))
    };
    CallDetail {
        succeeded,
        tool,
        error,
    }
}

// ---------------------------------------------------------------------------
// Individual-call strategies
// ---------------------------------------------------------------------------

fn call_rpc_error(raw: &Value) -> Option<CallReply> {
    rpc_error_message(raw).map(|message| CallReply {
        succeeded: false,
        error: Some(message),
    })
}

fn call_tool_result(raw: &Value) -> Option<CallReply> {
    let (payload, is_error) = tool_payload(raw)?;
    match payload {
        Ok(payload) => {
            let reported = payload.get("success").and_then(Value::as_bool);
            let succeeded = !is_error && reported.unwrap_or(true);
            Some(CallReply {
                succeeded,
                error: if succeeded {
                    None
                } else {
                    Some(payload_error(&payload).unwrap_or_else(|| payload.to_string()))
                },
            })
        }
        Err(text) if is_error => Some(CallReply {
            succeeded: false,
            error: Some(text),
        }),
        Err(_) => None,
    }
}

fn call_bare_payload(raw: &Value) -> Option<CallReply> {
    let succeeded = raw.get("success").and_then(Value::as_bool)?;
    Some(CallReply {
        succeeded,
        error: if succeeded { None } else { payload_error(raw) },
    })
}
