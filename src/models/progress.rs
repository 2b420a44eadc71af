use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::models::command::ToolKind;
use crate::models::job::CommandStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub command_index: usize,
    pub total: usize,
    pub tool: ToolKind,
    pub status: CommandStatus,
}

/// Invoked synchronously from the running job. Must not block.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// A callback that forwards every event into an unbounded channel, for
/// callers that need to do I/O in response to progress.
pub fn channel() -> (ProgressCallback, mpsc::UnboundedReceiver<ProgressEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: ProgressCallback = Arc::new(move |event: &ProgressEvent| {
        // Receiver gone means nobody is listening anymore.
        let _ = tx.send(event.clone());
    });
    (callback, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_forwards_events_in_order() {
        let (callback, mut rx) = channel();
        for index in 0..3 {
            callback(&ProgressEvent {
                job_id: "job".to_string(),
                command_index: index,
                total: 3,
                tool: ToolKind::ManageGameobject,
                status: CommandStatus::Succeeded,
            });
        }
        drop(callback);

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            seen.push(event.command_index);
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }
}
