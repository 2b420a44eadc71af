use serde::{Deserialize, Serialize};

use crate::models::command::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseMode {
    /// Sent through the batched call in slices of at most `max_batch`.
    Batchable,
    /// One individual call per command, with retry for eligible tools.
    Singular,
    /// A single command followed by a fixed settle delay.
    SyncBarrier,
}

impl std::fmt::Display for PhaseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Batchable => write!(f, "batchable"),
            Self::Singular => write!(f, "singular"),
            Self::SyncBarrier => write!(f, "sync_barrier"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub mode: PhaseMode,
    pub commands: Vec<Command>,
}

impl Phase {
    pub fn new(mode: PhaseMode, commands: Vec<Command>) -> Self {
        Self { mode, commands }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
