use std::collections::BTreeSet;

use crate::config::ExecutionConfig;
use crate::models::command::{Command, CommandClass, ToolKind};
use crate::models::phase::{Phase, PhaseMode};

/// Tool kinds that force a phase break.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitRules {
    /// Cannot travel inside a batched call.
    pub non_batchable: BTreeSet<ToolKind>,
    /// Must be awaited before anything after it runs.
    pub sync_barrier: BTreeSet<ToolKind>,
}

impl From<&ExecutionConfig> for SplitRules {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            non_batchable: config.non_batchable.clone(),
            sync_barrier: config.sync_barrier.clone(),
        }
    }
}

impl SplitRules {
    fn mode_of(&self, command: &Command) -> PhaseMode {
        if self.sync_barrier.contains(&command.tool) {
            PhaseMode::SyncBarrier
        } else if self.non_batchable.contains(&command.tool) {
            PhaseMode::Singular
        } else {
            PhaseMode::Batchable
        }
    }
}

/// Groups `commands` into phases that run strictly in sequence.
///
/// Special commands each get a phase of their own. The runs between them are
/// split into creations/deletions followed by mutations, so a command that
/// changes an object always runs in a later phase than the one creating it.
pub fn split(commands: Vec<Command>, rules: &SplitRules) -> Vec<Phase> {
    let mut phases = Vec::new();
    let mut pending = Vec::new();

    for command in commands {
        match rules.mode_of(&command) {
            PhaseMode::Batchable => pending.push(command),
            mode => {
                flush_batchable(&mut phases, std::mem::take(&mut pending));
                phases.push(Phase::new(mode, vec![command]));
            }
        }
    }
    flush_batchable(&mut phases, pending);

    phases
}

fn flush_batchable(phases: &mut Vec<Phase>, chunk: Vec<Command>) {
    if chunk.is_empty() {
        return;
    }
    let (structural, mutations): (Vec<_>, Vec<_>) = chunk
        .into_iter()
        .partition(|c| c.class() == CommandClass::Structural);

    for group in [structural, mutations] {
        if !group.is_empty() {
            phases.push(Phase::new(PhaseMode::Batchable, group));
        }
    }
}
