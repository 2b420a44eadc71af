use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::models::action::{Action, ActionId, AppearanceSnapshot, Plan};

/// Builds a best-effort inverse of the actions of `plan` that succeeded.
///
/// Created objects (primitives, empties, lights, duplicates) are deleted;
/// colour changes are reverted when a prior colour was captured. Everything
/// else is left out. Returns `None` when nothing can be undone.
pub fn synthesize(
    plan: &Plan,
    succeeded: &BTreeSet<ActionId>,
    prior_appearance: &HashMap<String, AppearanceSnapshot>,
) -> Option<Plan> {
    let actions: Vec<Action> = plan
        .actions
        .iter()
        .enumerate()
        .rev()
        .filter(|(id, _)| succeeded.contains(id))
        .filter_map(|(_, action)| invert(action, prior_appearance))
        .collect();

    if actions.is_empty() {
        return None;
    }

    Some(Plan {
        project: plan.project.clone(),
        scene: plan.scene.clone(),
        description: format!("Undo: {}", plan.description),
        actions,
    })
}

fn delete(target: String) -> Action {
    Action::DeleteObject {
        target,
        search_method: Some("by_name".to_string()),
    }
}

fn invert(action: &Action, prior: &HashMap<String, AppearanceSnapshot>) -> Option<Action> {
    match action {
        Action::CreatePrimitive { .. } | Action::CreateEmpty { .. } | Action::CreateLight { .. } => {
            action.created_name().map(delete)
        }
        Action::DuplicateObject {
            new_name: Some(name),
            ..
        } if !name.is_empty() => Some(delete(name.clone())),
        Action::ApplyMaterial { target, .. } => {
            prior.get(target).map(|color| Action::ApplyMaterial {
                target: target.clone(),
                color: Some(*color),
                mode: None,
                search_method: None,
            })
        }
        _ => None,
    }
}

/// Undo plans keyed by job id. Holds at most `capacity` entries and evicts
/// the oldest first.
#[derive(Debug)]
pub struct UndoTable {
    capacity: usize,
    entries: VecDeque<(String, Plan)>,
}

impl UndoTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Stores `plan` for `job_id`, replacing any earlier plan for the same
    /// job. Returns the id of an entry evicted to make room.
    pub fn insert(&mut self, job_id: &str, plan: Plan) -> Option<String> {
        self.entries.retain(|(id, _)| id != job_id);
        self.entries.push_back((job_id.to_string(), plan));
        if self.entries.len() > self.capacity {
            return self.entries.pop_front().map(|(id, _)| id);
        }
        None
    }

    pub fn get(&self, job_id: &str) -> Option<&Plan> {
        self.entries
            .iter()
            .find(|(id, _)| id == job_id)
            .map(|(_, plan)| plan)
    }

    /// Removes and returns the plan for `job_id`.
    pub fn take(&mut self, job_id: &str) -> Option<Plan> {
        let position = self.entries.iter().position(|(id, _)| id == job_id)?;
        self.entries.remove(position).map(|(_, plan)| plan)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
