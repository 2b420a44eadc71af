use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use crate::models::action::{Action, ActionId, AppearanceSnapshot, Plan};
use crate::services::command_mapper::material_path;

/// What the engine knows about the scene between jobs.
pub trait SceneLookup: Send + Sync {
    /// Colours, captured before `plan` runs, of the objects it recolours.
    fn prior_appearance(&self, plan: &Plan) -> HashMap<String, AppearanceSnapshot>;

    /// Object names that are known to exist in the scene.
    fn known_targets(&self) -> Vec<String>;

    /// Records the effect of the actions of `plan` that succeeded.
    fn observe(&self, plan: &Plan, succeeded: &BTreeSet<ActionId>);
}

#[derive(Debug, Default)]
struct SceneMemory {
    objects: BTreeSet<String>,
    colors: HashMap<String, AppearanceSnapshot>,
    materials: HashMap<String, AppearanceSnapshot>,
}

impl SceneMemory {
    fn created(&mut self, name: String, color: Option<AppearanceSnapshot>) {
        if let Some(color) = color {
            self.colors.insert(name.clone(), color);
        }
        self.objects.insert(name);
    }

    fn renamed(&mut self, from: &str, to: &str) {
        if self.objects.remove(from) {
            self.objects.insert(to.to_string());
        }
        if let Some(color) = self.colors.remove(from) {
            self.colors.insert(to.to_string(), color);
        }
    }

    fn forget(&mut self, name: &str) {
        self.objects.remove(name);
        self.colors.remove(name);
    }

    fn apply(&mut self, action: &Action) {
        match action {
            Action::CreatePrimitive { name, color, .. } => self.created(name.clone(), *color),
            Action::CreateLight { color, .. } => {
                if let Some(name) = action.created_name() {
                    self.created(name, *color);
                }
            }
            Action::CreateEmpty { name, .. } => self.created(name.clone(), None),
            Action::InstantiatePrefab {
                name: Some(name), ..
            } => self.created(name.clone(), None),
            Action::DuplicateObject {
                target,
                new_name: Some(new_name),
                ..
            } => {
                let color = self.colors.get(target).copied();
                self.created(new_name.clone(), color);
            }
            Action::ApplyMaterial {
                target,
                color: Some(color),
                ..
            } => {
                self.colors.insert(target.clone(), *color);
                self.objects.insert(target.clone());
            }
            Action::CreateMaterial {
                name,
                color: Some(color),
                ..
            } => {
                self.materials.insert(material_path(name), *color);
            }
            Action::AssignMaterial {
                target,
                material_path,
                ..
            } => {
                if let Some(color) = self.materials.get(material_path).copied() {
                    self.colors.insert(target.clone(), color);
                }
                self.objects.insert(target.clone());
            }
            Action::RenameObject { target, new_name } => self.renamed(target, new_name),
            Action::ModifyObject {
                target,
                new_name: Some(new_name),
                ..
            } => self.renamed(target, new_name),
            Action::DeleteObject { target, .. } => self.forget(target),
            _ => {}
        }
    }
}

/// In-process [`SceneLookup`] fed by the jobs this engine ran.
#[derive(Debug, Default)]
pub struct AppearanceCache {
    memory: Mutex<SceneMemory>,
}

impl AppearanceCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SceneLookup for AppearanceCache {
    fn prior_appearance(&self, plan: &Plan) -> HashMap<String, AppearanceSnapshot> {
        let memory = self
            .memory
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        plan.actions
            .iter()
            .filter_map(|action| match action {
                Action::ApplyMaterial { target, .. } | Action::AssignMaterial { target, .. } => {
                    memory
                        .colors
                        .get(target)
                        .map(|color| (target.clone(), *color))
                }
                _ => None,
            })
            .collect()
    }

    fn known_targets(&self) -> Vec<String> {
        let memory = self
            .memory
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        memory.objects.iter().cloned().collect()
    }

    fn observe(&self, plan: &Plan, succeeded: &BTreeSet<ActionId>) {
        let mut memory = self
            .memory
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (id, action) in plan.actions.iter().enumerate() {
            if succeeded.contains(&id) {
                memory.apply(action);
            }
        }
        tracing::debug!(
            objects = memory.objects.len(),
            colors = memory.colors.len(),
            "scene memory updated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::action::Rgba;

    fn red() -> Rgba {
        Rgba {
            r: 1.0,
            g: 0.0,
            b: 0.0,
            a: 1.0,
        }
    }

    fn blue() -> Rgba {
        Rgba {
            r: 0.0,
            g: 0.0,
            b: 1.0,
            a: 1.0,
        }
    }

    fn paint(target: &str, color: Rgba) -> Action {
        Action::ApplyMaterial {
            target: target.to_string(),
            color: Some(color),
            mode: None,
            search_method: None,
        }
    }

    fn everything(plan: &Plan) -> BTreeSet<ActionId> {
        (0..plan.actions.len()).collect()
    }

    #[test]
    fn test_prior_appearance_reflects_earlier_jobs() {
        let cache = AppearanceCache::new();
        let first = Plan::new(vec![paint("Tank_A", red())]);
        assert!(cache.prior_appearance(&first).is_empty());
        cache.observe(&first, &everything(&first));

        let second = Plan::new(vec![paint("Tank_A", blue()), paint("Tank_B", blue())]);
        let prior = cache.prior_appearance(&second);
        assert_eq!(prior.len(), 1);
        assert_eq!(prior["Tank_A"], red());
    }

    #[test]
    fn test_failed_actions_are_not_observed() {
        let cache = AppearanceCache::new();
        let plan = Plan::new(vec![paint("Tank_A", red()), paint("Tank_B", red())]);
        cache.observe(&plan, &[1].into_iter().collect());
        assert_eq!(cache.known_targets(), vec!["Tank_B".to_string()]);
    }

    #[test]
    fn test_material_assignment_carries_color() {
        let cache = AppearanceCache::new();
        let plan = Plan::new(vec![
            Action::CreateMaterial {
                name: "Steel".to_string(),
                shader: None,
                color: Some(blue()),
                properties: None,
            },
            Action::AssignMaterial {
                target: "Tank_A".to_string(),
                material_path: "Assets/Materials/Steel.mat".to_string(),
                slot: None,
            },
        ]);
        cache.observe(&plan, &everything(&plan));

        let next = Plan::new(vec![paint("Tank_A", red())]);
        assert_eq!(cache.prior_appearance(&next)["Tank_A"], blue());
    }

    #[test]
    fn test_rename_and_delete_update_targets() {
        let cache = AppearanceCache::new();
        let plan = Plan::new(vec![
            Action::CreatePrimitive {
                name: "Cube".to_string(),
                shape: "Cube".to_string(),
                parent: None,
                position: None,
                rotation: None,
                scale: None,
                color: Some(red()),
            },
            Action::CreateEmpty {
                name: "Group".to_string(),
                parent: None,
                position: None,
            },
            Action::RenameObject {
                target: "Cube".to_string(),
                new_name: "Box".to_string(),
            },
            Action::DeleteObject {
                target: "Group".to_string(),
                search_method: None,
            },
        ]);
        cache.observe(&plan, &everything(&plan));

        assert_eq!(cache.known_targets(), vec!["Box".to_string()]);
        let next = Plan::new(vec![paint("Box", blue())]);
        assert_eq!(cache.prior_appearance(&next)["Box"], red());
    }
}
