use serde::Serialize;
use serde_json::{json, Value};

use crate::error::EngineError;
use crate::models::action::{Action, ActionId, Plan};
use crate::models::command::{Command, Params, ToolKind};

const BY_NAME: &str = "by_name";
pub const DEFAULT_IMPORT_DIR: &str = "Assets/Imports";
const DEFAULT_SHADER_DIR: &str = "Assets/Shaders";
const DEFAULT_MATERIAL_SHADER: &str = "Universal Render Pipeline/Lit";
const DEFAULT_LIGHT_INTENSITY: f64 = 3.0;
const DEFAULT_LIGHT_RANGE: f64 = 20.0;

/// Result of mapping a whole plan. Actions that failed to map are left out
/// of `commands` and listed in `skipped`.
#[derive(Debug, Default)]
pub struct MappedPlan {
    pub commands: Vec<Command>,
    pub skipped: Vec<(ActionId, EngineError)>,
}

struct CommandBuilder {
    tool: ToolKind,
    params: Params,
}

impl CommandBuilder {
    fn new(tool: ToolKind, base: Value) -> Self {
        let params = match base {
            Value::Object(map) => map,
            _ => Params::new(),
        };
        Self { tool, params }
    }

    fn set<T: Serialize>(mut self, key: &str, value: T) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.params.insert(key.to_string(), value);
        self
    }

    fn opt<T: Serialize>(self, key: &str, value: &Option<T>) -> Self {
        match value {
            Some(value) => self.set(key, value),
            None => self,
        }
    }

    fn build(self, origin: ActionId) -> Command {
        Command::new(self.tool, self.params, origin)
    }
}

fn search_method(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or(BY_NAME)
}

/// Translates one action into the commands that carry it out, in the order
/// they must run. Pure: the same action always yields the same commands.
pub fn map(action: &Action, origin: ActionId) -> Result<Vec<Command>, EngineError> {
    use ToolKind::*;

    let commands = match action {
        Action::CreatePrimitive {
            name,
            shape,
            parent,
            position,
            rotation,
            scale,
            color,
        } => {
            let create = CommandBuilder::new(
                ManageGameobject,
                json!({"action": "create", "name": name, "primitive_type": shape}),
            )
            .opt("parent", parent)
            .opt("position", position)
            .opt("rotation", rotation)
            .opt("scale", scale)
            .build(origin);

            let mut commands = vec![create];
            if let Some(color) = color {
                commands.push(
                    CommandBuilder::new(
                        ManageMaterial,
                        json!({
                            "action": "set_renderer_color",
                            "target": name,
                            "search_method": BY_NAME,
                            "mode": "instance",
                        }),
                    )
                    .set("color", color)
                    .build(origin),
                );
            }
            commands
        }
        Action::CreateEmpty {
            name,
            parent,
            position,
        } => vec![CommandBuilder::new(
            ManageGameobject,
            json!({"action": "create", "name": name}),
        )
        .opt("parent", parent)
        .opt("position", position)
        .build(origin)],
        Action::CreateLight {
            light_type,
            intensity,
            range,
            color,
            parent,
            position,
            rotation,
            ..
        } => {
            let mut light = json!({
                "type": light_type.code(),
                "intensity": intensity.unwrap_or(DEFAULT_LIGHT_INTENSITY),
            });
            if light_type.has_range() {
                light["range"] = json!(range.unwrap_or(DEFAULT_LIGHT_RANGE));
            }
            if let Some(color) = color {
                light["color"] = json!(color);
            }
            let name = action.created_name().unwrap_or_default();
            vec![CommandBuilder::new(
                ManageGameobject,
                json!({
                    "action": "create",
                    "name": name,
                    "components_to_add": ["Light"],
                    "component_properties": {"Light": light},
                }),
            )
            .opt("parent", parent)
            .opt("position", position)
            .opt("rotation", rotation)
            .build(origin)]
        }
        Action::ModifyObject {
            target,
            search_method: method,
            position,
            rotation,
            scale,
            new_name,
            set_active,
            tag,
            layer,
            parent,
        } => vec![CommandBuilder::new(
            ManageGameobject,
            json!({"action": "modify", "target": target, "search_method": search_method(method)}),
        )
        .opt("position", position)
        .opt("rotation", rotation)
        .opt("scale", scale)
        .opt("new_name", new_name)
        .opt("set_active", set_active)
        .opt("tag", tag)
        .opt("layer", layer)
        .opt("parent", parent)
        .build(origin)],
        Action::DeleteObject {
            target,
            search_method: method,
        } => vec![CommandBuilder::new(
            ManageGameobject,
            json!({"action": "delete", "target": target, "search_method": search_method(method)}),
        )
        .build(origin)],
        Action::ApplyMaterial {
            target,
            color,
            mode,
            search_method: method,
        } => vec![CommandBuilder::new(
            ManageMaterial,
            json!({
                "action": "set_renderer_color",
                "target": target,
                "search_method": search_method(method),
                "mode": mode.as_deref().unwrap_or("instance"),
            }),
        )
        .opt("color", color)
        .build(origin)],
        Action::DuplicateObject {
            target,
            new_name,
            position,
        } => vec![CommandBuilder::new(
            ManageGameobject,
            json!({"action": "duplicate", "target": target, "search_method": BY_NAME}),
        )
        .opt("name", new_name)
        .opt("position", position)
        .build(origin)],
        Action::SetParent { target, parent } => vec![CommandBuilder::new(
            ManageGameobject,
            json!({"action": "modify", "target": target, "search_method": BY_NAME, "parent": parent}),
        )
        .build(origin)],
        Action::SetObjectActive { target, active } => vec![CommandBuilder::new(
            ManageGameobject,
            json!({"action": "modify", "target": target, "search_method": BY_NAME, "set_active": active}),
        )
        .build(origin)],
        Action::RenameObject { target, new_name } => vec![CommandBuilder::new(
            ManageGameobject,
            json!({"action": "modify", "target": target, "search_method": BY_NAME, "new_name": new_name}),
        )
        .build(origin)],
        Action::AddComponent {
            target,
            component_type,
            properties,
        } => vec![CommandBuilder::new(
            ManageComponents,
            json!({
                "action": "add",
                "target": target,
                "component_type": component_type,
                "search_method": BY_NAME,
            }),
        )
        .opt("properties", properties)
        .build(origin)],
        Action::SetComponentProperty {
            target,
            component_type,
            property,
            value,
        } => vec![CommandBuilder::new(
            ManageComponents,
            json!({
                "action": "set_property",
                "target": target,
                "component_type": component_type,
                "property": property,
                "value": value,
                "search_method": BY_NAME,
            }),
        )
        .build(origin)],
        Action::RemoveComponent {
            target,
            component_type,
        } => vec![CommandBuilder::new(
            ManageComponents,
            json!({
                "action": "remove",
                "target": target,
                "component_type": component_type,
                "search_method": BY_NAME,
            }),
        )
        .build(origin)],
        Action::CreateMaterial {
            name,
            shader,
            color,
            properties,
        } => vec![CommandBuilder::new(
            ManageMaterial,
            json!({
                "action": "create",
                "material_path": material_path(name),
                "shader": shader.as_deref().unwrap_or(DEFAULT_MATERIAL_SHADER),
            }),
        )
        .opt("color", color)
        .opt("properties", properties)
        .build(origin)],
        Action::AssignMaterial {
            target,
            material_path,
            slot,
        } => vec![CommandBuilder::new(
            ManageMaterial,
            json!({
                "action": "assign_material_to_renderer",
                "target": target,
                "material_path": material_path,
                "search_method": BY_NAME,
            }),
        )
        .opt("slot", slot)
        .build(origin)],
        Action::CreatePrefab {
            target,
            prefab_path,
        } => {
            let path = prefab_path
                .clone()
                .unwrap_or_else(|| format!("Assets/Prefabs/{target}.prefab"));
            vec![CommandBuilder::new(
                ManagePrefabs,
                json!({"action": "create_from_gameobject", "target": target, "prefab_path": path}),
            )
            .build(origin)]
        }
        Action::InstantiatePrefab {
            prefab_path,
            name,
            parent,
            position,
            rotation,
            scale,
        } => vec![CommandBuilder::new(
            ManageGameobject,
            json!({"action": "create", "prefab_path": prefab_path}),
        )
        .opt("name", name)
        .opt("parent", parent)
        .opt("position", position)
        .opt("rotation", rotation)
        .opt("scale", scale)
        .build(origin)],
        Action::ImportAsset { destination, .. } => {
            let destination = destination.as_deref().unwrap_or(DEFAULT_IMPORT_DIR);
            // Folder first: the refresh only picks up files under an existing folder.
            vec![
                CommandBuilder::new(
                    ManageAsset,
                    json!({"action": "create_folder", "path": destination}),
                )
                .build(origin),
                CommandBuilder::new(
                    RefreshUnity,
                    json!({"scope": "assets", "mode": "force", "wait_for_ready": true}),
                )
                .build(origin),
            ]
        }
        Action::CreateScript {
            path,
            contents,
            namespace,
            script_type,
        } => vec![CommandBuilder::new(
            CreateScript,
            json!({"path": path, "contents": contents.as_deref().unwrap_or_default()}),
        )
        .opt("namespace", namespace)
        .opt("script_type", script_type)
        .build(origin)],
        Action::CreateShader {
            name,
            path,
            contents,
        } => vec![CommandBuilder::new(
            ManageShader,
            json!({
                "action": "create",
                "name": name,
                "path": path.as_deref().unwrap_or(DEFAULT_SHADER_DIR),
            }),
        )
        .opt("contents", contents)
        .build(origin)],
        Action::CreateScriptableObject {
            type_name,
            asset_name,
            folder_path,
            patches,
        } => vec![CommandBuilder::new(
            ManageScriptableObject,
            json!({"action": "create", "type_name": type_name, "asset_name": asset_name}),
        )
        .opt("folder_path", folder_path)
        .opt("patches", patches)
        .build(origin)],
        Action::RefreshAssets {
            scope,
            mode,
            compile,
        } => vec![CommandBuilder::new(
            RefreshUnity,
            json!({
                "scope": scope.as_deref().unwrap_or("all"),
                "mode": mode.as_deref().unwrap_or("if_dirty"),
                "compile": compile.as_deref().unwrap_or("none"),
                "wait_for_ready": true,
            }),
        )
        .build(origin)],
        Action::ExecuteMenu { menu_path } => vec![CommandBuilder::new(
            ExecuteMenuItem,
            json!({"menu_path": menu_path}),
        )
        .build(origin)],
        Action::SaveScene => {
            vec![CommandBuilder::new(ManageScene, json!({"action": "save"})).build(origin)]
        }
        Action::Screenshot {
            filename,
            super_size,
        } => vec![CommandBuilder::new(
            ManageScene,
            json!({
                "action": "screenshot",
                "screenshot_file_name": filename.as_deref().unwrap_or("scenebatch_screenshot"),
                "screenshot_super_size": super_size.unwrap_or(2),
            }),
        )
        .build(origin)],
        Action::AddTag { tag_name } => vec![CommandBuilder::new(
            ManageEditor,
            json!({"action": "add_tag", "tag_name": tag_name}),
        )
        .build(origin)],
        Action::ReadConsole { count, filter_text } => vec![CommandBuilder::new(
            ReadConsole,
            json!({"action": "get"}),
        )
        .opt("count", count)
        .opt("filter_text", filter_text)
        .build(origin)],
        Action::RunTests { mode } => vec![CommandBuilder::new(
            RunTests,
            json!({"mode": mode.as_deref().unwrap_or("EditMode")}),
        )
        .build(origin)],
        Action::DeleteAsset { path } => vec![CommandBuilder::new(
            ManageAsset,
            json!({"action": "delete", "path": path}),
        )
        .build(origin)],
        Action::Unknown { kind } => return Err(EngineError::UnknownActionKind(kind.clone())),
    };

    Ok(commands)
}

pub fn material_path(name: &str) -> String {
    format!("Assets/Materials/{name}.mat")
}

/// Maps every action of `plan` in order, skipping the ones that fail.
pub fn map_plan(plan: &Plan) -> MappedPlan {
    let mut mapped = MappedPlan::default();
    for (origin, action) in plan.actions.iter().enumerate() {
        match map(action, origin) {
            Ok(commands) => mapped.commands.extend(commands),
            Err(err) => {
                tracing::warn!(action = origin, error = %err, "skipping action");
                mapped.skipped.push((origin, err));
            }
        }
    }
    mapped
}
