use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type Params = serde_json::Map<String, Value>;

/// Remote tools exposed by the scene service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    ManageGameobject,
    ManageMaterial,
    ManageComponents,
    ManageScene,
    ManageEditor,
    ManageAsset,
    ManagePrefabs,
    ManageVfx,
    ManageTexture,
    ManageShader,
    ManageScriptableObject,
    CreateScript,
    RefreshUnity,
    ExecuteMenuItem,
    FindGameobjects,
    ReadConsole,
    RunTests,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManageGameobject => "manage_gameobject",
            Self::ManageMaterial => "manage_material",
            Self::ManageComponents => "manage_components",
            Self::ManageScene => "manage_scene",
            Self::ManageEditor => "manage_editor",
            Self::ManageAsset => "manage_asset",
            Self::ManagePrefabs => "manage_prefabs",
            Self::ManageVfx => "manage_vfx",
            Self::ManageTexture => "manage_texture",
            Self::ManageShader => "manage_shader",
            Self::ManageScriptableObject => "manage_scriptable_object",
            Self::CreateScript => "create_script",
            Self::RefreshUnity => "refresh_unity",
            Self::ExecuteMenuItem => "execute_menu_item",
            Self::FindGameobjects => "find_gameobjects",
            Self::ReadConsole => "read_console",
            Self::RunTests => "run_tests",
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ToolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| format!("unknown tool kind: {s}"))
    }
}

/// Whether a command brings an object into (or out of) existence, or changes
/// one that is expected to exist already.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    Structural,
    Mutation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub tool: ToolKind,
    pub params: Params,
    /// Index of the plan action this command was derived from.
    #[serde(skip)]
    pub origin: usize,
}

impl Command {
    pub fn new(tool: ToolKind, params: Params, origin: usize) -> Self {
        Self {
            tool,
            params,
            origin,
        }
    }

    /// The `action` sub-verb most tools take (`create`, `modify`, ...).
    pub fn verb(&self) -> Option<&str> {
        self.params.get("action").and_then(Value::as_str)
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn class(&self) -> CommandClass {
        let verb = self.verb().unwrap_or_default();
        let structural = match self.tool {
            ToolKind::ManageGameobject => matches!(verb, "create" | "delete" | "duplicate"),
            ToolKind::ManageScene | ToolKind::ManageEditor => true,
            ToolKind::ManageMaterial | ToolKind::ManageTexture => verb == "create",
            ToolKind::ManageAsset => verb == "create_folder",
            ToolKind::ManageVfx => verb.ends_with("_create"),
            _ => false,
        };
        if structural {
            CommandClass::Structural
        } else {
            CommandClass::Mutation
        }
    }

    /// Short human-readable label used in logs and error strings.
    pub fn label(&self) -> String {
        match self.verb() {
            Some(verb) => format!("{}:{verb}", self.tool),
            None => self.tool.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cmd(tool: ToolKind, params: Value) -> Command {
        Command::new(tool, params.as_object().cloned().unwrap(), 0)
    }

    #[test]
    fn tool_kind_round_trips_through_str() {
        for tool in [
            ToolKind::ManageGameobject,
            ToolKind::ManageScriptableObject,
            ToolKind::RefreshUnity,
            ToolKind::ExecuteMenuItem,
        ] {
            assert_eq!(tool.as_str().parse::<ToolKind>().unwrap(), tool);
        }
        assert!("launch_rockets".parse::<ToolKind>().is_err());
    }

    #[test]
    fn serializes_without_origin() {
        let command = Command::new(
            ToolKind::ManageScene,
            json!({"action": "save"}).as_object().cloned().unwrap(),
            7,
        );
        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(
            value,
            json!({"tool": "manage_scene", "params": {"action": "save"}})
        );
    }

    #[test]
    fn classifies_creation_and_mutation() {
        let create = cmd(
            ToolKind::ManageGameobject,
            json!({"action": "create", "name": "Foo"}),
        );
        let modify = cmd(
            ToolKind::ManageGameobject,
            json!({"action": "modify", "target": "Foo"}),
        );
        let color = cmd(
            ToolKind::ManageMaterial,
            json!({"action": "set_renderer_color", "target": "Foo"}),
        );
        let particles = cmd(
            ToolKind::ManageVfx,
            json!({"action": "particle_create", "target": "Smoke"}),
        );
        assert_eq!(create.class(), CommandClass::Structural);
        assert_eq!(particles.class(), CommandClass::Structural);
        assert_eq!(modify.class(), CommandClass::Mutation);
        assert_eq!(color.class(), CommandClass::Mutation);
        assert_eq!(modify.label(), "manage_gameobject:modify");
    }
}
