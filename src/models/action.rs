use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::models::command::Params;

/// Index of an action within its plan.
pub type ActionId = usize;

/// Every `type` value a plan may carry. Anything else is an unknown kind.
pub const KNOWN_ACTION_KINDS: &[&str] = &[
    "create_primitive",
    "create_empty",
    "create_light",
    "modify_object",
    "delete_object",
    "apply_material",
    "duplicate_object",
    "set_parent",
    "set_object_active",
    "rename_object",
    "add_component",
    "set_component_property",
    "remove_component",
    "create_material",
    "assign_material",
    "create_prefab",
    "instantiate_prefab",
    "import_asset",
    "create_script",
    "create_shader",
    "create_scriptable_object",
    "refresh_assets",
    "execute_menu",
    "save_scene",
    "screenshot",
    "add_tag",
    "read_console",
    "run_tests",
    "delete_asset",
];

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

fn opaque() -> f64 {
    1.0
}

/// Colour as the scene service expects it. Also the snapshot type used to
/// restore an object's appearance on undo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    #[serde(default = "opaque")]
    pub a: f64,
}

pub type AppearanceSnapshot = Rgba;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LightType {
    #[serde(alias = "spot")]
    Spot,
    #[serde(alias = "directional")]
    Directional,
    #[default]
    #[serde(alias = "point")]
    Point,
    #[serde(alias = "area")]
    Area,
}

impl LightType {
    /// Value of the editor's `Light.type` enum.
    pub fn code(&self) -> u8 {
        match self {
            Self::Spot => 0,
            Self::Directional => 1,
            Self::Point => 2,
            Self::Area => 3,
        }
    }

    pub fn has_range(&self) -> bool {
        matches!(self, Self::Spot | Self::Point)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Spot => "Spot",
            Self::Directional => "Directional",
            Self::Point => "Point",
            Self::Area => "Area",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    CreatePrimitive {
        name: String,
        shape: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<Vec3>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rotation: Option<Vec3>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scale: Option<Vec3>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<Rgba>,
    },
    CreateEmpty {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<Vec3>,
    },
    CreateLight {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        light_type: LightType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        intensity: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<Rgba>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<Vec3>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rotation: Option<Vec3>,
    },
    ModifyObject {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        search_method: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<Vec3>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rotation: Option<Vec3>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scale: Option<Vec3>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        set_active: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        layer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    DeleteObject {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        search_method: Option<String>,
    },
    ApplyMaterial {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<Rgba>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        search_method: Option<String>,
    },
    DuplicateObject {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<Vec3>,
    },
    SetParent {
        target: String,
        parent: String,
    },
    SetObjectActive {
        target: String,
        active: bool,
    },
    RenameObject {
        target: String,
        new_name: String,
    },
    AddComponent {
        target: String,
        component_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        properties: Option<Params>,
    },
    SetComponentProperty {
        target: String,
        component_type: String,
        property: String,
        value: Value,
    },
    RemoveComponent {
        target: String,
        component_type: String,
    },
    CreateMaterial {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shader: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<Rgba>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        properties: Option<Params>,
    },
    AssignMaterial {
        target: String,
        material_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slot: Option<u32>,
    },
    CreatePrefab {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefab_path: Option<String>,
    },
    InstantiatePrefab {
        prefab_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<Vec3>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rotation: Option<Vec3>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scale: Option<Vec3>,
    },
    ImportAsset {
        source_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    CreateScript {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        contents: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        script_type: Option<String>,
    },
    CreateShader {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        contents: Option<String>,
    },
    CreateScriptableObject {
        type_name: String,
        asset_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        folder_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        patches: Option<Value>,
    },
    RefreshAssets {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        compile: Option<String>,
    },
    ExecuteMenu {
        menu_path: String,
    },
    SaveScene,
    Screenshot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        super_size: Option<u32>,
    },
    AddTag {
        tag_name: String,
    },
    ReadConsole {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter_text: Option<String>,
    },
    RunTests {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
    },
    DeleteAsset {
        path: String,
    },
    /// A `type` outside [`KNOWN_ACTION_KINDS`]. Never serialized.
    #[serde(skip)]
    Unknown { kind: String },
}

impl Action {
    pub fn kind(&self) -> &str {
        match self {
            Self::CreatePrimitive { .. } => "create_primitive",
            Self::CreateEmpty { .. } => "create_empty",
            Self::CreateLight { .. } => "create_light",
            Self::ModifyObject { .. } => "modify_object",
            Self::DeleteObject { .. } => "delete_object",
            Self::ApplyMaterial { .. } => "apply_material",
            Self::DuplicateObject { .. } => "duplicate_object",
            Self::SetParent { .. } => "set_parent",
            Self::SetObjectActive { .. } => "set_object_active",
            Self::RenameObject { .. } => "rename_object",
            Self::AddComponent { .. } => "add_component",
            Self::SetComponentProperty { .. } => "set_component_property",
            Self::RemoveComponent { .. } => "remove_component",
            Self::CreateMaterial { .. } => "create_material",
            Self::AssignMaterial { .. } => "assign_material",
            Self::CreatePrefab { .. } => "create_prefab",
            Self::InstantiatePrefab { .. } => "instantiate_prefab",
            Self::ImportAsset { .. } => "import_asset",
            Self::CreateScript { .. } => "create_script",
            Self::CreateShader { .. } => "create_shader",
            Self::CreateScriptableObject { .. } => "create_scriptable_object",
            Self::RefreshAssets { .. } => "refresh_assets",
            Self::ExecuteMenu { .. } => "execute_menu",
            Self::SaveScene => "save_scene",
            Self::Screenshot { .. } => "screenshot",
            Self::AddTag { .. } => "add_tag",
            Self::ReadConsole { .. } => "read_console",
            Self::RunTests { .. } => "run_tests",
            Self::DeleteAsset { .. } => "delete_asset",
            Self::Unknown { kind } => kind,
        }
    }

    /// Name of the scene object this action creates, if it creates one.
    pub fn created_name(&self) -> Option<String> {
        match self {
            Self::CreatePrimitive { name, .. } | Self::CreateEmpty { name, .. } => {
                Some(name.clone())
            }
            Self::CreateLight {
                name, light_type, ..
            } => Some(
                name.clone()
                    .unwrap_or_else(|| format!("{}Light", light_type.label())),
            ),
            _ => None,
        }
        .filter(|name| !name.is_empty())
    }

    /// Existing scene object the action operates on.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::ModifyObject { target, .. }
            | Self::DeleteObject { target, .. }
            | Self::ApplyMaterial { target, .. }
            | Self::DuplicateObject { target, .. }
            | Self::SetParent { target, .. }
            | Self::SetObjectActive { target, .. }
            | Self::RenameObject { target, .. }
            | Self::AddComponent { target, .. }
            | Self::SetComponentProperty { target, .. }
            | Self::RemoveComponent { target, .. }
            | Self::AssignMaterial { target, .. }
            | Self::CreatePrefab { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn position(&self) -> Option<Vec3> {
        match self {
            Self::CreatePrimitive { position, .. }
            | Self::CreateEmpty { position, .. }
            | Self::CreateLight { position, .. }
            | Self::ModifyObject { position, .. }
            | Self::DuplicateObject { position, .. }
            | Self::InstantiatePrefab { position, .. } => *position,
            _ => None,
        }
    }
}

fn default_project() -> String {
    "My project".to_string()
}

fn default_scene() -> String {
    "bio-plants".to_string()
}

/// A validated plan as handed over by the plan generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default = "default_project", alias = "projectRef")]
    pub project: String,
    #[serde(default = "default_scene", alias = "sceneRef")]
    pub scene: String,
    #[serde(default)]
    pub description: String,
    #[serde(deserialize_with = "deserialize_actions")]
    pub actions: Vec<Action>,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        Self {
            project: default_project(),
            scene: default_scene(),
            description: String::new(),
            actions,
        }
    }
}

fn deserialize_actions<'de, D>(deserializer: D) -> Result<Vec<Action>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|value| {
            let kind = value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !KNOWN_ACTION_KINDS.contains(&kind) {
                return Ok(Action::Unknown {
                    kind: kind.to_string(),
                });
            }
            serde_json::from_value(value).map_err(serde::de::Error::custom)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plan_with_aliases_and_defaults() {
        let plan: Plan = serde_json::from_value(json!({
            "projectRef": "Plant",
            "actions": [
                {"type": "create_primitive", "name": "Tank_A", "shape": "Cylinder",
                 "position": {"x": 1.0, "y": 0.5}},
                {"type": "apply_material", "target": "Tank_A",
                 "color": {"r": 0.2, "g": 0.4, "b": 0.9}},
            ]
        }))
        .unwrap();

        assert_eq!(plan.project, "Plant");
        assert_eq!(plan.scene, "bio-plants");
        assert_eq!(plan.actions.len(), 2);
        match &plan.actions[0] {
            Action::CreatePrimitive { position, .. } => {
                assert_eq!(position.unwrap().z, 0.0);
            }
            other => panic!("unexpected action {other:?}"),
        }
        match &plan.actions[1] {
            Action::ApplyMaterial { color, .. } => assert_eq!(color.unwrap().a, 1.0),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn unknown_kinds_survive_parsing() {
        let plan: Plan = serde_json::from_value(json!({
            "actions": [
                {"type": "teleport_object", "target": "Foo"},
                {"type": "save_scene"},
            ]
        }))
        .unwrap();

        assert_eq!(
            plan.actions[0],
            Action::Unknown {
                kind: "teleport_object".to_string()
            }
        );
        assert_eq!(plan.actions[1], Action::SaveScene);
    }

    #[test]
    fn known_kind_with_missing_field_is_an_error() {
        let result: Result<Plan, _> = serde_json::from_value(json!({
            "actions": [{"type": "delete_object"}]
        }));
        assert!(result.is_err());
    }

    #[test]
    fn every_known_kind_matches_a_variant_name() {
        let samples = [
            Action::SaveScene,
            Action::DeleteAsset {
                path: "Assets/x".to_string(),
            },
            Action::ExecuteMenu {
                menu_path: "Build/WebGL".to_string(),
            },
            Action::RefreshAssets {
                scope: None,
                mode: None,
                compile: None,
            },
        ];
        for action in samples {
            assert!(KNOWN_ACTION_KINDS.contains(&action.kind()));
            let value = serde_json::to_value(&action).unwrap();
            assert_eq!(value["type"], action.kind());
        }
    }

    #[test]
    fn light_without_name_uses_type_label() {
        let light = Action::CreateLight {
            name: None,
            light_type: LightType::Directional,
            intensity: None,
            range: None,
            color: None,
            parent: None,
            position: None,
            rotation: None,
        };
        assert_eq!(light.created_name().as_deref(), Some("DirectionalLight"));
        assert_eq!(LightType::Directional.code(), 1);
        assert!(!LightType::Directional.has_range());
    }
}
