use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::AppError;
use crate::models::action::{Action, Plan};
use crate::services::command_mapper::DEFAULT_IMPORT_DIR;

/// Copies the source file of every `import_asset` action into the scene
/// project so the editor's asset refresh can pick it up.
///
/// Returns one error message per action that could not be staged. Without a
/// project root nothing is copied.
pub fn stage_imports(plan: &Plan, project_root: Option<&Path>) -> Vec<String> {
    let imports: Vec<&Action> = plan
        .actions
        .iter()
        .filter(|a| matches!(a, Action::ImportAsset { .. }))
        .collect();
    if imports.is_empty() {
        return Vec::new();
    }

    let Some(root) = project_root else {
        tracing::debug!(
            count = imports.len(),
            "no project root configured, leaving imports unstaged"
        );
        return Vec::new();
    };

    let mut errors = Vec::new();
    for action in imports {
        if let Action::ImportAsset {
            source_path,
            destination,
            filename,
        } = action
        {
            let staged = stage_one(
                root,
                source_path,
                destination.as_deref().unwrap_or(DEFAULT_IMPORT_DIR),
                filename.as_deref(),
            );
            match staged {
                Ok(dest) => tracing::info!(
                    source = %source_path,
                    dest = %dest.display(),
                    "imported file staged"
                ),
                Err(err) => {
                    tracing::warn!(source = %source_path, error = %err, "import staging failed");
                    errors.push(format!("import_asset: {err}"));
                }
            }
        }
    }
    errors
}

fn stage_one(
    root: &Path,
    source_path: &str,
    destination: &str,
    filename: Option<&str>,
) -> Result<PathBuf, AppError> {
    if source_path.trim().is_empty() {
        return Err(AppError::General("source_path is empty".to_string()));
    }
    let source = Path::new(source_path);
    if !source.is_file() {
        return Err(AppError::General(format!("source not found: {source_path}")));
    }
    validate_relative(destination)?;

    let name = match filename.filter(|f| !f.trim().is_empty()) {
        Some(name) => {
            validate_relative(name)?;
            PathBuf::from(name)
        }
        None => source
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| AppError::General(format!("invalid source path: {source_path}")))?,
    };

    let dest_dir = root.join(destination);
    fs::create_dir_all(&dest_dir)?;
    let dest = dest_dir.join(name);
    fs::copy(source, &dest)
        .map_err(|e| AppError::General(format!("copy failed for {source_path}: {e}")))?;
    Ok(dest)
}

/// Staged files must stay inside the project.
fn validate_relative(path: &str) -> Result<(), AppError> {
    let escapes = Path::new(path).components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(AppError::General(format!(
            "path must stay inside the project: {path}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn import(source: &Path, destination: Option<&str>, filename: Option<&str>) -> Action {
        Action::ImportAsset {
            source_path: source.to_string_lossy().to_string(),
            destination: destination.map(str::to_string),
            filename: filename.map(str::to_string),
        }
    }

    #[test]
    fn test_stage_copies_into_default_folder() {
        let source_dir = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("tree.fbx");
        fs::write(&source, b"mesh").unwrap();

        let plan = Plan::new(vec![import(&source, None, None)]);
        let errors = stage_imports(&plan, Some(project.path()));

        assert!(errors.is_empty(), "{errors:?}");
        let staged = project.path().join("Assets/Imports/tree.fbx");
        assert_eq!(fs::read(staged).unwrap(), b"mesh");
    }

    #[test]
    fn test_stage_honours_destination_and_filename() {
        let source_dir = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("raw.png");
        fs::write(&source, b"px").unwrap();

        let plan = Plan::new(vec![import(&source, Some("Assets/Textures"), Some("bark.png"))]);
        assert!(stage_imports(&plan, Some(project.path())).is_empty());
        assert!(project.path().join("Assets/Textures/bark.png").is_file());
    }

    #[test]
    fn test_missing_source_is_reported() {
        let project = tempfile::tempdir().unwrap();
        let plan = Plan::new(vec![
            import(Path::new("/definitely/not/here.fbx"), None, None),
            Action::ImportAsset {
                source_path: String::new(),
                destination: None,
                filename: None,
            },
        ]);

        let errors = stage_imports(&plan, Some(project.path()));
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("source not found"));
        assert!(errors[1].contains("source_path is empty"));
    }

    #[test]
    fn test_destination_cannot_escape_project() {
        let source_dir = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("a.txt");
        fs::write(&source, b"a").unwrap();

        let plan = Plan::new(vec![import(&source, Some("../outside"), None)]);
        let errors = stage_imports(&plan, Some(project.path()));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("inside the project"));
    }

    #[test]
    fn test_without_root_nothing_is_staged() {
        let plan = Plan::new(vec![import(Path::new("/nope.fbx"), None, None)]);
        assert!(stage_imports(&plan, None).is_empty());
    }
}
