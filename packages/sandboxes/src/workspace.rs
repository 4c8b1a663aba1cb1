// ABOUTME: Workspace directory materialization on the host
// ABOUTME: Seeds file manifests or a minimal default project descriptor

use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{Result, SandboxError};
use crate::types::WorkspaceFile;

/// Prepare the host directory bind-mounted into the container.
///
/// When a file manifest is supplied, every entry is written (intermediate
/// directories included), seeding the workspace with a pre-built project.
/// Otherwise a minimal package.json is created so the workspace is not an
/// empty skeleton.
pub async fn materialize(
    workspaces_root: &Path,
    workspace_id: &str,
    files: Option<&[WorkspaceFile]>,
) -> Result<PathBuf> {
    let workspace_path = workspaces_root.join(workspace_id);
    fs::create_dir_all(&workspace_path).await?;

    match files {
        Some(files) if !files.is_empty() => {
            info!(
                "Writing {} files to workspace {}",
                files.len(),
                workspace_id
            );
            for file in files {
                let relative = validate_relative_path(&file.file_path)?;
                let file_path = workspace_path.join(relative);
                if let Some(parent) = file_path.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(&file_path, &file.content).await?;
            }
            debug!("Workspace {} seeded from manifest", workspace_id);
        }
        _ => {
            let package_json = workspace_path.join("package.json");
            if fs::try_exists(&package_json).await? {
                debug!("Workspace {} already has a project descriptor", workspace_id);
            } else {
                let descriptor = serde_json::json!({
                    "name": workspace_id,
                    "version": "1.0.0",
                    "private": true,
                });
                fs::write(
                    &package_json,
                    serde_json::to_string_pretty(&descriptor).unwrap_or_default(),
                )
                .await?;
            }
        }
    }

    Ok(workspace_path)
}

/// Reject absolute paths and parent-directory components in manifest entries
fn validate_relative_path(raw: &str) -> Result<PathBuf> {
    let path = Path::new(raw);
    if path.is_absolute() {
        return Err(SandboxError::InvalidFilePath(raw.to_string()));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(SandboxError::InvalidFilePath(raw.to_string())),
        }
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn seeds_default_descriptor_without_manifest() {
        let root = TempDir::new().unwrap();
        let path = materialize(root.path(), "ws-1", None).await.unwrap();

        let descriptor = tokio::fs::read_to_string(path.join("package.json"))
            .await
            .unwrap();
        assert!(descriptor.contains("\"ws-1\""));
    }

    #[tokio::test]
    async fn writes_manifest_with_nested_directories() {
        let root = TempDir::new().unwrap();
        let files = vec![
            WorkspaceFile {
                file_path: "src/index.js".to_string(),
                content: "console.log('hi')".to_string(),
            },
            WorkspaceFile {
                file_path: "package.json".to_string(),
                content: "{}".to_string(),
            },
        ];

        let path = materialize(root.path(), "ws-2", Some(&files)).await.unwrap();

        let written = tokio::fs::read_to_string(path.join("src/index.js"))
            .await
            .unwrap();
        assert_eq!(written, "console.log('hi')");
    }

    #[tokio::test]
    async fn rejects_traversal_in_manifest_paths() {
        let root = TempDir::new().unwrap();
        let files = vec![WorkspaceFile {
            file_path: "../escape.txt".to_string(),
            content: "nope".to_string(),
        }];

        let result = materialize(root.path(), "ws-3", Some(&files)).await;
        assert!(matches!(result, Err(SandboxError::InvalidFilePath(_))));
    }

    #[tokio::test]
    async fn rejects_absolute_manifest_paths() {
        let root = TempDir::new().unwrap();
        let files = vec![WorkspaceFile {
            file_path: "/etc/passwd".to_string(),
            content: "nope".to_string(),
        }];

        let result = materialize(root.path(), "ws-4", Some(&files)).await;
        assert!(matches!(result, Err(SandboxError::InvalidFilePath(_))));
    }
}
