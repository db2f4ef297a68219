//! Per-package working copies.

use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::config::PathsConfig;
use crate::error::WorkspaceError;

/// A package prepared for repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageWorkspace {
    pub name: String,
    /// Working copy the tools operate on.
    pub path: PathBuf,
    /// Final transcript excerpt and pass/fail banner.
    pub result_file: PathBuf,
    /// Append-only log of every diff applied to the working copy.
    pub diff_log: PathBuf,
}

/// Names of the package directories under `base_dir`, sorted.
pub fn list_packages(base_dir: &Path) -> Result<Vec<String>, WorkspaceError> {
    if !base_dir.is_dir() {
        return Err(WorkspaceError::BaseDirNotFound(
            base_dir.display().to_string(),
        ));
    }

    let mut packages = Vec::new();
    for entry in fs::read_dir(base_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            packages.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    packages.sort();
    Ok(packages)
}

/// Copies `base_dir/<name>` into a fresh `temp_work_dir/<name>`.
///
/// Any previous working copy is removed first. The result and log
/// directories are created if missing.
pub fn init_package_environment(
    paths: &PathsConfig,
    name: &str,
) -> Result<PackageWorkspace, WorkspaceError> {
    validate_package_name(name)?;
    let original = paths.base_dir.join(name);
    if !original.is_dir() {
        return Err(WorkspaceError::PackageNotFound(
            original.display().to_string(),
        ));
    }

    let work = paths.temp_work_dir.join(name);
    if work.exists() {
        fs::remove_dir_all(&work)?;
    }
    copy_tree(&original, &work)?;

    fs::create_dir_all(&paths.result_dir)?;
    fs::create_dir_all(&paths.log_dir)?;

    tracing::debug!(package = name, path = %work.display(), "Initialized package environment");

    Ok(PackageWorkspace {
        name: name.to_string(),
        path: work,
        result_file: paths.result_dir.join(format!("{}_result.txt", name)),
        diff_log: paths.log_dir.join(format!("{}_diff.log", name)),
    })
}

/// A package name must be one plain path component.
fn validate_package_name(name: &str) -> Result<(), WorkspaceError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None)
            if part == name && !name.contains(['/', '\\']) =>
        {
            Ok(())
        }
        _ => Err(WorkspaceError::InvalidPackageName(name.to_string())),
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<(), WorkspaceError> {
    fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
