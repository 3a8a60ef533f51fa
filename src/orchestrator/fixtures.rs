//! Workspace preparation and fixture staging.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Creates an empty `<output_dir>/workspaces/<instance_id>`, clearing any
/// previous contents.
pub fn prepare_workspace(output_dir: &Path, instance_id: &str) -> io::Result<PathBuf> {
    let workspace = output_dir.join("workspaces").join(instance_id);
    if workspace.exists() {
        fs::remove_dir_all(&workspace)?;
    }
    fs::create_dir_all(&workspace)?;
    Ok(workspace)
}

/// Fixture directory for a task.
///
/// Only the first existing root is searched, under both
/// `<root>/setupbench/fixtures/<id>` and `<root>/fixtures/<id>`.
pub fn find_fixture_dir(roots: &[PathBuf], instance_id: &str) -> Option<PathBuf> {
    let root = roots.iter().find(|r| r.is_dir())?;
    [
        root.join("setupbench").join("fixtures").join(instance_id),
        root.join("fixtures").join(instance_id),
    ]
    .into_iter()
    .find(|candidate| candidate.is_dir())
}

/// Recursively copies `src` into `dst`; returns the number of files copied.
pub fn copy_fixtures(src: &Path, dst: &Path) -> io::Result<usize> {
    let mut copied = 0;
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    debug!(src = %src.display(), dst = %dst.display(), copied, "Copied fixtures");
    Ok(copied)
}
