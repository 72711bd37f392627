//! # File System Operations Module / 文件系统操作模块
//!
//! Workspace directory management, the module-manifest scan and post-build
//! folder links.
//!
//! 工作区目录管理、模块清单扫描和构建后的目录链接。

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of a module manifest inside a module directory.
pub const MODULE_MANIFEST: &str = "module.xml";

/// Creates a directory and all of its parents.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))
}

/// Walks a repository tree collecting every module manifest path.
///
/// Symbolic links and hidden entries are not descended into; manifests are
/// reported in directory-walk order so module registration stays stable
/// between runs.
pub fn find_module_manifests(root: &Path) -> Result<Vec<PathBuf>> {
    let mut manifests = Vec::new();
    collect_manifests(root, &mut manifests)
        .with_context(|| format!("Failed to scan repository tree: {}", root.display()))?;
    Ok(manifests)
}

fn collect_manifests(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        // symlink_metadata so links are seen as links, not their targets
        let metadata = fs::symlink_metadata(entry.path())?;
        if metadata.file_type().is_symlink() {
            continue;
        }
        if metadata.is_dir() {
            collect_manifests(&entry.path(), out)?;
        } else if name == MODULE_MANIFEST {
            out.push(entry.path());
        }
    }
    Ok(())
}

/// Creates a symbolic link at `link` pointing to `original`, replacing any
/// pre-existing link at that location.
pub fn create_folder_link(original: &Path, link: &Path) -> Result<()> {
    if let Some(parent) = link.parent() {
        ensure_dir(parent)?;
    }
    if fs::symlink_metadata(link).is_ok() {
        remove_link(link)
            .with_context(|| format!("Failed to replace existing link: {}", link.display()))?;
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(original, link).with_context(|| {
        format!("Failed to link {} -> {}", link.display(), original.display())
    })?;

    #[cfg(windows)]
    std::os::windows::fs::symlink_dir(original, link).with_context(|| {
        format!("Failed to link {} -> {}", link.display(), original.display())
    })?;

    Ok(())
}

fn remove_link(link: &Path) -> std::io::Result<()> {
    if fs::symlink_metadata(link)?.is_dir() {
        // On Windows directory links are removed as directories.
        fs::remove_dir(link).or_else(|_| fs::remove_file(link))
    } else {
        fs::remove_file(link)
    }
}
