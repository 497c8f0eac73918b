//! Blocking tree operations used by the manager
//!
//! Excluded names match directories at any depth.

use std::fs;
use std::io;
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

/// Directories never captured or cleared
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    ".venv",
    "venv",
    "__pycache__",
    ".next",
    ".turbo",
    "coverage",
];

fn is_excluded(entry: &DirEntry, excludes: &[String]) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| excludes.iter().any(|e| e == name))
}

/// Copy `src` into `dst`, skipping excluded directories
///
/// Returns the number of files copied.
pub(crate) fn copy_tree(src: &Path, dst: &Path, excludes: &[String]) -> io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;

    let walker = WalkDir::new(src)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_excluded(e, excludes));

    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
            copied += 1;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let link = fs::read_link(src)?;
    if dst.symlink_metadata().is_ok() {
        fs::remove_file(dst)?;
    }
    std::os::unix::fs::symlink(link, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst).map(|_| ())
}

/// Remove everything under `root` except excluded directories
///
/// Directories that still hold an excluded child are kept.
pub(crate) fn clear_tree(root: &Path, excludes: &[String]) -> io::Result<()> {
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            let excluded = entry
                .file_name()
                .to_str()
                .is_some_and(|name| excludes.iter().any(|e| e == name));
            if excluded {
                continue;
            }
            clear_tree(&path, excludes)?;
            if fs::read_dir(&path)?.next().is_none() {
                fs::remove_dir(&path)?;
            }
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn excludes() -> Vec<String> {
        DEFAULT_EXCLUDES.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn copy_skips_nested_excluded_dirs() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("pkg/node_modules/dep")).unwrap();
        fs::write(src.path().join("pkg/node_modules/dep/index.js"), "x").unwrap();
        fs::write(src.path().join("pkg/main.js"), "main").unwrap();

        let copied = copy_tree(src.path(), dst.path(), &excludes()).unwrap();

        assert_eq!(copied, 1);
        assert!(dst.path().join("pkg/main.js").exists());
        assert!(!dst.path().join("pkg/node_modules").exists());
    }

    #[test]
    fn clear_keeps_excluded_dirs() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join(".git")).unwrap();
        fs::write(root.path().join(".git/HEAD"), "ref").unwrap();
        fs::create_dir_all(root.path().join("src/deep")).unwrap();
        fs::write(root.path().join("src/deep/a.rs"), "a").unwrap();
        fs::write(root.path().join("README.md"), "r").unwrap();

        clear_tree(root.path(), &excludes()).unwrap();

        assert!(root.path().join(".git/HEAD").exists());
        assert!(!root.path().join("src").exists());
        assert!(!root.path().join("README.md").exists());
    }
}
