//! External installation locations and the patches applied to them

pub mod application;
pub mod location;
pub mod patch;
pub mod version;

pub use application::PatchApplications;
pub use location::InstallationLocations;
pub use patch::PatchRoots;

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.monitor-setup.tmp"))
}

/// Replace `path` in one rename so readers never see a half-written file
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let staging = staging_path(path);
    fs::write(&staging, contents).with_context(|| format!("Failed to write {}", staging.display()))?;
    if let Err(e) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(e).with_context(|| format!("Failed to move {} into place", path.display()));
    }
    Ok(())
}

/// Replace a set of existing files together
///
/// Every replacement is staged before any file is renamed into place, so a
/// missing target or a failed staging write leaves all of them untouched.
/// Only a failing rename can leave the set half replaced; the error then
/// names the files that already hold their new content.
pub fn write_existing_all(files: &[(PathBuf, String)]) -> Result<()> {
    for (path, _) in files {
        if !path.is_file() {
            bail!("Refusing to create {}: the file must already exist", path.display());
        }
    }

    let mut staged = Vec::with_capacity(files.len());
    for (path, contents) in files {
        let staging = staging_path(path);
        if let Err(e) = fs::write(&staging, contents) {
            discard(&staged);
            return Err(e).with_context(|| format!("Failed to stage {}; no file was changed", path.display()));
        }
        staged.push(staging);
    }

    for (index, ((path, _), staging)) in files.iter().zip(&staged).enumerate() {
        if let Err(e) = fs::rename(staging, path) {
            discard(&staged[index..]);
            let replaced: Vec<String> = files[..index].iter().map(|(p, _)| p.display().to_string()).collect();
            let summary = if replaced.is_empty() {
                "no file was changed".to_string()
            } else {
                format!("already replaced: {}", replaced.join(", "))
            };
            return Err(e).with_context(|| format!("Failed to move {} into place; {summary}", path.display()));
        }
    }
    Ok(())
}

fn discard(staged: &[PathBuf]) {
    for staging in staged {
        let _ = fs::remove_file(staging);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_replaces_content_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.lua");
        fs::write(&path, "old").unwrap();
        write_atomic(&path, "new").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_existing_all_never_creates() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.lua");
        fs::write(&present, "old").unwrap();
        let missing = dir.path().join("missing.lua");

        let files = vec![(present.clone(), "new".to_string()), (missing.clone(), "x".to_string())];
        assert!(write_existing_all(&files).is_err());
        assert!(!missing.exists());
        assert_eq!(fs::read_to_string(&present).unwrap(), "old");
    }

    #[test]
    fn test_write_existing_all_stages_before_replacing() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.lua");
        let second = dir.path().join("b.lua");
        fs::write(&first, "a = 1\n").unwrap();
        fs::write(&second, "b = 1\n").unwrap();
        // a directory in the way makes staging the second file fail
        fs::create_dir(staging_path(&second)).unwrap();

        let files = vec![(first.clone(), "a = 2\n".to_string()), (second.clone(), "b = 2\n".to_string())];
        let err = write_existing_all(&files).unwrap_err();

        assert!(format!("{err:#}").contains("no file was changed"));
        assert_eq!(fs::read_to_string(&first).unwrap(), "a = 1\n");
        assert_eq!(fs::read_to_string(&second).unwrap(), "b = 1\n");
        assert!(!staging_path(&first).exists());
    }

    #[test]
    fn test_write_existing_all_replaces_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.lua");
        let second = dir.path().join("b.lua");
        fs::write(&first, "a = 1\n").unwrap();
        fs::write(&second, "b = 1\n").unwrap();

        let files = vec![(first.clone(), "a = 2\n".to_string()), (second.clone(), "b = 2\n".to_string())];
        write_existing_all(&files).unwrap();

        assert_eq!(fs::read_to_string(&first).unwrap(), "a = 2\n");
        assert_eq!(fs::read_to_string(&second).unwrap(), "b = 2\n");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
