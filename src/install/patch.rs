//! Versioned text patch sets
//!
//! Patch sets live in version-named directories under two ranked roots: a user
//! override root and the bundled root. Each directory holds one JSON file per
//! patch naming a target file (relative to the installation root) and the text
//! to find and the text to put in its place.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::version::VersionKey;
use crate::constants::patches;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchDefinition {
    /// Target file relative to the installation root
    pub target: PathBuf,
    #[serde(rename = "match")]
    pub match_text: String,
    #[serde(rename = "replace")]
    pub replace_text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Result of transforming a file's content with one patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Changed(String),
    Unchanged,
    /// Neither the expected nor the resulting text was found
    NotApplicable,
}

impl PatchDefinition {
    /// Whether `content` is already in the patched state
    ///
    /// A replacement that contains the match text (an insertion) is applied
    /// once the replacement is present. Otherwise the match text must be gone
    /// and the replacement present, so deletions and shortenings are detected.
    pub fn is_applied(&self, content: &str) -> bool {
        if self.replace_text.contains(&self.match_text) {
            content.contains(&self.replace_text)
        } else {
            !content.contains(&self.match_text) && content.contains(&self.replace_text)
        }
    }

    pub fn apply(&self, content: &str) -> PatchOutcome {
        if self.is_applied(content) {
            PatchOutcome::Unchanged
        } else if content.contains(&self.match_text) {
            PatchOutcome::Changed(content.replacen(&self.match_text, &self.replace_text, 1))
        } else {
            PatchOutcome::NotApplicable
        }
    }

    pub fn revert(&self, content: &str) -> PatchOutcome {
        if self.is_applied(content) {
            PatchOutcome::Changed(content.replacen(&self.replace_text, &self.match_text, 1))
        } else if content.contains(&self.match_text) {
            PatchOutcome::Unchanged
        } else {
            PatchOutcome::NotApplicable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchSource {
    User,
    Bundled,
}

#[derive(Debug, Clone)]
pub struct PatchSet {
    pub version: VersionKey,
    pub source: PatchSource,
    pub patches: Vec<PatchDefinition>,
}

impl PatchSet {
    /// Load every definition in `directory`, in file name order
    pub fn load(directory: &Path, version: VersionKey, source: PatchSource) -> Result<Self> {
        let mut files: Vec<PathBuf> = fs::read_dir(directory)
            .with_context(|| format!("Failed to list patch directory {}", directory.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|e| e == patches::DEFINITION_EXTENSION))
            .collect();
        files.sort();

        let mut definitions = Vec::with_capacity(files.len());
        for file in files {
            let contents = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read patch definition {}", file.display()))?;
            let definition: PatchDefinition = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse patch definition {}", file.display()))?;
            definitions.push(definition);
        }
        debug!(directory = %directory.display(), patches = definitions.len(), "Loaded patch set");
        Ok(Self {
            version,
            source,
            patches: definitions,
        })
    }
}

/// The two ranked patch storage roots
#[derive(Debug, Clone)]
pub struct PatchRoots {
    pub user: Option<PathBuf>,
    pub bundled: Option<PathBuf>,
}

impl PatchRoots {
    /// User overrides under the data dir, bundled sets next to the executable
    pub fn default_roots() -> Self {
        let user = dirs::data_dir().map(|d| d.join(patches::USER_DIR));
        let bundled = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(patches::BUNDLED_DIR)));
        Self { user, bundled }
    }

    /// All candidate patch sets ordered by version; user sets replace bundled ones of equal version
    pub fn discover(&self) -> Result<Vec<PatchSet>> {
        let mut by_version: BTreeMap<VersionKey, PatchSet> = BTreeMap::new();
        let ranked = [
            (self.bundled.as_deref(), PatchSource::Bundled),
            (self.user.as_deref(), PatchSource::User),
        ];
        for (root, source) in ranked {
            let Some(root) = root else {
                continue;
            };
            for set in scan_root(root, source)? {
                if let Some(replaced) = by_version.insert(set.version.clone(), set) {
                    debug!(version = %replaced.version, "User patch set overrides bundled one");
                }
            }
        }
        info!(candidates = by_version.len(), "Discovered patch sets");
        Ok(by_version.into_values().collect())
    }
}

fn scan_root(root: &Path, source: PatchSource) -> Result<Vec<PatchSet>> {
    if !root.is_dir() {
        debug!(root = %root.display(), "Patch root does not exist");
        return Ok(Vec::new());
    }
    let mut sets = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("Failed to list patch root {}", root.display()))? {
        let entry = entry.with_context(|| format!("Failed to read entry in {}", root.display()))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        match VersionKey::parse(&name) {
            Ok(version) => sets.push(PatchSet::load(&path, version, source)?),
            Err(e) => warn!(directory = %path.display(), error = %e, "Ignoring patch directory without a version name"),
        }
    }
    Ok(sets)
}

/// Greatest candidate not newer than `installed`
pub fn select<'a>(candidates: &'a [PatchSet], installed: &VersionKey) -> Option<&'a PatchSet> {
    candidates
        .iter()
        .filter(|set| set.version <= *installed)
        .max_by(|a, b| a.version.cmp(&b.version))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn write_patch(root: &Path, version: &str, file: &str, definition: &PatchDefinition) {
        let dir = root.join(version);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file), serde_json::to_string_pretty(definition).unwrap()).unwrap();
    }

    pub(crate) fn definition(target: &str, match_text: &str, replace_text: &str) -> PatchDefinition {
        PatchDefinition {
            target: PathBuf::from(target),
            match_text: match_text.to_string(),
            replace_text: replace_text.to_string(),
            description: String::new(),
        }
    }

    fn set(version: &str) -> PatchSet {
        PatchSet {
            version: VersionKey::parse(version).unwrap(),
            source: PatchSource::Bundled,
            patches: Vec::new(),
        }
    }

    #[test]
    fn test_select_greatest_not_exceeding() {
        let candidates = vec![set("1.2.3"), set("1.2.10"), set("1.3.0")];
        let installed = VersionKey::parse("1.2.15").unwrap();
        assert_eq!(select(&candidates, &installed).unwrap().version.as_str(), "1.2.10");
    }

    #[test]
    fn test_select_none_when_all_newer() {
        let candidates = vec![set("2.0.0")];
        let installed = VersionKey::parse("1.9.9").unwrap();
        assert!(select(&candidates, &installed).is_none());
    }

    #[test]
    fn test_apply_and_revert_are_idempotent() {
        let patch = definition("Scripts/Export.lua", "local a = 1", "local a = 2");
        let original = "x\nlocal a = 1\ny";

        let PatchOutcome::Changed(patched) = patch.apply(original) else {
            panic!("expected change");
        };
        assert_eq!(patched, "x\nlocal a = 2\ny");
        assert_eq!(patch.apply(&patched), PatchOutcome::Unchanged);
        assert_eq!(patch.revert(&patched), PatchOutcome::Changed(original.to_string()));
        assert_eq!(patch.revert(original), PatchOutcome::Unchanged);
        assert_eq!(patch.apply("unrelated"), PatchOutcome::NotApplicable);
    }

    #[test]
    fn test_deletion_patch_applies_and_reverts() {
        let patch = definition("Scripts/Hooks.lua", "dofile(a)\ndofile(b)\n", "dofile(a)\n");
        let original = "-- hooks\ndofile(a)\ndofile(b)\n";

        assert!(!patch.is_applied(original));
        let PatchOutcome::Changed(patched) = patch.apply(original) else {
            panic!("expected change");
        };
        assert_eq!(patched, "-- hooks\ndofile(a)\n");
        assert!(patch.is_applied(&patched));
        assert_eq!(patch.apply(&patched), PatchOutcome::Unchanged);
        assert_eq!(patch.revert(&patched), PatchOutcome::Changed(original.to_string()));
        assert_eq!(patch.revert(original), PatchOutcome::Unchanged);
    }

    #[test]
    fn test_insertion_patch_is_not_applied_twice() {
        let patch = definition("Scripts/Hooks.lua", "dofile(a)\n", "dofile(a)\ndofile(extra)\n");
        let original = "dofile(a)\n";

        let PatchOutcome::Changed(patched) = patch.apply(original) else {
            panic!("expected change");
        };
        assert_eq!(patch.apply(&patched), PatchOutcome::Unchanged);
        assert_eq!(patch.revert(&patched), PatchOutcome::Changed(original.to_string()));
    }

    #[test]
    fn test_discover_ranks_user_over_bundled() {
        let dir = tempfile::tempdir().unwrap();
        let bundled = dir.path().join("bundled");
        let user = dir.path().join("user");
        write_patch(&bundled, "2.5.0", "a.json", &definition("a.lua", "1", "2"));
        write_patch(&bundled, "2.7.0", "a.json", &definition("a.lua", "bundled", "x"));
        write_patch(&user, "2.7.0", "a.json", &definition("a.lua", "user", "y"));
        fs::create_dir_all(bundled.join("not-a-version")).unwrap();

        let roots = PatchRoots {
            user: Some(user),
            bundled: Some(bundled),
        };
        let sets = roots.discover().unwrap();
        let versions: Vec<&str> = sets.iter().map(|s| s.version.as_str()).collect();
        assert_eq!(versions, vec!["2.5.0", "2.7.0"]);
        assert_eq!(sets[1].source, PatchSource::User);
        assert_eq!(sets[1].patches[0].match_text, "user");
    }

    #[test]
    fn test_missing_roots_yield_no_candidates() {
        let roots = PatchRoots {
            user: Some(PathBuf::from("/nonexistent/user")),
            bundled: None,
        };
        assert!(roots.discover().unwrap().is_empty());
    }
}
