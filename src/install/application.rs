//! Selecting, installing and verifying the patch set for each location

use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::location::{InstallationLocation, InstallationLocations};
use super::patch::{self, PatchDefinition, PatchOutcome, PatchRoots, PatchSet};
use super::version::VersionKey;
use super::write_existing_all;
use crate::constants::settings;
use crate::settings::SharedSettings;
use crate::status::{InstallationCallbacks, InstallationResult, StatusFlags, StatusReportItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Apply,
    Revert,
}

impl Direction {
    fn transform(self, patch: &PatchDefinition, content: &str) -> PatchOutcome {
        match self {
            Direction::Apply => patch.apply(content),
            Direction::Revert => patch.revert(content),
        }
    }
}

/// The patch set chosen for one installation location
#[derive(Debug, Clone)]
pub struct PatchApplication {
    location: PathBuf,
    installed: VersionKey,
    selected: Option<PatchSet>,
}

impl PatchApplication {
    /// Pick the newest candidate not newer than the location's version
    ///
    /// Fails when the location reports a version we cannot order.
    pub fn resolve(location: &InstallationLocation, candidates: &[PatchSet]) -> Result<Self> {
        let installed = location.version_key()?;
        let selected = patch::select(candidates, &installed).cloned();
        match &selected {
            Some(set) => info!(
                location = %location.path().display(),
                installed = %installed,
                selected = %set.version,
                source = ?set.source,
                "Selected patch set"
            ),
            None => warn!(location = %location.path().display(), installed = %installed, "No compatible patch set"),
        }
        Ok(Self {
            location: location.path().to_path_buf(),
            installed,
            selected,
        })
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn installed_version(&self) -> &VersionKey {
        &self.installed
    }

    pub fn selected_version(&self) -> Option<&str> {
        self.selected.as_ref().map(|s| s.version.as_str())
    }

    /// Transform every target in memory, failing the whole set on the first missing or foreign file
    fn plan(&self, direction: Direction) -> Result<Vec<(PathBuf, String)>> {
        let Some(set) = &self.selected else {
            bail!(
                "No patch set is compatible with version {} at {}",
                self.installed,
                self.location.display()
            );
        };
        // target -> (original, transformed)
        let mut files: BTreeMap<PathBuf, (String, String)> = BTreeMap::new();
        for patch in &set.patches {
            let target = self.location.join(&patch.target);
            if !files.contains_key(&target) {
                if !target.is_file() {
                    bail!("Patch target {} does not exist", target.display());
                }
                let content = fs::read_to_string(&target)
                    .with_context(|| format!("Failed to read patch target {}", target.display()))?;
                files.insert(target.clone(), (content.clone(), content));
            }
            let Some((_, current)) = files.get_mut(&target) else {
                continue;
            };
            match direction.transform(patch, current) {
                PatchOutcome::Changed(next) => *current = next,
                PatchOutcome::Unchanged => debug!(target = %target.display(), ?direction, "Patch already in desired state"),
                PatchOutcome::NotApplicable => bail!(
                    "Patch for {} does not match the installed file (version {})",
                    target.display(),
                    self.installed
                ),
            }
        }
        Ok(files
            .into_iter()
            .filter(|(_, (original, current))| original != current)
            .map(|(path, (_, current))| (path, current))
            .collect())
    }

    fn execute(&self, direction: Direction) -> Result<usize> {
        let writes = self.plan(direction)?;
        write_existing_all(&writes)?;
        for (path, _) in &writes {
            debug!(target = %path.display(), ?direction, "Wrote patched file");
        }
        Ok(writes.len())
    }

    /// Apply the selected set, returning the number of files changed
    pub fn install(&self) -> Result<usize> {
        self.execute(Direction::Apply)
    }

    /// Put back the original text of the selected set
    pub fn revert(&self) -> Result<usize> {
        self.execute(Direction::Revert)
    }

    /// Check that every replacement is present; suppressed entirely when `excluded`
    pub fn verify(&self, excluded: bool) -> Vec<StatusReportItem> {
        let location = self.location.display();
        let Some(set) = &self.selected else {
            return vec![
                StatusReportItem::error(format!(
                    "No patches are available for version {} installed at {}",
                    self.installed, location
                ))
                .with_recommendation("Update this program or add a matching patch set to the user patch directory"),
            ];
        };
        let mut findings = Vec::new();
        for patch in &set.patches {
            let target = self.location.join(&patch.target);
            let applied = fs::read_to_string(&target)
                .map(|content| patch.is_applied(&content))
                .unwrap_or(false);
            if !applied {
                findings.push(
                    StatusReportItem::warning(format!(
                        "{} is not patched for version {}",
                        target.display(),
                        set.version
                    ))
                    .with_recommendation("Install patches to update this file"),
                );
            }
        }
        if excluded {
            if !findings.is_empty() {
                debug!(location = %location, missing = findings.len(), "Patch findings suppressed by exclusion");
            }
            return Vec::new();
        }
        if findings.is_empty() {
            findings.push(
                StatusReportItem::info(format!("Patches {} are installed at {}", set.version, location))
                    .with_flags(StatusFlags::VERBOSE | StatusFlags::CONFIGURATION_UP_TO_DATE),
            );
        }
        findings
    }
}

#[derive(Debug, Clone)]
enum PatchEntry {
    Ready(PatchApplication),
    /// Location whose version cannot be ordered
    Blocked { location: PathBuf, reason: String },
}

/// Patch applications for every enabled location
#[derive(Debug)]
pub struct PatchApplications {
    settings: SharedSettings,
    entries: Vec<PatchEntry>,
}

impl PatchApplications {
    pub fn resolve(locations: &InstallationLocations, roots: &PatchRoots, settings: SharedSettings) -> Result<Self> {
        let candidates = roots.discover()?;
        Ok(Self::from_candidates(locations, &candidates, settings))
    }

    pub fn from_candidates(locations: &InstallationLocations, candidates: &[PatchSet], settings: SharedSettings) -> Self {
        let entries = locations
            .enabled()
            .map(|location| match PatchApplication::resolve(location, candidates) {
                Ok(application) => PatchEntry::Ready(application),
                Err(e) => {
                    error!(location = %location.path().display(), error = ?e, "Location blocked");
                    PatchEntry::Blocked {
                        location: location.path().to_path_buf(),
                        reason: format!("{e:#}"),
                    }
                }
            })
            .collect();
        Self { settings, entries }
    }

    pub fn applications(&self) -> impl Iterator<Item = &PatchApplication> {
        self.entries.iter().filter_map(|e| match e {
            PatchEntry::Ready(application) => Some(application),
            PatchEntry::Blocked { .. } => None,
        })
    }

    pub fn is_excluded(&self, location: &Path) -> bool {
        self.settings.borrow().get_bool_or(
            settings::PATCH_EXCLUSIONS_GROUP,
            &location.display().to_string(),
            false,
        )
    }

    /// Stop (or resume) reporting missing patches for `location`
    pub fn set_excluded(&self, location: &Path, excluded: bool) {
        let key = location.display().to_string();
        let mut store = self.settings.borrow_mut();
        if excluded {
            store.set_bool(settings::PATCH_EXCLUSIONS_GROUP, &key, true);
        } else {
            store.remove(settings::PATCH_EXCLUSIONS_GROUP, &key);
        }
    }

    pub fn install(&self, callbacks: &mut dyn InstallationCallbacks) -> InstallationResult {
        self.run(Direction::Apply, callbacks)
    }

    pub fn revert(&self, callbacks: &mut dyn InstallationCallbacks) -> InstallationResult {
        self.run(Direction::Revert, callbacks)
    }

    fn run(&self, direction: Direction, callbacks: &mut dyn InstallationCallbacks) -> InstallationResult {
        let verb = match direction {
            Direction::Apply => "install",
            Direction::Revert => "revert",
        };
        if self.entries.is_empty() {
            let items = vec![
                StatusReportItem::error("No installation locations are enabled")
                    .with_recommendation("Add or enable an installation location"),
            ];
            callbacks.failure(&format!("Nothing to {verb}"), &items);
            return InstallationResult::Fatal;
        }
        if !callbacks.confirm(&format!("About to {verb} patches in {} location(s)", self.entries.len())) {
            return InstallationResult::Cancelled;
        }

        let mut items = Vec::new();
        let mut failed = false;
        for entry in &self.entries {
            match entry {
                PatchEntry::Blocked { location, reason } => {
                    failed = true;
                    items.push(StatusReportItem::error(format!(
                        "Cannot {verb} patches at {}: {reason}",
                        location.display()
                    )));
                }
                PatchEntry::Ready(application) => {
                    let result = match direction {
                        Direction::Apply => application.install(),
                        Direction::Revert => application.revert(),
                    };
                    match result {
                        Ok(changed) => items.push(StatusReportItem::info(format!(
                            "Patches {} {}: {changed} file(s) changed at {}",
                            application.selected_version().unwrap_or("-"),
                            if direction == Direction::Apply { "installed" } else { "reverted" },
                            application.location().display()
                        ))),
                        Err(e) => {
                            failed = true;
                            items.push(
                                StatusReportItem::error(format!(
                                    "Failed to {verb} patches at {}: {e:#}",
                                    application.location().display()
                                ))
                                .with_recommendation("Files not named as already replaced were left untouched"),
                            );
                        }
                    }
                }
            }
        }
        if failed {
            callbacks.failure(&format!("Patch {verb} failed for at least one location"), &items);
            InstallationResult::Fatal
        } else {
            callbacks.success(&format!("Patch {verb} complete"), &items);
            InstallationResult::Success
        }
    }

    /// Ready check findings for every enabled location
    pub fn verify(&self) -> Vec<StatusReportItem> {
        let mut findings = Vec::new();
        for entry in &self.entries {
            match entry {
                PatchEntry::Blocked { location, reason } => findings.push(
                    StatusReportItem::error(format!("Installation at {} cannot be patched: {reason}", location.display()))
                        .with_recommendation("Check the version reported by this installation"),
                ),
                PatchEntry::Ready(application) => {
                    findings.extend(application.verify(self.is_excluded(application.location())))
                }
            }
        }
        findings
    }
}
