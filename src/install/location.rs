//! Registered external installation roots
//!
//! Each root reports the product version found in its metadata file when it is
//! registered. The list of roots and their enabled flags are persisted in the
//! `InstallationLocations` settings group.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use super::version::VersionKey;
use crate::constants::{location, settings};
use crate::settings::SharedSettings;

#[derive(Debug, Deserialize)]
struct LocationMetadata {
    version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationLocation {
    path: PathBuf,
    version: String,
    enabled: bool,
}

impl InstallationLocation {
    /// Read the metadata file under `path` and build a location
    pub fn open(path: &Path, enabled: bool) -> Result<Self> {
        let metadata_path = path.join(location::METADATA_FILE);
        let contents = fs::read_to_string(&metadata_path)
            .with_context(|| format!("Failed to read installation metadata from {}", metadata_path.display()))?;
        let metadata: LocationMetadata = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse installation metadata from {}", metadata_path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            version: metadata.version.trim().to_string(),
            enabled,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Version string as reported by the metadata file
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn version_key(&self) -> Result<VersionKey> {
        VersionKey::parse(&self.version)
            .with_context(|| format!("Installation at {} reports an unsupported version", self.path.display()))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn settings_key(&self) -> String {
        self.path.display().to_string()
    }
}

/// A registered root whose metadata could not be read at load time
///
/// It stays registered so that saving the registry does not forget it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnavailableLocation {
    path: PathBuf,
    reason: String,
}

impl UnavailableLocation {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Registry of installation roots
#[derive(Debug)]
pub struct InstallationLocations {
    settings: SharedSettings,
    /// Every registered root in registration order, readable or not
    paths: Vec<PathBuf>,
    items: Vec<InstallationLocation>,
    unavailable: Vec<UnavailableLocation>,
}

impl InstallationLocations {
    /// Reload the persisted registry
    ///
    /// Roots whose metadata cannot be read are kept as unavailable entries.
    pub fn load(settings: SharedSettings) -> Self {
        let stored = {
            let store = settings.borrow();
            store
                .get(settings::LOCATIONS_GROUP, location::PATHS_KEY)
                .unwrap_or_default()
        };
        let mut paths = Vec::new();
        let mut items = Vec::new();
        let mut unavailable = Vec::new();
        for line in stored.lines().filter(|l| !l.trim().is_empty()) {
            let path = PathBuf::from(line);
            let enabled = settings
                .borrow()
                .get_bool_or(settings::LOCATIONS_GROUP, line, true);
            match InstallationLocation::open(&path, enabled) {
                Ok(location) => items.push(location),
                Err(e) => {
                    error!(path = %path.display(), error = ?e, "Installation location is unavailable");
                    unavailable.push(UnavailableLocation {
                        path: path.clone(),
                        reason: format!("{e:#}"),
                    });
                }
            }
            paths.push(path);
        }
        info!(count = items.len(), unavailable = unavailable.len(), "Loaded installation locations");
        Self {
            settings,
            paths,
            items,
            unavailable,
        }
    }

    fn persist_paths(&self) {
        let joined = self
            .paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        self.settings
            .borrow_mut()
            .set(settings::LOCATIONS_GROUP, location::PATHS_KEY, &joined);
    }

    /// Register a new root, enabled by default
    pub fn add(&mut self, path: &Path) -> Result<&InstallationLocation> {
        if self.paths.iter().any(|p| p == path) {
            bail!("Installation location {} is already registered", path.display());
        }
        let location = InstallationLocation::open(path, true)?;
        info!(path = %path.display(), version = %location.version, "Registered installation location");
        self.settings
            .borrow_mut()
            .set_bool(settings::LOCATIONS_GROUP, &location.settings_key(), true);
        self.paths.push(path.to_path_buf());
        self.items.push(location);
        self.persist_paths();
        Ok(&self.items[self.items.len() - 1])
    }

    /// Unregister a root, whether or not it is currently readable
    pub fn remove(&mut self, path: &Path) -> bool {
        let Some(index) = self.paths.iter().position(|p| p == path) else {
            warn!(path = %path.display(), "Removal of an unregistered installation location");
            return false;
        };
        self.paths.remove(index);
        self.items.retain(|l| l.path != path);
        self.unavailable.retain(|u| u.path != path);
        self.settings
            .borrow_mut()
            .remove(settings::LOCATIONS_GROUP, &path.display().to_string());
        self.persist_paths();
        info!(path = %path.display(), "Removed installation location");
        true
    }

    /// Persist the enabled flag, returning whether it changed
    pub fn set_enabled(&mut self, path: &Path, enabled: bool) -> Result<bool> {
        if !self.paths.iter().any(|p| p == path) {
            bail!("Installation location {} is not registered", path.display());
        }
        let key = path.display().to_string();
        let was = {
            let mut store = self.settings.borrow_mut();
            let was = store.get_bool_or(settings::LOCATIONS_GROUP, &key, true);
            store.set_bool(settings::LOCATIONS_GROUP, &key, enabled);
            was
        };
        if let Some(location) = self.items.iter_mut().find(|l| l.path == path) {
            location.enabled = enabled;
        }
        if was == enabled {
            return Ok(false);
        }
        info!(path = %path.display(), enabled, "Installation location toggled");
        Ok(true)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstallationLocation> {
        self.items.iter()
    }

    pub fn enabled(&self) -> impl Iterator<Item = &InstallationLocation> {
        self.items.iter().filter(|l| l.enabled)
    }

    pub fn any_enabled(&self) -> bool {
        self.items.iter().any(|l| l.enabled)
    }

    /// Registered roots that could not be read when the registry was loaded
    pub fn unavailable(&self) -> &[UnavailableLocation] {
        &self.unavailable
    }
}
