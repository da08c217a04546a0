//! Monitor setup artifact generation, installation and verification
//!
//! The artifact is a Lua script the simulator loads from
//! `<root>/Config/MonitorSetup/<name>.lua`. It declares the primary view, an
//! optional separate user interface view, and one table per viewport, all in
//! simulator canvas coordinates.

use anyhow::{Context, Result, bail};
use std::fmt::{self, Write as _};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::constants::monitor_setup;
use crate::geometry::GeometryCoordinator;
use crate::install::{InstallationLocations, write_atomic};
use crate::shadow::ViewportPlacement;
use crate::status::{InstallationCallbacks, InstallationResult, StatusFlags, StatusReportItem};
use crate::types::{Rect, Resolution};

const LUA_KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in", "local", "nil",
    "not", "or", "repeat", "return", "then", "true", "until", "while",
];

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !LUA_KEYWORDS.contains(&name)
}

fn quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Left-hand side of a global assignment for `name`
fn global_target(name: &str) -> String {
    if is_identifier(name) {
        name.to_string()
    } else {
        format!("_G[{}]", quoted(name))
    }
}

fn rect_fields(rect: &Rect) -> String {
    format!(
        "x = {}, y = {}, width = {}, height = {}",
        rect.x, rect.y, rect.width, rect.height
    )
}

/// Generates and installs the monitor setup for one stable name
#[derive(Debug, Clone)]
pub struct MonitorSetupGenerator {
    name: Option<String>,
    displays: Vec<Rect>,
}

impl MonitorSetupGenerator {
    /// `displays` is the physical layout the scene must currently match
    pub fn new(name: Option<String>, displays: Vec<Rect>) -> Self {
        Self { name, displays }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }

    /// Artifact path under one installation root
    pub fn target_path(&self, root: &Path) -> Option<PathBuf> {
        let name = self.name()?;
        Some(
            root.join(monitor_setup::RELATIVE_DIR)
                .join(format!("{name}.{}", monitor_setup::EXTENSION)),
        )
    }

    /// Errors that block generation; empty when the artifact can be produced
    pub fn preconditions(&self, coordinator: &GeometryCoordinator) -> Vec<StatusReportItem> {
        let mut problems = Vec::new();
        match self.name() {
            None => problems.push(
                StatusReportItem::error("The monitor setup has no name")
                    .with_recommendation("Pass --name to choose the name the simulator will list"),
            ),
            Some(name) if name.contains(['/', '\\']) => problems.push(
                StatusReportItem::error(format!("Monitor setup name '{name}' contains a path separator"))
                    .with_recommendation("Choose a name without '/' or '\\'"),
            ),
            Some(_) => {}
        }
        if coordinator.monitors().next().is_none() {
            problems.push(
                StatusReportItem::error("The scene contains no monitors")
                    .with_recommendation("Load a layout or reset it to the physical displays"),
            );
        } else if !coordinator.layout_matches(&self.displays) {
            problems.push(
                StatusReportItem::error("The monitor layout does not match the physical displays")
                    .with_recommendation("Reset the monitor layout to the current display arrangement"),
            );
        }
        for item in &problems {
            item.log();
        }
        problems
    }

    /// Deterministic artifact text for the current coordinator state
    pub fn generate(&self, coordinator: &GeometryCoordinator) -> Result<String> {
        if let Some(problem) = self.preconditions(coordinator).into_iter().next() {
            bail!("Cannot generate monitor setup: {}", problem.status);
        }
        let name = self.name().context("Monitor setup name vanished")?;
        let main = coordinator
            .main_view()
            .context("No monitor is marked Main; recompute has not run")?;
        let resolution = coordinator.resolution();
        let user_interface = coordinator.user_interface_view().filter(|ui| *ui != main);

        let viewports = coordinator.viewports();
        for pair in viewports.windows(2) {
            if pair[0].name == pair[1].name {
                warn!(viewport = %pair[1].name, "Duplicate viewport name; the later one wins");
            }
        }
        let mut out = String::new();
        write_setup(&mut out, name, resolution, main, user_interface, &viewports)
            .context("Failed to format monitor setup")?;
        debug!(name = %name, viewports = viewports.len(), bytes = out.len(), "Generated monitor setup");
        Ok(out)
    }

    /// Write the artifact into every enabled location
    ///
    /// Stops at the first failed write. Files written before the failure are
    /// left in place and listed in the failure report.
    pub fn install(
        &self,
        coordinator: &GeometryCoordinator,
        locations: &InstallationLocations,
        callbacks: &mut dyn InstallationCallbacks,
    ) -> InstallationResult {
        let mut problems = self.preconditions(coordinator);
        if !locations.any_enabled() {
            problems.push(
                StatusReportItem::error("No installation locations are enabled")
                    .with_recommendation("Add or enable an installation location"),
            );
        }
        if !problems.is_empty() {
            callbacks.failure("Monitor setup was not installed", &problems);
            return InstallationResult::Fatal;
        }
        let text = match self.generate(coordinator) {
            Ok(text) => text,
            Err(e) => {
                let items = vec![StatusReportItem::error(format!("{e:#}"))];
                callbacks.failure("Monitor setup was not installed", &items);
                return InstallationResult::Fatal;
            }
        };
        if !callbacks.confirm("About to install the monitor setup") {
            return InstallationResult::Cancelled;
        }

        let mut written: Vec<PathBuf> = Vec::new();
        for location in locations.enabled() {
            let Some(path) = self.target_path(location.path()) else {
                continue;
            };
            if let Err(e) = write_artifact(&path, &text) {
                let mut items = vec![
                    StatusReportItem::error(format!("Failed to write {}: {e:#}", path.display()))
                        .with_recommendation("Fix the problem and run install again"),
                ];
                if !written.is_empty() {
                    let list = written.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ");
                    items.push(
                        StatusReportItem::warning(format!(
                            "These files were already written in this run and were not rolled back: {list}"
                        ))
                        .with_recommendation("Remove them manually if the partial install is not wanted"),
                    );
                }
                callbacks.failure("Monitor setup install aborted", &items);
                return InstallationResult::Fatal;
            }
            info!(path = %path.display(), "Installed monitor setup");
            written.push(path);
        }

        let items: Vec<StatusReportItem> = written
            .iter()
            .map(|p| {
                StatusReportItem::info(format!("Monitor setup written to {}", p.display()))
                    .with_link(format!("file://{}", p.display()))
            })
            .collect();
        callbacks.success("Monitor setup installed", &items);
        InstallationResult::Success
    }

    /// Compare what is installed in each enabled location with freshly generated text
    pub fn verify(&self, coordinator: &GeometryCoordinator, locations: &InstallationLocations) -> Vec<StatusReportItem> {
        let mut findings = self.preconditions(coordinator);
        if !locations.any_enabled() {
            findings.push(
                StatusReportItem::error("No installation locations are enabled")
                    .with_recommendation("Add or enable an installation location"),
            );
        }
        if !findings.is_empty() {
            return findings;
        }
        let expected = match self.generate(coordinator) {
            Ok(text) => text,
            Err(e) => return vec![StatusReportItem::error(format!("{e:#}"))],
        };
        for location in locations.enabled() {
            let Some(path) = self.target_path(location.path()) else {
                continue;
            };
            let link = format!("file://{}", path.display());
            let item = match fs::read(&path) {
                Ok(bytes) if bytes == expected.as_bytes() => {
                    StatusReportItem::info(format!("Monitor setup at {} is up to date", path.display()))
                        .with_flags(StatusFlags::VERBOSE | StatusFlags::CONFIGURATION_UP_TO_DATE)
                }
                Ok(_) => StatusReportItem::warning(format!("Monitor setup at {} is out of date", path.display()))
                    .with_recommendation("Run install to regenerate it"),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    StatusReportItem::warning(format!("Monitor setup is not installed at {}", path.display()))
                        .with_recommendation("Run install to create it")
                }
                Err(e) => StatusReportItem::warning(format!("Monitor setup at {} could not be read: {e}", path.display()))
                    .with_recommendation("Check the permissions of the file and its directory"),
            };
            findings.push(item.with_link(link));
        }
        findings
    }
}

fn write_setup(
    out: &mut impl fmt::Write,
    name: &str,
    resolution: Resolution,
    main: Rect,
    user_interface: Option<Rect>,
    viewports: &[ViewportPlacement],
) -> fmt::Result {
    writeln!(out, "-- Generated by monitor-setup. Changes will be overwritten.")?;
    writeln!(out, "_ = function(p) return p end")?;
    writeln!(out, "name = _({})", quoted(name))?;
    writeln!(
        out,
        "description = {}",
        quoted(&format!("{name} ({}x{})", resolution.width, resolution.height))
    )?;
    writeln!(out, "Viewports = {{")?;
    writeln!(out, "    {} = {{", monitor_setup::PRIMARY_VIEW)?;
    writeln!(out, "        x = {},", main.x)?;
    writeln!(out, "        y = {},", main.y)?;
    writeln!(out, "        width = {},", main.width)?;
    writeln!(out, "        height = {},", main.height)?;
    writeln!(out, "        viewDx = 0,")?;
    writeln!(out, "        viewDy = 0,")?;
    writeln!(out, "        aspect = {:.6},", main.width as f64 / main.height.max(1) as f64)?;
    writeln!(out, "    }},")?;
    writeln!(out, "}}")?;

    if let Some(ui) = user_interface {
        writeln!(out, "{} = {{ {} }}", monitor_setup::UI_VIEW, rect_fields(&ui))?;
    }
    writeln!(out, "GU_MAIN_VIEWPORT = Viewports.{}", monitor_setup::PRIMARY_VIEW)?;
    for viewport in viewports {
        writeln!(out, "{} = {{ {} }}", global_target(&viewport.name), rect_fields(&viewport.rect))?;
    }
    Ok(())
}

fn write_artifact(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    write_atomic(path, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::location::tests::fake_installation;
    use crate::scene::Scene;
    use crate::settings::{MemorySettings, SharedSettings};
    use crate::status::{RecordingCallbacks, Severity, worst};
    use std::time::Instant;

    const LEFT: Rect = Rect::new(0, 0, 1920, 1080);
    const RIGHT: Rect = Rect::new(1920, 0, 1920, 1080);

    fn scenario() -> (GeometryCoordinator, SharedSettings) {
        let mut scene = Scene::new();
        scene.add_monitor("Left", LEFT);
        let right = scene.add_monitor("Right", RIGHT);
        scene
            .add_region(right, "LEFT_MFCD", Rect::new(100, 100, 400, 300), true)
            .unwrap();
        let settings = MemorySettings::shared();
        let mut coordinator = GeometryCoordinator::new(settings.clone());
        coordinator.sync(&mut scene, Instant::now());
        coordinator.recompute();
        (coordinator, settings)
    }

    fn generator() -> MonitorSetupGenerator {
        MonitorSetupGenerator::new(Some("Cockpit".to_string()), vec![LEFT, RIGHT])
    }

    #[test]
    fn test_scenario_viewport_rectangle() {
        let (coordinator, _) = scenario();
        let text = generator().generate(&coordinator).unwrap();
        assert!(text.contains("LEFT_MFCD = { x = 2020, y = 100, width = 400, height = 300 }"));
        assert!(text.contains("GU_MAIN_VIEWPORT = Viewports.Center"));
        assert!(text.contains("name = _('Cockpit')"));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let (coordinator, _) = scenario();
        let g = generator();
        assert_eq!(g.generate(&coordinator).unwrap(), g.generate(&coordinator).unwrap());
    }

    #[test]
    fn test_missing_name_fails_fast() {
        let (coordinator, _) = scenario();
        let g = MonitorSetupGenerator::new(Some("  ".to_string()), vec![LEFT, RIGHT]);
        assert!(g.generate(&coordinator).is_err());
        assert_eq!(worst(&g.preconditions(&coordinator)), Some(Severity::Error));
    }

    #[test]
    fn test_layout_mismatch_touches_nothing() {
        let (coordinator, settings) = scenario();
        let dir = tempfile::tempdir().unwrap();
        let root = fake_installation(dir.path(), "install", "2.9.0");
        let mut locations = InstallationLocations::load(settings);
        locations.add(&root).unwrap();

        let g = MonitorSetupGenerator::new(Some("Cockpit".to_string()), vec![LEFT]);
        let mut callbacks = RecordingCallbacks::default();
        assert_eq!(g.install(&coordinator, &locations, &mut callbacks), InstallationResult::Fatal);
        assert!(!root.join(monitor_setup::RELATIVE_DIR).exists());
        assert_eq!(callbacks.failures.len(), 1);
    }

    #[test]
    fn test_install_then_verify_is_up_to_date() {
        let (coordinator, settings) = scenario();
        let dir = tempfile::tempdir().unwrap();
        let stable = fake_installation(dir.path(), "stable", "2.9.0");
        let beta = fake_installation(dir.path(), "beta", "2.9.1");
        let mut locations = InstallationLocations::load(settings);
        locations.add(&stable).unwrap();
        locations.add(&beta).unwrap();

        let g = generator();
        let before = g.verify(&coordinator, &locations);
        assert!(before.iter().all(|i| i.severity == Severity::Warning));

        let mut callbacks = RecordingCallbacks::default();
        assert_eq!(g.install(&coordinator, &locations, &mut callbacks), InstallationResult::Success);
        let after = g.verify(&coordinator, &locations);
        assert_eq!(after.len(), 2);
        assert!(after.iter().all(|i| i.severity == Severity::Info && i.is_up_to_date()));
        assert!(g.target_path(&stable).unwrap().ends_with("Config/MonitorSetup/Cockpit.lua"));
    }

    #[test]
    fn test_stale_artifact_is_warning() {
        let (coordinator, settings) = scenario();
        let dir = tempfile::tempdir().unwrap();
        let root = fake_installation(dir.path(), "install", "2.9.0");
        let mut locations = InstallationLocations::load(settings);
        locations.add(&root).unwrap();

        let g = generator();
        g.install(&coordinator, &locations, &mut RecordingCallbacks::default());
        fs::write(g.target_path(&root).unwrap(), "-- edited").unwrap();
        let findings = g.verify(&coordinator, &locations);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert!(findings[0].status.contains("out of date"));
    }

    #[test]
    fn test_unreadable_artifact_is_not_reported_as_missing() {
        let (coordinator, settings) = scenario();
        let dir = tempfile::tempdir().unwrap();
        let root = fake_installation(dir.path(), "install", "2.9.0");
        let mut locations = InstallationLocations::load(settings);
        locations.add(&root).unwrap();

        let g = generator();
        // a directory at the artifact path exists but cannot be read as a file
        fs::create_dir_all(g.target_path(&root).unwrap()).unwrap();
        let findings = g.verify(&coordinator, &locations);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert!(findings[0].status.contains("could not be read"));
        assert!(!findings[0].status.contains("not installed"));
    }

    #[test]
    fn test_failed_write_aborts_without_rollback() {
        let (coordinator, settings) = scenario();
        let dir = tempfile::tempdir().unwrap();
        let first = fake_installation(dir.path(), "first", "2.9.0");
        let second = fake_installation(dir.path(), "second", "2.9.0");
        let third = fake_installation(dir.path(), "third", "2.9.0");
        // a file where the artifact directory should be
        fs::create_dir_all(second.join("Config")).unwrap();
        fs::write(second.join(monitor_setup::RELATIVE_DIR), "blocked").unwrap();

        let mut locations = InstallationLocations::load(settings);
        for root in [&first, &second, &third] {
            locations.add(root).unwrap();
        }
        let g = generator();
        let mut callbacks = RecordingCallbacks::default();
        assert_eq!(g.install(&coordinator, &locations, &mut callbacks), InstallationResult::Fatal);

        assert!(g.target_path(&first).unwrap().exists());
        assert!(!g.target_path(&third).unwrap().exists());
        let (_, details) = &callbacks.failures[0];
        assert!(details.iter().any(|i| i.status.contains("not rolled back")));
    }

    #[test]
    fn test_no_enabled_locations_is_error() {
        let (coordinator, settings) = scenario();
        let locations = InstallationLocations::load(settings);
        let findings = generator().verify(&coordinator, &locations);
        assert_eq!(worst(&findings), Some(Severity::Error));
    }

    #[test]
    fn test_non_identifier_names_are_quoted() {
        assert_eq!(global_target("LEFT_MFCD"), "LEFT_MFCD");
        assert_eq!(global_target("Left MFCD"), "_G['Left MFCD']");
        assert_eq!(global_target("end"), "_G['end']");
        assert_eq!(global_target("it's"), "_G['it\\'s']");
    }
}
