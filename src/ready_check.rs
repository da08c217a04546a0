//! Aggregated diagnostics for the whole setup

use tracing::info;

use crate::geometry::GeometryCoordinator;
use crate::install::{InstallationLocations, PatchApplications};
use crate::monitor_config::MonitorSetupGenerator;
use crate::scene::Scene;
use crate::status::{Severity, StatusFlags, StatusReportItem, worst};

/// Everything the ready check looks at
pub struct ReadyCheck<'a> {
    pub scene: &'a Scene,
    pub coordinator: &'a GeometryCoordinator,
    pub locations: &'a InstallationLocations,
    pub generator: &'a MonitorSetupGenerator,
    pub patches: &'a PatchApplications,
}

impl ReadyCheck<'_> {
    /// Findings in a fixed order: locations, monitors, monitor setup, patches
    pub fn run(&self) -> Vec<StatusReportItem> {
        let mut report = Vec::new();

        for location in self.locations.iter() {
            let state = if location.is_enabled() { "enabled" } else { "disabled" };
            report.push(
                StatusReportItem::info(format!(
                    "Installation at {} reports version {} ({state})",
                    location.path().display(),
                    location.version()
                ))
                .with_flags(StatusFlags::VERBOSE),
            );
        }
        for unavailable in self.locations.unavailable() {
            report.push(
                StatusReportItem::warning(format!(
                    "Installation at {} is unavailable: {}",
                    unavailable.path().display(),
                    unavailable.reason()
                ))
                .with_recommendation("Reconnect it, or remove it from the installation locations"),
            );
        }
        let any_enabled = self.locations.any_enabled();
        if !any_enabled {
            report.push(
                StatusReportItem::error("No installation locations are enabled")
                    .with_recommendation("Add or enable an installation location"),
            );
        }

        for node in self.coordinator.conflicts() {
            let name = self.scene.node(node).map_or_else(|| node.to_string(), |n| n.name.clone());
            report.push(
                StatusReportItem::error(format!("Monitor {name} has the same position and size as another monitor"))
                    .with_recommendation("Move or resize it so every monitor has its own geometry"),
            );
        }

        if any_enabled {
            report.extend(self.generator.verify(self.coordinator, self.locations));
            report.extend(self.patches.verify());
        } else {
            report.extend(self.generator.preconditions(self.coordinator));
        }

        info!(findings = report.len(), worst = ?worst(&report), "Ready check complete");
        report
    }

    /// True when nothing worse than Info was found
    pub fn is_ready(report: &[StatusReportItem]) -> bool {
        worst(report).is_none_or(|s| s == Severity::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::location::tests::fake_installation;
    use crate::settings::MemorySettings;
    use crate::status::RecordingCallbacks;
    use crate::types::Rect;
    use std::time::Instant;

    const LEFT: Rect = Rect::new(0, 0, 1920, 1080);
    const RIGHT: Rect = Rect::new(1920, 0, 1920, 1080);

    #[test]
    fn test_ready_after_install() {
        let settings = MemorySettings::shared();
        let mut scene = Scene::new();
        scene.add_monitor("Left", LEFT);
        scene.add_monitor("Right", RIGHT);
        let mut coordinator = GeometryCoordinator::new(settings.clone());
        coordinator.sync(&mut scene, Instant::now());
        coordinator.recompute();

        let dir = tempfile::tempdir().unwrap();
        let root = fake_installation(dir.path(), "install", "2.9.0");
        let mut locations = InstallationLocations::load(settings.clone());
        locations.add(&root).unwrap();
        let patches = PatchApplications::from_candidates(&locations, &[], settings.clone());
        patches.set_excluded(&root, true);
        let generator = MonitorSetupGenerator::new(Some("Desk".to_string()), vec![LEFT, RIGHT]);

        let check = ReadyCheck {
            scene: &scene,
            coordinator: &coordinator,
            locations: &locations,
            generator: &generator,
            patches: &patches,
        };
        // no patch set is compatible, which is an Error regardless of exclusion
        assert!(!ReadyCheck::is_ready(&check.run()));

        generator.install(&coordinator, &locations, &mut RecordingCallbacks::default());
        let report = check.run();
        assert_eq!(
            report.iter().filter(|i| i.severity == Severity::Warning).count(),
            0
        );
        assert!(report.iter().any(|i| i.is_up_to_date()));
    }

    #[test]
    fn test_no_locations_and_conflicts_are_errors() {
        let settings = MemorySettings::shared();
        let mut scene = Scene::new();
        scene.add_monitor("Left", LEFT);
        scene.add_monitor("Copy", LEFT);
        let mut coordinator = GeometryCoordinator::new(settings.clone());
        coordinator.sync(&mut scene, Instant::now());
        coordinator.recompute();

        let locations = InstallationLocations::load(settings.clone());
        let patches = PatchApplications::from_candidates(&locations, &[], settings);
        let generator = MonitorSetupGenerator::new(Some("Desk".to_string()), vec![LEFT]);
        let report = ReadyCheck {
            scene: &scene,
            coordinator: &coordinator,
            locations: &locations,
            generator: &generator,
            patches: &patches,
        }
        .run();

        assert!(report.iter().any(|i| i.status.contains("No installation locations")));
        assert!(report.iter().any(|i| i.status.contains("Monitor Copy")));
        assert!(!ReadyCheck::is_ready(&report));
    }

    #[test]
    fn test_unavailable_location_is_reported() {
        let settings = MemorySettings::shared();
        let mut scene = Scene::new();
        scene.add_monitor("Left", LEFT);
        let mut coordinator = GeometryCoordinator::new(settings.clone());
        coordinator.sync(&mut scene, Instant::now());
        coordinator.recompute();

        let dir = tempfile::tempdir().unwrap();
        let root = fake_installation(dir.path(), "install", "2.9.0");
        InstallationLocations::load(settings.clone()).add(&root).unwrap();
        std::fs::remove_dir_all(&root).unwrap();

        let locations = InstallationLocations::load(settings.clone());
        let patches = PatchApplications::from_candidates(&locations, &[], settings);
        let generator = MonitorSetupGenerator::new(Some("Desk".to_string()), vec![LEFT]);
        let report = ReadyCheck {
            scene: &scene,
            coordinator: &coordinator,
            locations: &locations,
            generator: &generator,
            patches: &patches,
        }
        .run();

        let unavailable: Vec<_> = report.iter().filter(|i| i.status.contains("is unavailable")).collect();
        assert_eq!(unavailable.len(), 1);
        assert_eq!(unavailable[0].severity, Severity::Warning);
        assert!(unavailable[0].status.contains(&root.display().to_string()));
    }
}
