//! Scene-wide shadow index and debounced geometry recompute
//!
//! The coordinator turns scene events into shadow updates, keeps the
//! monitor-by-key and viewport indexes current, and derives the canvas
//! placement (global offset + resolution) plus monitor role auto-selection.

use anyhow::{Context, Result};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::debounce::Debounce;
use crate::constants::{geometry, settings};
use crate::scene::{NodeId, Scene, SceneEvent};
use crate::settings::SharedSettings;
use crate::shadow::monitor::{Role, base_key, fingerprint};
use crate::shadow::{ChangeKind, GeometryChange, ShadowChange, ShadowMonitor, ViewportPlacement};
use crate::types::{Offset, Rect, Resolution};

#[derive(Debug)]
pub struct GeometryCoordinator {
    settings: SharedSettings,
    /// Live monitors by geometry fingerprint
    monitors: BTreeMap<String, ShadowMonitor>,
    keys_by_node: HashMap<NodeId, String>,
    /// Every observed node mapped to the monitor whose subtree holds it
    owners: HashMap<NodeId, NodeId>,
    /// Viewport-capable nodes mapped to their monitor
    viewports: BTreeMap<NodeId, NodeId>,
    /// Monitors whose geometry duplicates a live monitor
    conflicts: BTreeSet<NodeId>,
    global_offset: Offset,
    resolution: Resolution,
    debounce: Debounce,
    recomputes: u64,
}

impl GeometryCoordinator {
    pub fn new(settings: SharedSettings) -> Self {
        Self::with_delay(settings, Duration::from_millis(geometry::DEBOUNCE_MS))
    }

    pub fn with_delay(settings: SharedSettings, delay: Duration) -> Self {
        Self {
            settings,
            monitors: BTreeMap::new(),
            keys_by_node: HashMap::new(),
            owners: HashMap::new(),
            viewports: BTreeMap::new(),
            conflicts: BTreeSet::new(),
            global_offset: Offset::default(),
            resolution: Resolution::default(),
            debounce: Debounce::new(delay),
            recomputes: 0,
        }
    }

    /// Drain and apply all pending scene events
    pub fn sync(&mut self, scene: &mut Scene, now: Instant) {
        for event in scene.drain_events() {
            self.apply(scene, event, now);
        }
    }

    /// Apply one scene event; qualifying events (re)schedule a recompute
    pub fn apply(&mut self, scene: &Scene, event: SceneEvent, now: Instant) {
        let qualifies = match event {
            SceneEvent::MonitorAdded(id) => self.adopt_monitor(scene, id),
            SceneEvent::MonitorRemoved(id) => self.drop_monitor(scene, id),
            SceneEvent::Moved(id) => self.geometry_changed(scene, id, GeometryChange::Moved),
            SceneEvent::Resized(id) => self.geometry_changed(scene, id, GeometryChange::Resized),
            SceneEvent::ChildAdded { parent, child } => self.structure_changed(parent, |monitor, sink| {
                monitor.child_added(scene, parent, child, sink)
            }),
            SceneEvent::ChildRemoved { parent, child } => {
                self.structure_changed(parent, |monitor, sink| monitor.child_removed(parent, child, sink))
            }
        };
        if qualifies {
            debug!(?event, "Scheduling geometry recompute");
            self.debounce.schedule(now);
        }
    }

    /// Run the pending recompute once its quiet period has passed
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.debounce.fire(now) {
            self.recompute();
            true
        } else {
            false
        }
    }

    /// When the pending recompute becomes due, if one is scheduled
    pub fn pending_deadline(&self) -> Option<Instant> {
        self.debounce.deadline()
    }

    fn adopt_monitor(&mut self, scene: &Scene, id: NodeId) -> bool {
        if self.keys_by_node.contains_key(&id) {
            return false;
        }
        let Some(node) = scene.node(id) else {
            return false;
        };
        let key = fingerprint(&node.rect);
        if let Some(existing) = self.monitors.get(&key) {
            warn!(monitor = %node.name, key = %key, existing = %existing.name(), "Monitor duplicates the geometry of a live monitor");
            self.conflicts.insert(id);
            return true;
        }
        self.conflicts.remove(&id);
        let mut sink = Vec::new();
        let Some(monitor) = ShadowMonitor::new(scene, id, self.settings.clone(), &mut sink) else {
            return false;
        };
        self.keys_by_node.insert(id, key.clone());
        self.monitors.insert(key, monitor);
        self.absorb(id, sink);
        true
    }

    fn drop_monitor(&mut self, scene: &Scene, id: NodeId) -> bool {
        if self.conflicts.remove(&id) {
            return true;
        }
        let Some(key) = self.keys_by_node.remove(&id) else {
            return false;
        };
        if let Some(monitor) = self.monitors.remove(&key) {
            let mut sink = Vec::new();
            monitor.dispose(&mut sink);
            self.absorb(id, sink);
        }
        info!(key = %key, "Monitor removed");
        self.retry_conflicts(scene);
        true
    }

    /// Give parked duplicates another chance once a key may have been freed
    fn retry_conflicts(&mut self, scene: &Scene) {
        let parked: Vec<NodeId> = self.conflicts.iter().copied().collect();
        for id in parked {
            self.conflicts.remove(&id);
            self.adopt_monitor(scene, id);
        }
    }

    fn geometry_changed(&mut self, scene: &Scene, id: NodeId, change: GeometryChange) -> bool {
        if self.conflicts.remove(&id) {
            self.adopt_monitor(scene, id);
            return true;
        }
        if let Some(key) = self.keys_by_node.get(&id).cloned() {
            return self.monitor_geometry_changed(scene, id, key, change);
        }
        let Some(key) = self.owners.get(&id).and_then(|m| self.keys_by_node.get(m)) else {
            return false;
        };
        let mut sink = Vec::new();
        self.monitors
            .get_mut(key)
            .is_some_and(|monitor| monitor.region_geometry(scene, id, change, &mut sink))
    }

    fn monitor_geometry_changed(&mut self, scene: &Scene, id: NodeId, key: String, change: GeometryChange) -> bool {
        let Some(mut monitor) = self.monitors.remove(&key) else {
            return false;
        };
        let mut sink = Vec::new();
        monitor.sync_geometry(scene, change, &mut sink);
        let rekey = sink.iter().find_map(|c| match &c.kind {
            ChangeKind::Rekeyed { old_key, new_key } => Some((old_key.clone(), new_key.clone())),
            _ => None,
        });
        let Some((old_key, new_key)) = rekey else {
            self.monitors.insert(key, monitor);
            return !sink.is_empty();
        };

        if self.monitors.contains_key(&new_key) {
            warn!(old = %old_key, new = %new_key, "Moved monitor now duplicates a live monitor, parking it");
            self.keys_by_node.remove(&id);
            let mut disposed = Vec::new();
            monitor.dispose(&mut disposed);
            self.absorb(id, disposed);
            self.conflicts.insert(id);
        } else {
            debug!(old = %old_key, new = %new_key, "Re-indexing monitor");
            self.keys_by_node.insert(id, new_key.clone());
            self.monitors.insert(new_key, monitor);
        }
        self.retry_conflicts(scene);
        true
    }

    fn structure_changed(
        &mut self,
        parent: NodeId,
        update: impl FnOnce(&mut ShadowMonitor, &mut Vec<ShadowChange>) -> bool,
    ) -> bool {
        let Some(monitor_node) = self.owners.get(&parent).copied() else {
            debug!(parent = %parent, "Structure change below an unobserved node");
            return false;
        };
        let Some(monitor) = self
            .keys_by_node
            .get(&monitor_node)
            .and_then(|key| self.monitors.get_mut(key))
        else {
            return false;
        };
        let mut sink = Vec::new();
        if !update(monitor, &mut sink) {
            return false;
        }
        self.absorb(monitor_node, sink);
        true
    }

    /// Track subscriptions reported by a monitor's shadow tree
    fn absorb(&mut self, monitor_node: NodeId, changes: Vec<ShadowChange>) {
        for change in changes {
            match change.kind {
                ChangeKind::Observed { viewport } => {
                    self.owners.insert(change.node, monitor_node);
                    if viewport {
                        self.viewports.insert(change.node, monitor_node);
                    }
                }
                ChangeKind::Disposed { .. } => {
                    self.owners.remove(&change.node);
                    self.viewports.remove(&change.node);
                }
                _ => {}
            }
        }
    }

    /// Purge stale settings, auto-select roles, then derive offset and resolution
    pub fn recompute(&mut self) {
        self.debounce.cancel();
        self.purge_orphaned_settings();
        self.ensure_main();
        self.ensure_user_interface();

        let min_left = self.monitors.values().map(|m| m.rect().left()).min().unwrap_or(0);
        let min_top = self.monitors.values().map(|m| m.rect().top()).min().unwrap_or(0);
        self.global_offset = Offset::new(-min_left, -min_top);

        let included: Vec<Rect> = self
            .monitors
            .values()
            .filter(|m| m.included())
            .map(|m| m.rect().translated(self.global_offset))
            .collect();
        self.resolution = Rect::bounding(&included)
            .map(|b| Resolution::new(b.right().max(0) as u32, b.bottom().max(0) as u32))
            .unwrap_or_default();

        self.recomputes += 1;
        info!(
            monitors = self.monitors.len(),
            viewports = self.viewports.len(),
            offset = ?self.global_offset,
            resolution = ?self.resolution,
            "Recomputed monitor geometry"
        );
    }

    fn purge_orphaned_settings(&mut self) {
        if self.monitors.is_empty() {
            debug!("No monitors observed, keeping persisted monitor settings");
            return;
        }
        let mut store = self.settings.borrow_mut();
        for key in store.keys(settings::MONITORS_GROUP) {
            if !self.monitors.contains_key(base_key(&key)) {
                debug!(key = %key, "Purging settings of a monitor that no longer exists");
                store.remove(settings::MONITORS_GROUP, &key);
            }
        }
    }

    fn min_viewport_count(&self) -> Option<usize> {
        self.monitors.values().map(|m| m.viewport_count()).min()
    }

    fn ensure_main(&mut self) {
        if self.monitors.values().any(|m| m.main()) {
            return;
        }
        let Some(min) = self.min_viewport_count() else {
            return;
        };
        for monitor in self.monitors.values_mut().filter(|m| m.viewport_count() == min) {
            info!(key = %monitor.key(), "Selecting monitor as main view");
            monitor.set_main(true, &mut Vec::new());
        }
    }

    fn ensure_user_interface(&mut self) {
        if self.monitors.values().any(|m| m.user_interface()) {
            return;
        }
        let Some(min) = self.min_viewport_count() else {
            return;
        };
        let chosen = self
            .monitors
            .values_mut()
            .filter(|m| m.viewport_count() == min)
            .min_by_key(|m| {
                let rect = m.rect();
                (Reverse(rect.width), rect.left(), rect.top())
            });
        if let Some(monitor) = chosen {
            info!(key = %monitor.key(), "Selecting monitor for the user interface");
            monitor.set_user_interface(true, &mut Vec::new());
        }
    }

    /// Change one role flag of the monitor with `key`
    pub fn set_role(&mut self, key: &str, role: Role, value: bool, now: Instant) -> Result<bool> {
        let monitor = self
            .monitors
            .get_mut(key)
            .with_context(|| format!("No monitor with key '{}'", key))?;
        let mut sink = Vec::new();
        let changed = monitor.set_role(role, value, &mut sink);
        if changed {
            self.debounce.schedule(now);
        }
        Ok(changed)
    }

    pub fn global_offset(&self) -> Offset {
        self.global_offset
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn recompute_count(&self) -> u64 {
        self.recomputes
    }

    pub fn monitors(&self) -> impl Iterator<Item = &ShadowMonitor> {
        self.monitors.values()
    }

    pub fn monitor(&self, key: &str) -> Option<&ShadowMonitor> {
        self.monitors.get(key)
    }

    /// Monitor holding the viewport `node`
    pub fn monitor_for(&self, node: NodeId) -> Option<&ShadowMonitor> {
        let monitor_node = self.viewports.get(&node)?;
        self.monitors.get(self.keys_by_node.get(monitor_node)?)
    }

    pub fn viewport_count(&self) -> usize {
        self.viewports.len()
    }

    pub fn conflicts(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.conflicts.iter().copied()
    }

    /// Every tracked viewport in canvas coordinates, sorted by name
    pub fn viewports(&self) -> Vec<ViewportPlacement> {
        let mut placements: Vec<ViewportPlacement> = self
            .monitors
            .values()
            .flat_map(|m| m.viewports())
            .map(|mut p| {
                p.rect = p.rect.translated(self.global_offset);
                p
            })
            .collect();
        placements.sort_by(|a, b| a.name.cmp(&b.name).then(a.node.cmp(&b.node)));
        placements
    }

    fn role_view(&self, role: impl Fn(&ShadowMonitor) -> bool) -> Option<Rect> {
        let rects: Vec<Rect> = self
            .monitors
            .values()
            .filter(|m| role(m))
            .map(|m| m.rect().translated(self.global_offset))
            .collect();
        Rect::bounding(&rects)
    }

    /// Union of the Main monitors in canvas coordinates
    pub fn main_view(&self) -> Option<Rect> {
        self.role_view(ShadowMonitor::main)
    }

    /// Union of the UserInterface monitors in canvas coordinates
    pub fn user_interface_view(&self) -> Option<Rect> {
        self.role_view(ShadowMonitor::user_interface)
    }

    /// Whether the observed monitors are exactly the physical displays
    pub fn layout_matches(&self, displays: &[Rect]) -> bool {
        if !self.conflicts.is_empty() || displays.len() != self.monitors.len() {
            return false;
        }
        let mut expected: Vec<Rect> = displays.to_vec();
        let mut actual: Vec<Rect> = self.monitors.values().map(|m| m.rect()).collect();
        let order = |r: &Rect| (r.x, r.y, r.width, r.height);
        expected.sort_by_key(order);
        actual.sort_by_key(order);
        expected == actual
    }
}
