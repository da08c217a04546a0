//! Monitor shadow with persisted role flags
//!
//! A monitor has no stored identity; its geometry fingerprint is the key under
//! which its role flags are persisted. When the geometry changes the old key is
//! abandoned and the flags are loaded fresh under the new one.

use tracing::{debug, info};

use super::{ChangeKind, GeometryChange, ShadowChange, ShadowNode, ViewportPlacement};
use crate::constants::{roles, settings};
use crate::scene::{NodeId, Scene};
use crate::settings::SharedSettings;
use crate::types::{Offset, Rect};

/// How a physical display participates in rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorRoles {
    /// Part of the rendered canvas
    pub included: bool,
    /// Carries the primary simulator view
    pub main: bool,
    /// Carries the simulator user interface
    pub user_interface: bool,
}

impl Default for MonitorRoles {
    fn default() -> Self {
        Self {
            included: roles::DEFAULT_INCLUDED,
            main: roles::DEFAULT_MAIN,
            user_interface: roles::DEFAULT_USER_INTERFACE,
        }
    }
}

/// One of the three persisted role flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    Included,
    Main,
    UserInterface,
}

#[derive(Debug)]
pub struct ShadowMonitor {
    shadow: ShadowNode,
    key: String,
    roles: MonitorRoles,
    viewport_count: usize,
    settings: SharedSettings,
}

/// Geometry fingerprint used as a monitor's identity
pub fn fingerprint(rect: &Rect) -> String {
    format!("{}_{}_{}_{}", rect.left(), rect.top(), rect.width, rect.height)
}

fn main_key(key: &str) -> String {
    format!("{key}{}", settings::MAIN_SUFFIX)
}

fn user_interface_key(key: &str) -> String {
    format!("{key}{}", settings::USER_INTERFACE_SUFFIX)
}

/// Strip a role suffix from a persisted key, yielding the monitor fingerprint
pub fn base_key(persisted: &str) -> &str {
    persisted
        .strip_suffix(settings::MAIN_SUFFIX)
        .or_else(|| persisted.strip_suffix(settings::USER_INTERFACE_SUFFIX))
        .unwrap_or(persisted)
}

impl ShadowMonitor {
    /// Shadow the monitor `id` with its whole subtree and load its role flags
    pub fn new(scene: &Scene, id: NodeId, settings: SharedSettings, sink: &mut Vec<ShadowChange>) -> Option<Self> {
        let shadow = ShadowNode::instrument(scene, id, sink)?;
        let key = fingerprint(&shadow.rect());
        let roles = Self::load_roles(&settings, &key);
        let viewport_count = shadow.viewport_descendants();
        info!(monitor = %shadow.name(), key = %key, ?roles, viewports = viewport_count, "Shadowing monitor");
        Some(Self {
            shadow,
            key,
            roles,
            viewport_count,
            settings,
        })
    }

    fn load_roles(settings: &SharedSettings, key: &str) -> MonitorRoles {
        let store = settings.borrow();
        let group = settings::MONITORS_GROUP;
        MonitorRoles {
            included: store.get_bool_or(group, key, roles::DEFAULT_INCLUDED),
            main: store.get_bool_or(group, &main_key(key), roles::DEFAULT_MAIN),
            user_interface: store.get_bool_or(group, &user_interface_key(key), roles::DEFAULT_USER_INTERFACE),
        }
    }

    pub fn id(&self) -> NodeId {
        self.shadow.id()
    }

    pub fn name(&self) -> &str {
        self.shadow.name()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Desktop rectangle of the monitor
    pub fn rect(&self) -> Rect {
        self.shadow.rect()
    }

    pub fn roles(&self) -> MonitorRoles {
        self.roles
    }

    pub fn included(&self) -> bool {
        self.roles.included
    }

    pub fn main(&self) -> bool {
        self.roles.main
    }

    pub fn user_interface(&self) -> bool {
        self.roles.user_interface
    }

    pub fn viewport_count(&self) -> usize {
        self.viewport_count
    }

    pub fn shadow(&self) -> &ShadowNode {
        &self.shadow
    }

    /// Keep the viewport count in step with nodes entering or leaving the subtree
    fn tally(&mut self, changes: &[ShadowChange]) {
        for change in changes {
            match change.kind {
                ChangeKind::Observed { viewport: true } => self.viewport_count += 1,
                ChangeKind::Disposed { viewport: true } => {
                    self.viewport_count = self.viewport_count.saturating_sub(1)
                }
                _ => {}
            }
        }
    }

    /// Shadow a new child of `parent`, returning false when `parent` is not in this subtree
    pub fn child_added(&mut self, scene: &Scene, parent: NodeId, child: NodeId, sink: &mut Vec<ShadowChange>) -> bool {
        let start = sink.len();
        let Some(node) = self.shadow.find_mut(parent) else {
            return false;
        };
        node.child_added(scene, child, sink);
        self.tally(&sink[start..]);
        true
    }

    pub fn child_removed(&mut self, parent: NodeId, child: NodeId, sink: &mut Vec<ShadowChange>) -> bool {
        let start = sink.len();
        let Some(node) = self.shadow.find_mut(parent) else {
            return false;
        };
        node.child_removed(child, sink);
        self.tally(&sink[start..]);
        true
    }

    /// Re-read the geometry of a region below this monitor
    pub fn region_geometry(&mut self, scene: &Scene, id: NodeId, change: GeometryChange, sink: &mut Vec<ShadowChange>) -> bool {
        self.shadow
            .find_mut(id)
            .is_some_and(|node| node.sync_geometry(scene, change, sink))
    }

    pub fn set_role(&mut self, role: Role, value: bool, sink: &mut Vec<ShadowChange>) -> bool {
        match role {
            Role::Included => self.set_included(value, sink),
            Role::Main => self.set_main(value, sink),
            Role::UserInterface => self.set_user_interface(value, sink),
        }
    }

    /// Persist and apply the Included flag, returning whether it changed
    pub fn set_included(&mut self, value: bool, sink: &mut Vec<ShadowChange>) -> bool {
        let key = self.key.clone();
        self.update_flag(value, &key, |r| &mut r.included, sink)
    }

    pub fn set_main(&mut self, value: bool, sink: &mut Vec<ShadowChange>) -> bool {
        let key = main_key(&self.key);
        self.update_flag(value, &key, |r| &mut r.main, sink)
    }

    pub fn set_user_interface(&mut self, value: bool, sink: &mut Vec<ShadowChange>) -> bool {
        let key = user_interface_key(&self.key);
        self.update_flag(value, &key, |r| &mut r.user_interface, sink)
    }

    fn update_flag(
        &mut self,
        value: bool,
        settings_key: &str,
        flag: impl FnOnce(&mut MonitorRoles) -> &mut bool,
        sink: &mut Vec<ShadowChange>,
    ) -> bool {
        self.settings
            .borrow_mut()
            .set_bool(settings::MONITORS_GROUP, settings_key, value);
        let slot = flag(&mut self.roles);
        if *slot == value {
            return false;
        }
        *slot = value;
        debug!(key = %settings_key, value, "Monitor role changed");
        sink.push(ShadowChange::new(self.id(), ChangeKind::RolesChanged));
        true
    }

    /// Re-read the monitor geometry, re-keying when the fingerprint changes
    pub fn sync_geometry(&mut self, scene: &Scene, change: GeometryChange, sink: &mut Vec<ShadowChange>) {
        if !self.shadow.sync_geometry(scene, change, sink) {
            return;
        }
        let new_key = fingerprint(&self.shadow.rect());
        if new_key == self.key {
            return;
        }
        let old_key = std::mem::replace(&mut self.key, new_key.clone());
        self.roles = Self::load_roles(&self.settings, &self.key);
        info!(old = %old_key, new = %new_key, roles = ?self.roles, "Monitor geometry changed, reloaded roles");
        sink.push(ShadowChange::new(self.id(), ChangeKind::Rekeyed { old_key, new_key }));
    }

    /// Viewports placed on this monitor, in desktop coordinates
    pub fn viewports(&self) -> Vec<ViewportPlacement> {
        let rect = self.rect();
        let mut out = Vec::new();
        self.shadow.collect_viewports(Offset::new(rect.x, rect.y), &mut out);
        out
    }

    pub fn dispose(self, sink: &mut Vec<ShadowChange>) {
        debug!(key = %self.key, "Disposing monitor shadow");
        self.shadow.dispose(sink);
    }
}
