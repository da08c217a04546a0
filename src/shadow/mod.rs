//! Synchronized mirrors of scene nodes
//!
//! A shadow tree observes one monitor subtree of the scene. Shadows never own
//! the scene nodes; they copy the geometry they need and report every change
//! through a single [`ShadowChange`] channel that the geometry coordinator
//! dispatches on.

pub mod monitor;
pub mod node;

pub use monitor::ShadowMonitor;
pub use node::{ShadowNode, ViewportPlacement};

use crate::scene::NodeId;

/// What happened to a shadowed node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    /// Node entered the shadow tree and is now observed
    Observed { viewport: bool },
    /// Node left the shadow tree and is no longer observed
    Disposed { viewport: bool },
    Moved,
    Resized,
    /// A viewport moved or resized
    ViewportChanged,
    ChildrenChanged,
    /// Monitor geometry fingerprint changed
    Rekeyed { old_key: String, new_key: String },
    /// A monitor role flag changed value
    RolesChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowChange {
    pub node: NodeId,
    pub kind: ChangeKind,
}

impl ShadowChange {
    pub fn new(node: NodeId, kind: ChangeKind) -> Self {
        Self { node, kind }
    }
}

/// Which geometry aspect a scene event reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryChange {
    Moved,
    Resized,
}
