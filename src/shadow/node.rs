//! Generic shadow of one scene node and its subtree

use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{ChangeKind, GeometryChange, ShadowChange};
use crate::scene::{NodeId, Scene};
use crate::types::{Offset, Rect};

/// Mirror of a scene node, owning the shadows of its children
#[derive(Debug)]
pub struct ShadowNode {
    id: NodeId,
    name: String,
    rect: Rect,
    render_target: bool,
    children: BTreeMap<NodeId, ShadowNode>,
}

/// A viewport resolved to desktop coordinates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewportPlacement {
    pub node: NodeId,
    pub name: String,
    pub rect: Rect,
}

impl ShadowNode {
    /// Shadow `id` and, recursively, everything currently below it
    ///
    /// Returns `None` when the node no longer exists in the scene.
    pub fn instrument(scene: &Scene, id: NodeId, sink: &mut Vec<ShadowChange>) -> Option<Self> {
        let Some(source) = scene.node(id) else {
            debug!(node = %id, "Scene node vanished before it could be shadowed");
            return None;
        };
        let mut shadow = ShadowNode {
            id,
            name: source.name.clone(),
            rect: source.rect,
            render_target: source.render_target,
            children: BTreeMap::new(),
        };
        sink.push(ShadowChange::new(id, ChangeKind::Observed { viewport: shadow.render_target }));
        for child in &source.children {
            if let Some(child_shadow) = ShadowNode::instrument(scene, *child, sink) {
                shadow.children.insert(*child, child_shadow);
            }
        }
        Some(shadow)
    }

    /// Stop observing this subtree, children first
    pub fn dispose(self, sink: &mut Vec<ShadowChange>) {
        for (_, child) in self.children {
            child.dispose(sink);
        }
        sink.push(ShadowChange::new(self.id, ChangeKind::Disposed { viewport: self.render_target }));
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn find(&self, id: NodeId) -> Option<&ShadowNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.values().find_map(|c| c.find(id))
    }

    pub fn find_mut(&mut self, id: NodeId) -> Option<&mut ShadowNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.values_mut().find_map(|c| c.find_mut(id))
    }

    /// Re-read geometry from the scene after a move or resize notification
    ///
    /// Returns whether the mirrored rectangle changed.
    pub fn sync_geometry(&mut self, scene: &Scene, change: GeometryChange, sink: &mut Vec<ShadowChange>) -> bool {
        let Some(source) = scene.node(self.id) else {
            return false;
        };
        if source.rect == self.rect {
            return false;
        }
        self.rect = source.rect;
        let kind = match change {
            GeometryChange::Moved => ChangeKind::Moved,
            GeometryChange::Resized => ChangeKind::Resized,
        };
        sink.push(ShadowChange::new(self.id, kind));
        if self.render_target {
            sink.push(ShadowChange::new(self.id, ChangeKind::ViewportChanged));
        }
        true
    }

    /// Start shadowing a child that appeared in the scene
    pub fn child_added(&mut self, scene: &Scene, child: NodeId, sink: &mut Vec<ShadowChange>) {
        if self.children.contains_key(&child) {
            return;
        }
        if let Some(shadow) = ShadowNode::instrument(scene, child, sink) {
            self.children.insert(child, shadow);
            sink.push(ShadowChange::new(self.id, ChangeKind::ChildrenChanged));
        }
    }

    /// Dispose the shadow of a child that left the scene
    pub fn child_removed(&mut self, child: NodeId, sink: &mut Vec<ShadowChange>) {
        match self.children.remove(&child) {
            Some(shadow) => {
                shadow.dispose(sink);
                sink.push(ShadowChange::new(self.id, ChangeKind::ChildrenChanged));
            }
            None => warn!(parent = %self.id, child = %child, "Removal of a child that was never shadowed"),
        }
    }

    /// Number of viewport-capable nodes strictly below this one
    pub fn viewport_descendants(&self) -> usize {
        self.children
            .values()
            .map(|c| usize::from(c.render_target) + c.viewport_descendants())
            .sum()
    }

    /// Collect viewports below this node; `origin` is where this node's children are anchored
    pub fn collect_viewports(&self, origin: Offset, out: &mut Vec<ViewportPlacement>) {
        for child in self.children.values() {
            let rect = child.rect.translated(origin);
            if child.render_target {
                out.push(ViewportPlacement {
                    node: child.id,
                    name: child.name.clone(),
                    rect,
                });
            }
            child.collect_viewports(Offset::new(rect.x, rect.y), out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_scene() -> (Scene, NodeId, NodeId, NodeId) {
        let mut scene = Scene::new();
        let monitor = scene.add_monitor("Right", Rect::new(1920, 0, 1920, 1080));
        let panel = scene.add_region(monitor, "panel", Rect::new(10, 20, 800, 600), false).unwrap();
        let mfcd = scene.add_region(panel, "LEFT_MFCD", Rect::new(100, 100, 400, 300), true).unwrap();
        scene.drain_events();
        (scene, monitor, panel, mfcd)
    }

    #[test]
    fn test_instrument_recurses_into_existing_children() {
        let (scene, monitor, panel, mfcd) = sample_scene();
        let mut sink = Vec::new();
        let shadow = ShadowNode::instrument(&scene, monitor, &mut sink).unwrap();

        assert!(shadow.find(mfcd).is_some());
        assert_eq!(shadow.viewport_descendants(), 1);
        assert_eq!(
            sink,
            vec![
                ShadowChange::new(monitor, ChangeKind::Observed { viewport: false }),
                ShadowChange::new(panel, ChangeKind::Observed { viewport: false }),
                ShadowChange::new(mfcd, ChangeKind::Observed { viewport: true }),
            ]
        );
    }

    #[test]
    fn test_dispose_children_before_parent() {
        let (scene, monitor, panel, mfcd) = sample_scene();
        let shadow = ShadowNode::instrument(&scene, monitor, &mut Vec::new()).unwrap();
        let mut sink = Vec::new();
        shadow.dispose(&mut sink);

        let order: Vec<NodeId> = sink.iter().map(|c| c.node).collect();
        assert_eq!(order, vec![mfcd, panel, monitor]);
    }

    #[test]
    fn test_viewport_change_only_for_render_targets() {
        let (mut scene, monitor, panel, mfcd) = sample_scene();
        let mut shadow = ShadowNode::instrument(&scene, monitor, &mut Vec::new()).unwrap();

        scene.move_to(panel, 0, 0).unwrap();
        let mut sink = Vec::new();
        assert!(shadow.find_mut(panel).unwrap().sync_geometry(&scene, GeometryChange::Moved, &mut sink));
        assert_eq!(sink, vec![ShadowChange::new(panel, ChangeKind::Moved)]);

        scene.resize(mfcd, 410, 300).unwrap();
        let mut sink = Vec::new();
        shadow.find_mut(mfcd).unwrap().sync_geometry(&scene, GeometryChange::Resized, &mut sink);
        assert_eq!(
            sink,
            vec![
                ShadowChange::new(mfcd, ChangeKind::Resized),
                ShadowChange::new(mfcd, ChangeKind::ViewportChanged),
            ]
        );
    }

    #[test]
    fn test_incremental_child_add_and_remove() {
        let (mut scene, monitor, panel, _) = sample_scene();
        let mut shadow = ShadowNode::instrument(&scene, monitor, &mut Vec::new()).unwrap();

        let extra = scene.add_region(panel, "RIGHT_MFCD", Rect::new(500, 100, 400, 300), true).unwrap();
        let mut sink = Vec::new();
        shadow.find_mut(panel).unwrap().child_added(&scene, extra, &mut sink);
        assert_eq!(shadow.viewport_descendants(), 2);
        assert!(sink.contains(&ShadowChange::new(extra, ChangeKind::Observed { viewport: true })));

        let mut sink = Vec::new();
        shadow.find_mut(monitor).unwrap().child_removed(panel, &mut sink);
        assert_eq!(shadow.viewport_descendants(), 0);
        assert_eq!(
            sink.iter().filter(|c| c.kind == ChangeKind::Disposed { viewport: true }).count(),
            2
        );
    }

    #[test]
    fn test_collect_viewports_accumulates_nesting() {
        let (scene, monitor, _, mfcd) = sample_scene();
        let shadow = ShadowNode::instrument(&scene, monitor, &mut Vec::new()).unwrap();
        let mut out = Vec::new();
        shadow.collect_viewports(Offset::new(1920, 0), &mut out);

        assert_eq!(
            out,
            vec![ViewportPlacement {
                node: mfcd,
                name: "LEFT_MFCD".to_string(),
                rect: Rect::new(1920 + 10 + 100, 20 + 100, 400, 300),
            }]
        );
    }
}
