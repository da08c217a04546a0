//! Editable scene graph of monitors and nested regions
//!
//! Monitors are root nodes placed in desktop coordinates. Regions hang below a
//! monitor (or below another region) with parent-relative rectangles; regions
//! flagged `render_target` are viewports. Every mutation appends a
//! [`SceneEvent`] that observers drain and apply in order.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::types::Rect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Monitor,
    Region,
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    pub kind: NodeKind,
    /// Desktop coordinates for monitors, parent-relative for regions
    pub rect: Rect,
    pub render_target: bool,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Change notification emitted by the scene
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneEvent {
    MonitorAdded(NodeId),
    MonitorRemoved(NodeId),
    Moved(NodeId),
    Resized(NodeId),
    ChildAdded { parent: NodeId, child: NodeId },
    ChildRemoved { parent: NodeId, child: NodeId },
}

#[derive(Debug, Default)]
pub struct Scene {
    nodes: BTreeMap<NodeId, SceneNode>,
    next_id: u32,
    events: Vec<SceneEvent>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self, node: SceneNode) -> NodeId {
        self.next_id += 1;
        let id = NodeId(self.next_id);
        self.nodes.insert(id, node);
        id
    }

    pub fn add_monitor(&mut self, name: &str, rect: Rect) -> NodeId {
        let id = self.allocate(SceneNode {
            name: name.to_string(),
            kind: NodeKind::Monitor,
            rect,
            render_target: false,
            parent: None,
            children: Vec::new(),
        });
        self.events.push(SceneEvent::MonitorAdded(id));
        id
    }

    pub fn add_region(&mut self, parent: NodeId, name: &str, rect: Rect, render_target: bool) -> Result<NodeId> {
        if !self.nodes.contains_key(&parent) {
            bail!("Cannot add region '{}' to missing parent {}", name, parent);
        }
        let id = self.allocate(SceneNode {
            name: name.to_string(),
            kind: NodeKind::Region,
            rect,
            render_target,
            parent: Some(parent),
            children: Vec::new(),
        });
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.push(id);
        }
        self.events.push(SceneEvent::ChildAdded { parent, child: id });
        Ok(id)
    }

    /// Remove a node and its whole subtree
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        let node = self.nodes.get(&id).with_context(|| format!("No scene node {}", id))?;
        let parent = node.parent;
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(removed) = self.nodes.remove(&next) {
                pending.extend(removed.children);
            }
        }
        match parent {
            Some(parent) => {
                if let Some(parent_node) = self.nodes.get_mut(&parent) {
                    parent_node.children.retain(|c| *c != id);
                }
                self.events.push(SceneEvent::ChildRemoved { parent, child: id });
            }
            None => self.events.push(SceneEvent::MonitorRemoved(id)),
        }
        Ok(())
    }

    pub fn move_to(&mut self, id: NodeId, x: i32, y: i32) -> Result<()> {
        let node = self.nodes.get_mut(&id).with_context(|| format!("No scene node {}", id))?;
        if node.rect.x != x || node.rect.y != y {
            node.rect.x = x;
            node.rect.y = y;
            self.events.push(SceneEvent::Moved(id));
        }
        Ok(())
    }

    pub fn resize(&mut self, id: NodeId, width: u32, height: u32) -> Result<()> {
        let node = self.nodes.get_mut(&id).with_context(|| format!("No scene node {}", id))?;
        if node.rect.width != width || node.rect.height != height {
            node.rect.width = width;
            node.rect.height = height;
            self.events.push(SceneEvent::Resized(id));
        }
        Ok(())
    }

    /// Replace every monitor with the given physical layout, dropping their contents
    pub fn reset_layout(&mut self, displays: &[Rect]) {
        let monitors: Vec<NodeId> = self.monitors().collect();
        for id in monitors {
            // ids come from the live map, removal cannot fail
            let _ = self.remove(id);
        }
        for (index, rect) in displays.iter().enumerate() {
            self.add_monitor(&format!("Monitor {}", index + 1), *rect);
        }
        info!(monitors = displays.len(), "Reset scene layout");
    }

    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(&id)
    }

    pub fn monitors(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .filter(|(_, n)| n.kind == NodeKind::Monitor)
            .map(|(id, _)| *id)
    }

    /// Find the first node with `name`, monitors included
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().find(|(_, n)| n.name == name).map(|(id, _)| *id)
    }

    pub fn drain_events(&mut self) -> Vec<SceneEvent> {
        let events = std::mem::take(&mut self.events);
        debug!(count = events.len(), "Draining scene events");
        events
    }

    pub fn from_description(description: &SceneDescription) -> Result<Self> {
        let mut scene = Scene::new();
        for monitor in &description.monitors {
            let id = scene.add_monitor(&monitor.name, monitor.rect());
            for region in &monitor.regions {
                scene.add_region_description(id, region)?;
            }
        }
        Ok(scene)
    }

    fn add_region_description(&mut self, parent: NodeId, region: &RegionDescription) -> Result<()> {
        let id = self.add_region(parent, &region.name, region.rect(), region.viewport)?;
        for child in &region.regions {
            self.add_region_description(id, child)?;
        }
        Ok(())
    }

    pub fn to_description(&self) -> SceneDescription {
        let monitors = self
            .monitors()
            .filter_map(|id| {
                let node = self.node(id)?;
                Some(MonitorDescription {
                    name: node.name.clone(),
                    x: node.rect.x,
                    y: node.rect.y,
                    width: node.rect.width,
                    height: node.rect.height,
                    regions: self.describe_children(node),
                })
            })
            .collect();
        SceneDescription { monitors }
    }

    fn describe_children(&self, node: &SceneNode) -> Vec<RegionDescription> {
        node.children
            .iter()
            .filter_map(|child| {
                let child = self.node(*child)?;
                Some(RegionDescription {
                    name: child.name.clone(),
                    x: child.rect.x,
                    y: child.rect.y,
                    width: child.rect.width,
                    height: child.rect.height,
                    viewport: child.render_target,
                    regions: self.describe_children(child),
                })
            })
            .collect()
    }
}

/// Serialized layout file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneDescription {
    #[serde(default)]
    pub monitors: Vec<MonitorDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorDescription {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<RegionDescription>,
}

impl MonitorDescription {
    fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionDescription {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub viewport: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<RegionDescription>,
}

impl RegionDescription {
    fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

impl SceneDescription {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read layout from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse layout JSON from {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize layout to JSON")?;
        fs::write(path, json).with_context(|| format!("Failed to write layout to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutations_emit_events_in_order() {
        let mut scene = Scene::new();
        let monitor = scene.add_monitor("Left", Rect::new(0, 0, 1920, 1080));
        let region = scene.add_region(monitor, "LEFT_MFCD", Rect::new(100, 100, 400, 300), true).unwrap();
        scene.move_to(region, 200, 100).unwrap();
        scene.move_to(region, 200, 100).unwrap(); // unchanged, no event
        scene.resize(region, 500, 300).unwrap();
        scene.remove(monitor).unwrap();

        assert_eq!(
            scene.drain_events(),
            vec![
                SceneEvent::MonitorAdded(monitor),
                SceneEvent::ChildAdded { parent: monitor, child: region },
                SceneEvent::Moved(region),
                SceneEvent::Resized(region),
                SceneEvent::MonitorRemoved(monitor),
            ]
        );
        assert!(scene.node(region).is_none());
        assert!(scene.drain_events().is_empty());
    }

    #[test]
    fn test_remove_region_detaches_from_parent() {
        let mut scene = Scene::new();
        let monitor = scene.add_monitor("M", Rect::new(0, 0, 100, 100));
        let panel = scene.add_region(monitor, "panel", Rect::new(0, 0, 50, 50), false).unwrap();
        let nested = scene.add_region(panel, "nested", Rect::new(0, 0, 10, 10), true).unwrap();
        scene.remove(panel).unwrap();

        assert!(scene.node(monitor).unwrap().children.is_empty());
        assert!(scene.node(nested).is_none());
    }

    #[test]
    fn test_add_region_to_missing_parent_fails() {
        let mut scene = Scene::new();
        assert!(scene.add_region(NodeId(42), "x", Rect::default(), true).is_err());
    }

    #[test]
    fn test_description_roundtrip_preserves_nesting() {
        let json = r#"{
            "monitors": [
                { "name": "Right", "x": 1920, "y": 0, "width": 1920, "height": 1080,
                  "regions": [
                    { "name": "panel", "x": 0, "y": 0, "width": 800, "height": 600,
                      "regions": [ { "name": "LEFT_MFCD", "x": 100, "y": 100, "width": 400, "height": 300, "viewport": true } ] }
                  ] }
            ]
        }"#;
        let description: SceneDescription = serde_json::from_str(json).unwrap();
        let scene = Scene::from_description(&description).unwrap();
        let mfcd = scene.find("LEFT_MFCD").unwrap();
        assert!(scene.node(mfcd).unwrap().render_target);

        let again = scene.to_description();
        assert_eq!(again.monitors.len(), 1);
        assert_eq!(again.monitors[0].regions[0].regions[0].name, "LEFT_MFCD");
    }

    #[test]
    fn test_reset_layout_replaces_monitors() {
        let mut scene = Scene::new();
        scene.add_monitor("old", Rect::new(0, 0, 800, 600));
        scene.drain_events();
        scene.reset_layout(&[Rect::new(0, 0, 1920, 1080), Rect::new(1920, 0, 1920, 1080)]);

        assert_eq!(scene.monitors().count(), 2);
        let events = scene.drain_events();
        assert!(matches!(events[0], SceneEvent::MonitorRemoved(_)));
        assert_eq!(events.len(), 3);
    }
}
