//! Remote viewport export
//!
//! Each exported viewport becomes a network endpoint. A server captures from
//! the viewport's canvas position; a client receives into a spot on its own
//! synthetic canvas, found by first-fit-decreasing shelf packing, and gets an
//! auxiliary profile with one colored placeholder per viewport.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::constants::iris;
use crate::install::write_atomic;
use crate::shadow::ViewportPlacement;
use crate::status::StatusReportItem;
use crate::types::{Point, Rect, Resolution};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IrisRole {
    /// Capture viewports and send them
    Server,
    /// Receive viewports and place them on the local canvas
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub name: String,
    pub port: u16,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<Point>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaceholderRegion {
    pub name: String,
    pub rect: Rect,
    pub color: String,
}

/// Layout a client loads to show where each received viewport lands
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientProfile {
    pub canvas: Resolution,
    pub regions: Vec<PlaceholderRegion>,
}

#[derive(Debug, Clone, Serialize)]
struct EndpointDocument<'a> {
    role: IrisRole,
    endpoints: &'a [Endpoint],
}

#[derive(Debug, Clone)]
pub struct IrisExport {
    pub role: IrisRole,
    pub endpoints: Vec<Endpoint>,
    pub profile: Option<ClientProfile>,
    pub diagnostics: Vec<StatusReportItem>,
}

impl IrisExport {
    /// Write the endpoint document, plus the client profile when there is one
    pub fn write(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        let mut written = Vec::new();

        let endpoints_path = dir.join(iris::ENDPOINTS_FILE);
        let document = EndpointDocument {
            role: self.role,
            endpoints: &self.endpoints,
        };
        write_atomic(&endpoints_path, &serde_json::to_string_pretty(&document)?)?;
        written.push(endpoints_path);

        if let Some(profile) = &self.profile {
            let profile_path = dir.join(iris::PROFILE_FILE);
            write_atomic(&profile_path, &serde_json::to_string_pretty(profile)?)?;
            written.push(profile_path);
        }
        info!(dir = %dir.display(), files = written.len(), "Wrote iris export");
        Ok(written)
    }
}

fn rejected(viewport: &ViewportPlacement, reason: &str) -> StatusReportItem {
    let item = StatusReportItem::error(format!("Viewport {} was not exported: {reason}", viewport.name))
        .with_recommendation("Remove or shrink viewports, or raise the export capacity");
    item.log();
    item
}

/// Stable display color for a viewport name (FNV-1a)
pub fn color_for(name: &str) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in name.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    // keep channels away from black so labels stay readable
    let channel = |shift: u32| ((hash >> shift) as u8) | 0x40;
    format!("#{:02x}{:02x}{:02x}", channel(0), channel(8), channel(16))
}

struct Shelf {
    y: u32,
    height: u32,
    used: u32,
}

/// First-fit-decreasing shelf packing; `None` marks an item that did not fit
fn pack(sizes: &[(u32, u32)], canvas: Resolution) -> Vec<Option<Point>> {
    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by(|&a, &b| {
        let (wa, ha) = sizes[a];
        let (wb, hb) = sizes[b];
        hb.cmp(&ha).then(wb.cmp(&wa)).then(a.cmp(&b))
    });

    let mut shelves: Vec<Shelf> = Vec::new();
    let mut placed = vec![None; sizes.len()];
    for index in order {
        let (width, height) = sizes[index];
        if width > canvas.width || height > canvas.height {
            continue;
        }
        if let Some(shelf) = shelves
            .iter_mut()
            .find(|s| height <= s.height && s.used + width <= canvas.width)
        {
            placed[index] = Some(Point::new(shelf.used as i32, shelf.y as i32));
            shelf.used += width;
            continue;
        }
        let y = shelves.last().map_or(0, |s| s.y + s.height);
        if y + height <= canvas.height {
            placed[index] = Some(Point::new(0, y as i32));
            shelves.push(Shelf { y, height, used: width });
        }
    }
    placed
}

#[derive(Debug, Clone)]
pub struct IrisPacker {
    base_port: u16,
    canvas: Resolution,
    capacity: usize,
}

impl Default for IrisPacker {
    fn default() -> Self {
        Self {
            base_port: iris::DEFAULT_BASE_PORT,
            canvas: Resolution::new(iris::DEFAULT_CANVAS_WIDTH, iris::DEFAULT_CANVAS_HEIGHT),
            capacity: iris::DEFAULT_CAPACITY,
        }
    }
}

impl IrisPacker {
    pub fn with_base_port(mut self, port: u16) -> Self {
        self.base_port = port;
        self
    }

    pub fn with_canvas(mut self, canvas: Resolution) -> Self {
        self.canvas = canvas;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Build the export for `viewports` (canvas coordinates, in output order)
    pub fn export(&self, viewports: &[ViewportPlacement], resolution: Resolution, role: IrisRole) -> IrisExport {
        let extent = resolution.extent();
        let mut diagnostics = Vec::new();

        let mut candidates: Vec<&ViewportPlacement> = Vec::new();
        for viewport in viewports {
            if extent.intersection(&viewport.rect) != Some(viewport.rect) {
                warn!(viewport = %viewport.name, rect = ?viewport.rect, ?resolution, "Viewport is not fully on the canvas; not exported");
                diagnostics.push(
                    StatusReportItem::warning(format!("Viewport {} extends past the rendered canvas and was not exported", viewport.name))
                        .with_recommendation("Move the viewport fully inside an included monitor"),
                );
                continue;
            }
            if candidates.len() == self.capacity {
                diagnostics.push(rejected(
                    viewport,
                    &format!("the export is limited to {} viewports", self.capacity),
                ));
                continue;
            }
            candidates.push(viewport);
        }

        let destinations = match role {
            IrisRole::Server => vec![None; candidates.len()],
            IrisRole::Client => {
                let sizes: Vec<(u32, u32)> = candidates.iter().map(|v| (v.rect.width, v.rect.height)).collect();
                pack(&sizes, self.canvas)
            }
        };

        let mut endpoints = Vec::new();
        let mut regions = Vec::new();
        for (viewport, destination) in candidates.into_iter().zip(destinations) {
            if role == IrisRole::Client && destination.is_none() {
                diagnostics.push(rejected(
                    viewport,
                    &format!("it does not fit the {}x{} client canvas", self.canvas.width, self.canvas.height),
                ));
                continue;
            }
            let Some(port) = u16::try_from(endpoints.len())
                .ok()
                .and_then(|n| self.base_port.checked_add(n))
            else {
                diagnostics.push(rejected(viewport, "no port is left above the base port"));
                continue;
            };
            let rect = viewport.rect;
            endpoints.push(Endpoint {
                name: viewport.name.clone(),
                port,
                width: rect.width,
                height: rect.height,
                source: (role == IrisRole::Server).then(|| rect.position()),
                destination,
            });
            if let Some(at) = destination {
                regions.push(PlaceholderRegion {
                    name: viewport.name.clone(),
                    rect: Rect::new(at.x, at.y, rect.width, rect.height),
                    color: color_for(&viewport.name),
                });
            }
        }
        debug!(?role, exported = endpoints.len(), findings = diagnostics.len(), "Packed iris export");

        let profile = (role == IrisRole::Client).then(|| ClientProfile {
            canvas: self.canvas,
            regions,
        });
        IrisExport {
            role,
            endpoints,
            profile,
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::NodeId;
    use crate::status::Severity;

    fn viewport(index: u32, name: &str, rect: Rect) -> ViewportPlacement {
        ViewportPlacement {
            node: NodeId(index),
            name: name.to_string(),
            rect,
        }
    }

    fn grid(count: u32) -> Vec<ViewportPlacement> {
        (0..count)
            .map(|i| viewport(i, &format!("VP{i:02}"), Rect::new((i % 8) as i32 * 200, (i / 8) as i32 * 150, 200, 150)))
            .collect()
    }

    const SCREEN: Resolution = Resolution::new(3840, 1080);

    #[test]
    fn test_capacity_excess_is_named_error() {
        let export = IrisPacker::default().export(&grid(21), SCREEN, IrisRole::Client);
        assert_eq!(export.endpoints.len(), 20);
        assert_eq!(export.profile.as_ref().unwrap().regions.len(), 20);
        let errors: Vec<_> = export.diagnostics.iter().filter(|d| d.severity == Severity::Error).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].status.contains("VP20"));
    }

    #[test]
    fn test_packed_regions_do_not_overlap_and_stay_on_canvas() {
        let mut viewports = grid(6);
        viewports.push(viewport(50, "TALL", Rect::new(2000, 0, 300, 900)));
        viewports.push(viewport(51, "WIDE", Rect::new(2400, 0, 1400, 200)));
        let export = IrisPacker::default().export(&viewports, SCREEN, IrisRole::Client);
        let regions = &export.profile.unwrap().regions;
        assert_eq!(regions.len(), 8);
        let canvas = Rect::new(0, 0, 1920, 1080);
        for (i, a) in regions.iter().enumerate() {
            assert_eq!(canvas.intersection(&a.rect), Some(a.rect));
            for b in &regions[i + 1..] {
                assert!(!a.rect.overlaps(&b.rect), "{} overlaps {}", a.name, b.name);
            }
        }
    }

    #[test]
    fn test_partially_off_canvas_is_excluded() {
        let viewports = vec![
            viewport(1, "INSIDE", Rect::new(10, 10, 100, 100)),
            viewport(2, "EDGE", Rect::new(3800, 10, 100, 100)),
        ];
        let export = IrisPacker::default().export(&viewports, SCREEN, IrisRole::Server);
        assert_eq!(export.endpoints.len(), 1);
        assert_eq!(export.endpoints[0].name, "INSIDE");
        assert_eq!(export.diagnostics[0].severity, Severity::Warning);
    }

    #[test]
    fn test_server_has_sources_client_has_destinations() {
        let viewports = grid(3);
        let server = IrisPacker::default().with_base_port(7000).export(&viewports, SCREEN, IrisRole::Server);
        let ports: Vec<u16> = server.endpoints.iter().map(|e| e.port).collect();
        assert_eq!(ports, vec![7000, 7001, 7002]);
        assert!(server.endpoints.iter().all(|e| e.source.is_some() && e.destination.is_none()));
        assert!(server.profile.is_none());

        let client = IrisPacker::default().export(&viewports, SCREEN, IrisRole::Client);
        assert!(client.endpoints.iter().all(|e| e.source.is_none() && e.destination.is_some()));
    }

    #[test]
    fn test_too_large_for_client_canvas_is_error() {
        let viewports = vec![viewport(1, "HUGE", Rect::new(0, 0, 2000, 500))];
        let export = IrisPacker::default().export(&viewports, SCREEN, IrisRole::Client);
        assert!(export.endpoints.is_empty());
        assert_eq!(export.diagnostics[0].severity, Severity::Error);
        assert!(export.diagnostics[0].status.contains("HUGE"));
    }

    #[test]
    fn test_colors_are_stable_per_name() {
        assert_eq!(color_for("LEFT_MFCD"), color_for("LEFT_MFCD"));
        assert_ne!(color_for("LEFT_MFCD"), color_for("RIGHT_MFCD"));
        assert_eq!(color_for("x").len(), 7);
    }

    #[test]
    fn test_write_creates_both_documents_for_client() {
        let dir = tempfile::tempdir().unwrap();
        let export = IrisPacker::default().export(&grid(2), SCREEN, IrisRole::Client);
        let written = export.write(dir.path()).unwrap();
        assert_eq!(written.len(), 2);
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&written[0]).unwrap()).unwrap();
        assert_eq!(doc["role"], "client");
        assert_eq!(doc["endpoints"][0]["port"], 9000);
    }
}
