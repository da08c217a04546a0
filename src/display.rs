//! Physical display layout, as reported by the X server

use anyhow::{Context, Result};
use tracing::{debug, info};
use x11rb::connection::Connection;
use x11rb::protocol::randr::ConnectionExt as RandrExt;
use x11rb::protocol::xproto::ConnectionExt as XprotoExt;

use crate::types::Rect;

/// Source of the display rectangles the scene layout must match
pub trait DisplayProbe {
    fn displays(&self) -> Result<Vec<Rect>>;
}

/// Active RandR monitors of the default X display
#[derive(Debug, Default)]
pub struct X11DisplayProbe;

impl DisplayProbe for X11DisplayProbe {
    fn displays(&self) -> Result<Vec<Rect>> {
        let (conn, screen_num) = x11rb::connect(None).context("Failed to connect to the X server")?;
        let screen = conn
            .setup()
            .roots
            .get(screen_num)
            .with_context(|| format!("X server has no screen {screen_num}"))?;
        let reply = conn
            .randr_get_monitors(screen.root, true)
            .context("Failed to send RandR GetMonitors request")?
            .reply()
            .context("Failed to get RandR monitor list")?;

        let mut displays = Vec::with_capacity(reply.monitors.len());
        for monitor in &reply.monitors {
            let name = conn
                .get_atom_name(monitor.name)
                .ok()
                .and_then(|cookie| cookie.reply().ok())
                .map(|r| String::from_utf8_lossy(&r.name).to_string())
                .unwrap_or_default();
            let rect = Rect::new(
                monitor.x.into(),
                monitor.y.into(),
                monitor.width.into(),
                monitor.height.into(),
            );
            debug!(name = %name, primary = monitor.primary, ?rect, "RandR monitor");
            displays.push(rect);
        }
        info!(count = displays.len(), "Probed physical displays");
        Ok(displays)
    }
}

/// Fixed layout, for headless runs and tests
#[derive(Debug, Clone, Default)]
pub struct StaticDisplays(pub Vec<Rect>);

impl DisplayProbe for StaticDisplays {
    fn displays(&self) -> Result<Vec<Rect>> {
        Ok(self.0.clone())
    }
}
