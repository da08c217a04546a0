#![forbid(unsafe_code)]

mod constants;
mod display;
mod geometry;
mod install;
mod iris;
mod monitor_config;
mod ready_check;
mod scene;
mod settings;
mod shadow;
mod status;
mod types;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{Level as TraceLevel, info, warn};
use tracing_subscriber::FmtSubscriber;

use display::{DisplayProbe, StaticDisplays, X11DisplayProbe};
use geometry::GeometryCoordinator;
use install::{InstallationLocations, PatchApplications, PatchRoots, write_atomic};
use iris::{IrisPacker, IrisRole};
use monitor_config::MonitorSetupGenerator;
use ready_check::ReadyCheck;
use scene::{Scene, SceneDescription};
use settings::{JsonSettings, SharedSettings};
use shadow::monitor::Role;
use status::{InstallationResult, LoggingCallbacks, StatusFlags};
use types::{Rect, Resolution};

#[derive(Debug, Parser)]
#[command(version, about = "Derive, install and verify simulator monitor setups")]
struct Cli {
    /// Settings document (default: platform config dir)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Scene layout document (default: next to the settings)
    #[arg(long, global = true)]
    layout: Option<PathBuf>,

    /// Name the simulator lists the monitor setup under
    #[arg(long, global = true)]
    name: Option<String>,

    /// Physical displays as WxH+X+Y instead of asking the X server
    #[arg(long = "display", global = true, value_parser = parse_geometry)]
    displays: Vec<Rect>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the monitor setup, or write it to a file
    Generate {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Write the monitor setup into every enabled installation
    Install,
    /// Run the ready check
    Check {
        /// Include informational findings
        #[arg(long, short)]
        verbose: bool,
    },
    /// Export viewports for remote rendering
    Pack {
        #[arg(long, value_enum)]
        role: IrisRole,
        #[arg(long, default_value_t = constants::iris::DEFAULT_BASE_PORT)]
        base_port: u16,
        #[arg(long, default_value_t = constants::iris::DEFAULT_CAPACITY)]
        capacity: usize,
        /// Client canvas as WxH
        #[arg(long, value_parser = parse_size)]
        canvas: Option<Resolution>,
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },
    /// Manage the scene layout
    #[command(subcommand)]
    Layout(LayoutCommand),
    /// Inspect or change monitor roles
    #[command(subcommand)]
    Roles(RolesCommand),
    /// Manage installation locations
    #[command(subcommand)]
    Locations(LocationsCommand),
    /// Install, revert or silence patches
    #[command(subcommand)]
    Patches(PatchesCommand),
    /// Print the physical displays
    Displays,
}

#[derive(Debug, Subcommand)]
enum LayoutCommand {
    /// Replace the layout with one empty monitor per physical display
    Reset,
    /// Print the layout document
    Show,
}

#[derive(Debug, Subcommand)]
enum RolesCommand {
    List,
    Set {
        /// Monitor key as shown by `roles list`
        key: String,
        #[arg(value_enum)]
        role: Role,
        #[arg(action = clap::ArgAction::Set)]
        value: bool,
    },
}

#[derive(Debug, Subcommand)]
enum LocationsCommand {
    List,
    Add { path: PathBuf },
    Remove { path: PathBuf },
    Enable { path: PathBuf },
    Disable { path: PathBuf },
}

#[derive(Debug, Subcommand)]
enum PatchesCommand {
    Install,
    Revert,
    /// Stop reporting missing patches for a location
    Exclude { path: PathBuf },
    /// Report missing patches for a location again
    Include { path: PathBuf },
}

/// Parse X geometry `WxH+X+Y` (offsets may be negative)
fn parse_geometry(text: &str) -> Result<Rect, String> {
    let error = || format!("expected WxH+X+Y, got '{text}'");
    let split = text.find(['+', '-']).ok_or_else(error)?;
    let size = parse_size(&text[..split])?;
    let offsets = &text[split..];
    let second = offsets[1..].find(['+', '-']).map(|i| i + 1).ok_or_else(error)?;
    let x: i32 = offsets[..second].parse().map_err(|_| error())?;
    let y: i32 = offsets[second..].parse().map_err(|_| error())?;
    Ok(Rect::new(x, y, size.width, size.height))
}

fn parse_size(text: &str) -> Result<Resolution, String> {
    let error = || format!("expected WxH, got '{text}'");
    let (width, height) = text.split_once('x').ok_or_else(error)?;
    Ok(Resolution::new(
        width.parse().map_err(|_| error())?,
        height.parse().map_err(|_| error())?,
    ))
}

fn init_tracing() -> Result<()> {
    let log_level = match std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    // stdout carries command output
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Scene, coordinator and physical layout for one invocation
struct Session {
    scene: Scene,
    coordinator: GeometryCoordinator,
    displays: Vec<Rect>,
}

impl Session {
    fn open(cli: &Cli, settings: &SharedSettings) -> Result<Self> {
        let displays = physical_displays(cli)?;
        let layout_path = layout_path(cli);
        let mut scene = if layout_path.exists() {
            Scene::from_description(&SceneDescription::load(&layout_path)?)?
        } else {
            info!(path = %layout_path.display(), "No saved layout, using the physical displays");
            let mut scene = Scene::new();
            scene.reset_layout(&displays);
            scene
        };
        let mut coordinator = GeometryCoordinator::new(settings.clone());
        coordinator.sync(&mut scene, Instant::now());
        settle(&mut coordinator);
        Ok(Self {
            scene,
            coordinator,
            displays,
        })
    }

    fn generator(&self, cli: &Cli) -> MonitorSetupGenerator {
        MonitorSetupGenerator::new(cli.name.clone(), self.displays.clone())
    }
}

/// Let the recompute debounce run out before reading derived geometry
fn settle(coordinator: &mut GeometryCoordinator) {
    while let Some(deadline) = coordinator.pending_deadline() {
        std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
        coordinator.poll(Instant::now());
    }
}

fn physical_displays(cli: &Cli) -> Result<Vec<Rect>> {
    if cli.displays.is_empty() {
        X11DisplayProbe.displays()
    } else {
        StaticDisplays(cli.displays.clone()).displays()
    }
}

fn layout_path(cli: &Cli) -> PathBuf {
    cli.layout.clone().unwrap_or_else(|| {
        JsonSettings::default_path().with_file_name(constants::settings::LAYOUT_FILENAME)
    })
}

fn save_layout(scene: &Scene, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create layout directory {}", parent.display()))?;
    }
    scene.to_description().save(path)?;
    info!(path = %path.display(), "Saved layout");
    Ok(())
}

fn finish(result: InstallationResult, what: &str) -> Result<()> {
    match result {
        InstallationResult::Success => Ok(()),
        InstallationResult::Cancelled => {
            warn!("{what} cancelled");
            Ok(())
        }
        InstallationResult::Fatal => bail!("{what} failed"),
    }
}

fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let settings_path = cli.settings.clone().unwrap_or_else(JsonSettings::default_path);
    let settings = JsonSettings::shared(&settings_path)?;
    info!(path = %settings_path.display(), "Using settings");

    match &cli.command {
        Command::Generate { output } => {
            let session = Session::open(&cli, &settings)?;
            let text = session.generator(&cli).generate(&session.coordinator)?;
            match output {
                Some(path) => write_atomic(path, &text)?,
                None => print!("{text}"),
            }
        }
        Command::Install => {
            let session = Session::open(&cli, &settings)?;
            let locations = InstallationLocations::load(settings.clone());
            let result = session
                .generator(&cli)
                .install(&session.coordinator, &locations, &mut LoggingCallbacks);
            finish(result, "Monitor setup install")?;
        }
        Command::Check { verbose } => {
            let session = Session::open(&cli, &settings)?;
            let locations = InstallationLocations::load(settings.clone());
            let patches = PatchApplications::resolve(&locations, &PatchRoots::default_roots(), settings.clone())?;
            let generator = session.generator(&cli);
            let report = ReadyCheck {
                scene: &session.scene,
                coordinator: &session.coordinator,
                locations: &locations,
                generator: &generator,
                patches: &patches,
            }
            .run();
            for item in &report {
                if *verbose || !item.flags.contains(StatusFlags::VERBOSE) {
                    println!("{item}");
                }
            }
            if !ReadyCheck::is_ready(&report) {
                bail!("Ready check found problems");
            }
        }
        Command::Pack {
            role,
            base_port,
            capacity,
            canvas,
            output,
        } => {
            let session = Session::open(&cli, &settings)?;
            let mut packer = IrisPacker::default()
                .with_base_port(*base_port)
                .with_capacity(*capacity);
            if let Some(canvas) = canvas {
                packer = packer.with_canvas(*canvas);
            }
            let export = packer.export(
                &session.coordinator.viewports(),
                session.coordinator.resolution(),
                *role,
            );
            for item in &export.diagnostics {
                println!("{item}");
            }
            for path in export.write(output)? {
                println!("{}", path.display());
            }
        }
        Command::Layout(command) => {
            let path = layout_path(&cli);
            match command {
                LayoutCommand::Reset => {
                    let mut scene = Scene::new();
                    scene.reset_layout(&physical_displays(&cli)?);
                    save_layout(&scene, &path)?;
                }
                LayoutCommand::Show => {
                    let session = Session::open(&cli, &settings)?;
                    println!("{}", serde_json::to_string_pretty(&session.scene.to_description())?);
                }
            }
        }
        Command::Roles(command) => {
            let mut session = Session::open(&cli, &settings)?;
            if let RolesCommand::Set { key, role, value } = command {
                session.coordinator.set_role(key, *role, *value, Instant::now())?;
                settle(&mut session.coordinator);
            }
            let coordinator = &session.coordinator;
            println!(
                "offset {:+} {:+}, resolution {}x{}",
                coordinator.global_offset().dx,
                coordinator.global_offset().dy,
                coordinator.resolution().width,
                coordinator.resolution().height
            );
            for monitor in coordinator.monitors() {
                let roles = monitor.roles();
                println!(
                    "{:<24} {:<12} included={} main={} ui={} viewports={}",
                    monitor.key(),
                    monitor.name(),
                    roles.included,
                    roles.main,
                    roles.user_interface,
                    monitor.viewport_count()
                );
            }
        }
        Command::Locations(command) => {
            let mut locations = InstallationLocations::load(settings.clone());
            match command {
                LocationsCommand::List => {}
                LocationsCommand::Add { path } => {
                    locations.add(path)?;
                }
                LocationsCommand::Remove { path } => {
                    if !locations.remove(path) {
                        bail!("{} is not a registered installation location", path.display());
                    }
                }
                LocationsCommand::Enable { path } => {
                    locations.set_enabled(path, true)?;
                }
                LocationsCommand::Disable { path } => {
                    locations.set_enabled(path, false)?;
                }
            }
            for location in locations.iter() {
                println!(
                    "{} {} {}",
                    if location.is_enabled() { "[x]" } else { "[ ]" },
                    location.version(),
                    location.path().display()
                );
            }
            for unavailable in locations.unavailable() {
                println!("[?] unavailable {} ({})", unavailable.path().display(), unavailable.reason());
            }
        }
        Command::Patches(command) => {
            let locations = InstallationLocations::load(settings.clone());
            let patches = PatchApplications::resolve(&locations, &PatchRoots::default_roots(), settings.clone())?;
            match command {
                PatchesCommand::Install => finish(patches.install(&mut LoggingCallbacks), "Patch install")?,
                PatchesCommand::Revert => finish(patches.revert(&mut LoggingCallbacks), "Patch revert")?,
                PatchesCommand::Exclude { path } => patches.set_excluded(path, true),
                PatchesCommand::Include { path } => patches.set_excluded(path, false),
            }
            for application in patches.applications() {
                println!(
                    "{} installed {} patches {}",
                    application.location().display(),
                    application.installed_version(),
                    application.selected_version().unwrap_or("none")
                );
            }
        }
        Command::Displays => {
            for rect in physical_displays(&cli)? {
                println!("{}x{}{:+}{:+}", rect.width, rect.height, rect.x, rect.y);
            }
        }
    }
    Ok(())
}
