//! Application-wide constants
//!
//! This module contains the magic numbers and string literals used throughout
//! the application, providing a single source of truth for constant values.

/// Settings store layout
pub mod settings {
    /// Directory under the platform config dir
    pub const APP_DIR: &str = "monitor-setup";

    /// Settings document filename
    pub const FILENAME: &str = "settings.json";

    /// Default scene layout document, next to the settings
    pub const LAYOUT_FILENAME: &str = "layout.json";

    /// Group holding per-monitor role flags, keyed by geometry fingerprint
    pub const MONITORS_GROUP: &str = "Monitors";

    /// Group holding registered installation roots and their enabled flags
    pub const LOCATIONS_GROUP: &str = "InstallationLocations";

    /// Group holding patch sets the user has chosen not to be warned about
    pub const PATCH_EXCLUSIONS_GROUP: &str = "PatchExclusions";

    /// Key suffix for the Main role flag
    pub const MAIN_SUFFIX: &str = "_Main";

    /// Key suffix for the UserInterface role flag
    pub const USER_INTERFACE_SUFFIX: &str = "_UserInterface";
}

/// Monitor role defaults for keys that have never been persisted
pub mod roles {
    pub const DEFAULT_INCLUDED: bool = true;
    pub const DEFAULT_MAIN: bool = false;
    pub const DEFAULT_USER_INTERFACE: bool = false;
}

/// Geometry recompute scheduling
pub mod geometry {
    /// Quiet period after the last qualifying event before recomputing
    pub const DEBOUNCE_MS: u64 = 100;
}

/// Generated monitor setup artifact
pub mod monitor_setup {
    /// Path of the artifact directory relative to an installation root
    pub const RELATIVE_DIR: &str = "Config/MonitorSetup";

    /// Artifact file extension
    pub const EXTENSION: &str = "lua";

    /// Label of the primary view in the generated file
    pub const PRIMARY_VIEW: &str = "Center";

    /// Label of the separate user interface view
    pub const UI_VIEW: &str = "UIMainView";
}

/// Installation location metadata
pub mod location {
    /// Metadata file, relative to the installation root, carrying the product version
    pub const METADATA_FILE: &str = "autoupdate.cfg";

    /// Settings key holding the newline separated list of registered roots
    pub const PATHS_KEY: &str = "Paths";
}

/// Patch storage and version ordering
pub mod patches {
    /// Directory under the platform data dir holding user override patch sets
    pub const USER_DIR: &str = "monitor-setup/Patches";

    /// Bundled patch sets shipped next to the executable
    pub const BUNDLED_DIR: &str = "Patches";

    /// Extension of one patch definition file
    pub const DEFINITION_EXTENSION: &str = "json";

    /// Allowed number of dotted version components
    pub const MIN_VERSION_COMPONENTS: usize = 3;
    pub const MAX_VERSION_COMPONENTS: usize = 5;

    /// Width each component is zero-padded to in the sortable key
    pub const VERSION_COMPONENT_WIDTH: usize = 10;
}

/// Remote viewport export defaults
pub mod iris {
    /// First port handed out to an exported viewport
    pub const DEFAULT_BASE_PORT: u16 = 9000;

    /// Synthetic client canvas
    pub const DEFAULT_CANVAS_WIDTH: u32 = 1920;
    pub const DEFAULT_CANVAS_HEIGHT: u32 = 1080;

    /// Maximum number of viewports one export may carry
    pub const DEFAULT_CAPACITY: usize = 20;

    /// Output documents written by `pack`
    pub const ENDPOINTS_FILE: &str = "iris-endpoints.json";
    pub const PROFILE_FILE: &str = "iris-client-profile.json";
}
