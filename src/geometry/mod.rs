//! Canvas geometry derived from the shadowed scene

pub mod coordinator;
pub mod debounce;

pub use coordinator::GeometryCoordinator;
