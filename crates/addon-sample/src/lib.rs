//! # Addon Sample
//!
//! An in-process Core and two addons wired through it. This library exposes the modules of the
//! demo application for integration testing.

pub mod cpu_addon;
pub mod error;
pub mod events_addon;
pub mod lifecycle;
pub mod model;

pub use error::SampleError;
pub use lifecycle::CoreSystem;
