//! Payloads exchanged by the sample addons.

pub mod alarm;
pub mod usage;

pub use alarm::*;
pub use usage::*;
