//! Shared process-level helpers for the vkmux crates.

pub mod logging;
pub mod platform;
