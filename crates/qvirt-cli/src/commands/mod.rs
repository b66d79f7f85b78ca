//! CLI command implementations.

pub mod common;
pub mod devices;
pub mod run;
pub mod version;
