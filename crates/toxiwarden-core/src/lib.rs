//! toxiwarden core - platform-independent abstractions and configuration
//!
//! This crate provides the configuration, error types, toxiproxy data model
//! and the traits (process launching, health probing, proxy fetching) that
//! the platform-specific and runtime crates build on.

pub mod config;
pub mod error;
pub mod model;
pub mod probe;
pub mod process;
pub mod stdio;

pub use config::*;
pub use error::*;
pub use model::*;
pub use probe::*;
pub use process::*;
pub use stdio::{OutputKind, forward_output};
