//! Colour-triggered sorting pipeline: capture → segment → qualify → actuate,
//! with a background poller keeping the active colour range in sync with a
//! remote config store.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `pipeline`: Orchestrates the capture → detect → actuate loop.
//! - `preview`: Optional live preview window.
//! - `remote`: Config store client and payload validation.
//! - `sync`: Background polling task publishing colour updates.
//! - `telemetry`: Tracing and metrics runtime helpers.

/// Re-export pipeline settings so callers can configure runs without reaching
/// into submodules.
pub use config::{RemoteOptions, SorterCliArgs, SorterConfig};
/// Launch the sorting pipeline with a ready-made configuration.
pub use pipeline::run;

mod config;
mod pipeline;
mod preview;
mod remote;
mod sync;
mod telemetry;
