//! Baseband Processing Core
//!
//! This crate implements the Halcyon base station's frame-parallel PHY
//! pipeline: the master scheduler and its completion state machine, the
//! core-pinned worker pool, the stage kernels, and the sliding-window
//! buffer pools.

pub mod buffers;
pub mod config;
pub mod counters;
pub mod ffi;
pub mod frame;
pub mod kernels;
pub mod master;
pub mod queues;
pub mod station;
pub mod stats;
pub mod worker;

use thiserror::Error;

// Re-export the assembly surface
pub use config::StationConfig;
pub use frame::{FrameSchedule, SymbolKind};
pub use master::Master;
pub use station::Station;

/// Errors of the baseband core
#[derive(Error, Debug)]
pub enum PhyError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Processing error: {0}")]
    ProcessingError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
