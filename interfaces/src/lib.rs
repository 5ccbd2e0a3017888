//! I/O Interfaces Library
//!
//! This crate owns the collaborators at the edge of the baseband core: the
//! UDP sample transport feeding RX packets to the master and draining TX
//! events, and the optional MAC-layer thread.

pub mod mac;
pub mod txrx;

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Socket error: {0}")]
    SocketError(#[from] std::io::Error),

    #[error("Invalid packet format")]
    InvalidPacket,

    #[error("Interface not initialized")]
    NotInitialized,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Initialization failed: {0}")]
    InitializationFailed(String),
}
