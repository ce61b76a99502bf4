//! Error types for the TRS-80 emulation core.
//!
//! These only surface at the API edges (configuration, ROM loading, image
//! tooling). The memory decoder and the hard disk controller never return
//! errors to the CPU; they report through registers and the log instead.

use thiserror::Error;

/// Errors that can occur while setting up or tooling the emulator.
#[derive(Error, Debug)]
pub enum TrsError {
    #[error("Unrecognized hard disk image: {0}")]
    BadImage(String),

    #[error("Unusable geometry: {sectors} sectors per cylinder")]
    BadGeometry { sectors: u16 },

    #[error("ROM image too large: {size} bytes (max {max})")]
    RomTooLarge { size: usize, max: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for TRS-80 core operations.
pub type TrsResult<T> = Result<T, TrsError>;
