//! Kiln Core - Foundational Types
//!
//! Configuration and error types shared by the Kiln storage layer and
//! its command-line tooling.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{CleanupConfig, KilnConfig, LogLevel, StorageConfig};
pub use error::{KilnError, Result};

/// Kiln version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
