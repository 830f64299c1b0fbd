//! Shared error type for the tapedeck crates
//!
//! Only the concerns the common crate itself owns live here: configuration
//! resolution and input parsing (timecodes). Pipeline-side failures carry
//! their own per-module enums in the application crate.

use thiserror::Error;

/// Common result type for tapedeck operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input, e.g. an unparseable timecode
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
