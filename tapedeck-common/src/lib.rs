//! # Tapedeck Common Library
//!
//! Shared code for the tapedeck pipeline:
//! - Common error type
//! - Timecode parsing and formatting
//! - Configuration loading (ENV → TOML resolution)

pub mod config;
pub mod error;
pub mod timecode;

pub use error::{Error, Result};
pub use timecode::Timecode;
