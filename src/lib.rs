//! Hardware wallet loader library
//!
//! Sequences hardware wallet discovery, setup, PIN unlock, and extended
//! public key retrieval into loaded watch-only wallet records.

pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod keys;
pub mod load;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
