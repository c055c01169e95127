//! Host facts and configuration profile resolution for Stratum.
//!
//! This crate turns observed host facts (CPU architecture, platform version)
//! plus two caller-supplied parameters (product version, instance name) into
//! an immutable [`Profile`] — the single input everything downstream consumes.
//! Resolution is a pure function: the same inputs always produce the same
//! profile, and no state leaks between resolutions.

pub mod facts;
pub mod profile;
pub mod version;

pub use facts::HostFacts;
pub use profile::{resolve, Channel, Profile};
pub use version::ProductVersion;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("unsupported CPU architecture: '{0}' (expected x86_64 or i686)")]
    UnsupportedArchitecture(String),
    #[error("unsupported platform version: '{0}' (expected EL 5, 6, or 7)")]
    UnsupportedPlatform(String),
    #[error("malformed product version: '{0}'")]
    InvalidVersion(String),
    #[error("failed to read facts file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse facts file: {0}")]
    ParseToml(#[from] toml::de::Error),
}
