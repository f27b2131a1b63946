// src/lib.rs

//! mmpack-build
//!
//! Binary package builder that computes inter-package and system
//! dependencies from the symbols installed files actually provide or
//! consume, rather than from hand-declared metadata.
//!
//! # Architecture
//!
//! - Provide registry: per-namespace symbol -> introducing-version tables
//!   with a symbol/version dependency-generation algorithm
//! - Hooks: ecosystem plugins classify staged files, extract provided and
//!   used symbols, and resolve imports against siblings, the prefix and the
//!   host system
//! - Reproducible archives: normalized tar+xz output, identical inputs
//!   yield byte-identical packages

pub mod analyzer;
pub mod archive;
mod error;
pub mod hooks;
pub mod package_info;
pub mod pipeline;
pub mod provide;
pub mod syspkg;
pub mod version;
pub mod workspace;

pub use error::{Error, Result};
