// src/syspkg.rs

//! Host system package resolution
//!
//! Queried as a last resort when neither a co-built package nor a package
//! already installed in the prefix can satisfy an import.

use std::collections::BTreeMap;
use std::process::Command;
use tracing::debug;

/// Interface to the host system's native package index
pub trait SyspkgResolver: Send + Sync {
    /// Name of the native package providing `unit`, if any
    fn find_sysdep(&self, unit: &str) -> Option<String>;
}

/// Resolver for Debian-flavoured hosts: a python unit `foo` is provided by
/// the native package `python3-foo` when dpkg knows it.
#[derive(Debug, Default)]
pub struct DebianSyspkgResolver;

impl SyspkgResolver for DebianSyspkgResolver {
    fn find_sysdep(&self, unit: &str) -> Option<String> {
        let pkgname = format!("python3-{}", unit.to_lowercase());
        let status = Command::new("dpkg-query")
            .args(["-W", "-f=${Package}", &pkgname])
            .output()
            .ok()?
            .status;

        if status.success() {
            debug!("{} satisfied by system package {}", unit, pkgname);
            Some(pkgname)
        } else {
            None
        }
    }
}

/// Fixed-table resolver, used in tests and on hosts without a supported
/// native package manager
#[derive(Debug, Default)]
pub struct StaticSyspkgResolver {
    table: BTreeMap<String, String>,
}

impl StaticSyspkgResolver {
    pub fn new(table: BTreeMap<String, String>) -> Self {
        Self { table }
    }
}

impl SyspkgResolver for StaticSyspkgResolver {
    fn find_sysdep(&self, unit: &str) -> Option<String> {
        self.table.get(unit).cloned()
    }
}
