// src/package_info.rs

//! In-progress binary package descriptors
//!
//! A [`PackageInfo`] is a package under construction: the staged files
//! assigned to it, its dependency maps, and the per-namespace provide
//! registries that hooks fill in. [`DispatchData`] is the transient exchange
//! object for one dispatch pass, moving files from the unassigned pool into
//! named packages.

use crate::provide::ProvideList;
use crate::version::Version;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// A binary package being assembled during one build run
#[derive(Debug, Clone)]
pub struct PackageInfo {
    pub name: String,
    pub version: Version,
    /// Originating source package
    pub source: String,
    pub arch: String,
    pub description: String,
    /// Metadata-only package with no payload; dependency computation is
    /// skipped for it
    pub ghost: bool,
    /// Installed file paths relative to the staging root
    pub files: BTreeSet<PathBuf>,
    /// Per-namespace provide registries populated by hooks
    pub provides: BTreeMap<String, ProvideList>,
    depends: BTreeMap<String, Version>,
    sysdepends: BTreeMap<String, Option<Version>>,
}

impl PackageInfo {
    pub fn new(name: &str, version: Version, source: &str, arch: &str) -> Self {
        Self {
            name: name.to_string(),
            version,
            source: source.to_string(),
            arch: arch.to_string(),
            description: String::new(),
            ghost: false,
            files: BTreeSet::new(),
            provides: BTreeMap::new(),
            depends: BTreeMap::new(),
            sysdepends: BTreeMap::new(),
        }
    }

    /// Add a dependency on another mmpack package with a minimal version.
    /// Repeated additions only ever raise the recorded floor.
    pub fn add_to_deplist(&mut self, name: &str, min_version: Version) {
        match self.depends.entry(name.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(min_version);
            }
            Entry::Occupied(mut entry) => {
                if *entry.get() < min_version {
                    entry.insert(min_version);
                }
            }
        }
    }

    /// Add a dependency satisfied by the host system package manager
    pub fn add_sysdep(&mut self, name: &str, min_version: Option<Version>) {
        match self.sysdepends.entry(name.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(min_version);
            }
            Entry::Occupied(mut entry) => {
                if let Some(version) = min_version {
                    match entry.get() {
                        Some(existing) if *existing >= version => {}
                        _ => {
                            entry.insert(Some(version));
                        }
                    }
                }
            }
        }
    }

    pub fn depends(&self) -> &BTreeMap<String, Version> {
        &self.depends
    }

    pub fn sysdepends(&self) -> &BTreeMap<String, Option<Version>> {
        &self.sysdepends
    }
}

/// Exchange object for one dispatch pass over the staged files
#[derive(Debug)]
pub struct DispatchData<'a> {
    /// Files not yet claimed by any package
    pub unassigned_files: BTreeSet<PathBuf>,
    packages: &'a mut BTreeMap<String, PackageInfo>,
    source: String,
    version: Version,
    arch: String,
}

impl<'a> DispatchData<'a> {
    pub fn new(
        unassigned_files: BTreeSet<PathBuf>,
        packages: &'a mut BTreeMap<String, PackageInfo>,
        source: &str,
        version: Version,
        arch: &str,
    ) -> Self {
        Self {
            unassigned_files,
            packages,
            source: source.to_string(),
            version,
            arch: arch.to_string(),
        }
    }

    /// Create-or-fetch the named package, claim `files` for it and return it
    /// so the caller can further annotate it (e.g. set a description).
    pub fn assign_to_pkg(
        &mut self,
        name: &str,
        files: impl IntoIterator<Item = PathBuf>,
    ) -> &mut PackageInfo {
        let source = self.source.clone();
        let version = self.version.clone();
        let arch = self.arch.clone();
        let pkg = self
            .packages
            .entry(name.to_string())
            .or_insert_with(|| PackageInfo::new(name, version, &source, &arch));

        for file in files {
            self.unassigned_files.remove(&file);
            pkg.files.insert(file);
        }
        pkg
    }
}
