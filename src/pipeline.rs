// src/pipeline.rs

//! Packaging pipeline
//!
//! Drives one build run over a staged install tree: normalize the tree,
//! dispatch files into packages, compute provides for every package, then
//! dependencies, then assemble the archives. The phases are strictly
//! ordered: a sibling's provide table must be complete before it can
//! satisfy another sibling's import. Per-package archive assembly is
//! independent and runs in parallel.

use crate::archive;
use crate::error::Result;
use crate::hooks::{BuildHook, ProvideSpecs, ResolveContext, SiblingProvides};
use crate::package_info::{DispatchData, PackageInfo};
use crate::version::Version;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// One packaging run over `build_dir/install`
pub struct BuildPipeline {
    build_dir: PathBuf,
    source: String,
    version: Version,
    arch: String,
    description: String,
    hooks: Vec<Box<dyn BuildHook>>,
    ctx: ResolveContext,
    specs: ProvideSpecs,
}

impl BuildPipeline {
    pub fn new(
        build_dir: &Path,
        source: &str,
        version: Version,
        arch: &str,
        description: &str,
        hooks: Vec<Box<dyn BuildHook>>,
        ctx: ResolveContext,
    ) -> Self {
        Self {
            build_dir: build_dir.to_path_buf(),
            source: source.to_string(),
            version,
            arch: arch.to_string(),
            description: description.to_string(),
            hooks,
            ctx,
            specs: ProvideSpecs::default(),
        }
    }

    /// Attach hand-authored provide overrides, keyed by namespace
    pub fn with_specs(mut self, specs: ProvideSpecs) -> Self {
        self.specs = specs;
        self
    }

    /// Run all phases and return the paths of the produced archives.
    ///
    /// A fatal error aborts the run; archives already written for earlier
    /// packages are left in place.
    pub fn run(&self, dest_dir: &Path) -> Result<Vec<PathBuf>> {
        let staging = self.build_dir.join("install");

        // Normalization must happen before any file is classified
        for hook in &self.hooks {
            hook.post_local_install(&staging)?;
        }

        let mut packages = self.dispatch(&staging)?;
        info!("dispatched into {} package(s)", packages.len());

        // Every package's provides must be final before any depends run
        let empty = BTreeMap::new();
        for pkg in packages.values_mut() {
            for hook in &self.hooks {
                let specs = self.specs.get(hook.namespace()).unwrap_or(&empty);
                hook.update_provides(&staging, pkg, specs)?;
                hook.store_provides(pkg, dest_dir)?;
            }
        }

        let siblings = SiblingProvides::snapshot(&packages);
        for pkg in packages.values_mut() {
            for hook in &self.hooks {
                hook.update_depends(&staging, pkg, &siblings, &self.ctx)?;
            }
        }

        let build_dir = self.build_dir.as_path();
        let finalized: Vec<&PackageInfo> = packages.values().collect();
        finalized
            .par_iter()
            .map(|pkg| archive::create(pkg, dest_dir, build_dir))
            .collect()
    }

    /// Classify staged files into packages: every hook in registry order,
    /// then a catch-all package named after the source for whatever no
    /// ecosystem claimed.
    fn dispatch(&self, staging: &Path) -> Result<BTreeMap<String, PackageInfo>> {
        let mut packages = BTreeMap::new();
        let mut data = DispatchData::new(
            list_files(staging)?,
            &mut packages,
            &self.source,
            self.version.clone(),
            &self.arch,
        );

        for hook in &self.hooks {
            hook.dispatch(&mut data)?;
        }

        let leftovers = std::mem::take(&mut data.unassigned_files);
        if !leftovers.is_empty() {
            debug!("{} file(s) fall back to the main package", leftovers.len());
            let source = self.source.clone();
            let pkg = data.assign_to_pkg(&source, leftovers);
            if pkg.description.is_empty() {
                pkg.description = self.description.clone();
            }
        }
        Ok(packages)
    }
}

/// All files and symlinks under `staging`, as staging-relative paths
fn list_files(staging: &Path) -> Result<BTreeSet<PathBuf>> {
    let mut files = BTreeSet::new();
    if !staging.is_dir() {
        return Ok(files);
    }
    for entry in WalkDir::new(staging).min_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(staging)
            .expect("walked entry is under the staging root");
        files.insert(rel.to_path_buf());
    }
    Ok(files)
}
