// src/hooks/mod.rs

//! Ecosystem hook protocol
//!
//! Each packaging ecosystem (python modules, shared libraries, ...) plugs
//! into the build through a [`BuildHook`]: it claims staged files during
//! dispatch, extracts what the resulting packages provide, and computes what
//! they depend on. Hooks are registered in a fixed order and consulted by
//! the pipeline; there is no dynamic loading.

pub mod python;

use crate::analyzer::SymbolAnalyzer;
use crate::error::Result;
use crate::package_info::{DispatchData, PackageInfo};
use crate::provide::{self, ProvideList, ProvideSpec};
use crate::syspkg::SyspkgResolver;
use crate::version::Version;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Hand-authored provide overrides, keyed by namespace then unit name
pub type ProvideSpecs = BTreeMap<String, BTreeMap<String, ProvideSpec>>;

/// One ecosystem plugin
pub trait BuildHook {
    /// Namespace this hook manages (e.g. "python")
    fn namespace(&self) -> &'static str;

    /// Normalize the staging tree before dispatch. Must fail loudly when a
    /// relocation would overwrite a file with different content.
    fn post_local_install(&self, _staging: &Path) -> Result<()> {
        Ok(())
    }

    /// Claim unassigned files recognized by this ecosystem. Files that are
    /// not members are left untouched for other hooks or the catch-all.
    fn dispatch(&self, data: &mut DispatchData) -> Result<()>;

    /// Populate `pkg.provides[namespace]` from static analysis of the
    /// package's files, then merge in the hand-authored overrides.
    fn update_provides(
        &self,
        staging: &Path,
        pkg: &mut PackageInfo,
        specs: &BTreeMap<String, ProvideSpec>,
    ) -> Result<()>;

    /// Persist `pkg.provides[namespace]` under `folder` using the
    /// namespace's side-file convention.
    fn store_provides(&self, pkg: &PackageInfo, folder: &Path) -> Result<()>;

    /// Compute the package's dependencies from the symbols its files
    /// reference, resolving against co-built siblings, the prefix provide
    /// cache, then the host system. Skipped for ghost packages.
    fn update_depends(
        &self,
        staging: &Path,
        pkg: &mut PackageInfo,
        siblings: &[SiblingProvides],
        ctx: &ResolveContext,
    ) -> Result<()>;
}

/// Immutable view of a co-built package's provide tables, snapshotted once
/// all packages' provides are final
#[derive(Debug, Clone)]
pub struct SiblingProvides {
    pub name: String,
    pub version: Version,
    pub provides: BTreeMap<String, ProvideList>,
}

impl SiblingProvides {
    pub fn snapshot(packages: &BTreeMap<String, PackageInfo>) -> Vec<SiblingProvides> {
        packages
            .values()
            .map(|pkg| SiblingProvides {
                name: pkg.name.clone(),
                version: pkg.version.clone(),
                provides: pkg.provides.clone(),
            })
            .collect()
    }
}

/// Per-run resolution context: the prefix metadata location, the host
/// package resolver, and the memoized "what does the prefix already
/// provide" lookups shared by every package processed in the run.
pub struct ResolveContext {
    metadata_dir: PathBuf,
    syspkg: Box<dyn SyspkgResolver>,
    cache: Mutex<BTreeMap<String, Arc<ProvideList>>>,
}

impl ResolveContext {
    pub fn new(metadata_dir: &Path, syspkg: Box<dyn SyspkgResolver>) -> Self {
        Self {
            metadata_dir: metadata_dir.to_path_buf(),
            syspkg,
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    /// Merged provide lists of every package already present in the prefix,
    /// for one namespace. Parsing all side files is done once per run; the
    /// result is shared read-only afterwards.
    pub fn prefix_provides(&self, namespace: &str, extension: &str) -> Result<Arc<ProvideList>> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = cache.get(namespace) {
            return Ok(Arc::clone(list));
        }

        let list = Arc::new(provide::load_provides(
            &self.metadata_dir,
            extension,
            namespace,
        )?);
        cache.insert(namespace.to_string(), Arc::clone(&list));
        Ok(list)
    }

    pub fn find_sysdep(&self, unit: &str) -> Option<String> {
        self.syspkg.find_sysdep(unit)
    }
}

/// The hooks shipped with the tool, in dispatch order
pub fn default_hooks(
    src_description: &str,
    analyzer: Box<dyn SymbolAnalyzer>,
) -> Vec<Box<dyn BuildHook>> {
    vec![Box::new(python::PythonHook::new(src_description, analyzer))]
}
