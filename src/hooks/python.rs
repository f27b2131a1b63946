// src/hooks/python.rs

//! Python ecosystem hook
//!
//! Tracks the python3 modules a build installs and the modules its scripts
//! import. Installed files are recognized by the site-packages path
//! convention, grouped into importable units, and fed to the out-of-process
//! python analyzers for symbol extraction.

use crate::analyzer::SymbolAnalyzer;
use crate::error::{Error, Result};
use crate::hooks::{BuildHook, ResolveContext, SiblingProvides};
use crate::package_info::{DispatchData, PackageInfo};
use crate::provide::{Provide, ProvideList, ProvideSpec};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Namespace and side-file extension of this ecosystem
const NAMESPACE: &str = "python";
const EXTENSION: &str = "pyobjects";

/// Location relative to the prefix where public python packages land after
/// normalization
const PY_SITEDIR: &str = "lib/python3/site-packages";

// Path convention for public python3 packages. Examples:
//   lib/python3.6/site-packages/foo.so        -> (lib/python3.6/site-packages, foo, .so)
//   usr/lib/python3/dist-packages/_foo.so     -> (usr/lib/python3/dist-packages, foo, .so)
//   lib/python3/site-packages/foo/__init__.py -> (lib/python3/site-packages, foo, "")
//   lib/python3/site-packages/Foo-1.2.egg-info/x.so
//                                             -> (lib/python3/site-packages, Foo, -1.2.egg-info)
//   lib/python2/site-packages/foo.so          -> no match
static PKG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"((?:usr/|mingw64/)?lib/python3(?:\.\d+)?/(?:dist|site)-packages)/_?(\w+)([^/]*)",
    )
    .expect("python site-packages regex is valid")
});

/// Classification of one installed path within the python convention
#[derive(Debug, Clone, PartialEq, Eq)]
struct PyName {
    name: String,
    sitedir: String,
    is_egginfo: bool,
}

/// Match an installed path against the python3 install convention.
/// `None` means the file is not part of a public python package; that is
/// non-membership, not an error.
fn parse_py3_filename(path: &Path) -> Option<PyName> {
    let s = path.to_str()?;
    let caps = PKG_REGEX.captures(s)?;
    let suffix = &caps[3];
    Some(PyName {
        name: caps[2].to_string(),
        sitedir: caps[1].to_string(),
        is_egginfo: suffix.ends_with(".egg-info"),
    })
}

/// Name of the mmpack package providing the given importable unit.
/// The transform is fixed so dependency references stay valid across
/// rebuilds.
fn pkg_name_from_unit(unit: &str) -> String {
    format!("python3-{}", unit.to_lowercase())
}

fn is_python_script(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "py")
}

/// Hook tracking python modules used and exposed
pub struct PythonHook {
    src_description: String,
    analyzer: Box<dyn SymbolAnalyzer>,
}

impl PythonHook {
    pub fn new(src_description: &str, analyzer: Box<dyn SymbolAnalyzer>) -> Self {
        Self {
            src_description: src_description.to_string(),
            analyzer,
        }
    }

    /// For each top-level unit referenced by `used_symbols`, find the mmpack
    /// or system dependency that provides it and record it on `pkg`.
    fn gen_py_deps(
        &self,
        pkg: &mut PackageInfo,
        used_symbols: &BTreeSet<String>,
        siblings: &[SiblingProvides],
        ctx: &ResolveContext,
    ) -> Result<()> {
        let imports: BTreeSet<String> = used_symbols
            .iter()
            .map(|s| s.split_once('.').map_or(s.as_str(), |(head, _)| head))
            .map(str::to_string)
            .collect();
        let mut unresolved = imports.clone();

        // provided in the same package or a package built in the same run:
        // same-archive references are satisfied by construction, other
        // siblings are pinned to the version being built
        for sib in siblings {
            let Some(provides) = sib.provides.get(NAMESPACE) else {
                continue;
            };
            for (depname, _floor) in provides.gen_deps(&imports, used_symbols) {
                if depname != pkg.name {
                    pkg.add_to_deplist(&depname, sib.version.clone());
                }
            }
            unresolved.retain(|unit| provides.get(unit).is_none());
        }

        // provided by a package already present in the prefix
        let prefix = ctx.prefix_provides(NAMESPACE, EXTENSION)?;
        for (depname, floor) in prefix.gen_deps(&unresolved, used_symbols) {
            pkg.add_to_deplist(&depname, floor);
        }
        unresolved.retain(|unit| prefix.get(unit).is_none());

        // provided by the host system, or nothing can satisfy the import
        for unit in unresolved {
            match ctx.find_sysdep(&unit) {
                Some(sysdep) => pkg.add_sysdep(&sysdep, None),
                None => {
                    return Err(Error::UnresolvedImport {
                        pkg: pkg.name.clone(),
                        unit,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Move the content of `src` into `dst_root`, directory by directory.
/// A destination file with identical content counts as already merged; a
/// differing one is a fatal conflict.
fn merge_sitedir(src: &Path, dst_root: &Path) -> Result<()> {
    fs::create_dir_all(dst_root)?;

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .expect("walked entry is under its root");
        let dst = dst_root.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&dst)?;
        } else if dst.exists() {
            if fs::read(entry.path())? == fs::read(&dst)? {
                continue;
            }
            return Err(Error::StagingConflict { path: dst });
        } else {
            fs::rename(entry.path(), &dst)?;
        }
    }
    Ok(())
}

impl BuildHook for PythonHook {
    fn namespace(&self) -> &'static str {
        NAMESPACE
    }

    /// Relocate public packages from versioned python3 install folders to
    /// the unversioned one, so a python3 upgrade does not orphan them.
    fn post_local_install(&self, staging: &Path) -> Result<()> {
        let libdir = staging.join("lib");
        if !libdir.is_dir() {
            return Ok(());
        }

        let mut versioned: Vec<PathBuf> = fs::read_dir(&libdir)?
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .is_some_and(|n| n.starts_with("python3."))
            })
            .map(|e| e.path().join("site-packages"))
            .filter(|p| p.is_dir())
            .collect();
        versioned.sort();

        for sitedir in versioned {
            info!("merging {} into {}", sitedir.display(), PY_SITEDIR);
            merge_sitedir(&sitedir, &staging.join(PY_SITEDIR))?;
            fs::remove_dir_all(&sitedir)?;
        }
        Ok(())
    }

    fn dispatch(&self, data: &mut DispatchData) -> Result<()> {
        for file in data.unassigned_files.clone() {
            let Some(info) = parse_py3_filename(&file) else {
                continue;
            };

            let pkgname = pkg_name_from_unit(&info.name);
            let pkg = data.assign_to_pkg(&pkgname, [file]);
            if pkg.description.is_empty() {
                pkg.description = format!(
                    "{}\nThis contains the python3 package {}",
                    self.src_description, info.name
                );
            }
        }
        Ok(())
    }

    fn update_provides(
        &self,
        staging: &Path,
        pkg: &mut PackageInfo,
        specs: &BTreeMap<String, ProvideSpec>,
    ) -> Result<()> {
        // group the package's files into analysis units; egg-info entries
        // are build metadata, not code
        let mut units: BTreeMap<String, (String, BTreeSet<PathBuf>)> = BTreeMap::new();
        for file in &pkg.files {
            let Some(info) = parse_py3_filename(file) else {
                continue;
            };
            if info.is_egginfo {
                continue;
            }
            units
                .entry(info.name)
                .or_insert_with(|| (info.sitedir, BTreeSet::new()))
                .1
                .insert(file.clone());
        }

        let mut provides = ProvideList::new(NAMESPACE);
        for (unit, (sitedir, files)) in units {
            // the unit must expose one of the public entry point
            // conventions: a package folder or a single module
            let root = format!("{sitedir}/{unit}");
            let has_entry = files.contains(Path::new(&format!("{root}/__init__.py")))
                || files.contains(Path::new(&format!("{root}.py")));
            if !has_entry {
                return Err(Error::MalformedUnit { unit, sitedir });
            }

            let abs_files: BTreeSet<PathBuf> = files.iter().map(|f| staging.join(f)).collect();
            let symbols =
                self.analyzer
                    .provided_symbols(&staging.join(&sitedir), &unit, &abs_files)?;
            debug!("unit {} provides {} symbols", unit, symbols.len());

            let mut provide = Provide::new(&unit, &pkg_name_from_unit(&unit));
            provide.add_symbols(symbols, &pkg.version);
            provides.add(provide);
        }

        // hand-authored overrides win over analyzer output
        provides.update_from_specs(specs, &pkg.name);
        pkg.provides.insert(NAMESPACE.to_string(), provides);
        Ok(())
    }

    fn store_provides(&self, pkg: &PackageInfo, folder: &Path) -> Result<()> {
        // a package exposing no python unit publishes no side file
        if let Some(provides) = pkg.provides.get(NAMESPACE).filter(|p| !p.is_empty()) {
            let path = folder.join(format!("{}.{}", pkg.name, EXTENSION));
            provides.serialize(&path)?;
        }
        Ok(())
    }

    fn update_depends(
        &self,
        staging: &Path,
        pkg: &mut PackageInfo,
        siblings: &[SiblingProvides],
        ctx: &ResolveContext,
    ) -> Result<()> {
        if pkg.ghost {
            return Ok(());
        }

        let scripts: Vec<PathBuf> = pkg
            .files
            .iter()
            .filter(|f| is_python_script(f))
            .map(|f| staging.join(f))
            .collect();
        if scripts.is_empty() {
            return Ok(());
        }

        let used = self
            .analyzer
            .used_symbols(&staging.join(PY_SITEDIR), &scripts)?;
        self.gen_py_deps(pkg, &used, siblings, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syspkg::StaticSyspkgResolver;
    use crate::version::Version;

    fn v(s: &str) -> Version {
        Version::new(s).unwrap()
    }

    /// Canned analyzer: fixed provided-symbol sets per unit, fixed used set
    struct FakeAnalyzer {
        provides: BTreeMap<String, BTreeSet<String>>,
        used: BTreeSet<String>,
    }

    impl FakeAnalyzer {
        fn new(provides: &[(&str, &[&str])], used: &[&str]) -> Self {
            Self {
                provides: provides
                    .iter()
                    .map(|(unit, syms)| {
                        (
                            unit.to_string(),
                            syms.iter().map(|s| s.to_string()).collect(),
                        )
                    })
                    .collect(),
                used: used.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    impl SymbolAnalyzer for FakeAnalyzer {
        fn provided_symbols(
            &self,
            _sitedir: &Path,
            unit: &str,
            _files: &BTreeSet<PathBuf>,
        ) -> Result<BTreeSet<String>> {
            Ok(self.provides.get(unit).cloned().unwrap_or_default())
        }

        fn used_symbols(&self, _sitedir: &Path, _scripts: &[PathBuf]) -> Result<BTreeSet<String>> {
            Ok(self.used.clone())
        }
    }

    fn hook(analyzer: FakeAnalyzer) -> PythonHook {
        PythonHook::new("test source package", Box::new(analyzer))
    }

    fn empty_ctx(dir: &Path) -> ResolveContext {
        ResolveContext::new(dir, Box::new(StaticSyspkgResolver::default()))
    }

    #[test]
    fn test_parse_py3_filename_conventions() {
        let info = parse_py3_filename(Path::new("lib/python3.6/site-packages/foo.so")).unwrap();
        assert_eq!(info.name, "foo");
        assert_eq!(info.sitedir, "lib/python3.6/site-packages");
        assert!(!info.is_egginfo);

        let info = parse_py3_filename(Path::new("usr/lib/python3/dist-packages/_foo.so")).unwrap();
        assert_eq!(info.name, "foo");

        let info =
            parse_py3_filename(Path::new("lib/python3/site-packages/foo/__init__.py")).unwrap();
        assert_eq!(info.name, "foo");

        let info = parse_py3_filename(Path::new(
            "lib/python3/site-packages/Foo-1.2.3.egg-info/_internal.so",
        ))
        .unwrap();
        assert_eq!(info.name, "Foo");
        assert!(info.is_egginfo);

        assert!(parse_py3_filename(Path::new("lib/python2/site-packages/foo.so")).is_none());
        assert!(parse_py3_filename(Path::new("bin/tool")).is_none());
    }

    #[test]
    fn test_pkg_name_transform_is_stable() {
        assert_eq!(pkg_name_from_unit("Foo"), "python3-foo");
        assert_eq!(pkg_name_from_unit("foo_bar"), "python3-foo_bar");
    }

    #[test]
    fn test_dispatch_claims_python_files_only() {
        let mut packages = BTreeMap::new();
        let files: BTreeSet<PathBuf> = [
            PathBuf::from("lib/python3/site-packages/simple/__init__.py"),
            PathBuf::from("share/doc/readme"),
        ]
        .into();
        let mut data = DispatchData::new(files, &mut packages, "src", v("1.0.0"), "amd64");

        let h = hook(FakeAnalyzer::new(&[], &[]));
        h.dispatch(&mut data).unwrap();

        // the non-member file stays in the unassigned set untouched
        assert_eq!(data.unassigned_files.len(), 1);
        assert!(data
            .unassigned_files
            .contains(&PathBuf::from("share/doc/readme")));
        let pkg = &packages["python3-simple"];
        assert!(pkg.description.contains("python3 package simple"));
    }

    #[test]
    fn test_update_provides_records_symbols_at_pkg_version() {
        let h = hook(FakeAnalyzer::new(
            &[("simple", &["simple.MainData", "simple.main_dummy_fn"])],
            &[],
        ));
        let mut pkg = PackageInfo::new("python3-simple", v("1.0.0"), "src", "amd64");
        pkg.files
            .insert(PathBuf::from("lib/python3/site-packages/simple/__init__.py"));

        h.update_provides(Path::new("/staging"), &mut pkg, &BTreeMap::new())
            .unwrap();

        let provide = pkg.provides[NAMESPACE].get("simple").unwrap();
        assert_eq!(provide.pkgdepends, "python3-simple");
        assert_eq!(provide.symbols()["simple.MainData"], v("1.0.0"));
    }

    #[test]
    fn test_update_provides_missing_entry_point_is_fatal() {
        let h = hook(FakeAnalyzer::new(&[], &[]));
        let mut pkg = PackageInfo::new("python3-broken", v("1.0.0"), "src", "amd64");
        pkg.files
            .insert(PathBuf::from("lib/python3/site-packages/broken/helper.py"));

        let err = h
            .update_provides(Path::new("/staging"), &mut pkg, &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::MalformedUnit { unit, .. } if unit == "broken"));
    }

    #[test]
    fn test_update_provides_skips_egginfo_units() {
        let h = hook(FakeAnalyzer::new(&[("simple", &["simple.MainData"])], &[]));
        let mut pkg = PackageInfo::new("python3-simple", v("1.0.0"), "src", "amd64");
        pkg.files
            .insert(PathBuf::from("lib/python3/site-packages/simple/__init__.py"));
        pkg.files.insert(PathBuf::from(
            "lib/python3/site-packages/Simple-1.0.egg-info/PKG-INFO.py",
        ));

        h.update_provides(Path::new("/staging"), &mut pkg, &BTreeMap::new())
            .unwrap();

        let provides = &pkg.provides[NAMESPACE];
        assert!(provides.get("simple").is_some());
        assert!(provides.get("Simple").is_none());
    }

    #[test]
    fn test_store_provides_skips_packages_without_units() {
        let dir = tempfile::tempdir().unwrap();
        let h = hook(FakeAnalyzer::new(&[], &[]));

        let mut pkg = PackageInfo::new("mytool", v("1.0"), "mytool", "amd64");
        pkg.files.insert(PathBuf::from("bin/mytool"));
        h.update_provides(Path::new("/staging"), &mut pkg, &BTreeMap::new())
            .unwrap();

        h.store_provides(&pkg, dir.path()).unwrap();
        assert!(!dir.path().join("mytool.pyobjects").exists());
    }

    #[test]
    fn test_update_depends_resolves_against_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let h = hook(FakeAnalyzer::new(&[], &["multi.somefunc"]));

        let mut pkg = PackageInfo::new("python3-user", v("2.0.0"), "src", "amd64");
        pkg.files
            .insert(PathBuf::from("lib/python3/site-packages/user.py"));

        let mut sib_provides = ProvideList::new(NAMESPACE);
        let mut p = Provide::new("multi", "python3-multi");
        p.add_symbols(["multi.somefunc".to_string()], &v("2.0.0"));
        sib_provides.add(p);
        let siblings = vec![SiblingProvides {
            name: "python3-multi".to_string(),
            version: v("2.0.0"),
            provides: BTreeMap::from([(NAMESPACE.to_string(), sib_provides)]),
        }];

        h.update_depends(dir.path(), &mut pkg, &siblings, &empty_ctx(dir.path()))
            .unwrap();

        assert_eq!(pkg.depends()["python3-multi"], v("2.0.0"));
        assert!(pkg.sysdepends().is_empty());
    }

    #[test]
    fn test_update_depends_self_reference_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let h = hook(FakeAnalyzer::new(&[], &["simple.MainData.__init__"]));

        let mut pkg = PackageInfo::new("python3-simple", v("1.0.0"), "src", "amd64");
        pkg.files
            .insert(PathBuf::from("lib/python3/site-packages/simple/__init__.py"));
        let mut own = ProvideList::new(NAMESPACE);
        let mut p = Provide::new("simple", "python3-simple");
        p.add_symbols(["simple.MainData.__init__".to_string()], &v("1.0.0"));
        own.add(p);
        pkg.provides.insert(NAMESPACE.to_string(), own);

        let siblings = SiblingProvides::snapshot(&BTreeMap::from([(
            pkg.name.clone(),
            pkg.clone(),
        )]));
        h.update_depends(dir.path(), &mut pkg, &siblings, &empty_ctx(dir.path()))
            .unwrap();

        assert!(pkg.depends().is_empty());
        assert!(pkg.sysdepends().is_empty());
    }

    #[test]
    fn test_update_depends_falls_back_to_syspkg() {
        let dir = tempfile::tempdir().unwrap();
        let h = hook(FakeAnalyzer::new(&[], &["numpy.array"]));
        let ctx = ResolveContext::new(
            dir.path(),
            Box::new(StaticSyspkgResolver::new(BTreeMap::from([(
                "numpy".to_string(),
                "python3-numpy".to_string(),
            )]))),
        );

        let mut pkg = PackageInfo::new("python3-user", v("1.0.0"), "src", "amd64");
        pkg.files
            .insert(PathBuf::from("lib/python3/site-packages/user.py"));

        h.update_depends(dir.path(), &mut pkg, &[], &ctx).unwrap();
        assert_eq!(pkg.sysdepends()["python3-numpy"], None);
    }

    #[test]
    fn test_update_depends_unresolved_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let h = hook(FakeAnalyzer::new(&[], &["ghost_module.fn"]));

        let mut pkg = PackageInfo::new("python3-user", v("1.0.0"), "src", "amd64");
        pkg.files
            .insert(PathBuf::from("lib/python3/site-packages/user.py"));

        let err = h
            .update_depends(dir.path(), &mut pkg, &[], &empty_ctx(dir.path()))
            .unwrap_err();
        assert!(
            matches!(err, Error::UnresolvedImport { unit, .. } if unit == "ghost_module")
        );
    }

    #[test]
    fn test_update_depends_skipped_for_ghost() {
        let dir = tempfile::tempdir().unwrap();
        let h = hook(FakeAnalyzer::new(&[], &["ghost_module.fn"]));

        let mut pkg = PackageInfo::new("python3-user", v("1.0.0"), "src", "amd64");
        pkg.ghost = true;
        pkg.files
            .insert(PathBuf::from("lib/python3/site-packages/user.py"));

        h.update_depends(dir.path(), &mut pkg, &[], &empty_ctx(dir.path()))
            .unwrap();
        assert!(pkg.depends().is_empty());
    }

    #[test]
    fn test_post_local_install_merges_versioned_sitedir() {
        let staging = tempfile::tempdir().unwrap();
        let old = staging.path().join("lib/python3.9/site-packages/pkg");
        fs::create_dir_all(&old).unwrap();
        fs::write(old.join("__init__.py"), b"init").unwrap();

        // identical file already at the destination: treated as merged
        let new = staging.path().join(PY_SITEDIR).join("pkg");
        fs::create_dir_all(&new).unwrap();
        fs::write(new.join("__init__.py"), b"init").unwrap();

        let h = hook(FakeAnalyzer::new(&[], &[]));
        h.post_local_install(staging.path()).unwrap();

        assert!(new.join("__init__.py").is_file());
        assert!(!staging.path().join("lib/python3.9/site-packages").exists());
    }

    #[test]
    fn test_post_local_install_conflict_is_fatal() {
        let staging = tempfile::tempdir().unwrap();
        let old = staging.path().join("lib/python3.9/site-packages");
        fs::create_dir_all(&old).unwrap();
        fs::write(old.join("mod.py"), b"one").unwrap();

        let new = staging.path().join(PY_SITEDIR);
        fs::create_dir_all(&new).unwrap();
        fs::write(new.join("mod.py"), b"two").unwrap();

        let h = hook(FakeAnalyzer::new(&[], &[]));
        let err = h.post_local_install(staging.path()).unwrap_err();
        assert!(matches!(err, Error::StagingConflict { .. }));
    }
}
