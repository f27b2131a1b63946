// src/provide.rs

//! Symbol provide registry
//!
//! A [`Provide`] records which symbols one installable unit exports and the
//! package version each symbol first appeared in. A [`ProvideList`] groups
//! the provides of one namespace (e.g. the python ecosystem) and implements
//! the dependency-generation algorithm: given the symbols a package is
//! observed to use, derive the minimal version of each providing package
//! that exposes all of them.
//!
//! Lists round-trip through per-package side files
//! (`<package-name>.<extension>`) so that packages already installed in a
//! prefix can answer "who provides X" for later builds.

use crate::error::Result;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::debug;

/// One exporting unit within a namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provide {
    /// Unit name (e.g. the importable top-level module)
    name: String,
    /// Name of the package that ships this unit
    pub pkgdepends: String,
    symbols: BTreeMap<String, Version>,
}

impl Provide {
    pub fn new(name: &str, pkgdepends: &str) -> Self {
        Self {
            name: name.to_string(),
            pkgdepends: pkgdepends.to_string(),
            symbols: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbols(&self) -> &BTreeMap<String, Version> {
        &self.symbols
    }

    /// Record `version` as the introducing version of every symbol not yet
    /// known. Symbols already present keep their recorded version: the
    /// minimal version required by a consumer is the version that first
    /// exposed the symbol, not the version of the current rebuild.
    pub fn add_symbols(&mut self, symbols: impl IntoIterator<Item = String>, version: &Version) {
        for sym in symbols {
            self.symbols.entry(sym).or_insert_with(|| version.clone());
        }
    }

    /// Force-set a symbol's introducing version (spec overrides win)
    fn override_symbol(&mut self, symbol: &str, version: Version) {
        self.symbols.insert(symbol.to_string(), version);
    }

    /// Highest introducing version among the used symbols this unit
    /// actually provides. None when there is no overlap.
    fn version_floor(&self, used_symbols: &BTreeSet<String>) -> Option<&Version> {
        self.symbols
            .iter()
            .filter(|(sym, _)| used_symbols.contains(*sym))
            .map(|(_, ver)| ver)
            .max()
    }
}

/// Hand-authored override entry for one unit, loaded from package specs.
///
/// Used when static analysis cannot see symbols exposed through dynamic
/// re-exports. Spec entries always win over analyzer output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvideSpec {
    /// Owning package override; defaults to the package being built
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends: Option<String>,
    #[serde(default)]
    pub symbols: BTreeMap<String, Version>,
}

/// Serialized form of one provide entry in a side file
#[derive(Debug, Serialize, Deserialize)]
struct ProvideRecord {
    depends: String,
    symbols: BTreeMap<String, Version>,
}

/// Side-file layout: namespace tag plus unit name -> record
#[derive(Debug, Serialize, Deserialize)]
struct SideFile {
    namespace: String,
    provides: BTreeMap<String, ProvideRecord>,
}

/// The provides of one namespace, keyed by unit name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvideList {
    namespace: String,
    entries: BTreeMap<String, Provide>,
}

impl ProvideList {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            entries: BTreeMap::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn add(&mut self, provide: Provide) {
        self.entries.insert(provide.name.clone(), provide);
    }

    pub fn get(&self, unit: &str) -> Option<&Provide> {
        self.entries.get(unit)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Provide> {
        self.entries.values()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Derive dependencies from observed symbol usage.
    ///
    /// For every unit whose name appears in `imports`, intersect its symbol
    /// table with `used_symbols`. A non-empty intersection yields one
    /// `(owning package, minimal version)` pair where the minimal version is
    /// the highest introducing version among the intersected symbols. Units
    /// with no overlap yield nothing; whether such an import is satisfied at
    /// all is answered by [`ProvideList::get`].
    ///
    /// Inputs are not mutated and iteration order of the inputs does not
    /// affect the result.
    pub fn gen_deps(
        &self,
        imports: &BTreeSet<String>,
        used_symbols: &BTreeSet<String>,
    ) -> Vec<(String, Version)> {
        let mut deps = Vec::new();
        for provide in self.entries.values() {
            if !imports.contains(&provide.name) {
                continue;
            }
            if let Some(floor) = provide.version_floor(used_symbols) {
                deps.push((provide.pkgdepends.clone(), floor.clone()));
            }
        }
        deps
    }

    /// Merge hand-authored spec entries for the named package. Spec symbol
    /// versions replace analyzer-derived ones; units unknown to the analyzer
    /// are created.
    pub fn update_from_specs(&mut self, specs: &BTreeMap<String, ProvideSpec>, pkg_name: &str) {
        for (unit, spec) in specs {
            let owner = spec.depends.as_deref().unwrap_or(pkg_name);
            let entry = self
                .entries
                .entry(unit.clone())
                .or_insert_with(|| Provide::new(unit, owner));
            entry.pkgdepends = owner.to_string();
            for (sym, ver) in &spec.symbols {
                entry.override_symbol(sym, ver.clone());
            }
        }
    }

    /// Fold another list of the same namespace into this one. Unit names are
    /// package-scoped, so cross-package merging cannot collide.
    pub fn merge(&mut self, other: ProvideList) {
        for provide in other.entries.into_values() {
            self.entries.insert(provide.name.clone(), provide);
        }
    }

    /// Write the namespace-tagged side file
    pub fn serialize(&self, path: &Path) -> Result<()> {
        let records = self
            .entries
            .values()
            .map(|p| {
                (
                    p.name.clone(),
                    ProvideRecord {
                        depends: p.pkgdepends.clone(),
                        symbols: p.symbols.clone(),
                    },
                )
            })
            .collect();

        let file = SideFile {
            namespace: self.namespace.clone(),
            provides: records,
        };

        let out = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(out, &file)?;
        debug!("wrote provides side file {}", path.display());
        Ok(())
    }

    /// Read a side file back
    pub fn load(path: &Path) -> Result<Self> {
        let input = BufReader::new(File::open(path)?);
        let file: SideFile = serde_json::from_reader(input)?;

        let mut list = ProvideList::new(&file.namespace);
        for (name, record) in file.provides {
            let mut provide = Provide::new(&name, &record.depends);
            provide.symbols = record.symbols;
            list.add(provide);
        }
        Ok(list)
    }
}

/// Merge the side files of every package present in `metadata_dir` into one
/// registry for `namespace`. Files carry the namespace's `extension`
/// (e.g. `pyobjects`).
pub fn load_provides(metadata_dir: &Path, extension: &str, namespace: &str) -> Result<ProvideList> {
    let mut merged = ProvideList::new(namespace);
    if !metadata_dir.is_dir() {
        return Ok(merged);
    }

    let mut paths: Vec<_> = std::fs::read_dir(metadata_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == extension))
        .collect();
    paths.sort();

    for path in paths {
        let list = ProvideList::load(&path)?;
        if list.namespace() != namespace {
            debug!(
                "skipping {}: namespace {} does not match {}",
                path.display(),
                list.namespace(),
                namespace
            );
            continue;
        }
        merged.merge(list);
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::new(s).unwrap()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn sample_provide() -> Provide {
        let mut p = Provide::new("simple", "python3-simple");
        p.add_symbols(
            ["simple.MainData".to_string(), "simple.main_dummy_fn".to_string()],
            &v("1.0.0"),
        );
        p
    }

    #[test]
    fn test_add_symbols_first_seen_wins() {
        let mut p = sample_provide();
        p.add_symbols(
            ["simple.MainData".to_string(), "simple.new_api".to_string()],
            &v("2.0.0"),
        );

        assert_eq!(p.symbols()["simple.MainData"], v("1.0.0"));
        assert_eq!(p.symbols()["simple.new_api"], v("2.0.0"));
    }

    #[test]
    fn test_gen_deps_version_floor_is_max() {
        let mut list = ProvideList::new("python");
        let mut p = Provide::new("multi", "python3-multi");
        p.add_symbols(["multi.old_fn".to_string()], &v("1.0.0"));
        p.add_symbols(["multi.somefunc".to_string()], &v("1.4.0"));
        list.add(p);

        let deps = list.gen_deps(
            &set(&["multi"]),
            &set(&["multi.old_fn", "multi.somefunc"]),
        );
        assert_eq!(deps, vec![("python3-multi".to_string(), v("1.4.0"))]);
    }

    #[test]
    fn test_gen_deps_no_overlap_yields_nothing() {
        let mut list = ProvideList::new("python");
        list.add(sample_provide());

        let deps = list.gen_deps(&set(&["simple"]), &set(&["other.thing"]));
        assert!(deps.is_empty());
        // the unit is still known for presence-only resolution
        assert!(list.get("simple").is_some());
    }

    #[test]
    fn test_gen_deps_ignores_units_not_imported() {
        let mut list = ProvideList::new("python");
        list.add(sample_provide());

        let deps = list.gen_deps(&set(&["unrelated"]), &set(&["simple.MainData"]));
        assert!(deps.is_empty());
    }

    #[test]
    fn test_gen_deps_does_not_mutate_inputs() {
        let mut list = ProvideList::new("python");
        list.add(sample_provide());

        let imports = set(&["simple"]);
        let used = set(&["simple.MainData"]);
        let _ = list.gen_deps(&imports, &used);
        assert_eq!(imports, set(&["simple"]));
        assert_eq!(used, set(&["simple.MainData"]));
    }

    #[test]
    fn test_update_from_specs_overrides_analyzer() {
        let mut list = ProvideList::new("python");
        list.add(sample_provide());

        let mut specs = BTreeMap::new();
        specs.insert(
            "simple".to_string(),
            ProvideSpec {
                depends: None,
                symbols: BTreeMap::from([
                    ("simple.MainData".to_string(), v("0.9.0")),
                    ("simple.reexported".to_string(), v("1.0.0")),
                ]),
            },
        );
        list.update_from_specs(&specs, "python3-simple");

        let p = list.get("simple").unwrap();
        assert_eq!(p.symbols()["simple.MainData"], v("0.9.0"));
        assert_eq!(p.symbols()["simple.reexported"], v("1.0.0"));
        // untouched analyzer symbol survives
        assert_eq!(p.symbols()["simple.main_dummy_fn"], v("1.0.0"));
    }

    #[test]
    fn test_update_from_specs_creates_unknown_unit() {
        let mut list = ProvideList::new("python");
        let mut specs = BTreeMap::new();
        specs.insert(
            "hidden".to_string(),
            ProvideSpec {
                depends: Some("python3-hidden".to_string()),
                symbols: BTreeMap::from([("hidden.thing".to_string(), v("2.0"))]),
            },
        );
        list.update_from_specs(&specs, "python3-main");

        let p = list.get("hidden").unwrap();
        assert_eq!(p.pkgdepends, "python3-hidden");
    }

    #[test]
    fn test_serialize_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("python3-simple.pyobjects");

        let mut list = ProvideList::new("python");
        list.add(sample_provide());
        list.serialize(&path).unwrap();

        let loaded = ProvideList::load(&path).unwrap();
        assert_eq!(loaded, list);
    }

    #[test]
    fn test_load_provides_merges_metadata_dir() {
        let dir = tempfile::tempdir().unwrap();

        let mut a = ProvideList::new("python");
        a.add(sample_provide());
        a.serialize(&dir.path().join("python3-simple.pyobjects")).unwrap();

        let mut b = ProvideList::new("python");
        let mut p = Provide::new("multi", "python3-multi");
        p.add_symbols(["multi.somefunc".to_string()], &v("2.1.0"));
        b.add(p);
        b.serialize(&dir.path().join("python3-multi.pyobjects")).unwrap();

        // a side file of another namespace must be ignored
        let mut c = ProvideList::new("elf");
        c.add(Provide::new("libfoo.so.1", "libfoo1"));
        c.serialize(&dir.path().join("libfoo1.pyobjects")).unwrap();

        let merged = load_provides(dir.path(), "pyobjects", "python").unwrap();
        assert!(merged.get("simple").is_some());
        assert!(merged.get("multi").is_some());
        assert!(merged.get("libfoo.so.1").is_none());
    }

    #[test]
    fn test_load_provides_missing_dir_is_empty() {
        let merged =
            load_provides(Path::new("/nonexistent/metadata"), "pyobjects", "python").unwrap();
        assert!(merged.is_empty());
    }
}
