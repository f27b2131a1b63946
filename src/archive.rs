// src/archive.rs

//! Package archive assembly
//!
//! Turns a [`PackageInfo`] and the shared install tree into a final `.mpk`
//! artifact: the package's files are hard-linked into an isolated directory,
//! a checksum manifest and the metadata record are generated, and the whole
//! directory is packed into an xz-compressed tar whose entry attributes are
//! normalized so identical inputs produce byte-identical archives.

use crate::error::{Error, Result};
use crate::package_info::PackageInfo;
use crate::version::Version;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use xz2::write::XzEncoder;

/// Metadata record location inside the archive
const INFO_PATH: &str = "MMPACK/info";
/// Checksum manifest location inside the archive
const SUMS_PATH: &str = "MMPACK/sha256sums";

const XZ_LEVEL: u32 = 6;

/// Package metadata record, keyed by package name in `MMPACK/info`
#[derive(Serialize)]
struct InfoRecord<'a> {
    version: &'a Version,
    source: &'a str,
    description: &'a str,
    sumsha256sums: String,
    depends: &'a BTreeMap<String, Version>,
    sysdepends: &'a BTreeMap<String, Option<Version>>,
}

/// Gather the package data from `build_dir/install`, generate the metadata
/// files and produce the `.mpk` archive in `dest_dir`.
pub fn create(pkg: &PackageInfo, dest_dir: &Path, build_dir: &Path) -> Result<PathBuf> {
    let pkgdir = build_dir.join(&pkg.name);
    let instdir = build_dir.join("install");
    fs::create_dir_all(pkgdir.join("MMPACK"))?;

    populate(pkg, &instdir, &pkgdir)?;
    gen_info(pkg, &pkgdir)?;
    make_archive(pkg, &pkgdir, dest_dir)
}

/// Compute the SHA-256 hash of a file, streamed
pub fn sha256sum(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Materialize the package's files from the shared install tree using hard
/// links: same content, independent directory entries.
fn populate(pkg: &PackageInfo, instdir: &Path, pkgdir: &Path) -> Result<()> {
    for file in &pkg.files {
        let src = instdir.join(file);
        let dst = pkgdir.join(file);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::hard_link(&src, &dst)?;
    }
    Ok(())
}

/// Write the checksum manifest and the package metadata record
fn gen_info(pkg: &PackageInfo, pkgdir: &Path) -> Result<()> {
    let mut cksums = BTreeMap::new();
    for entry in WalkDir::new(pkgdir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(pkgdir)
            .expect("walked entry is under the package dir")
            .to_string_lossy()
            .into_owned();
        // the metadata files describe the manifest, they are not part of it
        if rel == INFO_PATH || rel == SUMS_PATH {
            continue;
        }
        cksums.insert(rel, sha256sum(entry.path())?);
    }

    let sums_path = pkgdir.join(SUMS_PATH);
    serde_json::to_writer_pretty(BufWriter::new(File::create(&sums_path)?), &cksums)?;
    debug!("wrote {}", sums_path.display());

    let info = BTreeMap::from([(
        pkg.name.as_str(),
        InfoRecord {
            version: &pkg.version,
            source: &pkg.source,
            description: &pkg.description,
            sumsha256sums: sha256sum(&sums_path)?,
            depends: pkg.depends(),
            sysdepends: pkg.sysdepends(),
        },
    )]);
    let info_path = pkgdir.join(INFO_PATH);
    serde_json::to_writer_pretty(BufWriter::new(File::create(&info_path)?), &info)?;
    debug!("wrote {}", info_path.display());
    Ok(())
}

/// Pack the package directory into `<name>_<version>_<arch>.mpk`.
/// An existing archive at the destination is a build collision, never
/// silently overwritten.
fn make_archive(pkg: &PackageInfo, pkgdir: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let mpkfile = dest_dir.join(format!("{}_{}_{}.mpk", pkg.name, pkg.version, pkg.arch));

    let file = File::options()
        .write(true)
        .create_new(true)
        .open(&mpkfile)
        .map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                Error::ArchiveExists(mpkfile.clone())
            } else {
                Error::Io(e)
            }
        })?;

    let encoder = XzEncoder::new(BufWriter::new(file), XZ_LEVEL);
    let mut archive = tar::Builder::new(encoder);
    append_dir_normalized(&mut archive, pkgdir, Path::new("."))?;
    let mut out = archive.into_inner()?.finish()?;
    out.flush()?;

    info!("created archive {}", mpkfile.display());
    Ok(mpkfile)
}

/// Normalize every attribute that would make the build non-reproducible:
/// ownership to root/root (0/0) and mtime to the epoch.
fn reset_entry_attrs(header: &mut tar::Header) -> Result<()> {
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_username("root")?;
    header.set_groupname("root")?;
    Ok(())
}

/// Recursively append a directory with sorted entries and normalized
/// attributes
fn append_dir_normalized<W: Write>(
    archive: &mut tar::Builder<W>,
    dir: &Path,
    arc_dir: &Path,
) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let meta = fs::symlink_metadata(&path)?;
        let arc_path = arc_dir.join(entry.file_name());

        if meta.is_dir() {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_mode(meta.permissions().mode() & 0o7777);
            reset_entry_attrs(&mut header)?;
            archive.append_data(&mut header, &arc_path, io::empty())?;
            append_dir_normalized(archive, &path, &arc_path)?;
        } else if meta.file_type().is_symlink() {
            let target = fs::read_link(&path)?;
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            header.set_mode(0o777);
            reset_entry_attrs(&mut header)?;
            archive.append_link(&mut header, &arc_path, &target)?;
        } else {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(meta.len());
            header.set_mode(meta.permissions().mode() & 0o7777);
            reset_entry_attrs(&mut header)?;
            archive.append_data(&mut header, &arc_path, File::open(&path)?)?;
        }
    }
    Ok(())
}
