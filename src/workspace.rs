// src/workspace.rs

//! Build workspace directories
//!
//! All of the tool's state lives under the standard user directories:
//! configuration, downloaded sources, temporary build trees and produced
//! packages. Directory creation is idempotent; nothing here is process-wide
//! state, callers construct a [`Workspace`] once per run and pass it along.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Base directories of one build environment
#[derive(Debug, Clone)]
pub struct Workspace {
    /// User configuration file
    pub config: PathBuf,
    /// Source cache
    pub sources: PathBuf,
    /// Temporary build trees
    pub build: PathBuf,
    /// Produced package archives
    pub packages: PathBuf,
}

impl Workspace {
    /// Workspace rooted under the user's standard config/cache/data dirs
    pub fn new() -> Result<Self> {
        let config = dirs::config_dir()
            .ok_or_else(|| Error::Workspace("cannot determine config directory".to_string()))?;
        let cache = dirs::cache_dir()
            .ok_or_else(|| Error::Workspace("cannot determine cache directory".to_string()))?;
        let data = dirs::data_dir()
            .ok_or_else(|| Error::Workspace("cannot determine data directory".to_string()))?;
        Self::from_dirs(&config, &cache, &data)
    }

    /// Workspace rooted under explicit base directories
    pub fn from_dirs(config_dir: &Path, cache_dir: &Path, data_dir: &Path) -> Result<Self> {
        let ws = Self {
            config: config_dir.join("mmpack-config.json"),
            sources: cache_dir.join("mmpack-sources"),
            build: cache_dir.join("mmpack-build"),
            packages: data_dir.join("mmpack-packages"),
        };

        fs::create_dir_all(config_dir)?;
        fs::create_dir_all(&ws.sources)?;
        fs::create_dir_all(&ws.build)?;
        fs::create_dir_all(&ws.packages)?;
        Ok(ws)
    }

    /// Build directory for one package, created if needed
    pub fn builddir(&self, pkg: &str) -> Result<PathBuf> {
        let dir = self.build.join(pkg);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Remove copied sources and temporary build trees, keeping produced
    /// packages. With `pkg`, only entries whose name starts with it.
    pub fn clean(&self, pkg: Option<&str>) -> Result<()> {
        info!("cleaning workspace (scope: {})", pkg.unwrap_or("*"));
        remove_matching(&self.build, pkg)?;
        remove_matching(&self.sources, pkg)?;
        Ok(())
    }

    /// Same as an unscoped clean, but also remove produced packages
    pub fn wipe(&self) -> Result<()> {
        self.clean(None)?;
        info!("removing produced packages");
        remove_matching(&self.packages, None)
    }
}

fn remove_matching(dir: &Path, prefix: Option<&str>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(prefix) = prefix {
            if !entry.file_name().to_string_lossy().starts_with(prefix) {
                continue;
            }
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        debug!("removed {}", path.display());
    }
    Ok(())
}
