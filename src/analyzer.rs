// src/analyzer.rs

//! External symbol analyzers
//!
//! The resolution engine never inspects file contents itself: per-ecosystem
//! analyzers extract the symbols a set of installed files provides or uses.
//! They run out of process (ecosystem-specific introspection is available
//! there that the engine cannot replicate) and hand back a
//! whitespace-separated list of fully-qualified symbol names on stdout.

use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Extraction of provided/used symbol sets for one ecosystem.
///
/// Implementations are swappable per ecosystem; tests substitute in-memory
/// fakes for the subprocess-backed one.
pub trait SymbolAnalyzer: Send + Sync {
    /// Symbols the given unit exports, considering only `files`
    fn provided_symbols(
        &self,
        sitedir: &Path,
        unit: &str,
        files: &BTreeSet<PathBuf>,
    ) -> Result<BTreeSet<String>>;

    /// Qualified symbols referenced by the given script files
    fn used_symbols(&self, sitedir: &Path, scripts: &[PathBuf]) -> Result<BTreeSet<String>>;
}

/// Subprocess-backed analyzer: one command for "symbols provided", one for
/// "symbols used", each invoked with a site path and the files to inspect.
pub struct ScriptAnalyzer {
    provides_cmd: Vec<String>,
    depends_cmd: Vec<String>,
}

impl ScriptAnalyzer {
    /// Build from raw command lines (program followed by leading arguments)
    pub fn new(provides_cmd: Vec<String>, depends_cmd: Vec<String>) -> Self {
        Self {
            provides_cmd,
            depends_cmd,
        }
    }

    /// The python3 analyzer pair shipped alongside the tool
    pub fn python3(scripts_dir: &Path) -> Self {
        let script = |name: &str| {
            vec![
                "python3".to_string(),
                scripts_dir.join(name).display().to_string(),
            ]
        };
        Self::new(script("python_provides.py"), script("python_depends.py"))
    }

    fn command(spec: &[String]) -> Command {
        let mut cmd = Command::new(&spec[0]);
        cmd.args(&spec[1..]);
        cmd
    }
}

impl SymbolAnalyzer for ScriptAnalyzer {
    fn provided_symbols(
        &self,
        sitedir: &Path,
        unit: &str,
        files: &BTreeSet<PathBuf>,
    ) -> Result<BTreeSet<String>> {
        let mut cmd = Self::command(&self.provides_cmd);
        cmd.arg(format!("--site-path={}", sitedir.display()));
        cmd.arg(unit);
        cmd.args(files);
        run_symbol_cmd(cmd)
    }

    fn used_symbols(&self, sitedir: &Path, scripts: &[PathBuf]) -> Result<BTreeSet<String>> {
        let mut cmd = Self::command(&self.depends_cmd);
        cmd.arg(format!("--site-path={}", sitedir.display()));
        cmd.args(scripts);
        run_symbol_cmd(cmd)
    }
}

/// Run an analyzer command and split its stdout into a symbol set.
///
/// A non-zero exit means malformed input, not a transient condition: the
/// failure is reported with the command line and never retried.
fn run_symbol_cmd(mut cmd: Command) -> Result<BTreeSet<String>> {
    debug!("running analyzer: {:?}", cmd);

    let output = cmd.output().map_err(|e| Error::Command {
        cmd: format!("{cmd:?}"),
        reason: e.to_string(),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Command {
            cmd: format!("{cmd:?}"),
            reason: format!("exit status {}: {}", output.status, stderr.trim()),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .split_whitespace()
        .map(str::to_string)
        .collect())
}
