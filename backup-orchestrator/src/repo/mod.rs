//! Git repository mirroring.
//!
//! Repositories are cloned into `<snapshot>/repos/<name>.git` on first sight
//! and only ever fast-forwarded afterwards. A mirror whose history diverged
//! from its source is left untouched.

use crate::utils::naming::{normalize, repository_base_name, NameAllocator};
use crate::{OrchestratorError, Result};
use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, info};

/// How a mirror was brought up to date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorAction {
    Cloned,
    Updated,
}

/// First-level children of `input_dirs` that carry a `.git` marker.
///
/// Unreadable input directories are skipped silently here; the directory
/// synchronizer reports them.
pub fn discover(input_dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for dir in input_dirs {
        let Ok(read_dir) = fs::read_dir(dir) else {
            continue;
        };
        let mut children: Vec<PathBuf> = read_dir
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.path())
            .filter(|p| p.join(".git").exists())
            .collect();
        children.sort();
        found.extend(children);
    }
    found
}

pub struct RepositoryMirror {
    repos_area: PathBuf,
    git: String,
    names: NameAllocator,
    assigned: HashMap<PathBuf, String>,
}

impl RepositoryMirror {
    pub fn new(repos_area: impl Into<PathBuf>, git: impl Into<String>) -> Self {
        Self {
            repos_area: repos_area.into(),
            git: git.into(),
            names: NameAllocator::new(),
            assigned: HashMap::new(),
        }
    }

    /// Mirror directory for `source`; stable for the lifetime of this mirror.
    pub fn mirror_path(&mut self, source: &Path) -> PathBuf {
        let key = normalize(source);
        let name = match self.assigned.get(&key) {
            Some(name) => name.clone(),
            None => {
                let name = self.names.allocate(&repository_base_name(&key));
                self.assigned.insert(key, name.clone());
                name
            }
        };
        self.repos_area.join(format!("{}.git", name))
    }

    /// Clone `source`, or fast-forward an existing mirror to the source's
    /// `HEAD`.
    ///
    /// A pull that cannot fast-forward fails with `NotFastForward` and leaves
    /// the mirror as it was. That includes a mirror cloned from some other
    /// repository that now holds this source's name.
    pub fn mirror(&mut self, source: &Path) -> Result<MirrorAction> {
        if !source.is_dir() {
            return Err(OrchestratorError::InputUnavailable(format!(
                "{}: repository not found",
                source.display()
            )));
        }

        let dest = self.mirror_path(source);
        if dest.exists() {
            debug!(source = %source.display(), mirror = %dest.display(), "Fast-forwarding mirror");
            // Pull from the source itself, not the mirror's recorded origin
            let output = self.git(
                Some(&dest),
                [
                    OsStr::new("pull"),
                    OsStr::new("--ff-only"),
                    OsStr::new("--quiet"),
                    source.as_os_str(),
                    OsStr::new("HEAD"),
                ],
            )?;
            if !output.status.success() {
                return Err(OrchestratorError::NotFastForward(format!(
                    "{}: {}",
                    dest.display(),
                    stderr_line(&output)
                )));
            }
            info!(source = %source.display(), mirror = %dest.display(), "Repository updated");
            Ok(MirrorAction::Updated)
        } else {
            debug!(source = %source.display(), mirror = %dest.display(), "Cloning repository");
            let output = self.git(
                None,
                [
                    OsStr::new("clone"),
                    OsStr::new("--quiet"),
                    source.as_os_str(),
                    dest.as_os_str(),
                ],
            )?;
            if !output.status.success() {
                return Err(OrchestratorError::Git(format!(
                    "clone of {} failed: {}",
                    source.display(),
                    stderr_line(&output)
                )));
            }
            info!(source = %source.display(), mirror = %dest.display(), "Repository cloned");
            Ok(MirrorAction::Cloned)
        }
    }

    fn git<I, S>(&self, dir: Option<&Path>, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.git);
        if let Some(dir) = dir {
            cmd.arg("-C").arg(dir);
        }
        cmd.args(args).env("GIT_TERMINAL_PROMPT", "0");
        cmd.output()
            .map_err(|e| OrchestratorError::Git(format!("cannot run {}: {}", self.git, e)))
    }
}

/// Explicit repositories first, then discovered ones; each source once.
pub fn plan(explicit: &[PathBuf], discovered: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    explicit
        .iter()
        .chain(discovered)
        .filter(|p| seen.insert(normalize(p)))
        .cloned()
        .collect()
}

fn stderr_line(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        format!("exit status {}", output.status)
    } else {
        trimmed.lines().last().unwrap_or(trimmed).to_string()
    }
}
