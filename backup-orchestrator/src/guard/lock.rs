//! Single-instance run lock.
//!
//! The lock is a sentinel file holding the owner's pid. A sentinel whose
//! owner is no longer alive is considered stale and replaced, so a crashed
//! run does not block every later run.

use crate::{OrchestratorError, Result};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

const ACQUIRE_ATTEMPTS: usize = 3;

/// How long an empty sentinel counts as a run that is still starting.
const STARTING_GRACE: Duration = Duration::from_secs(30);

/// What an existing sentinel says about its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holder {
    Alive(i32),
    /// Created but the pid is not written yet
    Starting,
    Stale,
}

#[derive(Debug, Clone)]
pub struct LockFile {
    path: PathBuf,
}

/// Removes the sentinel when dropped, if it is still ours.
#[derive(Debug)]
pub struct LockGuard {
    lock: LockFile,
}

impl LockFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock or fail with `AlreadyRunning`.
    pub fn acquire(&self) -> Result<LockGuard> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let pid = std::process::id();
        for _ in 0..ACQUIRE_ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(&self.path) {
                Ok(file) => {
                    self.write_pid_or_remove(file, pid)?;
                    info!(lock = %self.path.display(), pid, "Lock acquired");
                    return Ok(LockGuard { lock: self.clone() });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => match self.holder()? {
                    Some(Holder::Alive(owner)) => {
                        return Err(OrchestratorError::AlreadyRunning { pid: owner });
                    }
                    Some(Holder::Starting) => {
                        return Err(OrchestratorError::AlreadyRunning { pid: 0 });
                    }
                    Some(Holder::Stale) => {
                        warn!(lock = %self.path.display(), "Removing stale lock");
                        remove_if_present(&self.path)?;
                    }
                    // Vanished between create and read; try again
                    None => {}
                },
                Err(e) => return Err(e.into()),
            }
        }

        Err(OrchestratorError::AlreadyRunning { pid: 0 })
    }

    /// A sentinel we created but could not fill is removed again, since an
    /// empty one would read as a run that is still starting.
    fn write_pid_or_remove(&self, mut file: File, pid: u32) -> Result<()> {
        let written = writeln!(file, "{}", pid).and_then(|()| file.sync_all());
        drop(file);
        if let Err(e) = written {
            remove_if_present(&self.path)?;
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove the sentinel if it names this process.
    pub fn release_if_owned(&self) -> Result<bool> {
        let own = std::process::id() as i32;
        match read_pid(&self.path)? {
            Some(Some(pid)) if pid == own => {
                remove_if_present(&self.path)?;
                info!(lock = %self.path.display(), "Lock released");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn holder(&self) -> Result<Option<Holder>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let trimmed = content.trim();
        if trimmed.is_empty() {
            let modified = match fs::metadata(&self.path) {
                Ok(meta) => meta.modified()?,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            let age = SystemTime::now()
                .duration_since(modified)
                .unwrap_or_default();
            return Ok(Some(if age < STARTING_GRACE {
                Holder::Starting
            } else {
                Holder::Stale
            }));
        }
        Ok(Some(match trimmed.parse::<i32>() {
            Ok(pid) if pid_alive(pid) => Holder::Alive(pid),
            _ => Holder::Stale,
        }))
    }
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        self.lock.path()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release_if_owned() {
            warn!(lock = %self.lock.path.display(), error = %e, "Failed to release lock");
        }
    }
}

/// `Ok(None)` when the file is missing, `Ok(Some(None))` when unparsable.
fn read_pid(path: &Path) -> Result<Option<Option<i32>>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content.trim().parse::<i32>().ok())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Signal 0 tests for existence; EPERM still means the process exists.
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // Larger than any Linux pid_max
    const DEAD_PID: i32 = 999_999_999;

    #[test]
    fn test_acquire_and_release_on_drop() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("run/backup.lock");
        let lock = LockFile::new(&path);

        {
            let _guard = lock.acquire().expect("lock should be free");
            let content = fs::read_to_string(&path)?;
            assert_eq!(content.trim(), std::process::id().to_string());
        }

        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_second_acquire_is_rejected() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let lock = LockFile::new(temp_dir.path().join("backup.lock"));

        let _guard = lock.acquire().expect("lock should be free");
        let second = lock.acquire();
        assert!(matches!(
            second,
            Err(OrchestratorError::AlreadyRunning { pid }) if pid == std::process::id() as i32
        ));
        assert!(lock.path().exists());
        Ok(())
    }

    #[test]
    fn test_stale_lock_is_replaced() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("backup.lock");
        fs::write(&path, format!("{}\n", DEAD_PID))?;

        let lock = LockFile::new(&path);
        let guard = lock.acquire().expect("stale lock should be replaced");
        assert_eq!(
            fs::read_to_string(guard.path())?.trim(),
            std::process::id().to_string()
        );
        Ok(())
    }

    #[test]
    fn test_garbage_lock_is_stale() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("backup.lock");
        fs::write(&path, "not a pid")?;

        assert!(LockFile::new(&path).acquire().is_ok());
        Ok(())
    }

    #[test]
    fn test_abandoned_empty_lock_is_stale() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("backup.lock");
        let file = fs::File::create(&path)?;
        file.set_modified(SystemTime::now() - STARTING_GRACE * 2)?;
        drop(file);

        let guard = LockFile::new(&path)
            .acquire()
            .expect("abandoned lock should be reclaimed");
        assert_eq!(
            fs::read_to_string(guard.path())?.trim(),
            std::process::id().to_string()
        );
        Ok(())
    }

    #[test]
    fn test_failed_pid_write_leaves_no_lock() -> std::io::Result<()> {
        // Every write to /dev/full fails with ENOSPC
        let Ok(full) = OpenOptions::new().write(true).open("/dev/full") else {
            return Ok(());
        };
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("backup.lock");
        fs::write(&path, "")?;

        let lock = LockFile::new(&path);
        let result = lock.write_pid_or_remove(full, std::process::id());

        assert!(matches!(result, Err(OrchestratorError::Io(_))));
        assert!(!path.exists());
        assert!(lock.acquire().is_ok());
        Ok(())
    }

    #[test]
    fn test_empty_lock_is_held() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("backup.lock");
        fs::write(&path, "")?;

        let result = LockFile::new(&path).acquire();
        assert!(matches!(result, Err(OrchestratorError::AlreadyRunning { .. })));
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn test_release_leaves_foreign_lock() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("backup.lock");
        fs::write(&path, "1\n")?;

        let released = LockFile::new(&path).release_if_owned().expect("release");
        assert!(!released);
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn test_pid_alive() {
        assert!(pid_alive(std::process::id() as i32));
        assert!(!pid_alive(DEAD_PID));
        assert!(!pid_alive(0));
        assert!(!pid_alive(-1));
    }
}
