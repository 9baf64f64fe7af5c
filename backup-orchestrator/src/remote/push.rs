//! Interval-gated push of the archive store.
//!
//! The push marker's mtime records the last successful push. A push is due
//! when the marker is missing or at least `push_interval_days` old.

use super::RemoteEndpoint;
use crate::Result;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::info;

pub const MARKER_NAME: &str = ".last_push";
const SECS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PushOutcome {
    Pushed,
    Skipped { age_days: f64 },
}

#[derive(Debug, Clone)]
pub struct PushMarker {
    path: PathBuf,
}

impl PushMarker {
    pub fn in_store(archive_store: &Path) -> Self {
        Self {
            path: archive_store.join(MARKER_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Age in days at `now`; `None` when the marker does not exist.
    /// A marker from the future counts as age 0.
    pub fn age_days(&self, now: SystemTime) -> io::Result<Option<f64>> {
        let modified = match fs::metadata(&self.path) {
            Ok(m) => m.modified()?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let age = now.duration_since(modified).unwrap_or_default();
        Ok(Some(age.as_secs_f64() / SECS_PER_DAY))
    }

    /// Create the marker if needed and set its mtime to `now`.
    pub fn touch(&self, now: SystemTime) -> io::Result<()> {
        let file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)?;
        file.set_modified(now)
    }
}

/// Due when there is no marker or it is at least `interval_days` old.
pub fn is_due(age_days: Option<f64>, interval_days: u64) -> bool {
    match age_days {
        None => true,
        Some(age) => age >= interval_days as f64,
    }
}

pub struct Pusher<'a, R: RemoteEndpoint + ?Sized> {
    remote: &'a R,
    archive_store: PathBuf,
    marker: PushMarker,
    interval_days: u64,
}

impl<'a, R: RemoteEndpoint + ?Sized> Pusher<'a, R> {
    pub fn new(remote: &'a R, archive_store: impl Into<PathBuf>, interval_days: u64) -> Self {
        let archive_store = archive_store.into();
        Self {
            remote,
            marker: PushMarker::in_store(&archive_store),
            archive_store,
            interval_days,
        }
    }

    pub fn marker(&self) -> &PushMarker {
        &self.marker
    }

    /// Push the archive store if due or forced, then refresh the marker.
    ///
    /// A failed transfer leaves the marker alone, so the next run retries.
    pub fn push(&self, force: bool, now: SystemTime) -> Result<PushOutcome> {
        let age = self.marker.age_days(now)?;
        if !force && !is_due(age, self.interval_days) {
            let age_days = age.unwrap_or_default();
            info!(
                age_days = %format!("{:.1}", age_days),
                interval_days = self.interval_days,
                "Push not due, skipping"
            );
            return Ok(PushOutcome::Skipped { age_days });
        }

        self.remote.push(&self.archive_store)?;
        self.marker.touch(now)?;
        info!(archive_store = %self.archive_store.display(), forced = force, "Archive store pushed");
        Ok(PushOutcome::Pushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OrchestratorError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingRemote {
        pushes: AtomicUsize,
        fail: bool,
    }

    impl RemoteEndpoint for CountingRemote {
        fn check(&self) -> Result<()> {
            Ok(())
        }

        fn push(&self, _archive_store: &Path) -> Result<()> {
            self.pushes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(OrchestratorError::Transfer("connection reset".to_string()));
            }
            Ok(())
        }
    }

    fn days(n: u64) -> Duration {
        Duration::from_secs(n * 86_400)
    }

    fn age_marker(marker: &PushMarker, now: SystemTime, age: Duration) -> std::io::Result<()> {
        marker.touch(now - age)
    }

    #[test]
    fn test_is_due() {
        assert!(is_due(None, 30));
        assert!(is_due(Some(30.0), 30));
        assert!(is_due(Some(45.2), 30));
        assert!(!is_due(Some(29.9), 30));
    }

    #[test]
    fn test_first_push_creates_marker() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let remote = CountingRemote::default();
        let pusher = Pusher::new(&remote, temp_dir.path(), 30);
        let now = SystemTime::now();

        let outcome = pusher.push(false, now).expect("push");

        assert_eq!(outcome, PushOutcome::Pushed);
        assert_eq!(remote.pushes.load(Ordering::SeqCst), 1);
        let age = pusher.marker().age_days(now)?.expect("marker exists");
        assert!(age < 0.001);
        Ok(())
    }

    #[test]
    fn test_recent_marker_skips_push() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let remote = CountingRemote::default();
        let pusher = Pusher::new(&remote, temp_dir.path(), 30);
        let now = SystemTime::now();
        age_marker(pusher.marker(), now, days(3))?;

        let outcome = pusher.push(false, now).expect("push");

        assert!(matches!(outcome, PushOutcome::Skipped { age_days } if (age_days - 3.0).abs() < 0.01));
        assert_eq!(remote.pushes.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn test_force_overrides_interval() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let remote = CountingRemote::default();
        let pusher = Pusher::new(&remote, temp_dir.path(), 30);
        let now = SystemTime::now();
        age_marker(pusher.marker(), now, days(3))?;

        assert_eq!(pusher.push(true, now).expect("push"), PushOutcome::Pushed);
        assert_eq!(remote.pushes.load(Ordering::SeqCst), 1);
        assert!(pusher.marker().age_days(now)?.expect("marker") < 0.001);
        Ok(())
    }

    #[test]
    fn test_old_marker_pushes() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let remote = CountingRemote::default();
        let pusher = Pusher::new(&remote, temp_dir.path(), 30);
        let now = SystemTime::now();
        age_marker(pusher.marker(), now, days(31))?;

        assert_eq!(pusher.push(false, now).expect("push"), PushOutcome::Pushed);
        Ok(())
    }

    #[test]
    fn test_failed_push_keeps_marker() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let remote = CountingRemote {
            fail: true,
            ..Default::default()
        };
        let pusher = Pusher::new(&remote, temp_dir.path(), 30);
        let now = SystemTime::now();
        age_marker(pusher.marker(), now, days(40))?;

        let result = pusher.push(false, now);

        assert!(matches!(result, Err(OrchestratorError::Transfer(_))));
        let age = pusher.marker().age_days(now)?.expect("marker");
        assert!((age - 40.0).abs() < 0.01);
        Ok(())
    }

    #[test]
    fn test_future_marker_counts_as_fresh() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let marker = PushMarker::in_store(temp_dir.path());
        let now = SystemTime::now();
        marker.touch(now + days(2))?;

        assert_eq!(marker.age_days(now)?, Some(0.0));
        Ok(())
    }
}
