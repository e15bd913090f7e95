//! Periodic removal of staged files that outlived their request, e.g. after a crash.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use crate::params::is_generated_file_name;

/// Staged files currently owned by a running request, never swept.
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<Mutex<HashSet<PathBuf>>>);

impl InFlight {
    fn with<T>(&self, f: impl FnOnce(&mut HashSet<PathBuf>) -> T) -> T {
        f(&mut self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Must happen before the file is created.
    pub fn register(&self, path: &Path) {
        self.with(|paths| paths.insert(path.to_path_buf()));
    }

    pub fn release(&self, path: &Path) {
        self.with(|paths| paths.remove(path));
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.with(|paths| paths.contains(path))
    }
}

/// Starts the periodic sweep of `dir`.
///
/// This spawns a background task running every `max_age`.
/// Runs [`sweep`].
pub fn start_sweep_task(dir: PathBuf, max_age: Duration, in_flight: InFlight) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(max_age);
        loop {
            interval.tick().await;
            match sweep(&dir, max_age, &in_flight).await {
                Ok(0) => {}
                Ok(removed) => log::info!(removed; "swept stale staged files"),
                Err(e) => log::warn!(e:debug; "sweep failed"),
            }
        }
    });
}

/// Removes generated staging files in `dir` older than `max_age`.
///
/// Age is determined by [`std::fs::Metadata::modified`].
/// Only names produced for requests without configured file names are considered,
/// everything else in the directory belongs to the served tools.
/// Files of requests still running are skipped, whatever their age.
pub async fn sweep(dir: &Path, max_age: Duration, in_flight: &InFlight) -> std::io::Result<usize> {
    let mut removed = 0;
    let mut rd = tokio::fs::read_dir(dir).await?;
    let now = SystemTime::now();
    while let Some(entry) = rd.next_entry().await? {
        let name = entry.file_name();
        if !name.to_str().is_some_and(is_generated_file_name) {
            continue;
        }
        let path = entry.path();
        if in_flight.contains(&path) {
            continue;
        }
        // The owning request may remove its file at any point, that is not an error.
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if now.duration_since(modified).unwrap_or(Duration::ZERO) > max_age {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    log::trace!(path:debug; "deleted stale staged file");
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
    }
    Ok(removed)
}
