//! Lease files shared through a directory.
//!
//! Each key maps to `<dir>/<key>.lease` holding a JSON [`LeaseRecord`].
//! Every operation takes an exclusive `fs2` advisory lock on the file for
//! its read-decide-write cycle, so instances on one host (or on a shared
//! filesystem with working advisory locks) never interleave updates. File
//! I/O runs on the blocking pool.

use std::fs::{File, OpenOptions};
use std::io::{Read as _, Seek as _, SeekFrom, Write as _};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use fs2::FileExt;
use tracing::warn;

use crate::error::{CoordinationError, CoordinationResult};
use crate::lease::{LeaseLock, LeaseRecord, grant_acquire, grant_renew, now_ms};

/// Suffix of lease files.
pub const LEASE_SUFFIX: &str = "lease";

/// File-backed [`LeaseLock`].
#[derive(Debug, Clone)]
pub struct FileLeaseLock {
    dir: PathBuf,
}

impl FileLeaseLock {
    /// Store lease files in `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinationError::Io`] if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> CoordinationResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| CoordinationError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Lease file for `key`. Characters outside `[A-Za-z0-9_-]` become `_`.
    #[must_use]
    pub fn lease_path(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.{LEASE_SUFFIX}"))
    }

    /// Run `update` on the current record under the file lock. If it
    /// returns `Some(next)`, `next` is written (`None` inside clears the file).
    async fn with_record<T, F>(&self, key: &str, update: F) -> CoordinationResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Option<LeaseRecord>) -> (T, Option<Option<LeaseRecord>>) + Send + 'static,
    {
        let path = self.lease_path(key);
        tokio::task::spawn_blocking(move || locked_update(&path, update))
            .await
            .map_err(|e| CoordinationError::Backend(format!("lease file task failed: {e}")))?
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CoordinationError + '_ {
    move |source| CoordinationError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn locked_update<T, F>(path: &Path, update: F) -> CoordinationResult<T>
where
    F: FnOnce(Option<LeaseRecord>) -> (T, Option<Option<LeaseRecord>>),
{
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(io_error(path))?;
    file.lock_exclusive().map_err(io_error(path))?;

    let result = read_and_update(&mut file, path, update);
    if let Err(e) = FileExt::unlock(&file) {
        warn!(path = %path.display(), error = %e, "Failed to unlock lease file");
    }
    result
}

fn read_and_update<T, F>(file: &mut File, path: &Path, update: F) -> CoordinationResult<T>
where
    F: FnOnce(Option<LeaseRecord>) -> (T, Option<Option<LeaseRecord>>),
{
    let mut content = String::new();
    file.read_to_string(&mut content).map_err(io_error(path))?;

    let current = if content.trim().is_empty() {
        None
    } else {
        match serde_json::from_str::<LeaseRecord>(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt lease file");
                None
            },
        }
    };

    let (result, next) = update(current);
    if let Some(next) = next {
        let body = match next {
            Some(record) => serde_json::to_string(&record)
                .map_err(|e| CoordinationError::Backend(format!("failed to encode lease: {e}")))?,
            None => String::new(),
        };
        file.set_len(0).map_err(io_error(path))?;
        file.seek(SeekFrom::Start(0)).map_err(io_error(path))?;
        file.write_all(body.as_bytes()).map_err(io_error(path))?;
        file.sync_data().map_err(io_error(path))?;
    }
    Ok(result)
}

#[async_trait]
impl LeaseLock for FileLeaseLock {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> CoordinationResult<bool> {
        let holder = holder.to_string();
        self.with_record(key, move |current| {
            match grant_acquire(current.as_ref(), &holder, ttl, now_ms()) {
                Some(record) => (true, Some(Some(record))),
                None => (false, None),
            }
        })
        .await
    }

    async fn renew(&self, key: &str, holder: &str, ttl: Duration) -> CoordinationResult<bool> {
        let holder = holder.to_string();
        self.with_record(key, move |current| {
            match grant_renew(current.as_ref(), &holder, ttl, now_ms()) {
                Some(record) => (true, Some(Some(record))),
                None => (false, None),
            }
        })
        .await
    }

    async fn release(&self, key: &str, holder: &str) -> CoordinationResult<bool> {
        let holder = holder.to_string();
        self.with_record(key, move |current| {
            if current.is_some_and(|r| r.holder == holder) {
                (true, Some(None))
            } else {
                (false, None)
            }
        })
        .await
    }

    async fn current_holder(&self, key: &str) -> CoordinationResult<Option<String>> {
        self.with_record(key, |current| {
            let now = now_ms();
            (current.filter(|r| !r.is_expired(now)).map(|r| r.holder), None)
        })
        .await
    }
}
