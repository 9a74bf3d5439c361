//! Cross-process file locks under the cache root.
//!
//! Lock files live in `{cache_dir}/.locks/{name}.lock`. A lock is held for as long as
//! the returned [`CacheLock`] is alive and is released on drop. Two flavors exist:
//!
//! - [`CacheLock::acquire`] waits indefinitely (BDF usage sidecar updates)
//! - [`CacheLock::acquire_with_timeout`] polls with a bounded wait (Azure CLI token
//!   cache repair, where a stuck peer must not hang the build)

use crate::constants::LOCK_POLL_INTERVAL;
use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// An exclusive lock on `{cache_dir}/.locks/{name}.lock`.
pub struct CacheLock {
    file: Arc<File>,
    path: PathBuf,
}

impl CacheLock {
    /// Acquires the lock, waiting as long as it takes.
    ///
    /// The blocking OS lock call runs on `spawn_blocking` so the runtime keeps
    /// making progress.
    ///
    /// # Errors
    ///
    /// Fails when the locks directory or lock file cannot be created, or the OS
    /// refuses the lock.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use bblkg_cli::cache::CacheLock;
    /// use std::path::Path;
    ///
    /// # async fn example() -> anyhow::Result<()> {
    /// let lock = CacheLock::acquire(Path::new("/tmp/bblkg-cache"), "bdf-usage").await?;
    /// // update the shared file...
    /// drop(lock);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn acquire(cache_dir: &Path, name: &str) -> Result<Self> {
        let lock_path = Self::prepare(cache_dir, name).await?;
        let path_clone = lock_path.clone();
        let name = name.to_string();

        let file = tokio::task::spawn_blocking(move || -> Result<File> {
            let file = open_lock_file(&path_clone)?;
            file.lock_exclusive().with_context(|| format!("Failed to acquire lock for: {name}"))?;
            Ok(file)
        })
        .await
        .context("Failed to spawn blocking task for lock acquisition")??;

        Ok(Self {
            file: Arc::new(file),
            path: lock_path,
        })
    }

    /// Acquires the lock, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Fails with a timeout error when another holder keeps the lock past `timeout`,
    /// or for the same reasons as [`CacheLock::acquire`].
    pub async fn acquire_with_timeout(cache_dir: &Path, name: &str, timeout: Duration) -> Result<Self> {
        let lock_path = Self::prepare(cache_dir, name).await?;
        let path_clone = lock_path.clone();
        let file = tokio::task::spawn_blocking(move || open_lock_file(&path_clone))
            .await
            .context("spawn_blocking panicked")??;
        let file = Arc::new(file);

        let start = Instant::now();
        loop {
            let file_clone = Arc::clone(&file);
            let attempt = tokio::task::spawn_blocking(move || file_clone.try_lock_exclusive())
                .await
                .context("spawn_blocking panicked")?;

            if let Ok(true) = attempt {
                debug!(lock = name, wait_ms = start.elapsed().as_millis(), "Cache lock acquired");
                return Ok(Self {
                    file,
                    path: lock_path,
                });
            }

            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(anyhow::anyhow!("Timeout acquiring lock '{}' after {:?}", name, timeout));
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL.min(remaining)).await;
        }
    }

    async fn prepare(cache_dir: &Path, name: &str) -> Result<PathBuf> {
        let locks_dir = cache_dir.join(".locks");
        tokio::fs::create_dir_all(&locks_dir).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                anyhow::anyhow!(
                    "Permission denied: cannot create locks directory at {}",
                    locks_dir.display()
                )
            } else {
                anyhow::anyhow!("Failed to create directory {}: {}", locks_dir.display(), e)
            }
        })?;
        Ok(locks_dir.join(format!("{}.lock", sanitize(name))))
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open lock file: {}", path.display()))
}

fn sanitize(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect()
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        #[allow(unstable_name_collisions)]
        if let Err(e) = FileExt::unlock(self.file.as_ref()) {
            tracing::warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
    }
}
