//! File-mirroring seam used by the file-share and local backends.
//!
//! Directory enumeration and tree copies go through [`FileMirror`] so tests can
//! substitute an in-memory tree for real shares.

use crate::core::LkgError;
use crate::utils::{copy_dir_all, remove_dir_all};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Enumerates and copies trees addressed by path strings.
#[async_trait]
pub trait FileMirror: Send + Sync {
    /// Entry names directly under `path`. A missing directory yields an empty list.
    async fn list_dir(&self, path: &str) -> Result<Vec<String>, LkgError>;

    /// Whether `path` exists.
    async fn exists(&self, path: &str) -> Result<bool, LkgError>;

    /// Makes `to` an exact copy of the tree at `from`.
    async fn mirror(&self, from: &str, to: &Path) -> Result<(), LkgError>;

    /// Makes `to` point at `from` without copying.
    async fn link(&self, from: &str, to: &Path) -> Result<(), LkgError>;
}

/// [`FileMirror`] over the local file system (including mounted shares).
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileMirror;

#[async_trait]
impl FileMirror for LocalFileMirror {
    async fn list_dir(&self, path: &str) -> Result<Vec<String>, LkgError> {
        let mut entries = match tokio::fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    async fn exists(&self, path: &str) -> Result<bool, LkgError> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn mirror(&self, from: &str, to: &Path) -> Result<(), LkgError> {
        let src = PathBuf::from(from);
        if !tokio::fs::try_exists(&src).await? {
            return Err(LkgError::NotFound {
                what: from.to_string(),
            });
        }
        let dst = to.to_path_buf();
        tokio::task::spawn_blocking(move || {
            remove_dir_all(&dst)?;
            copy_dir_all(&src, &dst)
        })
        .await
        .map_err(LkgError::other)?
        .map_err(|e| LkgError::other(format!("{e:#}")))
    }

    async fn link(&self, from: &str, to: &Path) -> Result<(), LkgError> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::symlink_metadata(to).await {
            Ok(meta) if meta.file_type().is_symlink() => tokio::fs::remove_file(to).await?,
            Ok(_) => tokio::fs::remove_dir_all(to).await?,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        #[cfg(unix)]
        tokio::fs::symlink(from, to).await?;
        #[cfg(windows)]
        tokio::fs::symlink_dir(from, to).await?;

        tracing::debug!("Linked {} -> {}", to.display(), from);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("nope");
        let names = LocalFileMirror.list_dir(missing.to_str().unwrap()).await.unwrap();
        assert!(names.is_empty());
    }

    #[tokio::test]
    async fn test_mirror_replaces_destination() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("bin")).unwrap();
        std::fs::write(src.join("bin").join("a.dll"), b"a").unwrap();
        let dst = temp.path().join("dst");
        std::fs::create_dir_all(&dst).unwrap();
        std::fs::write(dst.join("stale.txt"), b"old").unwrap();

        LocalFileMirror.mirror(src.to_str().unwrap(), &dst).await.unwrap();
        assert!(dst.join("bin").join("a.dll").exists());
        assert!(!dst.join("stale.txt").exists());

        let mut names = LocalFileMirror.list_dir(src.to_str().unwrap()).await.unwrap();
        names.sort();
        assert_eq!(names, vec!["bin".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_link_points_at_source() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("f"), b"x").unwrap();
        let dst = temp.path().join("out").join("Foo");

        LocalFileMirror.link(src.to_str().unwrap(), &dst).await.unwrap();
        LocalFileMirror.link(src.to_str().unwrap(), &dst).await.unwrap();
        assert_eq!(std::fs::read(dst.join("f")).unwrap(), b"x");
    }
}
