//! File system helpers: atomic writes, directory copies and archive extraction.
//!
//! Everything here is synchronous. Async callers wrap the heavier operations
//! (copies, extraction) in [`tokio::task::spawn_blocking`].

use crate::core::LkgError;
use anyhow::{Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Creates `path` and its parents if missing.
///
/// # Errors
///
/// Fails when `path` exists but is not a directory, or cannot be created.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if path.exists() && !path.is_dir() {
        return Err(anyhow::anyhow!("Path exists but is not a directory: {}", path.display()));
    }
    fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))
}

/// Writes `content` to `path` through a temporary sibling and a rename.
///
/// Readers see either the previous file or the complete new one, never a partial
/// write.
///
/// # Errors
///
/// Fails when the parent directory cannot be created or the write/rename fails.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }

    let temp_path = temp_sibling(path);
    {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;
        file.write_all(content)
            .with_context(|| format!("Failed to write to temp file: {}", temp_path.display()))?;
        file.sync_all().with_context(|| "Failed to sync file to disk")?;
    }

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;

    Ok(())
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    name.push(format!(".{}.{seq}.tmp", std::process::id()));
    path.with_file_name(name)
}

/// Recursively copies `src` into `dst`, creating `dst` if needed.
///
/// # Errors
///
/// Fails on the first entry that cannot be read or written.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    ensure_dir(dst)?;
    for entry in walkdir::WalkDir::new(src).min_depth(1) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let relative = entry.path().strip_prefix(src)?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            ensure_dir(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                ensure_dir(parent)?;
            }
            fs::copy(entry.path(), &target).with_context(|| {
                format!("Failed to copy {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}

/// Removes a directory tree, treating "already gone" as success.
///
/// # Errors
///
/// Fails for any error other than `NotFound`.
pub fn remove_dir_all(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove directory: {}", path.display())),
    }
}

/// Checks that `archive` is a readable zip whose entries all decompress.
///
/// # Errors
///
/// Returns [`LkgError::ArchiveCorrupt`] for truncated or otherwise invalid archives.
pub fn validate_zip(archive: &Path) -> Result<(), LkgError> {
    let corrupt = |reason: String| LkgError::ArchiveCorrupt {
        path: archive.display().to_string(),
        reason,
    };

    let file = fs::File::open(archive).map_err(|e| corrupt(e.to_string()))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| corrupt(e.to_string()))?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| corrupt(e.to_string()))?;
        io::copy(&mut entry, &mut io::sink()).map_err(|e| corrupt(e.to_string()))?;
    }
    Ok(())
}

/// Extracts `archive` into `dest`.
///
/// With `strip_first_component` the leading path component of every entry is
/// dropped, which unwraps archives that put the real tree inside a single container
/// folder. Entries with unsafe paths (absolute, `..`) are skipped.
///
/// # Errors
///
/// Returns [`LkgError::ArchiveCorrupt`] when the archive cannot be read and
/// [`LkgError::IoError`] when writing fails.
pub fn extract_zip(archive: &Path, dest: &Path, strip_first_component: bool) -> Result<usize, LkgError> {
    let corrupt = |reason: String| LkgError::ArchiveCorrupt {
        path: archive.display().to_string(),
        reason,
    };

    let file = fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| corrupt(e.to_string()))?;
    fs::create_dir_all(dest)?;

    let mut written = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| corrupt(e.to_string()))?;
        let Some(name) = entry.enclosed_name() else {
            tracing::warn!("Skipping unsafe archive entry '{}'", entry.name());
            continue;
        };
        let relative: PathBuf = if strip_first_component {
            name.components().skip(1).collect()
        } else {
            name.components().collect()
        };
        if relative.as_os_str().is_empty()
            || relative.components().any(|c| !matches!(c, Component::Normal(_)))
        {
            continue;
        }

        let target = dest.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target)?;
        io::copy(&mut entry, &mut out).map_err(|e| corrupt(e.to_string()))?;
        written += 1;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn make_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("a").join("b.txt");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn test_concurrent_atomic_writes_use_distinct_temp_files() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("p_1-0-0-1.xml");
        assert_ne!(temp_sibling(&path), temp_sibling(&path));

        let writers: Vec<_> = (0..8u8)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || atomic_write(&path, &[b'a' + i; 4096]))
            })
            .collect();
        for writer in writers {
            writer.join().unwrap().unwrap();
        }

        let content = fs::read(&path).unwrap();
        assert_eq!(content.len(), 4096);
        assert!(content.iter().all(|b| *b == content[0]));
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_copy_dir_all() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("nested").join("f.txt"), "x").unwrap();
        let dst = temp.path().join("dst");
        copy_dir_all(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst.join("nested").join("f.txt")).unwrap(), "x");
    }

    #[test]
    fn test_extract_zip_strips_container_folder() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("drop.zip");
        make_zip(&archive, &[("drop/bin/tool.dll", b"dll"), ("drop/readme.txt", b"hi")]);

        let dest = temp.path().join("out");
        let count = extract_zip(&archive, &dest, true).unwrap();
        assert_eq!(count, 2);
        assert_eq!(fs::read(dest.join("bin").join("tool.dll")).unwrap(), b"dll");
        assert!(!dest.join("drop").exists());
    }

    #[test]
    fn test_validate_zip_rejects_truncated_archive() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("bad.zip");
        make_zip(&archive, &[("a.txt", b"hello world")]);
        let bytes = fs::read(&archive).unwrap();
        fs::write(&archive, &bytes[..bytes.len() / 2]).unwrap();
        assert!(matches!(validate_zip(&archive), Err(LkgError::ArchiveCorrupt { .. })));
    }

    #[test]
    fn test_remove_dir_all_missing_is_ok() {
        let temp = tempfile::tempdir().unwrap();
        remove_dir_all(&temp.path().join("missing")).unwrap();
    }
}
