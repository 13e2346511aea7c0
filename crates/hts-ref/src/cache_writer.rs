//! Atomic population of checksum-addressed cache entries.
//!
//! Content is streamed into a uniquely named temporary file next to the final
//! path, digested on the way, and only renamed into place once the digest
//! matches and the file has been made read-only. A reader therefore never
//! sees a partial or unverified file under the final name.

use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::checksum::{Md5Checksum, Md5Reader};
use crate::error::{CacheWriteOp, RefError, Result};
use crate::template::expand;

/// Mode for cache directories: world writable with the sticky bit, so a
/// shared cache works for every user.
pub const DEFAULT_DIR_MODE: u32 = 0o1777;

/// Mode of a committed cache file.
pub const CACHE_FILE_MODE: u32 = 0o444;

#[derive(Debug, Clone, Copy)]
pub struct CacheWriter {
    dir_mode: u32,
}

impl Default for CacheWriter {
    fn default() -> Self {
        Self {
            dir_mode: DEFAULT_DIR_MODE,
        }
    }
}

impl CacheWriter {
    pub fn with_dir_mode(dir_mode: u32) -> Self {
        Self { dir_mode }
    }

    /// Path a checksum is cached under for `cache_template`.
    pub fn cache_path(cache_template: &str, checksum: &Md5Checksum) -> PathBuf {
        PathBuf::from(expand(cache_template, checksum.as_str()))
    }

    /// Stream `content` into the cache entry for `checksum`.
    ///
    /// Returns the committed path. On any error the final path is left
    /// untouched and the temporary file is removed.
    pub fn populate(
        &self,
        cache_template: &str,
        checksum: &Md5Checksum,
        content: impl Read,
    ) -> Result<PathBuf> {
        let path = Self::cache_path(cache_template, checksum);
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        create_dir_chain(&parent, self.dir_mode)?;

        let (tmp_path, file) = open_unique_tmp_file(&path)
            .map_err(RefError::cache_write(CacheWriteOp::CreateTemp, &path))?;

        let written = write_and_digest(file, content, &tmp_path);
        let (digest, len) = match written {
            Ok(done) => done,
            Err(err) => {
                remove_tmp_best_effort(&tmp_path, "write failure");
                return Err(err);
            }
        };

        if !checksum.matches_hex(digest.as_str()) {
            remove_tmp_best_effort(&tmp_path, "checksum mismatch");
            return Err(RefError::IntegrityMismatch {
                expected: checksum.to_string(),
                found: digest.to_string(),
                source_desc: path.display().to_string(),
            });
        }

        if let Err(err) = set_read_only(&tmp_path) {
            remove_tmp_best_effort(&tmp_path, "permission failure");
            return Err(RefError::cache_write(CacheWriteOp::SetPermissions, &tmp_path)(err));
        }

        match fs::rename(&tmp_path, &path) {
            Ok(()) => {}
            // `rename` does not replace an existing file on every platform. A file
            // already at the final path holds the same verified bytes.
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists || path.is_file() => {
                tracing::debug!(
                    target = "hts.ref",
                    path = %path.display(),
                    error = %err,
                    "cache entry already published by another writer"
                );
                remove_tmp_best_effort(&tmp_path, "lost publish race");
                return Ok(path);
            }
            Err(err) => {
                remove_tmp_best_effort(&tmp_path, "rename failure");
                return Err(RefError::cache_write(CacheWriteOp::Rename, &path)(err));
            }
        }

        sync_dir_best_effort(&parent);
        tracing::debug!(
            target = "hts.ref",
            checksum = %checksum,
            path = %path.display(),
            bytes = len,
            "committed cache entry"
        );
        Ok(path)
    }
}

fn write_and_digest(
    mut file: File,
    content: impl Read,
    tmp_path: &Path,
) -> Result<(Md5Checksum, u64)> {
    let mut reader = Md5Reader::new(content);
    let written = (|| -> io::Result<()> {
        io::copy(&mut reader, &mut file)?;
        file.flush()?;
        file.sync_all()
    })();
    written.map_err(RefError::cache_write(CacheWriteOp::Write, tmp_path))?;
    Ok(reader.finish())
}

/// Create `dir` and any missing ancestors, applying `mode` to each directory
/// created here. Existing directories keep their permissions.
pub fn create_dir_chain(dir: &Path, mode: u32) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }

    let mut missing = Vec::new();
    let mut cursor = Some(dir);
    while let Some(current) = cursor {
        if current.as_os_str().is_empty() || current.is_dir() {
            break;
        }
        missing.push(current);
        cursor = current.parent();
    }

    for current in missing.into_iter().rev() {
        match create_dir_with_mode(current, mode) {
            Ok(()) => {}
            // Another process may be building the same chain.
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists && current.is_dir() => {}
            Err(err) => return Err(RefError::cache_write(CacheWriteOp::CreateDir, current)(err)),
        }
    }
    Ok(())
}

#[cfg(unix)]
fn create_dir_with_mode(dir: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::{DirBuilderExt, PermissionsExt};

    fs::DirBuilder::new().mode(mode).create(dir)?;
    // The builder's mode is filtered through the umask.
    fs::set_permissions(dir, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn create_dir_with_mode(dir: &Path, _mode: u32) -> io::Result<()> {
    fs::create_dir(dir)
}

#[cfg(unix)]
fn set_read_only(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(CACHE_FILE_MODE))
}

#[cfg(not(unix))]
fn set_read_only(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(true);
    fs::set_permissions(path, permissions)
}

/// Exclusively create `<dest>.tmp_<pid>_<thread>_<nonce>`, retrying with a new
/// name while the candidate already exists.
fn open_unique_tmp_file(dest: &Path) -> io::Result<(PathBuf, File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("cache path has no file name"))?;
    let pid = std::process::id();
    let mut thread_hash = current_thread_hash();

    loop {
        let nonce = clock_nonce();
        // Bump every attempt so the name changes even if the clock does not.
        thread_hash = thread_hash.wrapping_add(1);

        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!(".tmp_{pid}_{thread_hash}_{nonce}"));
        let tmp_path = dest.with_file_name(tmp_name);

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}

fn current_thread_hash() -> u32 {
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish() as u32
}

fn clock_nonce() -> u32 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => (elapsed.as_secs() as u32) ^ elapsed.subsec_nanos(),
        Err(_) => 0,
    }
}

fn remove_tmp_best_effort(path: &Path, reason: &'static str) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::debug!(
                target = "hts.ref",
                path = %path.display(),
                reason,
                error = %err,
                "failed to remove temporary cache file"
            );
        }
    }
}

fn sync_dir_best_effort(dir: &Path) {
    #[cfg(unix)]
    if let Err(err) = File::open(dir).and_then(|dir| dir.sync_all()) {
        tracing::trace!(
            target = "hts.ref",
            dir = %dir.display(),
            error = %err,
            "failed to sync cache directory"
        );
    }

    #[cfg(not(unix))]
    let _ = dir;
}
