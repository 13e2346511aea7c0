use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use crate::checksum::Md5Checksum;
use crate::search_path::SearchPathEntry;
use crate::template::expand;
use crate::transport::{sanitize_url, Transport};

/// Compressed variants tried next to a missing local file.
pub const DEFAULT_COMPRESSED_SUFFIXES: &[&str] = &[".gz"];

/// A file found through a local search path directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHit {
    pub path: PathBuf,
    /// Suffix of the compressed variant that matched, if any. Decompression is
    /// left to whoever reads the file.
    pub compressed_suffix: Option<String>,
    pub entry_index: usize,
}

/// An opened remote stream.
pub struct RemoteHit {
    /// URL with credentials and query values redacted.
    pub url: String,
    pub stream: Box<dyn Read + Send>,
    pub entry_index: usize,
}

impl std::fmt::Debug for RemoteHit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteHit")
            .field("url", &self.url)
            .field("entry_index", &self.entry_index)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Located {
    Local(LocalHit),
    Remote(RemoteHit),
}

impl Located {
    pub fn entry_index(&self) -> usize {
        match self {
            Located::Local(hit) => hit.entry_index,
            Located::Remote(hit) => hit.entry_index,
        }
    }
}

/// Walks search path entries in order and reports the first one that has
/// content for a checksum.
///
/// Misses and transport failures are not errors: they only move the walk on
/// to the next entry, and exhausting the list yields `None`.
#[derive(Debug, Clone)]
pub struct SourceLocator<T> {
    transport: T,
    compressed_suffixes: Vec<String>,
}

impl<T: Transport> SourceLocator<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            compressed_suffixes: DEFAULT_COMPRESSED_SUFFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn with_compressed_suffixes(mut self, suffixes: Vec<String>) -> Self {
        self.compressed_suffixes = suffixes;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// First hit among all entries, local or remote.
    pub fn locate(&self, checksum: &Md5Checksum, entries: &[SearchPathEntry]) -> Option<Located> {
        entries
            .iter()
            .enumerate()
            .find_map(|(index, entry)| self.try_entry(checksum, index, entry))
    }

    /// Existence check over local directory entries only; nothing is opened.
    pub fn find_local(
        &self,
        checksum: &Md5Checksum,
        entries: &[SearchPathEntry],
    ) -> Option<LocalHit> {
        self.walk_local(checksum, entries, |path| is_file(path).then_some(()))
            .map(|(hit, ())| hit)
    }

    /// First local file that exists and opens. A candidate that fails to open
    /// is a miss for its entry and the walk moves on.
    pub fn open_local(
        &self,
        checksum: &Md5Checksum,
        entries: &[SearchPathEntry],
    ) -> Option<(LocalHit, File)> {
        self.walk_local(checksum, entries, |path| open_file(checksum, path))
    }

    fn walk_local<R>(
        &self,
        checksum: &Md5Checksum,
        entries: &[SearchPathEntry],
        mut accept: impl FnMut(&str) -> Option<R>,
    ) -> Option<(LocalHit, R)> {
        entries.iter().enumerate().find_map(|(index, entry)| {
            let SearchPathEntry::LocalDirectory {
                template,
                search_compressed,
            } = entry
            else {
                return None;
            };
            self.check_local_entry(checksum, index, template, *search_compressed, &mut accept)
        })
    }

    /// First remote entry whose stream opens. `entry_index` is relative to
    /// `entries`.
    pub fn locate_remote(
        &self,
        checksum: &Md5Checksum,
        entries: &[SearchPathEntry],
    ) -> Option<RemoteHit> {
        entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_remote())
            .find_map(|(index, entry)| self.open_remote(checksum, index, entry.template()))
    }

    fn try_entry(
        &self,
        checksum: &Md5Checksum,
        index: usize,
        entry: &SearchPathEntry,
    ) -> Option<Located> {
        match entry {
            SearchPathEntry::LocalDirectory {
                template,
                search_compressed,
            } => self
                .check_local_entry(checksum, index, template, *search_compressed, |path| {
                    is_file(path).then_some(())
                })
                .map(|(hit, ())| Located::Local(hit)),
            SearchPathEntry::HttpUrl { template } | SearchPathEntry::FtpUrl { template } => self
                .open_remote(checksum, index, template)
                .map(Located::Remote),
        }
    }

    fn check_local_entry<R>(
        &self,
        checksum: &Md5Checksum,
        index: usize,
        template: &str,
        search_compressed: bool,
        mut accept: impl FnMut(&str) -> Option<R>,
    ) -> Option<(LocalHit, R)> {
        let candidate = expand(template, checksum.as_str());
        if let Some(found) = accept(&candidate) {
            let hit = LocalHit {
                path: PathBuf::from(candidate),
                compressed_suffix: None,
                entry_index: index,
            };
            return Some((hit, found));
        }

        if search_compressed {
            for suffix in &self.compressed_suffixes {
                let compressed = format!("{candidate}{suffix}");
                if let Some(found) = accept(&compressed) {
                    let hit = LocalHit {
                        path: PathBuf::from(compressed),
                        compressed_suffix: Some(suffix.clone()),
                        entry_index: index,
                    };
                    return Some((hit, found));
                }
            }
        }

        tracing::debug!(
            target = "hts.ref",
            checksum = %checksum,
            path = %candidate,
            "search path entry miss"
        );
        None
    }

    fn open_remote(
        &self,
        checksum: &Md5Checksum,
        index: usize,
        template: &str,
    ) -> Option<RemoteHit> {
        let url = expand(template, checksum.as_str());
        let safe_url = sanitize_url(&url);
        match self.transport.open(&url) {
            Ok(stream) => Some(RemoteHit {
                url: safe_url,
                stream,
                entry_index: index,
            }),
            Err(err) => {
                tracing::debug!(
                    target = "hts.ref",
                    checksum = %checksum,
                    url = %safe_url,
                    error = %err,
                    "failed to open remote reference"
                );
                None
            }
        }
    }
}

fn is_file(path: &str) -> bool {
    std::fs::metadata(path).is_ok_and(|meta| meta.is_file())
}

fn open_file(checksum: &Md5Checksum, path: &str) -> Option<File> {
    if !is_file(path) {
        return None;
    }
    match File::open(path) {
        Ok(file) => Some(file),
        Err(err) => {
            tracing::debug!(
                target = "hts.ref",
                checksum = %checksum,
                path = %path,
                error = %err,
                "failed to open local reference"
            );
            None
        }
    }
}
