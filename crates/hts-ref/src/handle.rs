use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Where the bytes behind a [`ContentHandle`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    /// Committed cache entry.
    Cache(PathBuf),
    /// File found through a local search path directory.
    SearchPath {
        path: PathBuf,
        compressed_suffix: Option<String>,
    },
    /// Remote URL (credentials and query values redacted).
    Remote(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    CacheFile,
    RemoteStream,
    InMemoryBuffer,
}

#[derive(Debug)]
enum Backing {
    CacheFile(File),
    /// Verified remote payload spooled to an anonymous temporary file.
    RemoteStream(File),
    InMemoryBuffer(Cursor<Vec<u8>>),
}

/// Readable, seekable handle on resolved reference bytes.
///
/// All underlying resources are released when the handle is closed or
/// dropped. [`ContentHandle::close`] takes the handle by value, so it can only
/// ever run once.
#[derive(Debug)]
pub struct ContentHandle {
    source: ContentSource,
    size: u64,
    backing: Backing,
}

impl ContentHandle {
    pub(crate) fn cache_file(source: ContentSource, file: File) -> io::Result<Self> {
        let size = file.metadata()?.len();
        Ok(Self {
            source,
            size,
            backing: Backing::CacheFile(file),
        })
    }

    pub(crate) fn remote_stream(source: ContentSource, file: File, size: u64) -> Self {
        Self {
            source,
            size,
            backing: Backing::RemoteStream(file),
        }
    }

    pub(crate) fn in_memory(source: ContentSource, buffer: Cursor<Vec<u8>>) -> Self {
        Self {
            source,
            size: buffer.get_ref().len() as u64,
            backing: Backing::InMemoryBuffer(buffer),
        }
    }

    pub fn kind(&self) -> HandleKind {
        match self.backing {
            Backing::CacheFile(_) => HandleKind::CacheFile,
            Backing::RemoteStream(_) => HandleKind::RemoteStream,
            Backing::InMemoryBuffer(_) => HandleKind::InMemoryBuffer,
        }
    }

    pub fn source(&self) -> &ContentSource {
        &self.source
    }

    /// On-disk path for file-backed handles from the cache or search path.
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ContentSource::Cache(path) | ContentSource::SearchPath { path, .. } => Some(path),
            ContentSource::Remote(_) => None,
        }
    }

    /// Total length in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn close(self) -> io::Result<()> {
        match self.backing {
            Backing::CacheFile(file) | Backing::RemoteStream(file) => drop(file),
            Backing::InMemoryBuffer(buffer) => drop(buffer),
        }
        Ok(())
    }
}

impl Read for ContentHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.backing {
            Backing::CacheFile(file) | Backing::RemoteStream(file) => file.read(buf),
            Backing::InMemoryBuffer(buffer) => buffer.read(buf),
        }
    }
}

impl Seek for ContentHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.backing {
            Backing::CacheFile(file) | Backing::RemoteStream(file) => file.seek(pos),
            Backing::InMemoryBuffer(buffer) => buffer.seek(pos),
        }
    }
}
