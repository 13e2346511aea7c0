use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::checksum::{Md5Checksum, Md5Reader};
use crate::error::{RefError, Result};
use crate::handle::{ContentHandle, ContentSource};

/// Payloads up to this size stay in memory; larger ones are spooled to an
/// anonymous temporary file.
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 64 * 1024 * 1024;

const SPOOL_CHUNK_BYTES: usize = 64 * 1024;

enum Body {
    Memory(Vec<u8>),
    Spooled(File),
}

/// Bytes read from a remote source, together with their digest.
///
/// Owned by one resolution attempt: it is either discarded (verification
/// failed) or turned into a [`ContentHandle`].
pub struct FetchedContent {
    source: String,
    size: u64,
    digest: Md5Checksum,
    body: Body,
}

impl std::fmt::Debug for FetchedContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedContent")
            .field("source", &self.source)
            .field("size", &self.size)
            .field("digest", &self.digest)
            .field("spooled", &self.is_spooled())
            .finish()
    }
}

impl FetchedContent {
    /// Drain `reader`, digesting as it goes.
    ///
    /// Payloads over `memory_limit` are spooled to an anonymous file in
    /// `spool_dir`, or the system temporary directory when it is `None`.
    /// Failures reading `reader` are [`RefError::RemoteRead`]; failures
    /// writing the spool file are [`RefError::Spool`].
    pub fn read_from(
        reader: impl Read,
        source: String,
        memory_limit: u64,
        spool_dir: Option<&Path>,
    ) -> Result<Self> {
        let remote_read = |err: io::Error| RefError::RemoteRead {
            url: source.clone(),
            source: err,
        };

        let mut reader = Md5Reader::new(reader);
        let mut buffer = Vec::new();
        (&mut reader)
            .take(memory_limit.saturating_add(1))
            .read_to_end(&mut buffer)
            .map_err(remote_read)?;

        let body = if buffer.len() as u64 <= memory_limit {
            Body::Memory(buffer)
        } else {
            let spool_err = |source: io::Error| RefError::Spool { source };
            let mut spool = match spool_dir {
                Some(dir) => tempfile::tempfile_in(dir),
                None => tempfile::tempfile(),
            }
            .map_err(spool_err)?;
            spool.write_all(&buffer).map_err(spool_err)?;
            drop(buffer);

            let mut chunk = vec![0_u8; SPOOL_CHUNK_BYTES];
            loop {
                let n = match reader.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => return Err(remote_read(err)),
                };
                spool.write_all(&chunk[..n]).map_err(spool_err)?;
            }
            spool.flush().map_err(spool_err)?;
            Body::Spooled(spool)
        };

        let (digest, size) = reader.finish();
        Ok(Self {
            source,
            size,
            digest,
            body,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn digest(&self) -> &Md5Checksum {
        &self.digest
    }

    pub fn is_spooled(&self) -> bool {
        matches!(self.body, Body::Spooled(_))
    }

    /// Reader over the full payload from the first byte.
    pub fn reader(&mut self) -> io::Result<Box<dyn Read + '_>> {
        match &mut self.body {
            Body::Memory(bytes) => Ok(Box::new(bytes.as_slice())),
            Body::Spooled(file) => {
                file.seek(SeekFrom::Start(0))?;
                Ok(Box::new(file))
            }
        }
    }

    pub fn into_handle(self) -> io::Result<ContentHandle> {
        let source = ContentSource::Remote(self.source);
        match self.body {
            Body::Memory(bytes) => Ok(ContentHandle::in_memory(source, Cursor::new(bytes))),
            Body::Spooled(mut file) => {
                file.seek(SeekFrom::Start(0))?;
                Ok(ContentHandle::remote_stream(source, file, self.size))
            }
        }
    }
}
