use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, RefError>;

/// Filesystem step of cache population that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheWriteOp {
    CreateDir,
    CreateTemp,
    Write,
    SetPermissions,
    Rename,
}

impl std::fmt::Display for CacheWriteOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CacheWriteOp::CreateDir => "create directory",
            CacheWriteOp::CreateTemp => "create temporary file",
            CacheWriteOp::Write => "write",
            CacheWriteOp::SetPermissions => "set permissions",
            CacheWriteOp::Rename => "rename",
        };
        f.write_str(name)
    }
}

/// Errors produced while resolving a checksum to reference content.
#[derive(Debug, thiserror::Error)]
pub enum RefError {
    #[error("invalid MD5 checksum {value:?}: expected 32 hexadecimal characters")]
    InvalidChecksum { value: String },

    /// No cache entry, local file or remote source produced content.
    #[error("no reference found for checksum {checksum}")]
    NotFound { checksum: String },

    #[error("checksum mismatch for reference from {source_desc}: expected {expected}, found {found}")]
    IntegrityMismatch {
        expected: String,
        found: String,
        source_desc: String,
    },

    #[error("failed to {op} {path}: {source}")]
    CacheWrite {
        op: CacheWriteOp,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {message}")]
    Transport { message: String },

    /// The remote stream failed after it was opened.
    #[error("failed to read {url}: {source}")]
    RemoteRead {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spool fetched reference to disk: {source}")]
    Spool {
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported URL scheme for {url}")]
    UnsupportedScheme { url: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RefError {
    pub(crate) fn cache_write(
        op: CacheWriteOp,
        path: impl Into<PathBuf>,
    ) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| RefError::CacheWrite { op, path, source }
    }

    /// Cache population failures never invalidate content the caller already holds.
    pub fn is_cache_write(&self) -> bool {
        matches!(self, RefError::CacheWrite { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RefError::NotFound { .. })
    }

    pub fn is_integrity_mismatch(&self) -> bool {
        matches!(self, RefError::IntegrityMismatch { .. })
    }

    /// Failures that only rule out one search path entry.
    pub fn is_entry_miss(&self) -> bool {
        matches!(
            self,
            RefError::Transport { .. }
                | RefError::UnsupportedScheme { .. }
                | RefError::RemoteRead { .. }
        )
    }
}
