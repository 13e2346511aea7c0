//! Resolve MD5 checksums to reference sequence bytes.
//!
//! Decoders that store reference sequences by checksum (CRAM `M5` tags) need
//! a way back from the checksum to the sequence. This crate looks it up in:
//! - a local on-disk cache (`REF_CACHE`, trusted without re-verification)
//! - the local directories of a search path (`REF_PATH`)
//! - the remote HTTP/FTP templates of the same search path, defaulting to the
//!   public EBI lookup service
//!
//! Remotely fetched content is verified against the requested checksum and
//! then published into the cache with a temp-file + rename so a crash or a
//! racing process never leaves a partial entry behind.
//!
//! ## On-disk layout
//!
//! With the default template `<cache_base>/hts-ref/%2s/%2s/%s` a checksum
//! `ac37ec46...55cd` is stored at `<cache_base>/hts-ref/ac/37/ec46...55cd`:
//! - cache files are mode `0444` and hold the raw reference bytes
//! - directories are created with mode `01777`
//! - in-progress writes live next to the entry as
//!   `<entry>.tmp_<pid>_<thread>_<nonce>`
//!
//! Nothing here removes committed entries; the cache only grows.

mod cache_writer;
mod checksum;
mod config;
mod error;
mod fetched;
mod handle;
mod locator;
mod resolver;
mod search_path;
mod single_flight;
mod template;
mod transport;

pub use cache_writer::{create_dir_chain, CacheWriter, CACHE_FILE_MODE, DEFAULT_DIR_MODE};
pub use checksum::{verify, Md5Checksum, Md5Reader, MD5_HEX_LEN};
pub use config::{
    RefConfig, ResolverSettings, DEFAULT_CACHE_DIR_NAME, DEFAULT_REF_PATH, FALLBACK_CACHE_BASE,
};
pub use error::{CacheWriteOp, RefError, Result};
pub use fetched::{FetchedContent, DEFAULT_MEMORY_LIMIT_BYTES};
pub use handle::{ContentHandle, ContentSource, HandleKind};
pub use locator::{LocalHit, Located, RemoteHit, SourceLocator, DEFAULT_COMPRESSED_SUFFIXES};
pub use resolver::ReferenceResolver;
pub use search_path::{
    split_entries, tokenize, tokenize_with_separator, SearchPathEntry, IMPLICIT_FALLBACK,
    PATH_SEPARATOR,
};
pub use single_flight::{InFlight, InFlightGuard};
pub use template::expand;
pub use transport::{Transport, UreqTransport};
