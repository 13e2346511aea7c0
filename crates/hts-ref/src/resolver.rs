//! End-to-end checksum resolution.
//!
//! `resolve` walks these steps, stopping at the first that produces content:
//! 1. cache: a file at the derived cache path is trusted as-is
//! 2. local search: local directory entries of the search path; a file that
//!    fails to open is skipped
//! 3. remote fetch: remote entries, in order; the payload is digested and must
//!    match the requested checksum. Failing to spool a large payload to disk
//!    ends the resolve rather than moving to the next entry
//! 4. cache commit: verified remote content is written to the cache; failure
//!    here is logged and otherwise ignored

use std::fs::File;
use std::path::PathBuf;

use crate::cache_writer::CacheWriter;
use crate::checksum::{verify, Md5Checksum};
use crate::config::{RefConfig, ResolverSettings};
use crate::error::{RefError, Result};
use crate::fetched::FetchedContent;
use crate::handle::{ContentHandle, ContentSource};
use crate::locator::SourceLocator;
use crate::single_flight::InFlight;
use crate::transport::{Transport, UreqTransport};

pub struct ReferenceResolver<T = UreqTransport> {
    settings: ResolverSettings,
    locator: SourceLocator<T>,
    cache_writer: CacheWriter,
    in_flight: InFlight,
}

impl ReferenceResolver<UreqTransport> {
    pub fn new(config: &RefConfig) -> Self {
        Self::with_transport(config, UreqTransport::new())
    }
}

impl<T: Transport> ReferenceResolver<T> {
    pub fn with_transport(config: &RefConfig, transport: T) -> Self {
        Self::from_settings(config.settings(), transport)
    }

    pub fn from_settings(settings: ResolverSettings, transport: T) -> Self {
        let locator = SourceLocator::new(transport)
            .with_compressed_suffixes(settings.compressed_suffixes.clone());
        Self {
            settings,
            locator,
            cache_writer: CacheWriter::default(),
            in_flight: InFlight::new(),
        }
    }

    pub fn with_cache_writer(mut self, cache_writer: CacheWriter) -> Self {
        self.cache_writer = cache_writer;
        self
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub fn transport(&self) -> &T {
        self.locator.transport()
    }

    /// Cache path for `checksum`, if a cache is configured.
    pub fn cache_path(&self, checksum: &Md5Checksum) -> Option<PathBuf> {
        let template = self.settings.cache_template.as_deref()?;
        Some(CacheWriter::cache_path(template, checksum))
    }

    /// Cheap existence check: the cache entry, else the first local search
    /// path file. Nothing is opened and no network access happens.
    pub fn find_local(&self, checksum: &str) -> Result<Option<PathBuf>> {
        let checksum = Md5Checksum::parse(checksum)?;
        if let Some(path) = self.cache_path(&checksum).filter(|path| path.is_file()) {
            return Ok(Some(path));
        }
        Ok(self
            .locator
            .find_local(&checksum, &self.settings.search_path)
            .map(|hit| hit.path))
    }

    /// Resolve `checksum` to a readable handle.
    ///
    /// Concurrent calls for the same checksum are not coordinated: both may
    /// fetch and both may publish the cache entry, which is safe but wasteful.
    /// Use [`ReferenceResolver::resolve_exclusive`] to have them wait for one
    /// another instead.
    pub fn resolve(&self, checksum: &str) -> Result<ContentHandle> {
        let checksum = Md5Checksum::parse(checksum)?;

        if let Some(handle) = self.check_cache(&checksum)? {
            return Ok(handle);
        }
        if let Some(handle) = self.search_local(&checksum)? {
            return Ok(handle);
        }

        let mut fetched = self.fetch_remote(&checksum)?;
        if let Err(err) = verify(&checksum, fetched.digest(), fetched.source()) {
            tracing::warn!(
                target = "hts.ref",
                checksum = %checksum,
                url = %fetched.source(),
                found = %fetched.digest(),
                "mismatching md5sum for downloaded reference"
            );
            return Err(err);
        }

        self.commit_cache(&checksum, &mut fetched);
        Ok(fetched.into_handle()?)
    }

    /// Like [`ReferenceResolver::resolve`], but callers asking for the same
    /// checksum through this resolver run one at a time, so later ones are
    /// served from the entry the first one cached.
    pub fn resolve_exclusive(&self, checksum: &str) -> Result<ContentHandle> {
        let parsed = Md5Checksum::parse(checksum)?;
        let _guard = self.in_flight.acquire(&parsed);
        self.resolve(checksum)
    }

    fn check_cache(&self, checksum: &Md5Checksum) -> Result<Option<ContentHandle>> {
        let Some(path) = self.cache_path(checksum) else {
            return Ok(None);
        };
        if !path.is_file() {
            return Ok(None);
        }

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) => {
                tracing::debug!(
                    target = "hts.ref",
                    checksum = %checksum,
                    path = %path.display(),
                    error = %err,
                    "failed to open cache entry"
                );
                return Ok(None);
            }
        };
        tracing::debug!(
            target = "hts.ref",
            checksum = %checksum,
            path = %path.display(),
            "reference found in cache"
        );
        Ok(Some(ContentHandle::cache_file(
            ContentSource::Cache(path),
            file,
        )?))
    }

    fn search_local(&self, checksum: &Md5Checksum) -> Result<Option<ContentHandle>> {
        let Some((hit, file)) = self
            .locator
            .open_local(checksum, &self.settings.search_path)
        else {
            return Ok(None);
        };

        tracing::debug!(
            target = "hts.ref",
            checksum = %checksum,
            path = %hit.path.display(),
            "reference found in local search path"
        );
        let source = ContentSource::SearchPath {
            path: hit.path,
            compressed_suffix: hit.compressed_suffix,
        };
        Ok(Some(ContentHandle::cache_file(source, file)?))
    }

    fn fetch_remote(&self, checksum: &Md5Checksum) -> Result<FetchedContent> {
        let mut remaining = self.settings.search_path.as_slice();
        while let Some(hit) = self.locator.locate_remote(checksum, remaining) {
            remaining = &remaining[hit.entry_index + 1..];
            match FetchedContent::read_from(
                hit.stream,
                hit.url.clone(),
                self.settings.memory_limit_bytes,
                self.settings.spool_dir.as_deref(),
            ) {
                Ok(fetched) => {
                    tracing::debug!(
                        target = "hts.ref",
                        checksum = %checksum,
                        url = %hit.url,
                        bytes = fetched.size(),
                        "fetched remote reference"
                    );
                    return Ok(fetched);
                }
                Err(err) if err.is_entry_miss() => {
                    tracing::debug!(
                        target = "hts.ref",
                        checksum = %checksum,
                        url = %hit.url,
                        error = %err,
                        "failed to read remote reference"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        Err(RefError::NotFound {
            checksum: checksum.to_string(),
        })
    }

    fn commit_cache(&self, checksum: &Md5Checksum, fetched: &mut FetchedContent) {
        let Some(template) = self.settings.cache_template.as_deref() else {
            return;
        };

        if let Some(root) = &self.settings.default_cache_root {
            if !root.is_dir() {
                tracing::warn!(
                    target = "hts.ref",
                    dir = %root.display(),
                    "creating reference cache directory; this may become large"
                );
            }
        }

        let path = CacheWriter::cache_path(template, checksum);
        tracing::info!(
            target = "hts.ref",
            path = %path.display(),
            "writing cache file"
        );

        let result = fetched
            .reader()
            .map_err(RefError::from)
            .and_then(|reader| self.cache_writer.populate(template, checksum, reader));
        if let Err(err) = result {
            tracing::warn!(
                target = "hts.ref",
                path = %path.display(),
                error = %err,
                "failed to populate reference cache"
            );
        }
    }
}

impl<T> std::fmt::Debug for ReferenceResolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceResolver")
            .field("settings", &self.settings)
            .field("cache_writer", &self.cache_writer)
            .finish_non_exhaustive()
    }
}
