use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::fetched::DEFAULT_MEMORY_LIMIT_BYTES;
use crate::locator::DEFAULT_COMPRESSED_SUFFIXES;
use crate::search_path::{tokenize, SearchPathEntry};

/// Lookup service used when no search path is configured.
pub const DEFAULT_REF_PATH: &str = "http://www.ebi.ac.uk:80/ena/cram/md5/%s";

/// Directory under the cache base that holds the default cache.
pub const DEFAULT_CACHE_DIR_NAME: &str = "hts-ref";

/// Cache base used when none of the usual environment variables is set.
pub const FALLBACK_CACHE_BASE: &str = "/tmp";

/// Reference lookup configuration, captured once at the boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefConfig {
    /// Search path (`REF_PATH`).
    pub ref_path: Option<String>,
    /// Cache template (`REF_CACHE`).
    pub ref_cache: Option<String>,
    /// Base directory for the default cache.
    pub cache_base: Option<PathBuf>,
    pub memory_limit_bytes: u64,
    pub compressed_suffixes: Vec<String>,
    /// Directory for spooled payloads; the system temporary directory if unset.
    pub spool_dir: Option<PathBuf>,
}

impl Default for RefConfig {
    fn default() -> Self {
        Self {
            ref_path: None,
            ref_cache: None,
            cache_base: None,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            compressed_suffixes: DEFAULT_COMPRESSED_SUFFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            spool_dir: None,
        }
    }
}

impl RefConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|value| !value.is_empty());
        Self {
            ref_path: var("REF_PATH"),
            ref_cache: var("REF_CACHE"),
            cache_base: Some(cache_base_dir(&var)),
            ..Self::default()
        }
    }

    pub fn settings(&self) -> ResolverSettings {
        let ref_path = non_empty(&self.ref_path);
        let ref_cache = non_empty(&self.ref_cache);

        let mut default_cache_root = None;
        let cache_template = match (ref_path, ref_cache) {
            (_, Some(template)) => Some(template.to_string()),
            // Only the public lookup service gets a cache by default, so it is
            // not asked for the same reference twice.
            (None, None) => {
                let base = self
                    .cache_base
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(FALLBACK_CACHE_BASE));
                let root = base.join(DEFAULT_CACHE_DIR_NAME);
                let template = default_cache_template(&root);
                default_cache_root = Some(root);
                Some(template)
            }
            (Some(_), None) => None,
        };

        ResolverSettings {
            search_path: tokenize(ref_path.unwrap_or(DEFAULT_REF_PATH)),
            cache_template,
            default_cache_root,
            memory_limit_bytes: self.memory_limit_bytes,
            compressed_suffixes: self.compressed_suffixes.clone(),
            spool_dir: self.spool_dir.clone(),
        }
    }
}

/// Effective settings the resolver runs with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolverSettings {
    pub search_path: Vec<SearchPathEntry>,
    pub cache_template: Option<String>,
    /// Set when the cache template is the built-in default.
    pub default_cache_root: Option<PathBuf>,
    pub memory_limit_bytes: u64,
    pub compressed_suffixes: Vec<String>,
    pub spool_dir: Option<PathBuf>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

fn default_cache_template(root: &Path) -> String {
    format!("{}/%2s/%2s/%s", root.to_string_lossy())
}

/// First of `XDG_CACHE_HOME`, `HOME/.cache`, `TMPDIR`, `TEMP`, then `/tmp`.
fn cache_base_dir(var: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(base) = var("XDG_CACHE_HOME") {
        return PathBuf::from(base);
    }
    if let Some(home) = var("HOME") {
        return PathBuf::from(format!("{home}/.cache"));
    }
    var("TMPDIR")
        .or_else(|| var("TEMP"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(FALLBACK_CACHE_BASE))
}
