//! Reference search path tokenization.
//!
//! A search path is a list of entries separated by the platform path separator
//! (`:` on unix, `;` elsewhere). A doubled separator is an escaped literal
//! separator, and URL entries keep the colons of their scheme and `host:port`.
//! Every tokenized path ends with an implicit `./` entry.

use serde::{Deserialize, Serialize};

#[cfg(windows)]
pub const PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const PATH_SEPARATOR: char = ':';

/// Entry that is always searched last.
pub const IMPLICIT_FALLBACK: &str = "./";

const REMOTE_PREFIXES: &[&str] = &[
    "http:",
    "https:",
    "ftp:",
    "|http:",
    "|https:",
    "|ftp:",
    "URL=http:",
    "URL=https:",
    "URL=ftp:",
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchPathEntry {
    /// Directory template; `search_compressed` is cleared by a leading `|`.
    LocalDirectory {
        template: String,
        search_compressed: bool,
    },
    HttpUrl { template: String },
    FtpUrl { template: String },
}

impl SearchPathEntry {
    pub fn local(template: impl Into<String>) -> Self {
        SearchPathEntry::LocalDirectory {
            template: template.into(),
            search_compressed: true,
        }
    }

    /// Classify one raw (already unescaped) entry.
    pub fn classify(raw: &str) -> Self {
        let url = raw
            .strip_prefix("URL=")
            .or_else(|| raw.strip_prefix('|'))
            .unwrap_or(raw);
        if url.starts_with("http:") || url.starts_with("https:") {
            return SearchPathEntry::HttpUrl {
                template: url.to_string(),
            };
        }
        if url.starts_with("ftp:") {
            return SearchPathEntry::FtpUrl {
                template: url.to_string(),
            };
        }

        match raw.strip_prefix('|') {
            Some(template) => SearchPathEntry::LocalDirectory {
                template: template.to_string(),
                search_compressed: false,
            },
            None => SearchPathEntry::local(raw),
        }
    }

    pub fn template(&self) -> &str {
        match self {
            SearchPathEntry::LocalDirectory { template, .. }
            | SearchPathEntry::HttpUrl { template }
            | SearchPathEntry::FtpUrl { template } => template,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, SearchPathEntry::LocalDirectory { .. })
    }

    pub fn is_remote(&self) -> bool {
        !self.is_local()
    }
}

/// Tokenize `raw` using the platform separator.
pub fn tokenize(raw: &str) -> Vec<SearchPathEntry> {
    tokenize_with_separator(raw, PATH_SEPARATOR)
}

pub fn tokenize_with_separator(raw: &str, separator: char) -> Vec<SearchPathEntry> {
    split_entries(raw, separator)
        .iter()
        .map(|entry| SearchPathEntry::classify(entry))
        .collect()
}

/// Split into raw entry strings, unescaping doubled separators and appending `./`.
pub fn split_entries(raw: &str, separator: char) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut rest = raw;

    while let Some(c) = rest.chars().next() {
        if current.is_empty() {
            if let Some(consumed) = copy_url_authority(rest, &mut current) {
                rest = &rest[consumed..];
                continue;
            }
        }

        rest = &rest[c.len_utf8()..];
        if c != separator {
            current.push(c);
            continue;
        }
        if let Some(after) = rest.strip_prefix(separator) {
            current.push(separator);
            rest = after;
            continue;
        }
        if !current.is_empty() {
            entries.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        entries.push(current);
    }

    entries.push(IMPLICIT_FALLBACK.to_string());
    entries
}

/// Copy `scheme://host[:port]` of a URL entry verbatim so its colons are not
/// taken as separators. Returns the number of bytes consumed, or `None` when
/// `s` does not start with a recognised URL prefix.
fn copy_url_authority(s: &str, out: &mut String) -> Option<usize> {
    let prefix = REMOTE_PREFIXES.iter().find(|p| s.starts_with(**p))?;
    let bytes = s.as_bytes();

    // The prefix always ends with the scheme colon.
    let mut i = prefix.len();
    for _ in 0..2 {
        if bytes.get(i) == Some(&b'/') {
            i += 1;
        }
    }
    while i < bytes.len() && bytes[i] != b':' && bytes[i] != b'/' {
        i += 1;
    }
    // A colon right after the host always belongs to the URL, with or
    // without port digits.
    if bytes.get(i) == Some(&b':') {
        i += 1;
        while bytes.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
    }

    // Every boundary above sits next to an ASCII byte.
    out.push_str(&s[..i]);
    Some(i)
}
