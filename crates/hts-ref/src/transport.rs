use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{RefError, Result};

/// Byte-stream source for remote search path entries.
///
/// Implementations only open the stream; the resolver reads, digests and
/// caches it.
pub trait Transport {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>> {
        (**self).open(url)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>> {
        (**self).open(url)
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>> {
        (**self).open(url)
    }
}

const URL_REDACTION: &str = "<redacted>";

/// Blocking HTTP(S) transport backed by a shared `ureq` agent.
///
/// `ftp:` URLs are rejected with [`RefError::UnsupportedScheme`], which the
/// locator treats like any other miss.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UreqTransport {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    /// Transport whose connect and read operations give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(timeout)
                .timeout_read(timeout)
                .build(),
        }
    }
}

impl Transport for UreqTransport {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>> {
        let safe_url = sanitize_url(url);
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(RefError::UnsupportedScheme { url: safe_url });
        }

        let response = self.agent.get(url).call().map_err(|err| {
            let message = match err {
                ureq::Error::Status(code, _response) => {
                    format!("server returned status {code} for {safe_url}")
                }
                ureq::Error::Transport(transport) => {
                    format!("transport error for {safe_url}: {transport}")
                }
            };
            RefError::Transport { message }
        })?;

        Ok(Box::new(response.into_reader()))
    }
}

/// Strip userinfo and query values from `url` before it is logged or stored
/// in an error.
pub(crate) fn sanitize_url(url: &str) -> String {
    let Some(scheme_idx) = url.find("://") else {
        return url.to_owned();
    };

    let (scheme, rest) = url.split_at(scheme_idx + 3);
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);

    let authority = match authority.rfind('@') {
        Some(at_pos) => format!("{URL_REDACTION}@{}", &authority[at_pos + 1..]),
        None => authority.to_owned(),
    };

    let tail = match tail.find(['?', '#']) {
        Some(pos) => format!("{}{}", &tail[..pos + 1], URL_REDACTION),
        None => tail.to_owned(),
    };
    format!("{scheme}{authority}{tail}")
}
