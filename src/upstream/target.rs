//! The fixed upstream target.

use axum::http::Uri;
use url::Url;

/// Error parsing the upstream address.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("upstream address is empty")]
    Empty,
    #[error("invalid upstream address {0:?}: {1}")]
    Invalid(String, String),
    #[error("unsupported upstream scheme {0:?} (expected http or https)")]
    UnsupportedScheme(String),
    #[error("upstream address must not carry {0}")]
    Unexpected(&'static str),
}

/// Scheme and authority of the upstream media server.
///
/// Immutable once parsed. Every outbound request and every `Host`, `Origin`
/// and `Referer` value is derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    secure: bool,
    authority: String,
}

impl UpstreamTarget {
    /// Parse `host`, `host:port` or `http(s)://host[:port][/]`.
    ///
    /// The upstream is always dialed over HTTPS/WSS; an `http://` prefix is
    /// accepted and upgraded. See [`UpstreamTarget::parse_with`].
    pub fn parse(raw: &str) -> Result<Self, UpstreamError> {
        Self::parse_with(raw, false)
    }

    /// Like [`UpstreamTarget::parse`], but with `allow_plaintext` an explicit
    /// `http://` keeps plain HTTP/WS.
    pub fn parse_with(raw: &str, allow_plaintext: bool) -> Result<Self, UpstreamError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(UpstreamError::Empty);
        }

        let with_scheme = match raw.split_once("://") {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("http") && !allow_plaintext => {
                format!("https://{}", rest)
            }
            Some(_) => raw.to_string(),
            None => format!("https://{}", raw),
        };

        let url = Url::parse(&with_scheme)
            .map_err(|e| UpstreamError::Invalid(raw.to_string(), e.to_string()))?;

        let secure = match url.scheme() {
            "https" => true,
            "http" => false,
            other => return Err(UpstreamError::UnsupportedScheme(other.to_string())),
        };

        if !url.username().is_empty() || url.password().is_some() {
            return Err(UpstreamError::Unexpected("credentials"));
        }
        if !matches!(url.path(), "" | "/") {
            return Err(UpstreamError::Unexpected("a path"));
        }
        if url.query().is_some() {
            return Err(UpstreamError::Unexpected("a query"));
        }
        if url.fragment().is_some() {
            return Err(UpstreamError::Unexpected("a fragment"));
        }

        let host = url
            .host_str()
            .ok_or_else(|| UpstreamError::Invalid(raw.to_string(), "missing host".to_string()))?;

        // `port()` is None when the port is the scheme default.
        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(Self { secure, authority })
    }

    /// Whether the upstream speaks TLS.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// `host[:port]` of the upstream.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    fn http_scheme(&self) -> &'static str {
        if self.secure { "https" } else { "http" }
    }

    fn ws_scheme(&self) -> &'static str {
        if self.secure { "wss" } else { "ws" }
    }

    /// Value for the outbound `Host` header.
    pub fn host_header(&self) -> &str {
        &self.authority
    }

    /// Value for the outbound `Origin` header.
    pub fn origin(&self) -> String {
        format!("{}://{}", self.http_scheme(), self.authority)
    }

    /// Value for the outbound `Referer` header.
    pub fn referer(&self) -> String {
        format!("{}/", self.origin())
    }

    /// Absolute upstream URI for an inbound path and query.
    pub fn http_uri(&self, path_and_query: &str) -> Result<Uri, axum::http::uri::InvalidUri> {
        format!("{}{}", self.origin(), normalize(path_and_query)).parse()
    }

    /// Absolute upstream WebSocket URL for an inbound path and query.
    pub fn websocket_url(&self, path_and_query: &str) -> String {
        format!("{}://{}{}", self.ws_scheme(), self.authority, normalize(path_and_query))
    }
}

impl std::fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.origin())
    }
}

fn normalize(path_and_query: &str) -> std::borrow::Cow<'_, str> {
    if path_and_query.starts_with('/') {
        path_and_query.into()
    } else {
        format!("/{}", path_and_query).into()
    }
}
