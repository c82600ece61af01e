//! Endpoint resolver: turns a node URL into the pieces a transport needs.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `scheme://host[:port]/path?query#fragment` node address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    raw: String,
    scheme: Scheme,
    host: String,
    port: u16,
    path: String,
    query: String,
    fragment: String,
}

impl Endpoint {
    /// Parse a node URL. Only `http` and `https` are accepted; an empty
    /// string, an unsupported scheme, a malformed string or a port outside
    /// `0..=65535` fail.
    pub fn parse(input: &str) -> Result<Self, Error> {
        if input.is_empty() {
            return Err(Error::EmptyUrl);
        }

        let unsupported = |reason: String| Error::UnsupportedUrl {
            url: input.to_owned(),
            reason,
        };

        if input.contains(char::is_whitespace) {
            return Err(unsupported("url contains whitespace".to_owned()));
        }

        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| unsupported("expected scheme://host".to_owned()))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => return Err(unsupported(format!("protocol `{other}` is not supported"))),
        };

        // `url` only validates and supplies the port; the components below
        // are taken from the input as written.
        let parsed = Url::parse(input).map_err(|e| unsupported(e.to_string()))?;
        if parsed.host().is_none() {
            return Err(unsupported("missing host".to_owned()));
        }
        let port = parsed.port().unwrap_or_else(|| scheme.default_port());

        let split = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let (authority, tail) = rest.split_at(split);
        let host = raw_host(authority);
        if host.is_empty() {
            return Err(unsupported("missing host".to_owned()));
        }
        let (tail, fragment) = tail.split_once('#').unwrap_or((tail, ""));
        let (path, query) = tail.split_once('?').unwrap_or((tail, ""));

        Ok(Self {
            raw: input.to_owned(),
            scheme,
            host: host.to_owned(),
            port,
            path: path.to_owned(),
            query: query.to_owned(),
            fragment: fragment.to_owned(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    /// Origin-form request target: the path plus `?query` when present.
    pub fn request_target(&self) -> String {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        if self.query.is_empty() {
            path.to_owned()
        } else {
            format!("{path}?{}", self.query)
        }
    }

    /// Value for the `Host` header; the port is omitted when it is the
    /// scheme default.
    pub fn host_header(&self) -> String {
        host_header(self.scheme, &self.host, self.port)
    }
}

/// Host part of `host[:port]` or `[v6]:port`, brackets stripped.
fn raw_host(authority: &str) -> &str {
    let authority = authority.rsplit_once('@').map_or(authority, |(_, a)| a);
    if let Some(bracketed) = authority.strip_prefix('[') {
        return bracketed.split_once(']').map_or(bracketed, |(host, _)| host);
    }
    authority.split_once(':').map_or(authority, |(host, _)| host)
}

pub(crate) fn host_header(scheme: Scheme, host: &str, port: u16) -> String {
    let host = if host.contains(':') {
        format!("[{host}]")
    } else {
        host.to_owned()
    };
    if port == scheme.default_port() {
        host
    } else {
        format!("{host}:{port}")
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
