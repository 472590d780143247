use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

use crate::errors::DecoderError;

static ENDPOINT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<protocol>[A-Za-z][A-Za-z0-9+.-]*://)?(?P<host>[^:/]*)(?P<port>:[0-9]+)?(?P<path>/.*)?$")
        .expect("valid endpoint pattern")
});

/// Default path the engine serves translations on
pub const DEFAULT_PATH: &str = "/translate";

/// Where the decoding engine listens: `protocol://host:port/path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderEndpoint {
    /// Scheme without `://`, `ws` when omitted
    pub protocol: String,
    /// Host, `localhost` when omitted
    pub host: String,
    pub port: Option<u16>,
    /// Path including the leading slash, may be empty
    pub path: String,
}

impl DecoderEndpoint {
    /// The engine started by this worker
    pub fn local(port: u16) -> Self {
        Self {
            protocol: "ws".to_string(),
            host: "localhost".to_string(),
            port: Some(port),
            path: DEFAULT_PATH.to_string(),
        }
    }

    /// Full URL of the endpoint
    pub fn url(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}{}", self.protocol, self.host, port, self.path),
            None => format!("{}://{}{}", self.protocol, self.host, self.path),
        }
    }
}

impl FromStr for DecoderEndpoint {
    type Err = DecoderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = ENDPOINT_PATTERN
            .captures(s.trim())
            .ok_or_else(|| DecoderError::InvalidEndpoint(s.to_string()))?;

        let protocol = caps
            .name("protocol")
            .map(|m| m.as_str().trim_end_matches("://").to_lowercase())
            .unwrap_or_else(|| "ws".to_string());
        let host = caps
            .name("host")
            .map(|m| m.as_str())
            .filter(|h| !h.is_empty())
            .unwrap_or("localhost")
            .to_string();
        let port = caps
            .name("port")
            .map(|m| m.as_str()[1..].parse::<u16>())
            .transpose()
            .map_err(|_| DecoderError::InvalidEndpoint(s.to_string()))?;
        let path = caps.name("path").map(|m| m.as_str().to_string()).unwrap_or_default();

        Ok(Self {
            protocol,
            host,
            port,
            path,
        })
    }
}

impl fmt::Display for DecoderEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}
