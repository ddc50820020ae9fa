//! Parse node endpoints of the form `scheme://[user@]host[:port][/path]`.

use crate::Error;
use reqwest::Url;
use std::{fmt, str::FromStr};

/// Transport used to reach a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    /// Port assumed when none is given.
    pub const fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// A normalized node endpoint.
///
/// The optional user part of the URL is kept as an API key and never rendered by [fmt::Display].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub api_key: Option<String>,
}

impl Endpoint {
    /// Parse and normalize `raw`.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let invalid = |reason: &str| Error::InvalidEndpoint {
            endpoint: raw.to_string(),
            reason: reason.to_string(),
        };
        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            "" => return Err(invalid("missing scheme")),
            _ => return Err(invalid("invalid scheme")),
        };
        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(invalid("missing host")),
        };
        let port = url.port().unwrap_or(scheme.default_port());
        let path = match url.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };
        let api_key = match url.username() {
            "" => None,
            user => Some(user.to_string()),
        };
        Ok(Self {
            scheme,
            host,
            port,
            path,
            api_key,
        })
    }

    /// Render the endpoint without credentials.
    pub fn url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.scheme.as_str(),
            self.host,
            self.port,
            self.path
        )
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
        f.write_str(&self.url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        // Test case 0: http without port or path
        let endpoint = Endpoint::parse("http://localhost").unwrap();
        assert_eq!(endpoint.scheme, Scheme::Http);
        assert_eq!(endpoint.port, 80);
        assert_eq!(endpoint.path, "/");
        assert_eq!(endpoint.api_key, None);
        assert_eq!(endpoint.url(), "http://localhost:80/");

        // Test case 1: https default port
        let endpoint = Endpoint::parse("https://node.example.com").unwrap();
        assert_eq!(endpoint.port, 443);
        assert_eq!(endpoint.url(), "https://node.example.com:443/");

        // Test case 2: explicit default port is kept
        let endpoint = Endpoint::parse("http://localhost:80").unwrap();
        assert_eq!(endpoint.port, 80);
    }

    #[test]
    fn test_full_form() {
        let endpoint: Endpoint = "HTTP://apikey0@localhost:8500/mpc/v1".parse().unwrap();
        assert_eq!(endpoint.scheme, Scheme::Http);
        assert_eq!(endpoint.host, "localhost");
        assert_eq!(endpoint.port, 8500);
        assert_eq!(endpoint.path, "/mpc/v1");
        assert_eq!(endpoint.api_key.as_deref(), Some("apikey0"));

        // Credentials are never rendered
        assert_eq!(endpoint.to_string(), "http://localhost:8500/mpc/v1");
    }

    #[test]
    fn test_invalid() {
        // Test case 0: unsupported scheme
        assert!(matches!(
            Endpoint::parse("ftp://localhost"),
            Err(Error::InvalidEndpoint { reason, .. }) if reason == "invalid scheme"
        ));

        // Test case 1: missing scheme
        assert!(Endpoint::parse("localhost:8080").is_err());
        assert!(Endpoint::parse("//localhost:8080").is_err());

        // Test case 2: missing host
        assert!(Endpoint::parse("http://").is_err());

        // Test case 3: garbage
        assert!(Endpoint::parse("").is_err());
    }
}
