use crate::{Result, error::Error};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Remote endpoint of a relay session (host name or IP literal plus port).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create a new endpoint with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidEndpoint` if the host is empty or the port is 0.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host: String = host.into();
        let host = host.trim();
        if host.is_empty() {
            return Err(Error::InvalidEndpoint("host must not be empty".to_string()));
        }
        if port == 0 {
            return Err(Error::InvalidEndpoint(format!("port must be 1-65535, got {port}")));
        }

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        Ok(Endpoint {
            host: host.to_string(),
            port,
        })
    }

    /// Build an endpoint from a host and a textual port, as given on the
    /// command line.
    ///
    /// # Errors
    /// Returns `Error::InvalidEndpoint` if the port is not a number in 1-65535.
    pub fn from_parts(host: &str, port: &str) -> Result<Self> {
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| Error::InvalidEndpoint(format!("invalid port: {port}")))?;
        Endpoint::new(host, port)
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    /// Joins host and port, bracketing IPv6 literals (`[::1]:23`).
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl std::str::FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidEndpoint(format!("expected host:port, got {s}")))?;

        // An unbracketed host with a colon is an IPv6 literal missing its brackets.
        if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
            return Err(Error::InvalidEndpoint(format!(
                "IPv6 hosts must be bracketed, got {s}"
            )));
        }

        Endpoint::from_parts(host, port)
    }
}

/// Direction in which a forwarder moves records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Local input to the remote connection.
    Uplink,

    /// Remote connection to local output.
    Downlink,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::Uplink => write!(f, "uplink"),
            Direction::Downlink => write!(f, "downlink"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_endpoint_new() {
        let endpoint = Endpoint::new("example.com", 23).unwrap();
        assert_eq!(endpoint.host(), "example.com");
        assert_eq!(endpoint.port(), 23);
        assert_eq!(endpoint.to_string(), "example.com:23");
    }

    #[test]
    fn test_endpoint_rejects_empty_host() {
        assert!(matches!(
            Endpoint::new("  ", 23),
            Err(Error::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_endpoint_rejects_port_zero() {
        assert!(Endpoint::new("localhost", 0).is_err());
    }

    #[test]
    fn test_endpoint_ipv6_display_is_bracketed() {
        let endpoint = Endpoint::new("::1", 8080).unwrap();
        assert_eq!(endpoint.host(), "::1");
        assert_eq!(endpoint.to_string(), "[::1]:8080");

        let bracketed = Endpoint::new("[::1]", 8080).unwrap();
        assert_eq!(bracketed, endpoint);
    }

    #[rstest]
    #[case("127.0.0.1:8080", "127.0.0.1", 8080)]
    #[case("localhost:23", "localhost", 23)]
    #[case("[::1]:443", "::1", 443)]
    #[case(" host.example:1 ", "host.example", 1)]
    fn test_endpoint_from_str(#[case] input: &str, #[case] host: &str, #[case] port: u16) {
        let endpoint: Endpoint = input.parse().unwrap();
        assert_eq!(endpoint.host(), host);
        assert_eq!(endpoint.port(), port);
    }

    #[rstest]
    #[case("localhost")]
    #[case("localhost:")]
    #[case("localhost:http")]
    #[case("localhost:70000")]
    #[case(":8080")]
    #[case("::1:8080")]
    fn test_endpoint_from_str_invalid(#[case] input: &str) {
        assert!(input.parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_endpoint_from_parts() {
        let endpoint = Endpoint::from_parts("opennet.ru", "80").unwrap();
        assert_eq!(endpoint.to_string(), "opennet.ru:80");
        assert!(Endpoint::from_parts("opennet.ru", "eighty").is_err());
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Uplink.to_string(), "uplink");
        assert_eq!(Direction::Downlink.to_string(), "downlink");
    }
}
