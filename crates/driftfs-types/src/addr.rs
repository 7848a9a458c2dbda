use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A network endpoint identified by hostname and port.
///
/// Chunks carry the hostnames of their owning storage nodes, so addresses
/// stay symbolic until the moment a connection is opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("missing ':' in address {s:?}"))?;
        if host.is_empty() {
            return Err(format!("empty host in address {s:?}"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| format!("invalid port in address {s:?}"))?;
        Ok(Self::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let addr = NodeAddr::new("node01", 9090);
        assert_eq!(addr.to_string(), "node01:9090");
    }

    #[test]
    fn test_parse_roundtrip() {
        let addr: NodeAddr = "10.0.0.1:8080".parse().unwrap();
        assert_eq!(addr, NodeAddr::new("10.0.0.1", 8080));
        assert_eq!(addr.to_string().parse::<NodeAddr>().unwrap(), addr);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("no-port".parse::<NodeAddr>().is_err());
        assert!(":8080".parse::<NodeAddr>().is_err());
        assert!("host:notaport".parse::<NodeAddr>().is_err());
    }
}
