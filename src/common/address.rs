//! Address types for socket endpoints

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use super::protocol::{IpVersion, NetworkProtocol};
use crate::error::{Error, Result};

/// Local or remote endpoint of a socket
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SocketAddress {
    /// IP socket address (IP + port)
    Inet(SocketAddr),
    /// Unix domain socket; `None` for unnamed (unbound) peers
    Unix(Option<PathBuf>),
}

impl SocketAddress {
    /// Create an unspecified address for the given protocol (0.0.0.0:0 or unnamed)
    pub fn unspecified(protocol: NetworkProtocol) -> Self {
        match protocol {
            NetworkProtocol::Unix | NetworkProtocol::UnixGram => SocketAddress::Unix(None),
            NetworkProtocol::Tcp6 | NetworkProtocol::Udp6 => {
                SocketAddress::Inet(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0))
            }
            _ => SocketAddress::Inet(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)),
        }
    }

    /// Create from a filesystem path
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        SocketAddress::Unix(Some(path.into()))
    }

    /// Try to get as IP socket address
    pub fn as_inet(&self) -> Option<SocketAddr> {
        match self {
            SocketAddress::Inet(addr) => Some(*addr),
            SocketAddress::Unix(_) => None,
        }
    }

    /// Get the path of a named unix endpoint
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            SocketAddress::Unix(Some(path)) => Some(path),
            _ => None,
        }
    }

    /// Get the port (0 for unix endpoints)
    pub fn port(&self) -> u16 {
        match self {
            SocketAddress::Inet(addr) => addr.port(),
            SocketAddress::Unix(_) => 0,
        }
    }
}

impl std::fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocketAddress::Inet(addr) => write!(f, "{}", addr),
            SocketAddress::Unix(Some(path)) => write!(f, "{}", path.display()),
            SocketAddress::Unix(None) => write!(f, "@unnamed"),
        }
    }
}

impl From<SocketAddr> for SocketAddress {
    fn from(addr: SocketAddr) -> Self {
        SocketAddress::Inet(addr)
    }
}

#[cfg(unix)]
impl From<tokio::net::unix::SocketAddr> for SocketAddress {
    fn from(addr: tokio::net::unix::SocketAddr) -> Self {
        SocketAddress::Unix(addr.as_pathname().map(Path::to_path_buf))
    }
}

/// Resolve a `host:port` string for an IP protocol.
///
/// A leading `:` (e.g. `":8080"`) means every interface. The first address
/// matching the protocol's IP version wins. Blocking: only for construction
/// time validation, async paths use [`lookup_inet`].
pub fn resolve_inet(protocol: NetworkProtocol, address: &str) -> Result<SocketAddr> {
    let candidate = candidate(protocol, address)?;
    let addrs = candidate
        .to_socket_addrs()
        .map_err(|e| Error::InvalidAddress(format!("{}: {}", address.trim(), e)))?;
    pick(protocol, address, addrs)
}

/// Resolve a `host:port` string without blocking the runtime
pub async fn lookup_inet(protocol: NetworkProtocol, address: &str) -> Result<SocketAddr> {
    let candidate = candidate(protocol, address)?;
    let addrs = tokio::net::lookup_host(candidate.as_str())
        .await
        .map_err(|e| Error::InvalidAddress(format!("{}: {}", address.trim(), e)))?;
    pick(protocol, address, addrs)
}

fn candidate(protocol: NetworkProtocol, address: &str) -> Result<String> {
    let address = address.trim();
    if address.is_empty() {
        return Err(Error::InvalidAddress("empty address".into()));
    }

    if address.starts_with(':') {
        Ok(match protocol.ip_version() {
            Some(IpVersion::V6) => format!("[::]{}", address),
            _ => format!("0.0.0.0{}", address),
        })
    } else {
        Ok(address.to_string())
    }
}

fn pick(
    protocol: NetworkProtocol,
    address: &str,
    mut addrs: impl Iterator<Item = SocketAddr>,
) -> Result<SocketAddr> {
    let version = protocol.ip_version();
    addrs
        .find(|a| match version {
            Some(IpVersion::V4) => a.is_ipv4(),
            Some(IpVersion::V6) => a.is_ipv6(),
            None => true,
        })
        .ok_or_else(|| {
            Error::InvalidAddress(format!("{}: no {} address found", address.trim(), protocol))
        })
}

/// Validate a unix socket path
pub fn validate_unix_path(address: &str) -> Result<PathBuf> {
    if address.trim().is_empty() {
        return Err(Error::InvalidAddress("empty socket path".into()));
    }
    if address.contains('\0') {
        return Err(Error::InvalidAddress(format!("{:?}: nul byte in path", address)));
    }
    Ok(PathBuf::from(address))
}

/// Validate an address for a protocol without opening any socket
pub fn validate(protocol: NetworkProtocol, address: &str) -> Result<()> {
    if protocol.is_unix() {
        validate_unix_path(address).map(|_| ())
    } else {
        resolve_inet(protocol, address).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_any_interface() {
        let addr = resolve_inet(NetworkProtocol::Tcp, ":8080").unwrap();
        assert_eq!(addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());

        let addr = resolve_inet(NetworkProtocol::Udp6, ":53").unwrap();
        assert_eq!(addr, "[::]:53".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_resolve_filters_version() {
        assert!(resolve_inet(NetworkProtocol::Tcp4, "127.0.0.1:0").is_ok());
        assert!(matches!(
            resolve_inet(NetworkProtocol::Tcp6, "127.0.0.1:0"),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_lookup_matches_blocking_resolution() {
        let addr = lookup_inet(NetworkProtocol::Udp6, ":53").await.unwrap();
        assert_eq!(addr, "[::]:53".parse::<SocketAddr>().unwrap());

        let addr = lookup_inet(NetworkProtocol::Tcp, "127.0.0.1:8080").await.unwrap();
        assert_eq!(addr, resolve_inet(NetworkProtocol::Tcp, "127.0.0.1:8080").unwrap());

        assert!(matches!(
            lookup_inet(NetworkProtocol::Tcp6, "127.0.0.1:0").await,
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(lookup_inet(NetworkProtocol::Tcp, " ").await, Err(Error::InvalidAddress(_))));
    }

    #[test]
    fn test_resolve_rejects_garbage() {
        assert!(matches!(resolve_inet(NetworkProtocol::Tcp, ""), Err(Error::InvalidAddress(_))));
        assert!(matches!(
            resolve_inet(NetworkProtocol::Udp, "no-port-here"),
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(
            resolve_inet(NetworkProtocol::Tcp, "127.0.0.1:99999"),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_unix_path_validation() {
        assert!(validate(NetworkProtocol::Unix, "/tmp/app.sock").is_ok());
        assert!(validate(NetworkProtocol::UnixGram, "").is_err());
        assert!(validate(NetworkProtocol::Unix, "bad\0path").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(SocketAddress::unix("/run/a.sock").to_string(), "/run/a.sock");
        assert_eq!(SocketAddress::Unix(None).to_string(), "@unnamed");
        assert_eq!(
            SocketAddress::unspecified(NetworkProtocol::Tcp).to_string(),
            "0.0.0.0:0"
        );
    }
}
