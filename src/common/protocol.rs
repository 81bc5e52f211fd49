//! Network protocol descriptor
//!
//! Pure lookup table mapping each supported protocol to its connection model
//! and to the family token used when opening sockets.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Supported network protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkProtocol {
    Tcp,
    Tcp4,
    Tcp6,
    Udp,
    Udp4,
    Udp6,
    Unix,
    #[serde(rename = "unixgram")]
    UnixGram,
}

impl NetworkProtocol {
    /// Every protocol, in declaration order
    pub const ALL: [NetworkProtocol; 8] = [
        NetworkProtocol::Tcp,
        NetworkProtocol::Tcp4,
        NetworkProtocol::Tcp6,
        NetworkProtocol::Udp,
        NetworkProtocol::Udp4,
        NetworkProtocol::Udp6,
        NetworkProtocol::Unix,
        NetworkProtocol::UnixGram,
    ];

    /// Connection-oriented (stream) protocols: TCP and Unix stream variants
    pub fn is_stream(&self) -> bool {
        matches!(
            self,
            NetworkProtocol::Tcp | NetworkProtocol::Tcp4 | NetworkProtocol::Tcp6 | NetworkProtocol::Unix
        )
    }

    /// Connectionless (datagram) protocols
    pub fn is_datagram(&self) -> bool {
        !self.is_stream()
    }

    /// Unix domain protocols address a filesystem path instead of host:port
    pub fn is_unix(&self) -> bool {
        matches!(self, NetworkProtocol::Unix | NetworkProtocol::UnixGram)
    }

    /// Family token expected by the binding call
    pub fn network_family(&self) -> &'static str {
        match self {
            NetworkProtocol::Tcp => "tcp",
            NetworkProtocol::Tcp4 => "tcp4",
            NetworkProtocol::Tcp6 => "tcp6",
            NetworkProtocol::Udp => "udp",
            NetworkProtocol::Udp4 => "udp4",
            NetworkProtocol::Udp6 => "udp6",
            NetworkProtocol::Unix => "unix",
            NetworkProtocol::UnixGram => "unixgram",
        }
    }

    /// IP version restriction, if any
    pub(crate) fn ip_version(&self) -> Option<IpVersion> {
        match self {
            NetworkProtocol::Tcp4 | NetworkProtocol::Udp4 => Some(IpVersion::V4),
            NetworkProtocol::Tcp6 | NetworkProtocol::Udp6 => Some(IpVersion::V6),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IpVersion {
    V4,
    V6,
}

impl std::fmt::Display for NetworkProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.network_family())
    }
}

impl FromStr for NetworkProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim().to_ascii_lowercase();
        NetworkProtocol::ALL
            .into_iter()
            .find(|p| p.network_family() == token)
            .ok_or_else(|| Error::InvalidProtocol(s.to_string()))
    }
}
