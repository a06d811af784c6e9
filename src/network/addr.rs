//! Peer network addresses
//!
//! Rendered in multiaddr style, e.g. `/ip4/10.0.0.7/tcp/4001`, which is also
//! the form persisted in [`AddrInfo`](crate::storage::AddrInfo) records.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddrParseError {
    #[error("malformed address: {0}")]
    Malformed(String),
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),
}

/// Transport protocol of an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Transport {
    Tcp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Addr {
    pub protocol: Transport,
    pub ip: IpAddr,
    pub port: u16,
}

impl Addr {
    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            protocol: Transport::Tcp,
            ip: addr.ip(),
            port: addr.port(),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Whether this address can be dialled as-is
    pub fn is_dialable(&self) -> bool {
        !self.ip.is_unspecified() && self.port != 0
    }
}

impl From<SocketAddr> for Addr {
    fn from(addr: SocketAddr) -> Self {
        Self::tcp(addr)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let family = match self.ip {
            IpAddr::V4(_) => "ip4",
            IpAddr::V6(_) => "ip6",
        };
        write!(f, "/{}/{}/{}/{}", family, self.ip, self.protocol, self.port)
    }
}

impl FromStr for Addr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || AddrParseError::Malformed(s.to_string());

        let parts: Vec<&str> = s.split('/').collect();
        let [empty, family, ip, proto, port] = parts.as_slice() else {
            return Err(malformed());
        };
        if !empty.is_empty() {
            return Err(malformed());
        }

        let ip: IpAddr = match *family {
            "ip4" | "ip6" => ip.parse().map_err(|_| malformed())?,
            _ => return Err(malformed()),
        };
        if (*family == "ip4") != ip.is_ipv4() {
            return Err(malformed());
        }

        let protocol = match *proto {
            "tcp" => Transport::Tcp,
            other => return Err(AddrParseError::UnsupportedTransport(other.to_string())),
        };
        let port = port.parse().map_err(|_| malformed())?;

        Ok(Self { protocol, ip, port })
    }
}
