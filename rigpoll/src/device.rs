//! Polling endpoints and the raw request/response round trip.
//!
//! A [`Device`] is an address, a port and a response timeout. Each call to
//! [`Device::exchange`] opens a fresh TCP connection, writes one request and
//! reads until the peer closes. Connections are never reused; the embedded
//! firmware on most rigs handles stale sockets badly.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};

use crate::tracing::prelude::*;

/// Accepted response timeouts, in seconds.
pub const TIMEOUT_RANGE: std::ops::RangeInclusive<i64> = 1..=60;

const READ_CHUNK: usize = 1024;

/// Which device addresses may be polled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressPolicy {
    /// Only addresses that are not publicly routable.
    #[default]
    Private,
    /// No restriction.
    Any,
}

impl AddressPolicy {
    /// Check `address` against the policy.
    pub fn check(self, address: IpAddr) -> Result<(), SettingError> {
        match self {
            AddressPolicy::Any => Ok(()),
            AddressPolicy::Private if is_private_network(address) => Ok(()),
            AddressPolicy::Private => Err(SettingError::PublicAddress(address)),
        }
    }
}

/// True if `address` belongs to a range that is not globally routable.
pub fn is_private_network(address: IpAddr) -> bool {
    match address {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_v4(mapped);
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00 // unique local
                || (first & 0xffc0) == 0xfe80 // link local
                || (first == 0x2001 && v6.segments()[1] == 0x0db8) // documentation
        }
    }
}

fn is_private_v4(v4: Ipv4Addr) -> bool {
    let [a, b, ..] = v4.octets();
    v4.is_private()
        || v4.is_loopback()
        || v4.is_link_local()
        || v4.is_unspecified()
        || v4.is_broadcast()
        || v4.is_documentation()
        || a == 0
        || (a == 198 && (b & 0xfe) == 18) // benchmarking
        || a >= 240 // reserved
}

/// A device setting that failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingError {
    #[error("address '{0}' does not appear to be an IPv4 or IPv6 address")]
    InvalidAddress(String),

    #[error("address '{0}' does not appear to be in private network")]
    PublicAddress(IpAddr),

    #[error("port '{0}' must be in range 1..65535")]
    Port(i64),

    #[error("response timeout '{0}' must be in range 1..60")]
    Timeout(i64),
}

/// Failure of one wire exchange.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("connection failed: {0}")]
    Connect(std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One polling endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    address: IpAddr,
    port: u16,
    timeout: Duration,
    policy: AddressPolicy,
}

impl Device {
    /// Create a device, validating every setting.
    pub fn new(
        address: &str,
        port: i64,
        timeout: i64,
        policy: AddressPolicy,
    ) -> Result<Self, SettingError> {
        Ok(Self {
            address: parse_address(address, policy)?,
            port: parse_port(port)?,
            timeout: parse_timeout(timeout)?,
            policy,
        })
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn set_address(&mut self, address: &str) -> Result<(), SettingError> {
        self.address = parse_address(address, self.policy)?;
        Ok(())
    }

    pub fn set_port(&mut self, port: i64) -> Result<(), SettingError> {
        self.port = parse_port(port)?;
        Ok(())
    }

    pub fn set_timeout(&mut self, timeout: i64) -> Result<(), SettingError> {
        self.timeout = parse_timeout(timeout)?;
        Ok(())
    }

    /// Send `payload` and return everything the device answers.
    ///
    /// Connect, write and read share one deadline of `timeout`. When the
    /// deadline passes after some bytes arrived, those bytes are the answer;
    /// with nothing received it is a timeout. Trailing NUL padding is removed.
    pub async fn exchange(&self, payload: &[u8]) -> Result<Vec<u8>, NetworkError> {
        let deadline = Instant::now() + self.timeout;
        let addr = self.socket_addr();

        trace!(%addr, "Connecting");
        let mut stream = timeout_at(deadline, TcpStream::connect(addr))
            .await
            .map_err(|_| NetworkError::Timeout(self.timeout))?
            .map_err(NetworkError::Connect)?;

        trace!(%addr, tx = %String::from_utf8_lossy(payload).trim_end(), "Sending request");
        timeout_at(deadline, stream.write_all(payload))
            .await
            .map_err(|_| NetworkError::Timeout(self.timeout))??;

        let mut received = Vec::with_capacity(READ_CHUNK);
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match timeout_at(deadline, stream.read(&mut chunk)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => received.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(NetworkError::Io(e)),
                Err(_) if received.is_empty() => {
                    return Err(NetworkError::Timeout(self.timeout));
                }
                Err(_) => {
                    debug!(%addr, bytes = received.len(), "Peer kept connection open, using what arrived");
                    break;
                }
            }
        }

        let end = received.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        received.truncate(end);
        trace!(%addr, rx = %String::from_utf8_lossy(&received), "Received response");
        Ok(received)
    }
}

fn parse_address(address: &str, policy: AddressPolicy) -> Result<IpAddr, SettingError> {
    let parsed: IpAddr = address
        .trim()
        .parse()
        .map_err(|_| SettingError::InvalidAddress(address.to_string()))?;
    policy.check(parsed)?;
    Ok(parsed)
}

pub(crate) fn parse_port(port: i64) -> Result<u16, SettingError> {
    match u16::try_from(port) {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(SettingError::Port(port)),
    }
}

pub(crate) fn parse_timeout(timeout: i64) -> Result<Duration, SettingError> {
    if TIMEOUT_RANGE.contains(&timeout) {
        Ok(Duration::from_secs(timeout as u64))
    } else {
        Err(SettingError::Timeout(timeout))
    }
}
