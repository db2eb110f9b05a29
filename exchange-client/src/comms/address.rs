//! Gateway endpoint addresses.
//!
//! Callers usually pass a bare `host:port`; the transport needs a full ZMQ
//! endpoint, so a missing scheme defaults to `tcp://`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ClientError;

pub const DEFAULT_SCHEME: &str = "tcp://";

const KNOWN_SCHEMES: [&str; 3] = ["tcp://", "ipc://", "inproc://"];

/// A normalized ZMQ endpoint, e.g. `tcp://127.0.0.1:5570`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Creates a new ZMQ TCP address.
    ///
    /// # Arguments
    ///
    /// * `ip` - The IP address (e.g., "127.0.0.1").
    /// * `port` - The TCP port.
    pub fn zmq_tcp(ip: &str, port: u16) -> Self {
        Address(format!("{}{}:{}", DEFAULT_SCHEME, ip, port))
    }

    /// Normalizes `raw`, adding the default scheme when none is given.
    pub fn parse(raw: &str) -> Result<Self, ClientError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ClientError::InvalidAddress(raw.to_string()));
        }
        if KNOWN_SCHEMES.iter().any(|scheme| raw.starts_with(scheme)) {
            Ok(Address(raw.to_string()))
        } else if raw.contains("://") {
            Err(ClientError::InvalidAddress(raw.to_string()))
        } else {
            Ok(Address(format!("{}{}", DEFAULT_SCHEME, raw)))
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}
