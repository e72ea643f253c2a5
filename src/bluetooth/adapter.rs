// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Platform adapter abstraction for serial-port-profile links.

use futures::future::BoxFuture;
use std::fmt;
use std::io;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use crate::error::LinkError;

/// Standard SPP UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// RFCOMM channel tried when the service record lookup fails.
pub const DEFAULT_FALLBACK_CHANNEL: u8 = 1;

/// Address of the remote scanner, e.g. `00:11:22:AA:BB:CC`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Parse and normalize a MAC-style address.
    pub fn parse(s: &str) -> Result<Self, LinkError> {
        let trimmed = s.trim();
        let parts: Vec<&str> = trimmed.split(':').collect();
        let valid = parts.len() == 6
            && parts
                .iter()
                .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()));

        if !valid {
            return Err(LinkError::InvalidAddress(s.to_string()));
        }

        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for DeviceAddress {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One way of opening the byte stream to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStrategy {
    /// Resolve the channel through the device's service record.
    ServiceRecord(Uuid),
    /// Connect straight to a fixed RFCOMM channel.
    Channel(u8),
}

impl ConnectStrategy {
    /// Strategies tried in order: SPP service lookup, then the fixed channel.
    pub fn default_order(fallback_channel: Option<u8>) -> Vec<ConnectStrategy> {
        let mut strategies = vec![ConnectStrategy::ServiceRecord(SPP_UUID)];
        if let Some(channel) = fallback_channel {
            strategies.push(ConnectStrategy::Channel(channel));
        }
        strategies
    }
}

impl fmt::Display for ConnectStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectStrategy::ServiceRecord(uuid) => write!(f, "service record {}", uuid),
            ConnectStrategy::Channel(channel) => write!(f, "channel {}", channel),
        }
    }
}

/// A paired Bluetooth device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedDevice {
    pub address: DeviceAddress,
    pub name: String,
}

/// Radio adapter that can open SPP streams.
///
/// Permission failures must be reported as `io::ErrorKind::PermissionDenied`
/// so the manager does not fall through to the next strategy.
pub trait SppAdapter: Send + Sync + 'static {
    /// Duplex stream produced by a successful `open`.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Whether the radio is powered.
    fn is_enabled(&self) -> BoxFuture<'_, io::Result<bool>>;

    /// Ask the adapter to pause any device discovery.
    fn cancel_discovery(&self) -> BoxFuture<'_, io::Result<()>>;

    /// Open a stream to `device` using one strategy.
    fn open<'a>(
        &'a self,
        device: &'a DeviceAddress,
        strategy: &'a ConnectStrategy,
    ) -> BoxFuture<'a, io::Result<Self::Stream>>;

    /// Devices bonded with this adapter.
    fn paired_devices(&self) -> BoxFuture<'_, io::Result<Vec<PairedDevice>>>;
}
