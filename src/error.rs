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

//! Errors raised inside the serial link layer.
//!
//! These never cross the public boundary of the connection manager; they are
//! rendered into `ScannerEvent::Error` reasons instead.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failure while establishing or running a serial link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Device is null")]
    NoDevice,

    #[error("invalid device address: {0}")]
    InvalidAddress(String),

    #[error("Bluetooth is not enabled")]
    AdapterDisabled,

    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(#[source] io::Error),

    #[error("Bluetooth permission denied: {0}")]
    PermissionDenied(#[source] io::Error),

    #[error("Connection failed (Protocol Error): {0}")]
    Protocol(#[source] io::Error),

    #[error("Connection timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("connection attempt cancelled")]
    Cancelled,

    #[error("no connection strategies configured")]
    NoStrategies,
}

impl LinkError {
    /// Classify an I/O error returned by a connection strategy.
    pub fn from_open(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => LinkError::PermissionDenied(err),
            _ => LinkError::Protocol(err),
        }
    }

    /// Whether the next connection strategy should be tried after this error.
    pub fn allows_fallback(&self) -> bool {
        matches!(self, LinkError::Protocol(_))
    }
}
