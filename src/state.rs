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

//! Application state management.

use parking_lot::RwLock;
use std::sync::Arc;

/// Scanner connection status as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
    Failed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Scanner Disconnected",
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Connected => "Scanner Connected",
            ConnectionStatus::Reconnecting => "Reconnecting...",
            ConnectionStatus::Error => "Error",
            ConnectionStatus::Failed => "Scanner connection failed",
        }
    }
}

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// Current connection status.
    pub connection_status: RwLock<ConnectionStatus>,

    /// Last error reason reported by the link.
    pub last_error: RwLock<Option<String>>,

    /// Last accepted inventory code.
    pub last_code: RwLock<Option<String>>,

    /// Number of accepted codes.
    pub scan_count: RwLock<usize>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            connection_status: RwLock::new(ConnectionStatus::Disconnected),
            last_error: RwLock::new(None),
            last_code: RwLock::new(None),
            scan_count: RwLock::new(0),
        }
    }
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        *self.connection_status.write() = status;
    }

    pub fn get_status(&self) -> ConnectionStatus {
        *self.connection_status.read()
    }

    pub fn set_error(&self, reason: &str) {
        *self.connection_status.write() = ConnectionStatus::Error;
        *self.last_error.write() = Some(reason.to_string());
    }

    pub fn get_last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn record_code(&self, code: String) {
        *self.last_code.write() = Some(code);
        *self.scan_count.write() += 1;
    }

    pub fn get_last_code(&self) -> Option<String> {
        self.last_code.read().clone()
    }

    pub fn get_scan_count(&self) -> usize {
        *self.scan_count.read()
    }

    /// Status line, e.g. "Error: Bluetooth is not enabled".
    pub fn status_message(&self) -> String {
        match (self.get_status(), self.get_last_error()) {
            (ConnectionStatus::Error, Some(reason)) => format!("Error: {}", reason),
            (status, _) => status.as_str().to_string(),
        }
    }
}
