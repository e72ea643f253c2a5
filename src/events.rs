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

//! Scanner events and listener dispatch.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::bluetooth::{DeviceAddress, ScanEvent};
use crate::inventory::{ScanLog, ScanOutcome};
use crate::state::{AppState, ConnectionStatus};

/// Events emitted by the serial link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannerEvent {
    /// Stream opened.
    Connected { device: DeviceAddress },
    /// A live connection was torn down.
    Disconnected,
    /// A complete line arrived.
    DataReceived(ScanEvent),
    /// Something failed; the reason is human readable.
    Error(String),
    /// A reconnect attempt will start after `delay`.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Automatic reconnects gave up.
    ReconnectExhausted { attempts: u32 },
}

/// Receiver of scanner events.
///
/// All callbacks run on one task, in the order the events were produced.
pub trait ConnectionListener: Send {
    fn on_connected(&mut self);

    fn on_disconnected(&mut self);

    fn on_data_received(&mut self, line: &str);

    fn on_error(&mut self, reason: &str);

    fn on_reconnect_scheduled(&mut self, _attempt: u32, _delay: Duration) {}

    fn on_connection_failed(&mut self, _attempts: u32) {}
}

/// Forward one event to a listener.
pub fn dispatch<L: ConnectionListener + ?Sized>(listener: &mut L, event: &ScannerEvent) {
    match event {
        ScannerEvent::Connected { .. } => listener.on_connected(),
        ScannerEvent::Disconnected => listener.on_disconnected(),
        ScannerEvent::DataReceived(scan) => listener.on_data_received(&scan.code),
        ScannerEvent::Error(reason) => listener.on_error(reason),
        ScannerEvent::ReconnectScheduled { attempt, delay } => {
            listener.on_reconnect_scheduled(*attempt, *delay)
        }
        ScannerEvent::ReconnectExhausted { attempts } => listener.on_connection_failed(*attempts),
    }
}

/// Listener used by the binary: validates codes, tracks duplicates and
/// keeps the shared status current.
pub struct EventProcessor {
    state: Arc<AppState>,
    log: ScanLog,
}

impl EventProcessor {
    /// Create a new event processor.
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            log: ScanLog::new(),
        }
    }

    /// Accepted scans so far.
    pub fn log(&self) -> &ScanLog {
        &self.log
    }
}

impl ConnectionListener for EventProcessor {
    fn on_connected(&mut self) {
        info!("Connected to scanner");
        self.state.set_status(ConnectionStatus::Connected);
    }

    fn on_disconnected(&mut self) {
        info!("Disconnected from scanner");
        self.state.set_status(ConnectionStatus::Disconnected);
    }

    fn on_data_received(&mut self, line: &str) {
        match self.log.offer(line) {
            ScanOutcome::Accepted(code) => {
                info!("Scanned: {}", code);
                println!("{}", code);
                self.state.record_code(code);
            }
            ScanOutcome::Duplicate(code) => {
                warn!("Duplicate: {}", code);
            }
            ScanOutcome::Invalid => {
                warn!("Rejected line: {:?}", line);
            }
        }
    }

    fn on_error(&mut self, reason: &str) {
        error!("Error: {}", reason);
        self.state.set_error(reason);
    }

    fn on_reconnect_scheduled(&mut self, attempt: u32, delay: Duration) {
        info!(
            "Reconnect attempt {} in {}ms",
            attempt,
            delay.as_millis()
        );
        self.state.set_status(ConnectionStatus::Reconnecting);
    }

    fn on_connection_failed(&mut self, attempts: u32) {
        error!("Scanner connection failed after {} attempts", attempts);
        self.state.set_status(ConnectionStatus::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(code: &str, sequence: u64) -> ScannerEvent {
        ScannerEvent::DataReceived(ScanEvent {
            code: code.to_string(),
            sequence,
        })
    }

    #[test]
    fn test_processor_tracks_scans() {
        let state = AppState::new();
        let mut processor = EventProcessor::new(state.clone());

        dispatch(&mut processor, &scan("A1", 1));
        dispatch(&mut processor, &scan("A1", 2));
        dispatch(&mut processor, &scan("B\u{0002}", 3));
        dispatch(&mut processor, &scan("C3", 4));

        assert_eq!(processor.log().len(), 2);
        assert_eq!(state.get_scan_count(), 2);
        assert_eq!(state.get_last_code().as_deref(), Some("C3"));
    }

    #[test]
    fn test_processor_status_transitions() {
        let state = AppState::new();
        let mut processor = EventProcessor::new(state.clone());
        let device = DeviceAddress::parse("00:11:22:33:44:55").unwrap();

        dispatch(&mut processor, &ScannerEvent::Connected { device });
        assert_eq!(state.get_status(), ConnectionStatus::Connected);

        dispatch(&mut processor, &ScannerEvent::Error("Connection lost".to_string()));
        assert_eq!(state.status_message(), "Error: Connection lost");

        dispatch(
            &mut processor,
            &ScannerEvent::ReconnectScheduled {
                attempt: 1,
                delay: Duration::from_secs(3),
            },
        );
        assert_eq!(state.get_status(), ConnectionStatus::Reconnecting);

        dispatch(&mut processor, &ScannerEvent::ReconnectExhausted { attempts: 5 });
        assert_eq!(state.get_status(), ConnectionStatus::Failed);
    }
}
