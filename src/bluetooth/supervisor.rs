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

//! Bounded reconnect policy on top of the connection manager.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use super::adapter::{DeviceAddress, SppAdapter};
use super::manager::ConnectionManager;
use crate::config::ReconnectConfig;
use crate::events::{dispatch, ConnectionListener, ScannerEvent};

struct RetryState {
    /// Device to keep connected. `None` after an explicit disconnect.
    target: Option<DeviceAddress>,
    /// Automatic retries since the last successful connection.
    attempts: u32,
    last_attempt: Option<Instant>,
    /// Bumped by every explicit connect or disconnect; retries scheduled
    /// under an older generation do nothing.
    generation: u64,
    /// Scheduled or running retry task.
    pending: Option<JoinHandle<()>>,
    in_flight: bool,
    exhausted: bool,
}

/// Keeps one scanner connected, retrying a bounded number of times.
pub struct ReconnectSupervisor<A: SppAdapter> {
    manager: ConnectionManager<A>,
    config: ReconnectConfig,
    events: mpsc::UnboundedSender<ScannerEvent>,
    retry: Mutex<RetryState>,
}

impl<A: SppAdapter> ReconnectSupervisor<A> {
    pub fn new(manager: ConnectionManager<A>, config: ReconnectConfig) -> Arc<Self> {
        let events = manager.event_sender();
        Arc::new(Self {
            manager,
            config,
            events,
            retry: Mutex::new(RetryState {
                target: None,
                attempts: 0,
                last_attempt: None,
                generation: 0,
                pending: None,
                in_flight: false,
                exhausted: false,
            }),
        })
    }

    pub fn manager(&self) -> &ConnectionManager<A> {
        &self.manager
    }

    /// Connect to `device` and keep it connected.
    ///
    /// Resets the retry counter and cancels any scheduled retry. On failure a
    /// retry is scheduled and `false` is returned.
    pub async fn connect(self: &Arc<Self>, device: DeviceAddress) -> bool {
        let generation = {
            let mut retry = self.retry.lock();
            retry.target = Some(device.clone());
            retry.attempts = 0;
            retry.exhausted = false;
            retry.generation += 1;
            retry.in_flight = true;
            if let Some(task) = retry.pending.take() {
                task.abort();
            }
            retry.generation
        };

        info!("Connecting to scanner {}", device);
        self.attempt(generation, device).await
    }

    /// Stop keeping the scanner connected and tear the link down.
    pub async fn disconnect(&self) {
        let pending = {
            let mut retry = self.retry.lock();
            retry.target = None;
            retry.generation += 1;
            retry.in_flight = false;
            retry.pending.take()
        };
        if let Some(task) = pending {
            debug!("Cancelling scheduled reconnect");
            task.abort();
        }

        self.manager.stop_reading();
        self.manager.disconnect().await;
    }

    /// Automatic retries since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.retry.lock().attempts
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.retry.lock().last_attempt
    }

    /// Whether retries gave up. Cleared by the next `connect`.
    pub fn is_exhausted(&self) -> bool {
        self.retry.lock().exhausted
    }

    pub fn target(&self) -> Option<DeviceAddress> {
        self.retry.lock().target.clone()
    }

    /// Pump link events to `listener`, scheduling reconnects on the way.
    ///
    /// Every listener callback runs on this task. Spawn it once per
    /// supervisor; it runs until aborted.
    pub async fn run<L: ConnectionListener>(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ScannerEvent>,
        mut listener: L,
    ) {
        while let Some(event) = events.recv().await {
            dispatch(&mut listener, &event);
            if event == ScannerEvent::Disconnected {
                self.on_link_lost();
            }
        }
        debug!("Event channel closed");
    }

    fn on_link_lost(self: &Arc<Self>) {
        let mut retry = self.retry.lock();

        if retry.target.is_none() {
            debug!("Disconnect requested, not reconnecting");
            return;
        }
        if retry.in_flight || retry.pending.is_some() || retry.exhausted {
            return;
        }
        // A newer connection may already be up by the time the event arrives.
        if self.manager.is_connected() {
            return;
        }

        self.schedule_locked(&mut retry);
    }

    async fn attempt(self: &Arc<Self>, generation: u64, device: DeviceAddress) -> bool {
        let connected = self.manager.connect(Some(&device)).await;

        let superseded = {
            let mut retry = self.retry.lock();
            if retry.generation != generation {
                true
            } else {
                retry.in_flight = false;
                retry.pending = None;
                retry.last_attempt = Some(Instant::now());
                if connected {
                    retry.attempts = 0;
                    retry.exhausted = false;
                } else {
                    self.schedule_locked(&mut retry);
                }
                false
            }
        };

        // The newer request owns the link now: a later connect replaces this
        // connection and a later disconnect cancels or closes it.
        if superseded {
            debug!("Connection attempt superseded");
            return false;
        }

        if connected {
            self.manager.start_reading();
        }
        connected
    }

    /// Mark a scheduled retry as running. Returns the device to connect to,
    /// or `None` if the retry was superseded.
    fn begin_attempt(&self, generation: u64) -> Option<DeviceAddress> {
        let mut retry = self.retry.lock();
        if retry.generation != generation {
            return None;
        }
        let device = retry.target.clone()?;
        retry.in_flight = true;
        Some(device)
    }

    fn schedule_locked(self: &Arc<Self>, retry: &mut RetryState) {
        if retry.attempts >= self.config.max_attempts {
            warn!(
                "Giving up on scanner after {} reconnect attempts",
                retry.attempts
            );
            retry.exhausted = true;
            self.emit(ScannerEvent::ReconnectExhausted {
                attempts: retry.attempts,
            });
            return;
        }

        retry.attempts += 1;
        let attempt = retry.attempts;
        let delay = self.config.delay();
        let generation = retry.generation;
        info!(
            "Scheduling reconnect attempt {}/{} in {}ms",
            attempt,
            self.config.max_attempts,
            delay.as_millis()
        );
        self.emit(ScannerEvent::ReconnectScheduled { attempt, delay });

        let supervisor = Arc::clone(self);
        retry.pending = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            let Some(device) = supervisor.begin_attempt(generation) else {
                return;
            };
            debug!("Reconnect attempt {} starting", attempt);
            supervisor.attempt(generation, device).await;
        }));
    }

    fn emit(&self, event: ScannerEvent) {
        if self.events.send(event).is_err() {
            debug!("No event receiver, event dropped");
        }
    }
}
