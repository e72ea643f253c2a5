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

//! Serial link connection manager.
//!
//! Owns the single stream to the scanner: connects with cooldown, fallback
//! and timeout, runs the read loop that feeds the line framer, and tears the
//! link down idempotently. Failures never escape as errors; they come out as
//! a `false` return or as `ScannerEvent`s.

use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use super::adapter::{ConnectStrategy, DeviceAddress, PairedDevice, SppAdapter};
use super::framer::{LineFramer, ScanEvent};
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::events::ScannerEvent;

/// State of the managed link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
    /// Teardown in progress; further disconnects are no-ops.
    Disconnecting,
}

/// Why the read loop is asked to stop.
enum ReadStop<S> {
    /// Hand the stream back through the sender.
    Pause(oneshot::Sender<S>),
    /// Close the stream.
    Close,
}

/// Where a new read loop gets its stream from.
enum StreamSource<S> {
    Ready(S),
    /// Still held by a paused read loop that has not handed it back yet.
    Handoff(oneshot::Receiver<S>),
}

struct ReaderHandle<S> {
    stop: oneshot::Sender<ReadStop<S>>,
    _task: JoinHandle<()>,
}

struct Shared<S> {
    state: LinkState,
    /// Bumped on every transition into or out of `Connected`. Read loops
    /// carry the epoch they were started in and go quiet once it moves on.
    epoch: u64,
    /// Bumped by every explicit `disconnect`. A connect that started under
    /// an older value gives up before opening anything.
    cancel_epoch: u64,
    device: Option<DeviceAddress>,
    /// Present while connected and not reading.
    stream: Option<S>,
    /// Stream on its way back from a paused read loop.
    handoff: Option<oneshot::Receiver<S>>,
    reader: Option<ReaderHandle<S>>,
}

struct Inner<A: SppAdapter> {
    adapter: Arc<A>,
    config: LinkConfig,
    strategies: Vec<ConnectStrategy>,
    events: mpsc::UnboundedSender<ScannerEvent>,
    shared: Mutex<Shared<A::Stream>>,
    /// Held for the whole of `connect`; stores when the last attempt started.
    last_attempt: tokio::sync::Mutex<Option<Instant>>,
}

impl<A: SppAdapter> Inner<A> {
    fn emit(&self, event: ScannerEvent) {
        if self.events.send(event).is_err() {
            debug!("No event receiver, event dropped");
        }
    }
}

/// Resets a transient state back to `Idle` if the owning future is dropped
/// before finishing.
struct StateGuard<'a, S> {
    shared: &'a Mutex<Shared<S>>,
    state: LinkState,
    armed: bool,
}

impl<'a, S> StateGuard<'a, S> {
    fn new(shared: &'a Mutex<Shared<S>>, state: LinkState) -> Self {
        Self {
            shared,
            state,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<S> Drop for StateGuard<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            let mut shared = self.shared.lock();
            if shared.state == self.state {
                shared.state = LinkState::Idle;
            }
        }
    }
}

/// Manager for one scanner link.
pub struct ConnectionManager<A: SppAdapter> {
    inner: Arc<Inner<A>>,
}

impl<A: SppAdapter> Clone for ConnectionManager<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: SppAdapter> ConnectionManager<A> {
    /// Create a manager and the receiver its events are delivered on.
    pub fn new(
        adapter: Arc<A>,
        config: LinkConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ScannerEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let strategies = ConnectStrategy::default_order(config.fallback_channel);

        let inner = Inner {
            adapter,
            config,
            strategies,
            events,
            shared: Mutex::new(Shared {
                state: LinkState::Idle,
                epoch: 0,
                cancel_epoch: 0,
                device: None,
                stream: None,
                handoff: None,
                reader: None,
            }),
            last_attempt: tokio::sync::Mutex::new(None),
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            event_rx,
        )
    }

    pub(crate) fn event_sender(&self) -> mpsc::UnboundedSender<ScannerEvent> {
        self.inner.events.clone()
    }

    /// Connect to `device`, replacing any existing connection.
    ///
    /// Emits `Connected` on success and `Error` on failure. Never leaves a
    /// half-open stream behind. A `disconnect` issued before this call
    /// returns cancels it, including while it waits out the cooldown.
    pub async fn connect(&self, device: Option<&DeviceAddress>) -> bool {
        match self.try_connect(device).await {
            Ok(()) => true,
            Err(err) => {
                error!("Connection failed: {}", err);
                self.inner.emit(ScannerEvent::Error(err.to_string()));
                false
            }
        }
    }

    async fn try_connect(&self, device: Option<&DeviceAddress>) -> Result<(), LinkError> {
        let device = device.ok_or(LinkError::NoDevice)?;
        let ticket = self.inner.shared.lock().cancel_epoch;

        match self.inner.adapter.is_enabled().await {
            Ok(true) => {}
            Ok(false) => return Err(LinkError::AdapterDisabled),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return Err(LinkError::PermissionDenied(e))
            }
            Err(e) => return Err(LinkError::AdapterUnavailable(e)),
        }

        let mut last_attempt = self.inner.last_attempt.lock().await;
        if let Some(started) = *last_attempt {
            let cooldown = self.inner.config.retry_cooldown();
            let elapsed = started.elapsed();
            if elapsed < cooldown {
                let wait = cooldown - elapsed;
                debug!("Connection cooldown active, waiting {}ms", wait.as_millis());
                time::sleep(wait).await;
            }
        }
        if self.is_cancelled(ticket) {
            return Err(LinkError::Cancelled);
        }
        *last_attempt = Some(Instant::now());

        // Discovery competes with the connection for radio time
        if let Err(e) = self.inner.adapter.cancel_discovery().await {
            warn!("Could not cancel discovery: {}", e);
        }
        let settle = self.inner.config.discovery_settle();
        if !settle.is_zero() {
            time::sleep(settle).await;
        }

        self.teardown().await;

        {
            let mut shared = self.inner.shared.lock();
            if shared.cancel_epoch != ticket {
                return Err(LinkError::Cancelled);
            }
            shared.state = LinkState::Connecting;
        }
        let guard = StateGuard::new(&self.inner.shared, LinkState::Connecting);
        info!("Connecting to {}", device);

        let timeout = self.inner.config.connect_timeout();
        let stream = match time::timeout(timeout, self.open_stream(device)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("Connection to {} timed out", device);
                return Err(LinkError::Timeout(timeout));
            }
        };

        let cancelled = {
            let mut shared = self.inner.shared.lock();
            if shared.state == LinkState::Connecting && shared.cancel_epoch == ticket {
                shared.state = LinkState::Connected;
                shared.epoch += 1;
                shared.device = Some(device.clone());
                shared.stream = Some(stream);
                self.inner.emit(ScannerEvent::Connected {
                    device: device.clone(),
                });
                None
            } else {
                Some(stream)
            }
        };

        if let Some(stream) = cancelled {
            info!("Connection to {} cancelled", device);
            close_stream(stream).await;
            return Err(LinkError::Cancelled);
        }

        guard.disarm();
        info!("Successfully connected to {}", device);
        Ok(())
    }

    fn is_cancelled(&self, ticket: u64) -> bool {
        self.inner.shared.lock().cancel_epoch != ticket
    }

    /// Try each strategy in order. Only protocol-level I/O errors fall
    /// through to the next one.
    async fn open_stream(&self, device: &DeviceAddress) -> Result<A::Stream, LinkError> {
        let mut last_err = LinkError::NoStrategies;

        for (index, strategy) in self.inner.strategies.iter().enumerate() {
            if index == 0 {
                debug!("Attempting connection via {}", strategy);
            } else {
                warn!("Trying fallback connection via {}", strategy);
            }

            match self.inner.adapter.open(device, strategy).await {
                Ok(stream) => {
                    if index > 0 {
                        info!("Connected via fallback {}", strategy);
                    }
                    return Ok(stream);
                }
                Err(e) => {
                    let err = LinkError::from_open(e);
                    warn!("Connection via {} failed: {}", strategy, err);
                    if !err.allows_fallback() {
                        return Err(err);
                    }
                    last_err = err;
                }
            }
        }

        Err(last_err)
    }

    /// Start the background read loop.
    ///
    /// Must be called from within a tokio runtime. No-op if not connected or
    /// already reading.
    pub fn start_reading(&self) {
        let mut shared = self.inner.shared.lock();

        if shared.state != LinkState::Connected {
            warn!("Not connected, cannot start reading");
            return;
        }
        if shared.reader.is_some() {
            debug!("Read loop already running");
            return;
        }
        let source = if let Some(stream) = shared.stream.take() {
            StreamSource::Ready(stream)
        } else if let Some(handoff) = shared.handoff.take() {
            StreamSource::Handoff(handoff)
        } else {
            warn!("Stream not available for reading");
            return;
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let epoch = shared.epoch;
        let manager = self.clone();
        let task = tokio::spawn(async move {
            let stream = match source {
                StreamSource::Ready(stream) => stream,
                StreamSource::Handoff(handoff) => match handoff.await {
                    Ok(stream) => stream,
                    Err(_) => {
                        debug!("Paused stream was closed before it was handed back");
                        return;
                    }
                },
            };
            manager.read_loop(stream, stop_rx, epoch).await;
        });

        shared.reader = Some(ReaderHandle {
            stop: stop_tx,
            _task: task,
        });
        debug!("Read loop started");
    }

    /// Stop the read loop. The connection stays open.
    pub fn stop_reading(&self) {
        let mut shared = self.inner.shared.lock();
        let Some(reader) = shared.reader.take() else {
            debug!("Not reading");
            return;
        };

        let (handoff_tx, handoff_rx) = oneshot::channel();
        if reader.stop.send(ReadStop::Pause(handoff_tx)).is_err() {
            debug!("Read loop already finished");
            return;
        }
        shared.handoff = Some(handoff_rx);
    }

    /// Tear the connection down and cancel any connect that has not
    /// finished yet.
    ///
    /// Emits `Disconnected` only if the link was connected when teardown
    /// began. A call made while another teardown is running returns at once.
    pub async fn disconnect(&self) {
        self.inner.shared.lock().cancel_epoch += 1;
        self.teardown().await;
    }

    async fn teardown(&self) {
        let taken = {
            let mut shared = self.inner.shared.lock();
            if shared.state == LinkState::Disconnecting {
                debug!("Disconnection already in progress");
                None
            } else {
                let was_connected = shared.state == LinkState::Connected;
                shared.state = LinkState::Disconnecting;
                shared.epoch += 1;
                shared.device = None;
                Some((
                    was_connected,
                    shared.stream.take(),
                    shared.handoff.take(),
                    shared.reader.take(),
                ))
            }
        };
        let Some((was_connected, stream, handoff, reader)) = taken else {
            return;
        };
        let guard = StateGuard::new(&self.inner.shared, LinkState::Disconnecting);

        // The read loop owns the stream while reading; it closes it on Close.
        if let Some(reader) = reader {
            if reader.stop.send(ReadStop::Close).is_err() {
                debug!("Read loop already finished");
            }
        }
        // A paused loop that has not handed back yet sees the new epoch and
        // closes the stream itself.
        if let Some(mut handoff) = handoff {
            if let Ok(stream) = handoff.try_recv() {
                close_stream(stream).await;
            }
        }
        if let Some(stream) = stream {
            close_stream(stream).await;
        }

        {
            let mut shared = self.inner.shared.lock();
            if shared.state == LinkState::Disconnecting {
                shared.state = LinkState::Idle;
            }
            if was_connected {
                self.inner.emit(ScannerEvent::Disconnected);
            }
        }
        guard.disarm();

        debug!("Disconnected and cleaned up resources");
    }

    pub fn is_connected(&self) -> bool {
        self.inner.shared.lock().state == LinkState::Connected
    }

    pub fn is_reading(&self) -> bool {
        self.inner.shared.lock().reader.is_some()
    }

    pub fn state(&self) -> LinkState {
        self.inner.shared.lock().state
    }

    /// Device of the live connection, if any.
    pub fn device(&self) -> Option<DeviceAddress> {
        self.inner.shared.lock().device.clone()
    }

    /// Devices bonded with the adapter. Empty if the query is refused.
    pub async fn paired_devices(&self) -> Vec<PairedDevice> {
        match self.inner.adapter.paired_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                error!("Could not get paired devices: {}", e);
                Vec::new()
            }
        }
    }

    async fn read_loop(
        self,
        mut stream: A::Stream,
        mut stop_rx: oneshot::Receiver<ReadStop<A::Stream>>,
        epoch: u64,
    ) {
        let mut framer = LineFramer::with_max_len(self.inner.config.max_line_length);
        let mut buffer = vec![0u8; self.inner.config.read_buffer_size.max(1)];

        loop {
            tokio::select! {
                biased;

                stop = &mut stop_rx => {
                    match stop {
                        Ok(ReadStop::Pause(handoff)) => {
                            self.park_stream(stream, epoch, handoff).await
                        }
                        _ => close_stream(stream).await,
                    }
                    debug!("Read loop stopped");
                    return;
                }

                read = stream.read(&mut buffer) => match read {
                    Ok(0) => {
                        info!("Connection closed by remote");
                        self.end_read_loop(epoch, None);
                        close_stream(stream).await;
                        return;
                    }
                    Ok(n) => {
                        if let Some(scan) = framer.push(&buffer[..n]) {
                            if !self.emit_scan(epoch, scan) {
                                close_stream(stream).await;
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Error reading data: {}", e);
                        self.end_read_loop(epoch, Some(e));
                        close_stream(stream).await;
                        return;
                    }
                }
            }
        }
    }

    /// Emit a scan unless the connection it came from is gone.
    fn emit_scan(&self, epoch: u64, scan: ScanEvent) -> bool {
        let shared = self.inner.shared.lock();
        if shared.epoch != epoch || shared.state != LinkState::Connected {
            return false;
        }
        debug!("Data received: {}", scan.code);
        self.inner.emit(ScannerEvent::DataReceived(scan));
        true
    }

    /// Tear down after the stream ended underneath the read loop.
    fn end_read_loop(&self, epoch: u64, failure: Option<io::Error>) {
        let mut shared = self.inner.shared.lock();
        if shared.epoch != epoch || shared.state != LinkState::Connected {
            debug!("Read loop ended after teardown");
            return;
        }

        shared.state = LinkState::Idle;
        shared.epoch += 1;
        shared.device = None;
        shared.handoff = None;
        shared.reader = None;

        if let Some(err) = failure {
            self.inner
                .emit(ScannerEvent::Error(format!("Connection lost: {}", err)));
        }
        self.inner.emit(ScannerEvent::Disconnected);
    }

    /// Hand the stream back after `stop_reading`, or close it if the
    /// connection moved on in the meantime.
    async fn park_stream(
        &self,
        stream: A::Stream,
        epoch: u64,
        handoff: oneshot::Sender<A::Stream>,
    ) {
        let current = {
            let shared = self.inner.shared.lock();
            shared.epoch == epoch && shared.state == LinkState::Connected
        };

        let leftover = if current {
            handoff.send(stream).err()
        } else {
            Some(stream)
        };

        if let Some(stream) = leftover {
            close_stream(stream).await;
        }
    }
}

/// Close a stream, logging failures.
async fn close_stream<S: AsyncWrite + Unpin>(mut stream: S) {
    if let Err(e) = stream.shutdown().await {
        warn!("Error closing stream: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::adapter::SPP_UUID;
    use crate::bluetooth::mock::{MockAdapter, OpenBehavior};
    use std::time::Duration;

    fn device() -> DeviceAddress {
        DeviceAddress::parse("00:11:22:AA:BB:CC").unwrap()
    }

    fn setup() -> (
        Arc<MockAdapter>,
        ConnectionManager<MockAdapter>,
        mpsc::UnboundedReceiver<ScannerEvent>,
    ) {
        let adapter = Arc::new(MockAdapter::new());
        let (manager, rx) = ConnectionManager::new(adapter.clone(), LinkConfig::default());
        (adapter, manager, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<ScannerEvent>) -> ScannerEvent {
        time::timeout(Duration::from_secs(120), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<ScannerEvent>) {
        if let Ok(event) = time::timeout(Duration::from_secs(60), rx.recv()).await {
            panic!("unexpected event: {:?}", event);
        }
    }

    fn scan(code: &str, sequence: u64) -> ScannerEvent {
        ScannerEvent::DataReceived(ScanEvent {
            code: code.to_string(),
            sequence,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_state() {
        let (_adapter, manager, _rx) = setup();
        assert!(!manager.is_connected());
        assert!(!manager.is_reading());
        assert_eq!(manager.state(), LinkState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_when_never_connected_is_silent() {
        let (_adapter, manager, mut rx) = setup();

        manager.disconnect().await;
        manager.disconnect().await;
        manager.stop_reading();

        assert!(!manager.is_connected());
        assert_quiet(&mut rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_then_double_disconnect() {
        let (adapter, manager, mut rx) = setup();

        assert!(manager.connect(Some(&device())).await);
        assert_eq!(next(&mut rx).await, ScannerEvent::Connected { device: device() });
        assert!(manager.is_connected());
        assert_eq!(manager.device(), Some(device()));
        assert_eq!(adapter.discovery_cancels(), 1);

        let peer = adapter.take_peer().unwrap();
        assert_eq!(peer.strategy, ConnectStrategy::ServiceRecord(SPP_UUID));

        manager.disconnect().await;
        manager.disconnect().await;

        assert_eq!(next(&mut rx).await, ScannerEvent::Disconnected);
        assert_quiet(&mut rx).await;
        assert!(!manager.is_connected());
        assert!(peer.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_without_device() {
        let (adapter, manager, mut rx) = setup();

        assert!(!manager.connect(None).await);
        assert_eq!(next(&mut rx).await, ScannerEvent::Error("Device is null".to_string()));
        assert_eq!(adapter.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_adapter_disabled() {
        let (adapter, manager, mut rx) = setup();
        adapter.set_enabled(false);

        assert!(!manager.connect(Some(&device())).await);
        assert_eq!(
            next(&mut rx).await,
            ScannerEvent::Error("Bluetooth is not enabled".to_string())
        );
        assert_eq!(adapter.open_count(), 0);
        assert_eq!(adapter.discovery_cancels(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_cancel_failure_is_ignored() {
        let (adapter, manager, mut rx) = setup();
        adapter.set_fail_discovery_cancel(true);

        assert!(manager.connect(Some(&device())).await);
        assert!(matches!(next(&mut rx).await, ScannerEvent::Connected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_success_is_not_an_error() {
        let (adapter, manager, mut rx) = setup();
        adapter.set_service_record(OpenBehavior::Fail(io::ErrorKind::ConnectionRefused));

        assert!(manager.connect(Some(&device())).await);
        assert!(matches!(next(&mut rx).await, ScannerEvent::Connected { .. }));
        assert_quiet(&mut rx).await;

        let opens = adapter.opens();
        assert_eq!(opens.len(), 2);
        assert!(opens.iter().all(|open| open.device == device()));
        assert_eq!(opens[1].strategy, ConnectStrategy::Channel(1));
        assert_eq!(adapter.take_peer().unwrap().strategy, ConnectStrategy::Channel(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_failure_reports_last_error() {
        let (adapter, manager, mut rx) = setup();
        adapter.set_service_record(OpenBehavior::Fail(io::ErrorKind::ConnectionRefused));
        adapter.set_channel(OpenBehavior::Fail(io::ErrorKind::PermissionDenied));

        assert!(!manager.connect(Some(&device())).await);
        match next(&mut rx).await {
            ScannerEvent::Error(reason) => {
                assert!(reason.starts_with("Bluetooth permission denied"))
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(adapter.open_count(), 2);
        assert!(adapter.take_peer().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_strategies_fail() {
        let (adapter, manager, mut rx) = setup();
        adapter.set_all(OpenBehavior::Fail(io::ErrorKind::ConnectionRefused));

        assert!(!manager.connect(Some(&device())).await);
        match next(&mut rx).await {
            ScannerEvent::Error(reason) => {
                assert!(reason.starts_with("Connection failed (Protocol Error)"))
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(adapter.open_count(), 2);
        assert!(!manager.is_connected());
        assert_eq!(manager.state(), LinkState::Idle);
        assert_quiet(&mut rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_skips_fallback() {
        let (adapter, manager, mut rx) = setup();
        adapter.set_service_record(OpenBehavior::Fail(io::ErrorKind::PermissionDenied));

        assert!(!manager.connect(Some(&device())).await);
        assert!(matches!(next(&mut rx).await, ScannerEvent::Error(_)));
        assert_eq!(adapter.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let (adapter, manager, mut rx) = setup();
        adapter.set_all(OpenBehavior::Hang);

        let started = Instant::now();
        assert!(!manager.connect(Some(&device())).await);
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(
            next(&mut rx).await,
            ScannerEvent::Error("Connection timed out after 30s".to_string())
        );
        assert_eq!(manager.state(), LinkState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_connects_wait_for_cooldown() {
        let (adapter, manager, mut rx) = setup();

        assert!(manager.connect(Some(&device())).await);
        assert!(manager.connect(Some(&device())).await);

        let opens = adapter.opens();
        assert_eq!(opens.len(), 2);
        assert!(opens[1].at - opens[0].at >= Duration::from_secs(3));

        // The second connect replaces the first connection.
        assert!(matches!(next(&mut rx).await, ScannerEvent::Connected { .. }));
        assert_eq!(next(&mut rx).await, ScannerEvent::Disconnected);
        assert!(matches!(next(&mut rx).await, ScannerEvent::Connected { .. }));
        assert!(adapter.take_peer().unwrap().is_closed());
        assert!(!adapter.take_peer().unwrap().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connects_serialize() {
        let (adapter, manager, _rx) = setup();
        adapter.set_all(OpenBehavior::Delay(Duration::from_secs(5)));

        let first = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect(Some(&device())).await }
        });
        let second = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect(Some(&device())).await }
        });

        assert!(first.await.unwrap());
        assert!(second.await.unwrap());

        let opens = adapter.opens();
        assert_eq!(opens.len(), 2);
        assert!(opens[1].at - opens[0].at >= Duration::from_secs(5));
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_line_across_chunks() {
        let (adapter, manager, mut rx) = setup();
        assert!(manager.connect(Some(&device())).await);
        next(&mut rx).await;

        manager.start_reading();
        assert!(manager.is_reading());

        let peer = adapter.take_peer().unwrap();
        peer.send(b"AB");
        peer.send(b"CD\r\n");

        assert_eq!(next(&mut rx).await, scan("ABCD", 1));
        assert_quiet(&mut rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_split_terminator_single_event() {
        let (adapter, manager, mut rx) = setup();
        assert!(manager.connect(Some(&device())).await);
        next(&mut rx).await;
        manager.start_reading();

        let peer = adapter.take_peer().unwrap();
        peer.send(b"12345\r");
        peer.send(b"\n");
        peer.send(b"678\n");

        assert_eq!(next(&mut rx).await, scan("12345", 1));
        assert_eq!(next(&mut rx).await, scan("678", 2));
        assert_quiet(&mut rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_reports_error_then_disconnect() {
        let (adapter, manager, mut rx) = setup();
        assert!(manager.connect(Some(&device())).await);
        next(&mut rx).await;
        manager.start_reading();

        let peer = adapter.take_peer().unwrap();
        peer.fail(io::ErrorKind::ConnectionReset);

        match next(&mut rx).await {
            ScannerEvent::Error(reason) => assert!(reason.starts_with("Connection lost")),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(next(&mut rx).await, ScannerEvent::Disconnected);
        assert!(!manager.is_connected());
        assert!(!manager.is_reading());

        // Explicit teardown afterwards stays silent.
        manager.disconnect().await;
        assert_quiet(&mut rx).await;
        assert!(peer.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_hang_up_disconnects() {
        let (adapter, manager, mut rx) = setup();
        assert!(manager.connect(Some(&device())).await);
        next(&mut rx).await;
        manager.start_reading();

        let mut peer = adapter.take_peer().unwrap();
        peer.hang_up();

        assert_eq!(next(&mut rx).await, ScannerEvent::Disconnected);
        assert!(!manager.is_connected());
        assert_quiet(&mut rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_interrupts_read_loop() {
        let (adapter, manager, mut rx) = setup();
        assert!(manager.connect(Some(&device())).await);
        next(&mut rx).await;
        manager.start_reading();

        let peer = adapter.take_peer().unwrap();
        manager.disconnect().await;
        assert_eq!(next(&mut rx).await, ScannerEvent::Disconnected);

        time::sleep(Duration::from_millis(10)).await;
        assert!(peer.is_closed());
        assert!(!peer.send(b"late\n"));
        assert_quiet(&mut rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_reading_keeps_connection() {
        let (adapter, manager, mut rx) = setup();
        assert!(manager.connect(Some(&device())).await);
        next(&mut rx).await;
        manager.start_reading();

        manager.stop_reading();
        manager.stop_reading();
        time::sleep(Duration::from_millis(10)).await;

        assert!(manager.is_connected());
        assert!(!manager.is_reading());

        let peer = adapter.take_peer().unwrap();
        assert!(!peer.is_closed());
        assert!(peer.send(b"X1\n"));
        assert_quiet(&mut rx).await;

        manager.start_reading();
        assert_eq!(next(&mut rx).await, scan("X1", 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_reading_right_after_stop() {
        let (adapter, manager, mut rx) = setup();
        assert!(manager.connect(Some(&device())).await);
        next(&mut rx).await;

        manager.start_reading();
        tokio::task::yield_now().await;

        manager.stop_reading();
        manager.start_reading();
        assert!(manager.is_reading());

        let peer = adapter.take_peer().unwrap();
        assert!(peer.send(b"X1\n"));
        assert_eq!(next(&mut rx).await, scan("X1", 1));
        assert!(!peer.is_closed());

        manager.disconnect().await;
        assert_eq!(next(&mut rx).await, ScannerEvent::Disconnected);
        time::sleep(Duration::from_millis(10)).await;
        assert!(peer.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_paused_closes_stream() {
        let (adapter, manager, mut rx) = setup();
        assert!(manager.connect(Some(&device())).await);
        next(&mut rx).await;

        manager.start_reading();
        tokio::task::yield_now().await;
        manager.stop_reading();

        let peer = adapter.take_peer().unwrap();
        manager.disconnect().await;
        assert_eq!(next(&mut rx).await, ScannerEvent::Disconnected);

        time::sleep(Duration::from_millis(10)).await;
        assert!(peer.is_closed());
        manager.start_reading();
        assert!(!manager.is_reading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_reading_requires_connection() {
        let (_adapter, manager, mut rx) = setup();
        manager.start_reading();
        assert!(!manager.is_reading());
        assert_quiet(&mut rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_errors_are_swallowed() {
        let (adapter, manager, mut rx) = setup();
        adapter.set_fail_close(true);

        assert!(manager.connect(Some(&device())).await);
        next(&mut rx).await;

        manager.disconnect().await;
        assert_eq!(next(&mut rx).await, ScannerEvent::Disconnected);
        assert!(!manager.is_connected());
        assert_eq!(manager.state(), LinkState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_connect() {
        let (adapter, manager, mut rx) = setup();
        adapter.set_all(OpenBehavior::Delay(Duration::from_secs(5)));

        let attempt = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect(Some(&device())).await }
        });

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(manager.state(), LinkState::Connecting);
        manager.disconnect().await;

        assert!(!attempt.await.unwrap());
        assert_eq!(
            next(&mut rx).await,
            ScannerEvent::Error("connection attempt cancelled".to_string())
        );
        assert!(!manager.is_connected());
        assert!(adapter.take_peer().unwrap().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_cooldown_cancels_connect() {
        let (adapter, manager, mut rx) = setup();

        assert!(manager.connect(Some(&device())).await);
        assert!(matches!(next(&mut rx).await, ScannerEvent::Connected { .. }));

        let second = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect(Some(&device())).await }
        });

        // Still inside the cooldown of the first attempt.
        time::sleep(Duration::from_secs(1)).await;
        manager.disconnect().await;
        assert_eq!(next(&mut rx).await, ScannerEvent::Disconnected);

        assert!(!second.await.unwrap());
        assert_eq!(
            next(&mut rx).await,
            ScannerEvent::Error("connection attempt cancelled".to_string())
        );
        assert!(!manager.is_connected());
        assert_eq!(manager.state(), LinkState::Idle);
        assert_eq!(adapter.open_count(), 1);
        assert_quiet(&mut rx).await;

        // A fresh connect after the cancelled one goes through.
        assert!(manager.connect(Some(&device())).await);
        assert!(matches!(next(&mut rx).await, ScannerEvent::Connected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_connect_restores_idle() {
        let (adapter, manager, _rx) = setup();
        adapter.set_all(OpenBehavior::Hang);

        let attempt = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect(Some(&device())).await }
        });

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(manager.state(), LinkState::Connecting);

        attempt.abort();
        let _ = attempt.await;
        assert_eq!(manager.state(), LinkState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paired_devices() {
        let (adapter, manager, _rx) = setup();
        let paired = PairedDevice {
            address: device(),
            name: "Scanner".to_string(),
        };
        adapter.set_paired(vec![paired.clone()]);
        assert_eq!(manager.paired_devices().await, vec![paired]);

        adapter.deny_paired();
        assert!(manager.paired_devices().await.is_empty());
    }
}
