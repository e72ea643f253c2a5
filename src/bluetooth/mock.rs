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

//! In-memory adapter for exercising the connection manager without a radio.
//!
//! Each successful `open` yields a [`MockStream`] for the manager and a
//! [`MockPeer`] for the test, which plays the scanner side of the link.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::adapter::{ConnectStrategy, DeviceAddress, PairedDevice, SppAdapter};

/// What `open` does for a given strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    Succeed,
    Fail(io::ErrorKind),
    /// Succeed after a delay.
    Delay(Duration),
    /// Never complete.
    Hang,
}

/// One call to `open`.
#[derive(Debug, Clone)]
pub struct OpenRecord {
    pub device: DeviceAddress,
    pub strategy: ConnectStrategy,
    pub at: Instant,
}

enum MockRead {
    Data(Vec<u8>),
    Fail(io::ErrorKind),
}

/// Manager side of a mock link.
pub struct MockStream {
    rx: mpsc::UnboundedReceiver<MockRead>,
    leftover: Vec<u8>,
    closed: Arc<AtomicBool>,
    fail_close: bool,
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;

        if this.leftover.is_empty() {
            match ready!(this.rx.poll_recv(cx)) {
                Some(MockRead::Data(bytes)) => this.leftover = bytes,
                Some(MockRead::Fail(kind)) => {
                    return Poll::Ready(Err(io::Error::new(kind, "mock read failure")));
                }
                // Peer hung up
                None => return Poll::Ready(Ok(())),
            }
        }

        let n = this.leftover.len().min(buf.remaining());
        buf.put_slice(&this.leftover[..n]);
        this.leftover.drain(..n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "mock close failure")))
        } else {
            Poll::Ready(Ok(()))
        }
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Scanner side of a mock link.
pub struct MockPeer {
    tx: Option<mpsc::UnboundedSender<MockRead>>,
    closed: Arc<AtomicBool>,
    pub strategy: ConnectStrategy,
}

impl MockPeer {
    /// Deliver one chunk to the manager. Returns false once the link is gone.
    pub fn send(&self, bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return true;
        }
        match &self.tx {
            Some(tx) => tx.send(MockRead::Data(bytes.to_vec())).is_ok(),
            None => false,
        }
    }

    /// Make the next read fail with `kind`.
    pub fn fail(&self, kind: io::ErrorKind) -> bool {
        match &self.tx {
            Some(tx) => tx.send(MockRead::Fail(kind)).is_ok(),
            None => false,
        }
    }

    /// Close the scanner side; the manager reads end-of-stream.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }

    /// Whether the manager has closed or dropped its end.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockAdapterState {
    enabled: bool,
    service_record: OpenBehavior,
    channel: OpenBehavior,
    fail_close: bool,
    fail_discovery_cancel: bool,
    discovery_cancels: usize,
    paired: Option<Vec<PairedDevice>>,
    opens: Vec<OpenRecord>,
    peers: VecDeque<MockPeer>,
}

/// Scriptable [`SppAdapter`].
pub struct MockAdapter {
    state: Mutex<MockAdapterState>,
}

impl MockAdapter {
    /// An enabled adapter on which every strategy succeeds.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockAdapterState {
                enabled: true,
                service_record: OpenBehavior::Succeed,
                channel: OpenBehavior::Succeed,
                fail_close: false,
                fail_discovery_cancel: false,
                discovery_cancels: 0,
                paired: Some(Vec::new()),
                opens: Vec::new(),
                peers: VecDeque::new(),
            }),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().enabled = enabled;
    }

    pub fn set_service_record(&self, behavior: OpenBehavior) {
        self.state.lock().service_record = behavior;
    }

    pub fn set_channel(&self, behavior: OpenBehavior) {
        self.state.lock().channel = behavior;
    }

    /// Apply `behavior` to every strategy.
    pub fn set_all(&self, behavior: OpenBehavior) {
        let mut state = self.state.lock();
        state.service_record = behavior;
        state.channel = behavior;
    }

    /// Make closing streams opened from now on fail.
    pub fn set_fail_close(&self, fail: bool) {
        self.state.lock().fail_close = fail;
    }

    pub fn set_fail_discovery_cancel(&self, fail: bool) {
        self.state.lock().fail_discovery_cancel = fail;
    }

    pub fn set_paired(&self, devices: Vec<PairedDevice>) {
        self.state.lock().paired = Some(devices);
    }

    /// Make the paired-device query fail with a permission error.
    pub fn deny_paired(&self) {
        self.state.lock().paired = None;
    }

    pub fn opens(&self) -> Vec<OpenRecord> {
        self.state.lock().opens.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens.len()
    }

    pub fn discovery_cancels(&self) -> usize {
        self.state.lock().discovery_cancels
    }

    /// Take the scanner side of the oldest unclaimed link.
    pub fn take_peer(&self) -> Option<MockPeer> {
        self.state.lock().peers.pop_front()
    }

    fn make_stream(&self, strategy: ConnectStrategy) -> MockStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let mut state = self.state.lock();

        state.peers.push_back(MockPeer {
            tx: Some(tx),
            closed: closed.clone(),
            strategy,
        });

        MockStream {
            rx,
            leftover: Vec::new(),
            closed,
            fail_close: state.fail_close,
        }
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SppAdapter for MockAdapter {
    type Stream = MockStream;

    fn is_enabled(&self) -> BoxFuture<'_, io::Result<bool>> {
        let enabled = self.state.lock().enabled;
        Box::pin(async move { Ok(enabled) })
    }

    fn cancel_discovery(&self) -> BoxFuture<'_, io::Result<()>> {
        let result = {
            let mut state = self.state.lock();
            state.discovery_cancels += 1;
            if state.fail_discovery_cancel {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "mock discovery denied"))
            } else {
                Ok(())
            }
        };
        Box::pin(async move { result })
    }

    fn open<'a>(
        &'a self,
        device: &'a DeviceAddress,
        strategy: &'a ConnectStrategy,
    ) -> BoxFuture<'a, io::Result<Self::Stream>> {
        Box::pin(async move {
            let behavior = {
                let mut state = self.state.lock();
                state.opens.push(OpenRecord {
                    device: device.clone(),
                    strategy: *strategy,
                    at: Instant::now(),
                });
                match strategy {
                    ConnectStrategy::ServiceRecord(_) => state.service_record,
                    ConnectStrategy::Channel(_) => state.channel,
                }
            };

            match behavior {
                OpenBehavior::Succeed => Ok(self.make_stream(*strategy)),
                OpenBehavior::Fail(kind) => {
                    Err(io::Error::new(kind, format!("mock failure on {}", strategy)))
                }
                OpenBehavior::Delay(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(self.make_stream(*strategy))
                }
                OpenBehavior::Hang => futures::future::pending().await,
            }
        })
    }

    fn paired_devices(&self) -> BoxFuture<'_, io::Result<Vec<PairedDevice>>> {
        let result = match &self.state.lock().paired {
            Some(devices) => Ok(devices.clone()),
            None => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "mock permission denied",
            )),
        };
        Box::pin(async move { result })
    }
}
