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

//! BlueZ adapter for RFCOMM client connections.

use anyhow::Result;
use bluer::rfcomm::{Profile, Role, SocketAddr, Stream};
use bluer::{Address, Session};
use futures::future::BoxFuture;
use futures::StreamExt;
use std::io;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::adapter::{ConnectStrategy, DeviceAddress, PairedDevice, SppAdapter};

/// SPP adapter backed by the system BlueZ daemon.
pub struct BluezAdapter {
    session: Session,
    adapter: bluer::Adapter,
}

impl BluezAdapter {
    /// Connect to BlueZ and pick the default adapter.
    pub async fn new() -> Result<Self> {
        info!("Initializing Bluetooth adapter...");

        let session = Session::new().await?;
        info!("BlueZ session created");

        let adapter = session.default_adapter().await?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        Ok(Self { session, adapter })
    }

    async fn open_channel(&self, address: Address, channel: u8) -> io::Result<Stream> {
        debug!("Opening RFCOMM channel {} on {}", channel, address);
        Stream::connect(SocketAddr::new(address, channel)).await
    }

    /// Let BlueZ resolve the channel from the device's SDP record by
    /// registering a client profile and asking the device to connect it.
    async fn open_service_record(&self, address: Address, uuid: Uuid) -> io::Result<Stream> {
        let profile = Profile {
            uuid,
            role: Some(Role::Client),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        let mut handle = self
            .session
            .register_profile(profile)
            .await
            .map_err(to_io)?;

        let device = self.adapter.device(address).map_err(to_io)?;
        let connect = device.connect_profile(&uuid);
        tokio::pin!(connect);
        let mut profile_connected = false;

        loop {
            tokio::select! {
                result = &mut connect, if !profile_connected => {
                    result.map_err(to_io)?;
                    profile_connected = true;
                }
                request = handle.next() => {
                    let Some(request) = request else {
                        return Err(io::Error::new(
                            io::ErrorKind::ConnectionAborted,
                            "profile unregistered",
                        ));
                    };
                    if request.device() != address {
                        debug!("Ignoring profile connection from {}", request.device());
                        continue;
                    }
                    return request.accept();
                }
            }
        }
    }
}

impl SppAdapter for BluezAdapter {
    type Stream = Stream;

    fn is_enabled(&self) -> BoxFuture<'_, io::Result<bool>> {
        Box::pin(async move { self.adapter.is_powered().await.map_err(to_io) })
    }

    fn cancel_discovery(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            // Discovery sessions belong to the client that started them; all
            // we can do is note that one is running.
            if self.adapter.is_discovering().await.map_err(to_io)? {
                warn!("Adapter is discovering; connection may be slow");
            }
            Ok(())
        })
    }

    fn open<'a>(
        &'a self,
        device: &'a DeviceAddress,
        strategy: &'a ConnectStrategy,
    ) -> BoxFuture<'a, io::Result<Self::Stream>> {
        Box::pin(async move {
            let address: Address = device.as_str().parse().map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("bad address {}", device))
            })?;

            match *strategy {
                ConnectStrategy::ServiceRecord(uuid) => {
                    self.open_service_record(address, uuid).await
                }
                ConnectStrategy::Channel(channel) => self.open_channel(address, channel).await,
            }
        })
    }

    fn paired_devices(&self) -> BoxFuture<'_, io::Result<Vec<PairedDevice>>> {
        Box::pin(async move {
            let mut devices = Vec::new();

            for addr in self.adapter.device_addresses().await.map_err(to_io)? {
                let device = self.adapter.device(addr).map_err(to_io)?;
                if !device.is_paired().await.map_err(to_io)? {
                    continue;
                }
                let address = match DeviceAddress::parse(&addr.to_string()) {
                    Ok(address) => address,
                    Err(e) => {
                        warn!("Skipping paired device: {}", e);
                        continue;
                    }
                };
                let name = device.alias().await.unwrap_or_else(|_| addr.to_string());
                devices.push(PairedDevice { address, name });
            }

            Ok(devices)
        })
    }
}

fn to_io(err: bluer::Error) -> io::Error {
    let kind = match err.kind {
        bluer::ErrorKind::NotAuthorized | bluer::ErrorKind::NotPermitted => {
            io::ErrorKind::PermissionDenied
        }
        bluer::ErrorKind::NotReady | bluer::ErrorKind::NotAvailable => io::ErrorKind::NotConnected,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, err)
}
