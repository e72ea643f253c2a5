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

//! Bluetooth serial link module.
//!
//! Connects to a paired SPP barcode scanner over RFCOMM, frames the incoming
//! byte stream into scan lines and keeps the link up with bounded retries.

mod adapter;
#[cfg(feature = "bluez")]
mod bluez;
pub mod framer;
mod manager;
pub mod mock;
mod supervisor;

pub use adapter::{
    ConnectStrategy, DeviceAddress, PairedDevice, SppAdapter, DEFAULT_FALLBACK_CHANNEL, SPP_UUID,
};
#[cfg(feature = "bluez")]
pub use bluez::BluezAdapter;
pub use framer::{LineFramer, ScanEvent};
pub use manager::{ConnectionManager, LinkState};
pub use supervisor::ReconnectSupervisor;
