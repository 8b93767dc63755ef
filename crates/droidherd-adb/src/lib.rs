//! # droidherd-adb - Debug-Bridge Plumbing
//!
//! Everything that talks to the Android debug bridge: command building, the
//! process transport, screenshot decoding, per-device serialized command
//! channels, and the polling device registry.
//!
//! Depends on [`droidherd_core`] and [`droidherd_vision`].
//!
//! ## Public API
//!
//! ### Commands (`commands`)
//! - [`BridgeCommand`] - Typed bridge operations with argv/timeout/description
//!
//! ### Transport (`transport`)
//! - [`BridgeTransport`] - The seam between the engine and `adb` itself
//! - [`ProcessTransport`] - Real transport spawning the platform tools
//! - [`CommandOutput`] - Captured stdout/stderr/exit of one command
//!
//! ### Channels (`channel`)
//! - [`DeviceChannel`] - Single-consumer command queue per device serial
//!
//! ### Devices (`discovery`, `registry`)
//! - [`Device`] / [`DeviceStatus`] / [`DeviceTask`] - Device records
//! - [`DeviceRegistry`] - Discovery, geometry probing, online/offline events

pub mod channel;
pub mod commands;
pub mod discovery;
pub mod registry;
pub mod screencap;
pub mod transport;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use channel::{DeviceChannel, DEFAULT_RETRY_LIMIT};
pub use commands::{BridgeCommand, KEYCODE_BACK};
pub use discovery::{Device, DeviceStatus, DeviceTask};
pub use registry::{DeviceRegistry, DEFAULT_POLL_INTERVAL};
pub use transport::{BridgeTransport, CommandOutput, ProcessTransport};
