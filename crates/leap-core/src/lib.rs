//! Bridge engine for Lutron LEAP bridges, built on `leap-api`.
//!
//! [`Bridge`] owns the connection lifecycle: it discovers the bridge
//! flavor, enumerates areas, devices, zones, buttons, occupancy groups
//! and scenes into a live in-memory model, establishes subscriptions,
//! routes streamed state changes to registered observers, and
//! reconnects with capped exponential backoff when the transport drops.
//!
//! The model is mutated in place: handles ([`Entry`]) given out to
//! callers stay valid across reconnects, with only their fields
//! changing. Commands (`turn_on`, `set_value`, shade movement, button
//! taps, scene activation) resolve their target through the model and
//! fail with [`CoreError::UnknownEntity`] when it is absent.

pub mod bridge;
mod commands;
pub mod config;
pub mod error;
pub mod model;
pub mod store;
pub mod subscribe;
mod wire;

pub use bridge::{Bridge, BridgeFlavor, ConnectionState, Connector};
pub use config::{BackoffConfig, BridgeConfig};
pub use error::CoreError;
pub use model::{
    Area, Button, ButtonEvent, ButtonGroup, Device, DeviceKind, Domain, FanSpeed, LedState,
    OccupancyGroup, OccupancyStatus, Scene, Zone,
};
pub use store::{DataStore, Entry};
pub use subscribe::SubscriberHandle;
