//! # lumenhub-app
//!
//! Application layer — the hub core and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `DeviceHandle` — actuate and poll one device
//!   - `BroadcastSink` — publish device updates to subscribers
//!   - `ConfigStore` — load the device map and the hub document
//!   - `FlagSource` — fetch external boolean flags
//! - Materialise each device's filters, groups, classes and location
//!   (`resolver`)
//! - Own per-device state, the command cache and the setters (`controller`)
//! - Shape outgoing commands through the filter plugins (`filters`)
//! - Cascade state changes to group mates, linked devices and targets
//!   (`pool`), driven by a single-owner event loop (`hub`)
//! - Provide **in-process infrastructure** (broadcast channel) that doesn't
//!   need IO
//!
//! ## Dependency rule
//! Depends on `lumenhub-domain` only (plus `tokio` for tasks, timers and
//! channels). Never imports adapter crates. Adapters depend on *this* crate,
//! not the reverse.

pub mod broadcast;
pub mod command_cache;
pub mod controller;
pub mod filters;
pub mod hub;
pub mod pool;
pub mod ports;
pub mod resolver;
pub mod scheduler;

#[cfg(test)]
mod testing;
