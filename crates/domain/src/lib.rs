//! # lumenhub-domain
//!
//! Pure domain model for the lumenhub home automation hub.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Sun math: sunrise/sunset for a location and the day↔night transition fraction
//! - Define **Commands** (sparse light/power parameter maps) and raw device state parsing
//! - Define **Device records** (immutable per-session device configuration)
//! - Define **Filters**, **Groups**, the **Class tree**, and **Locations**
//! - Define the **Hub document** (filters, groups, class tree, locations, defaults, presets)
//! - Define **Change info** and **Device updates** emitted to broadcast sinks
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod change;
pub mod class_tree;
pub mod command;
pub mod device;
pub mod document;
pub mod event;
pub mod filter;
pub mod group;
pub mod location;
pub mod raw_state;
pub mod sun;
