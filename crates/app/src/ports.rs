//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the hub core and the outside world.
//! They are defined here (in `app`) so that both the core and the adapter
//! layer can depend on them without creating circular dependencies.

pub mod broadcast;
pub mod config_store;
pub mod flag_source;
pub mod transport;

pub use broadcast::BroadcastSink;
pub use config_store::ConfigStore;
pub use flag_source::FlagSource;
pub use transport::DeviceHandle;
