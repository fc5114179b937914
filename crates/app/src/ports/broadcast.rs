//! Broadcast port — where live device snapshots go.

use std::future::Future;

use lumenhub_domain::change::ChangeInfo;
use lumenhub_domain::error::HubError;
use lumenhub_domain::event::DeviceSnapshot;

/// Receives device snapshots for real-time subscribers.
pub trait BroadcastSink: Send + Sync {
    /// A reported state change, with its classification.
    fn emit_device_state_update(
        &self,
        snapshot: DeviceSnapshot,
        change: ChangeInfo,
    ) -> impl Future<Output = Result<(), HubError>> + Send;

    /// Lifecycle update (discovered, online, offline).
    fn emit_device_update(
        &self,
        snapshot: DeviceSnapshot,
    ) -> impl Future<Output = Result<(), HubError>> + Send;
}

impl<T: BroadcastSink> BroadcastSink for std::sync::Arc<T> {
    fn emit_device_state_update(
        &self,
        snapshot: DeviceSnapshot,
        change: ChangeInfo,
    ) -> impl Future<Output = Result<(), HubError>> + Send {
        (**self).emit_device_state_update(snapshot, change)
    }

    fn emit_device_update(
        &self,
        snapshot: DeviceSnapshot,
    ) -> impl Future<Output = Result<(), HubError>> + Send {
        (**self).emit_device_update(snapshot)
    }
}
