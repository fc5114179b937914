//! In-process broadcast sink backed by a tokio broadcast channel.

use std::future::Future;

use tokio::sync::broadcast;

use lumenhub_domain::change::ChangeInfo;
use lumenhub_domain::error::HubError;
use lumenhub_domain::event::{DeviceSnapshot, DeviceUpdate};

use crate::ports::BroadcastSink;

/// Fan-out of [`DeviceUpdate`]s to in-process subscribers.
///
/// Emitting succeeds even when there are no active subscribers
/// (the update is simply dropped).
pub struct InProcessBroadcast {
    sender: broadcast::Sender<DeviceUpdate>,
}

impl InProcessBroadcast {
    /// Create a new sink with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to updates emitted *after* this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceUpdate> {
        self.sender.subscribe()
    }

    fn send(&self, update: DeviceUpdate) {
        // Fails only when nobody listens.
        let _ = self.sender.send(update);
    }
}

impl BroadcastSink for InProcessBroadcast {
    fn emit_device_state_update(
        &self,
        snapshot: DeviceSnapshot,
        change: ChangeInfo,
    ) -> impl Future<Output = Result<(), HubError>> + Send {
        self.send(DeviceUpdate::state_changed(snapshot, change));
        async { Ok(()) }
    }

    fn emit_device_update(
        &self,
        snapshot: DeviceSnapshot,
    ) -> impl Future<Output = Result<(), HubError>> + Send {
        self.send(DeviceUpdate::updated(snapshot));
        async { Ok(()) }
    }
}
