//! # lumenhub-adapter-virtual
//!
//! Virtual transport that provides simulated devices for testing and
//! demonstration purposes.
//!
//! ## Provided devices
//!
//! | Model | Sub-types | Accepts |
//! |-------|-----------|---------|
//! | Bulb | `bulb`, `lightStrip`, `sensor` | every light parameter |
//! | Plug | `plug`, `switch`, `relay` | `on_off` only |
//!
//! Devices answer with virtual-kind raw state: `on_off` plus light
//! parameters, and a `source` field that is `"hub"` after a hub command and
//! `"external"` after a manual switch.
//!
//! ## Dependency rule
//!
//! Depends on `lumenhub-app` (port traits) and `lumenhub-domain` only.

mod device;
mod error;

pub use device::{VirtualHandle, VirtualModel};
pub use error::VirtualError;

use std::collections::BTreeMap;

use lumenhub_app::hub::HubHandle;
use lumenhub_domain::device::{DeviceKind, DeviceRecord};
use lumenhub_domain::error::HubError;
use lumenhub_domain::id::Channel;

/// Set of simulated devices, keyed by channel.
#[derive(Debug, Default)]
pub struct VirtualTransport {
    devices: BTreeMap<Channel, VirtualHandle>,
}

impl VirtualTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One simulated device per virtual-kind record, switched off.
    #[must_use]
    pub fn from_records(records: &[DeviceRecord]) -> Self {
        let mut transport = Self::new();
        for record in records.iter().filter(|record| record.kind == DeviceKind::Virtual) {
            transport.add(record.channel, VirtualModel::for_sub_type(record.sub_type), false);
        }
        transport
    }

    /// Create a device on `channel`, replacing any previous one.
    pub fn add(&mut self, channel: Channel, model: VirtualModel, on: bool) -> VirtualHandle {
        let handle = VirtualHandle::new(channel, model, on);
        self.devices.insert(channel, handle.clone());
        handle
    }

    #[must_use]
    pub fn device(&self, channel: Channel) -> Option<&VirtualHandle> {
        self.devices.get(&channel)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Every device, as a discovery scan would find them.
    #[must_use]
    pub fn discover(&self) -> Vec<(Channel, VirtualHandle)> {
        self.devices
            .iter()
            .map(|(channel, handle)| (*channel, handle.clone()))
            .collect()
    }

    /// Report every device to a running hub.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] when the hub is gone.
    pub fn announce(&self, hub: &HubHandle<VirtualHandle>) -> Result<usize, HubError> {
        for (channel, handle) in self.discover() {
            hub.discovered(channel, handle)?;
        }
        tracing::info!(devices = self.devices.len(), "virtual devices announced");
        Ok(self.devices.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumenhub_app::broadcast::InProcessBroadcast;
    use lumenhub_app::hub::Hub;
    use lumenhub_app::ports::{DeviceHandle, FlagSource};
    use lumenhub_domain::device::DeviceSubType;
    use lumenhub_domain::document::HubDocument;

    #[derive(Clone)]
    struct NoFlags;

    impl FlagSource for NoFlags {
        async fn fetch_flags(
            &self,
            _url: &str,
        ) -> Result<std::collections::BTreeMap<String, bool>, HubError> {
            Ok(std::collections::BTreeMap::new())
        }
    }

    fn records() -> Vec<DeviceRecord> {
        let mut plug = DeviceRecord::new("plug", Channel::new(2), DeviceKind::Virtual);
        plug.sub_type = DeviceSubType::Plug;
        vec![
            DeviceRecord::new("lamp", Channel::new(1), DeviceKind::Virtual),
            plug,
            DeviceRecord::new("kasa", Channel::new(3), DeviceKind::Kasa),
        ]
    }

    #[test]
    fn should_create_devices_for_virtual_records_only() {
        let transport = VirtualTransport::from_records(&records());
        assert_eq!(transport.len(), 2);
        assert_eq!(transport.device(Channel::new(1)).unwrap().model(), VirtualModel::Bulb);
        assert_eq!(transport.device(Channel::new(2)).unwrap().model(), VirtualModel::Plug);
        assert!(transport.device(Channel::new(3)).is_none());
    }

    #[test]
    fn should_replace_device_on_same_channel() {
        let mut transport = VirtualTransport::new();
        transport.add(Channel::new(1), VirtualModel::Bulb, false);
        transport.add(Channel::new(1), VirtualModel::Plug, true);
        assert_eq!(transport.len(), 1);
        assert_eq!(transport.device(Channel::new(1)).unwrap().model(), VirtualModel::Plug);
    }

    #[tokio::test]
    async fn should_share_state_between_clones() {
        let mut transport = VirtualTransport::new();
        let handle = transport.add(Channel::new(1), VirtualModel::Bulb, false);
        let (_, discovered) = transport.discover().remove(0);
        discovered.set_power(true).await.unwrap();
        assert_eq!(handle.state(), discovered.state());
    }

    #[tokio::test]
    async fn should_announce_devices_to_hub() {
        let records = records();
        let transport = VirtualTransport::from_records(&records);
        let hub = Hub::new(records, HubDocument::default(), InProcessBroadcast::new(16), NoFlags);
        let client = hub.handle();
        let running = tokio::spawn(hub.run());

        assert_eq!(transport.announce(&client).unwrap(), 2);
        client.set_power_state(Channel::new(2), true).await.unwrap();
        let snapshots = client.snapshots().await.unwrap();

        let online: Vec<_> = snapshots.iter().filter(|s| s.is_online).map(|s| s.channel).collect();
        assert_eq!(online, vec![Channel::new(1), Channel::new(2)]);
        let plug = transport.device(Channel::new(2)).unwrap().state();
        assert_eq!(plug.power_state(DeviceKind::Virtual).unwrap(), Some(true));

        client.shutdown().unwrap();
        running.await.unwrap();
    }
}
