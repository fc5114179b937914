//! Simulated devices.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::json;

use lumenhub_app::ports::DeviceHandle;
use lumenhub_domain::command::{CommandObject, LightParam};
use lumenhub_domain::device::{DeviceKind, DeviceSubType};
use lumenhub_domain::error::HubError;
use lumenhub_domain::id::Channel;
use lumenhub_domain::raw_state::RawState;

use crate::error::VirtualError;

/// What a simulated device can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualModel {
    /// Dimmable colour bulb: accepts every light parameter.
    Bulb,
    /// Plain on/off outlet.
    Plug,
}

impl VirtualModel {
    /// Model matching a configured sub-type.
    #[must_use]
    pub fn for_sub_type(sub_type: DeviceSubType) -> Self {
        match sub_type {
            DeviceSubType::Plug | DeviceSubType::Switch | DeviceSubType::Relay => Self::Plug,
            DeviceSubType::Bulb | DeviceSubType::LightStrip | DeviceSubType::Sensor => Self::Bulb,
        }
    }

    fn supports(self, param: LightParam) -> bool {
        match self {
            Self::Bulb => true,
            Self::Plug => param == LightParam::OnOff,
        }
    }
}

struct VirtualDevice {
    channel: Channel,
    model: VirtualModel,
    state: RawState,
    reachable: bool,
    failures_left: u32,
}

impl VirtualDevice {
    fn check_reachable(&mut self) -> Result<(), VirtualError> {
        if !self.reachable {
            return Err(VirtualError::Unreachable {
                channel: self.channel,
            });
        }
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(VirtualError::Unreachable {
                channel: self.channel,
            });
        }
        Ok(())
    }

    fn apply(&mut self, cmd: &CommandObject, source: &str) {
        let mut stored = cmd.clone();
        stored.remove(LightParam::Transition);
        self.state.apply_command(DeviceKind::Virtual, &stored);
        self.state.insert("source", json!(source));
    }
}

/// Live handle to one simulated device. Clones share the device.
#[derive(Clone)]
pub struct VirtualHandle {
    inner: Arc<Mutex<VirtualDevice>>,
    latency: Duration,
}

impl std::fmt::Debug for VirtualHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let device = self.lock();
        f.debug_struct("VirtualHandle")
            .field("channel", &device.channel)
            .field("model", &device.model)
            .field("reachable", &device.reachable)
            .finish_non_exhaustive()
    }
}

impl VirtualHandle {
    #[must_use]
    pub fn new(channel: Channel, model: VirtualModel, on: bool) -> Self {
        let mut device = VirtualDevice {
            channel,
            model,
            state: RawState::default(),
            reachable: true,
            failures_left: 0,
        };
        let mut initial = CommandObject::power(on);
        if model == VirtualModel::Bulb {
            initial.set(LightParam::Brightness, 100.0);
        }
        device.apply(&initial, "external");
        Self {
            inner: Arc::new(Mutex::new(device)),
            latency: Duration::ZERO,
        }
    }

    /// Delay every answer by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, VirtualDevice> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn channel(&self) -> Channel {
        self.lock().channel
    }

    #[must_use]
    pub fn model(&self) -> VirtualModel {
        self.lock().model
    }

    /// Current raw state, as a poll would report it.
    #[must_use]
    pub fn state(&self) -> RawState {
        self.lock().state.clone()
    }

    /// Flip the device by hand, as a wall switch would.
    pub fn switch_externally(&self, on: bool) {
        self.lock().apply(&CommandObject::power(on), "external");
    }

    /// Unplug (`false`) or reconnect the device.
    pub fn set_reachable(&self, reachable: bool) {
        let mut device = self.lock();
        device.reachable = reachable;
        tracing::debug!(channel = %device.channel, reachable, "virtual device reachability changed");
    }

    /// Fail the next `count` requests of any kind.
    pub fn fail_next(&self, count: u32) {
        self.lock().failures_left = count;
    }

    fn actuate(&self, cmd: &CommandObject) -> Result<RawState, VirtualError> {
        let mut device = self.lock();
        device.check_reachable()?;
        if let Some((param, _)) = cmd.iter().find(|(param, _)| !device.model.supports(*param)) {
            return Err(VirtualError::Unsupported {
                channel: device.channel,
                param: param.as_str(),
            });
        }
        device.apply(cmd, "hub");
        Ok(device.state.clone())
    }

    fn read(&self) -> Result<RawState, VirtualError> {
        let mut device = self.lock();
        device.check_reachable()?;
        Ok(device.state.clone())
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl DeviceHandle for VirtualHandle {
    fn set_power(&self, on: bool) -> impl Future<Output = Result<Option<RawState>, HubError>> + Send {
        let handle = self.clone();
        async move {
            handle.pause().await;
            Ok(Some(handle.actuate(&CommandObject::power(on))?))
        }
    }

    fn set_light(
        &self,
        cmd: &CommandObject,
    ) -> impl Future<Output = Result<Option<RawState>, HubError>> + Send {
        let handle = self.clone();
        let cmd = cmd.clone();
        async move {
            handle.pause().await;
            Ok(Some(handle.actuate(&cmd)?))
        }
    }

    fn poll(&self) -> impl Future<Output = Result<RawState, HubError>> + Send {
        let handle = self.clone();
        async move {
            handle.pause().await;
            Ok(handle.read()?)
        }
    }
}
