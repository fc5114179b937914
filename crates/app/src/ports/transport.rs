//! Transport port — the live connection to one discovered device.

use std::future::Future;

use lumenhub_domain::command::CommandObject;
use lumenhub_domain::error::HubError;
use lumenhub_domain::raw_state::RawState;

/// Handle to a discovered device, handed over by the discovery layer.
///
/// Setters may answer with the state the device reported after applying
/// the command; `None` means the transport does not echo state and the next
/// poll will tell.
pub trait DeviceHandle: Send + Sync {
    /// Switch the device on or off.
    fn set_power(
        &self,
        on: bool,
    ) -> impl Future<Output = Result<Option<RawState>, HubError>> + Send;

    /// Apply a sparse set of light parameters.
    fn set_light(
        &self,
        cmd: &CommandObject,
    ) -> impl Future<Output = Result<Option<RawState>, HubError>> + Send;

    /// Read the device's current state.
    fn poll(&self) -> impl Future<Output = Result<RawState, HubError>> + Send;
}

impl<T: DeviceHandle> DeviceHandle for std::sync::Arc<T> {
    fn set_power(
        &self,
        on: bool,
    ) -> impl Future<Output = Result<Option<RawState>, HubError>> + Send {
        (**self).set_power(on)
    }

    fn set_light(
        &self,
        cmd: &CommandObject,
    ) -> impl Future<Output = Result<Option<RawState>, HubError>> + Send {
        (**self).set_light(cmd)
    }

    fn poll(&self) -> impl Future<Output = Result<RawState, HubError>> + Send {
        (**self).poll()
    }
}
