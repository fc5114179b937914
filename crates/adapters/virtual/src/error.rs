//! Virtual transport error types.

use lumenhub_domain::error::HubError;
use lumenhub_domain::id::Channel;

/// Errors raised by simulated devices.
#[derive(Debug, thiserror::Error)]
pub enum VirtualError {
    /// The device was switched unreachable or a failure was injected.
    #[error("virtual device {channel} is unreachable")]
    Unreachable { channel: Channel },

    /// The device model has no such parameter (e.g. brightness on a plug).
    #[error("virtual device {channel} does not support {param}")]
    Unsupported {
        channel: Channel,
        param: &'static str,
    },
}

impl From<VirtualError> for HubError {
    fn from(err: VirtualError) -> Self {
        HubError::Transport(Box::new(err))
    }
}
