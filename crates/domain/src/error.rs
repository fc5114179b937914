//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into [`HubError`]
//! via `#[from]`. Adapters wrap their failures in [`HubError::Transport`].

use crate::id::{Channel, FilterId};

/// Top-level error for the hub core.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("validation error")]
    Validation(#[from] ValidationError),

    #[error("not found")]
    NotFound(#[from] NotFoundError),

    #[error("configuration error")]
    Config(#[from] ConfigError),

    #[error("protocol error")]
    Protocol(#[from] ProtocolError),

    /// A device, flag endpoint, or store call failed.
    #[error("transport error")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The hub runtime loop is no longer accepting requests.
    #[error("hub is not running")]
    Stopped,
}

/// Invariant violations on values built by the core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("command is empty")]
    EmptyCommand,

    #[error("channel {0} is registered twice")]
    DuplicateChannel(Channel),

    #[error("transition window must be longer than zero minutes")]
    EmptyTransitionWindow,
}

/// A lookup by identifier failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// Problems found while materialising configuration.
///
/// These never abort resolution: the offending entry is logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("filter template {ref_id} does not exist")]
    UnknownFilterTemplate { ref_id: FilterId },

    #[error("filter {filter} has no plugin name")]
    MissingPluginName { filter: String },

    #[error("filter {filter} uses unknown plugin {plugin_name}")]
    UnknownPlugin { filter: String, plugin_name: String },
}

/// A device payload did not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("field {field} has unexpected type, expected {expected}")]
    UnexpectedType {
        field: String,
        expected: &'static str,
    },

    #[error("payload is not a JSON object")]
    NotAnObject,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_wrap_validation_error_with_from() {
        let err: HubError = ValidationError::EmptyCommand.into();
        assert!(matches!(
            err,
            HubError::Validation(ValidationError::EmptyCommand)
        ));
    }

    #[test]
    fn should_display_not_found_with_entity_and_id() {
        let err = NotFoundError {
            entity: "Device",
            id: "12".to_string(),
        };
        assert_eq!(err.to_string(), "Device 12 not found");
    }

    #[test]
    fn should_display_unknown_template_reference() {
        let err = ConfigError::UnknownFilterTemplate {
            ref_id: FilterId::from("evening"),
        };
        assert_eq!(err.to_string(), "filter template evening does not exist");
    }

    #[test]
    fn should_keep_transport_source() {
        let io = std::io::Error::other("socket closed");
        let err = HubError::Transport(Box::new(io));
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("socket closed"));
    }
}
