//! Config file adapter error types.

use std::path::PathBuf;

use lumenhub_domain::error::HubError;

/// Errors raised while reading configuration files.
#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    #[error("unable to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl From<FileStoreError> for HubError {
    fn from(err: FileStoreError) -> Self {
        HubError::Transport(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_display_path_in_read_error() {
        let err = FileStoreError::Read {
            path: PathBuf::from("/etc/lumenhub/devices.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(err.to_string(), "unable to read /etc/lumenhub/devices.json");
    }

    #[test]
    fn should_convert_into_transport_error() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: HubError = FileStoreError::Parse {
            path: PathBuf::from("doc.json"),
            source,
        }
        .into();
        assert!(matches!(err, HubError::Transport(_)));
    }
}
