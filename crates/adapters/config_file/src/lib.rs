//! # lumenhub-adapter-config-file
//!
//! [`ConfigStore`] backed by two JSON files:
//!
//! - the **device map**, a JSON array of device records;
//! - the **hub document** (`filters`, `groups`, `classTree`, `locations`,
//!   `defaults`, `presets`).
//!
//! Both are read once at startup. A device record that does not parse is
//! logged and skipped; a missing document file yields the default document.
//!
//! ## Dependency rule
//!
//! Depends on `lumenhub-app` (port traits) and `lumenhub-domain` only.

mod error;

pub use error::FileStoreError;

use std::path::{Path, PathBuf};

use lumenhub_app::ports::ConfigStore;
use lumenhub_domain::device::DeviceRecord;
use lumenhub_domain::document::HubDocument;
use lumenhub_domain::error::HubError;

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    devices_path: PathBuf,
    document_path: PathBuf,
}

impl FileConfigStore {
    #[must_use]
    pub fn new(devices_path: impl Into<PathBuf>, document_path: impl Into<PathBuf>) -> Self {
        Self {
            devices_path: devices_path.into(),
            document_path: document_path.into(),
        }
    }

    #[must_use]
    pub fn devices_path(&self) -> &Path {
        &self.devices_path
    }

    #[must_use]
    pub fn document_path(&self) -> &Path {
        &self.document_path
    }
}

async fn read(path: &Path) -> Result<String, FileStoreError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| FileStoreError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn parse<T: serde::de::DeserializeOwned>(path: &Path, content: &str) -> Result<T, FileStoreError> {
    serde_json::from_str(content).map_err(|source| FileStoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse a device map, skipping records that do not deserialize.
///
/// # Errors
///
/// Returns [`FileStoreError::Parse`] when the content is not a JSON array.
pub fn parse_device_map(path: &Path, content: &str) -> Result<Vec<DeviceRecord>, FileStoreError> {
    let entries: Vec<serde_json::Value> = parse(path, content)?;
    let records = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value::<DeviceRecord>(entry) {
            Ok(record) => Some(record),
            Err(error) => {
                tracing::warn!(path = %path.display(), index, %error, "skipping device record");
                None
            }
        })
        .collect();
    Ok(records)
}

impl ConfigStore for FileConfigStore {
    async fn load_device_map(&self) -> Result<Vec<DeviceRecord>, HubError> {
        let content = read(&self.devices_path).await?;
        let records = parse_device_map(&self.devices_path, &content)?;
        tracing::info!(
            path = %self.devices_path.display(),
            devices = records.len(),
            "device map loaded"
        );
        Ok(records)
    }

    async fn load_document(&self) -> Result<HubDocument, HubError> {
        if !tokio::fs::try_exists(&self.document_path).await.unwrap_or(false) {
            tracing::info!(
                path = %self.document_path.display(),
                "no hub document, using defaults"
            );
            return Ok(HubDocument::default());
        }
        let content = read(&self.document_path).await?;
        let document: HubDocument = parse(&self.document_path, &content)?;
        tracing::info!(
            path = %self.document_path.display(),
            filters = document.filters.len(),
            groups = document.groups.len(),
            locations = document.locations.len(),
            presets = document.presets.len(),
            "hub document loaded"
        );
        Ok(document)
    }
}
