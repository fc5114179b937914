//! Configuration store port — device map and hub document, read once.

use std::future::Future;

use lumenhub_domain::device::DeviceRecord;
use lumenhub_domain::document::HubDocument;
use lumenhub_domain::error::HubError;

pub trait ConfigStore {
    fn load_device_map(&self) -> impl Future<Output = Result<Vec<DeviceRecord>, HubError>> + Send;

    fn load_document(&self) -> impl Future<Output = Result<HubDocument, HubError>> + Send;
}
