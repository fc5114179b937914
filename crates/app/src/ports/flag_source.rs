//! Flag source port — boolean flags published by external endpoints.

use std::collections::BTreeMap;
use std::future::Future;

use lumenhub_domain::error::HubError;

/// Fetches the current flag values served at a URL.
pub trait FlagSource: Send + Sync {
    fn fetch_flags(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<BTreeMap<String, bool>, HubError>> + Send;
}

impl<T: FlagSource> FlagSource for std::sync::Arc<T> {
    fn fetch_flags(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<BTreeMap<String, bool>, HubError>> + Send {
        (**self).fetch_flags(url)
    }
}
