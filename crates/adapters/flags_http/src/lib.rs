//! # lumenhub-adapter-flags-http
//!
//! [`FlagSource`] that GETs a URL answering with a JSON object of flags:
//!
//! ```json
//! {"away": true, "party": false}
//! ```
//!
//! Entries that are not booleans are ignored.
//!
//! ## Dependency rule
//!
//! Depends on `lumenhub-app` (port traits) and `lumenhub-domain` only.

mod error;

pub use error::FlagSourceError;

use std::collections::BTreeMap;
use std::time::Duration;

use lumenhub_app::ports::FlagSource;
use lumenhub_domain::error::HubError;

/// Timeout applied to every flag request unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct HttpFlagSource {
    client: reqwest::Client,
}

impl HttpFlagSource {
    /// Build a source with its own client.
    ///
    /// # Errors
    ///
    /// Returns [`FlagSourceError::Client`] when the TLS backend cannot be
    /// initialised.
    pub fn new(timeout: Duration) -> Result<Self, FlagSourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("lumenhub/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FlagSourceError::Client)?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    #[must_use]
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetch and decode the flags served at `url`.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-success statuses, and bodies that are
    /// not a JSON object.
    pub async fn fetch(&self, url: &str) -> Result<BTreeMap<String, bool>, FlagSourceError> {
        let body: serde_json::Value = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|source| FlagSourceError::Request {
                url: url.to_owned(),
                source,
            })?
            .json()
            .await
            .map_err(|source| FlagSourceError::Request {
                url: url.to_owned(),
                source,
            })?;

        let serde_json::Value::Object(entries) = body else {
            return Err(FlagSourceError::NotAnObject { url: url.to_owned() });
        };
        let flags: BTreeMap<String, bool> = entries
            .into_iter()
            .filter_map(|(name, value)| match value {
                serde_json::Value::Bool(flag) => Some((name, flag)),
                other => {
                    tracing::debug!(url, flag = %name, value = %other, "ignoring non-boolean flag");
                    None
                }
            })
            .collect();
        tracing::debug!(url, flags = flags.len(), "flags fetched");
        Ok(flags)
    }
}

impl FlagSource for HttpFlagSource {
    async fn fetch_flags(&self, url: &str) -> Result<BTreeMap<String, bool>, HubError> {
        Ok(self.fetch(url).await?)
    }
}
