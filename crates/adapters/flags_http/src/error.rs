//! HTTP flag source error types.

use lumenhub_domain::error::HubError;

#[derive(Debug, thiserror::Error)]
pub enum FlagSourceError {
    #[error("unable to build HTTP client")]
    Client(#[source] reqwest::Error),

    #[error("flag request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint answered with JSON that is not an object.
    #[error("flag endpoint {url} did not answer with a JSON object")]
    NotAnObject { url: String },
}

impl From<FlagSourceError> for HubError {
    fn from(err: FlagSourceError) -> Self {
        HubError::Transport(Box::new(err))
    }
}
