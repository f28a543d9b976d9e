//! Metadata-service probe for the networks this host is attached to.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use super::types::NetworkData;
use super::{OpenStackError, http_client};
use crate::cloud::{MetadataProbe, ProbeFuture, ProbeOutcome};

/// Queries `network_data.json` on the instance metadata service.
#[derive(Clone, Debug)]
pub struct HttpMetadataProbe {
    http: Client,
    url: String,
}

impl HttpMetadataProbe {
    /// Creates a probe for `url` that gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`OpenStackError::Client`] when the HTTP client cannot be
    /// built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, OpenStackError> {
        Ok(Self {
            http: http_client(timeout)?,
            url: url.into(),
        })
    }

    async fn probe(&self) -> ProbeOutcome {
        let response = match self.http.get(&self.url).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(url = %self.url, error = %err, "metadata service unreachable");
                return ProbeOutcome::OffCloud(err.to_string());
            }
        };

        let status = response.status();
        if !status.is_success() {
            return ProbeOutcome::Unavailable(format!("{} returned HTTP {status}", self.url));
        }

        match response.json::<NetworkData>().await {
            Ok(data) => ProbeOutcome::Attached(data.network_ids()),
            Err(err) => ProbeOutcome::Unavailable(format!("unreadable {}: {err}", self.url)),
        }
    }
}

impl MetadataProbe for HttpMetadataProbe {
    fn attached_networks(&self) -> ProbeFuture<'_> {
        Box::pin(self.probe())
    }
}
