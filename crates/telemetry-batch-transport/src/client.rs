//! HTTP client for the ingest endpoint.

use crate::{TransportConfig, TransportResult};
use reqwest::Client;
use std::sync::Arc;
use telemetry_event_types::{DeliveryError, IngestionResponse, TelemetryEvent, API_KEY_HEADER};
use telemetry_retry_queue::{BatchFuture, SendBatchFn};
use tracing::debug;
use url::Url;

/// Posts event batches to `{endpoint}/v1/ingest`.
///
/// One request per batch, no retries: failed batches are the retry
/// queue's concern.
#[derive(Clone)]
pub struct IngestClient {
    client: Client,
    url: Url,
    api_key: String,
}

impl IngestClient {
    pub fn new(config: &TransportConfig) -> TransportResult<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            url: config.ingest_url()?,
            api_key: config.api_key.clone(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Deliver one batch.
    ///
    /// Any 2xx status is success. The `{accepted, message}` body is returned
    /// when the endpoint sends one.
    pub async fn send_batch(
        &self,
        events: &[TelemetryEvent],
    ) -> Result<Option<IngestionResponse>, DeliveryError> {
        let body = serde_json::to_vec(events)?;

        debug!(url = %self.url, events = events.len(), "Sending telemetry batch");

        let response = self
            .client
            .post(self.url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| DeliveryError::Network(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str::<IngestionResponse>(&text) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => {
                debug!(error = %e, "Ignoring unrecognized ingest response body");
                Ok(None)
            }
        }
    }

    /// Wrap this client as a batch sender shared with the retry queue.
    pub fn into_sender(self) -> SendBatchFn {
        let client = Arc::new(self);
        Arc::new(move |events: Vec<TelemetryEvent>| -> BatchFuture {
            let client = client.clone();
            Box::pin(async move {
                let response = client.send_batch(&events).await?;
                if let Some(response) = response {
                    debug!(
                        accepted = response.accepted,
                        message = %response.message,
                        "Ingest accepted batch"
                    );
                }
                Ok(())
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_targets_ingest_path() {
        let mut config = TransportConfig::new("ak_test");
        config.endpoint = "http://localhost:3000".to_string();
        let client = IngestClient::new(&config).unwrap();
        assert_eq!(client.url().as_str(), "http://localhost:3000/v1/ingest");
    }

    #[test]
    fn client_rejects_invalid_endpoint() {
        let mut config = TransportConfig::new("ak_test");
        config.endpoint = "::".to_string();
        assert!(IngestClient::new(&config).is_err());
    }
}
