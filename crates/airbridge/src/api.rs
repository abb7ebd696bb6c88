//! Telemetry API client
//!
//! Two requests make up the contract:
//! - roster: `GET dev_endpoint` with header `facID`, returns `["<mac>", ...]`
//! - readings: `POST data_endpoint` with headers `mac`, `start_ts`, `end_ts`
//!   (epoch seconds), returns `[{...}, ...]` oldest first
//!
//! Nothing is retried. Every request is bounded by the configured timeout.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;

use crate::config::ApiConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::facility::{DeviceId, Reading};

/// Source of device rosters and readings
#[async_trait]
pub trait TelemetrySource: Send + Sync + 'static {
    /// Devices registered to a facility
    async fn list_devices(&self, facility_id: &str) -> BridgeResult<Vec<DeviceId>>;

    /// Most recent reading of a device inside the trailing window, if any
    async fn latest_reading(&self, device_id: &str) -> BridgeResult<Option<Reading>>;
}

/// HTTP implementation of [`TelemetrySource`]
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    dev_endpoint: String,
    data_endpoint: String,
    window: Duration,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> BridgeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|source| BridgeError::Network {
                endpoint: config.dev_endpoint.clone(),
                source,
            })?;

        Ok(Self {
            http,
            dev_endpoint: config.dev_endpoint.clone(),
            data_endpoint: config.data_endpoint.clone(),
            window: Duration::from_secs(config.window_hours.saturating_mul(3600)),
        })
    }

    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> BridgeResult<T> {
        let network = |source| BridgeError::Network {
            endpoint: endpoint.to_string(),
            source,
        };

        let body = request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(network)?
            .text()
            .await
            .map_err(network)?;

        serde_json::from_str(&body).map_err(|source| BridgeError::Parse {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}

#[async_trait]
impl TelemetrySource for ApiClient {
    async fn list_devices(&self, facility_id: &str) -> BridgeResult<Vec<DeviceId>> {
        let request = self.http.get(&self.dev_endpoint).header("facID", facility_id);
        let devices: Vec<DeviceId> = self.send(&self.dev_endpoint, request).await?;

        tracing::debug!(facility_id, count = devices.len(), "Fetched device roster");
        Ok(devices)
    }

    async fn latest_reading(&self, device_id: &str) -> BridgeResult<Option<Reading>> {
        let end_ts = Utc::now().timestamp();
        let window = i64::try_from(self.window.as_secs()).unwrap_or(i64::MAX);
        let start_ts = end_ts.saturating_sub(window);

        let request = self
            .http
            .post(&self.data_endpoint)
            .header("mac", device_id)
            .header("start_ts", start_ts.to_string())
            .header("end_ts", end_ts.to_string());
        let mut readings: Vec<Reading> = self.send(&self.data_endpoint, request).await?;

        tracing::trace!(device_id, count = readings.len(), start_ts, end_ts, "Fetched readings");
        Ok(readings.pop())
    }
}
