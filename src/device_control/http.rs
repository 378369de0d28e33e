//! REST status reader. Read-only GET queries against the box's fixed JSON
//! endpoints for device information, power state and the channel list.

use std::time::{Duration, Instant};

use log::debug;
use serde::de::DeserializeOwned;

use super::types::{DeviceEndpoint, DeviceInfo, Service, ServiceList};
use crate::error::TransportError;

/// HTTP status reader for the REST port
#[derive(Debug, Clone)]
pub struct HttpStatusReader {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpStatusReader {
    pub const SYSTEM_INFORMATION_PATH: &'static str = "/as/system/information";
    pub const SERVICES_PATH: &'static str = "/as/services";
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new() -> Self {
        Self::with_timeout(Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn url(endpoint: &DeviceEndpoint, path: &str) -> Result<url::Url, TransportError> {
        url::Url::parse(&endpoint.rest_base_url())
            .and_then(|base| base.join(path))
            .map_err(|e| TransportError::Unreachable(format!("bad address {}: {}", endpoint.host, e)))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &DeviceEndpoint,
        path: &str,
    ) -> Result<T, TransportError> {
        let url = Self::url(endpoint, path)?;
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TransportError::from_http_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus(status.as_u16()));
        }

        let text = response
            .text()
            .await
            .map_err(|e| TransportError::from_http_error(&e))?;

        serde_json::from_str(&text).map_err(|e| TransportError::MalformedResponse(e.to_string()))
    }

    /// Device descriptor from `/as/system/information`
    pub async fn get_device_info(&self, endpoint: &DeviceEndpoint) -> Result<DeviceInfo, TransportError> {
        self.get_json(endpoint, Self::SYSTEM_INFORMATION_PATH).await
    }

    /// Channel list from `/as/services`
    pub async fn get_services(&self, endpoint: &DeviceEndpoint) -> Result<ServiceList, TransportError> {
        self.get_json(endpoint, Self::SERVICES_PATH).await
    }

    /// True when the box reports it is in standby. A payload without the
    /// flag is a malformed response, never an implicit "on" or "off".
    pub async fn get_power_standby(&self, endpoint: &DeviceEndpoint) -> Result<bool, TransportError> {
        let info = self.get_device_info(endpoint).await?;
        info.active_standby.ok_or_else(|| {
            TransportError::MalformedResponse("activeStandby flag missing".to_string())
        })
    }

    /// Look up a channel by the number dialled on the remote
    pub async fn get_channel_info(
        &self,
        endpoint: &DeviceEndpoint,
        number: &str,
    ) -> Result<Option<Service>, TransportError> {
        let services = self.get_services(endpoint).await?;
        Ok(services.find_by_number(number).cloned())
    }

    /// Round-trip time of a services query, if the box answered
    pub async fn ping(&self, endpoint: &DeviceEndpoint) -> Option<Duration> {
        let start = Instant::now();
        self.get_services(endpoint).await.ok().map(|_| start.elapsed())
    }
}

impl Default for HttpStatusReader {
    fn default() -> Self {
        Self::new()
    }
}
