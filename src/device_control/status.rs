//! Device status model. Rebuilds the power / channel / programme snapshot
//! from a status source, rate-limited, keeping the last good snapshot when a
//! refresh cannot determine the device state.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};

use super::types::{DeviceStatus, PowerState, Programme};
use crate::error::TransportError;

/// Where status information comes from
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn power_state(&self) -> PowerState;
    async fn current_programme(&self) -> Result<Option<Programme>, TransportError>;
    async fn active_application(&self) -> Result<Option<String>, TransportError>;
}

pub struct DeviceStatusModel {
    status: DeviceStatus,
    min_interval: Duration,
    last_attempt: Option<Instant>,
}

impl DeviceStatusModel {
    pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(5);

    pub fn new(min_interval: Duration) -> Self {
        Self {
            status: DeviceStatus::empty(),
            min_interval,
            last_attempt: None,
        }
    }

    pub fn current(&self) -> &DeviceStatus {
        &self.status
    }

    /// Refresh the snapshot. Within `min_interval` of the previous attempt
    /// the cached snapshot is returned untouched unless `force` is set.
    pub async fn refresh<S>(&mut self, source: &S, force: bool) -> DeviceStatus
    where
        S: StatusSource + ?Sized,
    {
        if !force
            && let Some(last) = self.last_attempt
            && last.elapsed() < self.min_interval
        {
            debug!("status refresh skipped, last attempt {:?} ago", last.elapsed());
            return self.status.clone();
        }
        self.last_attempt = Some(Instant::now());

        match Self::build(source).await {
            Some(status) => self.status = status,
            None => warn!(
                "status refresh failed, keeping snapshot from {:?}",
                self.status.last_refreshed_at
            ),
        }
        self.status.clone()
    }

    async fn build<S>(source: &S) -> Option<DeviceStatus>
    where
        S: StatusSource + ?Sized,
    {
        let now = Utc::now();
        match source.power_state().await {
            PowerState::Unknown => return None,
            PowerState::Standby => return Some(DeviceStatus::standby(now)),
            PowerState::On => {}
        }

        let mut status = DeviceStatus {
            power: PowerState::On,
            last_refreshed_at: Some(now),
            ..DeviceStatus::empty()
        };

        match source.current_programme().await {
            Ok(Some(programme))
                if !programme.title.is_empty() || !programme.channel_name.is_empty() =>
            {
                status.channel_name = programme.channel_name;
                status.programme_title = programme.title;
                status.image_url = programme.image_url.unwrap_or_default();
                return Some(status);
            }
            Ok(_) => {}
            Err(e) => debug!("programme lookup failed: {}", e),
        }

        match source.active_application().await {
            Ok(Some(app)) if !app.is_empty() => {
                status.programme_title = app.clone();
                status.application = Some(app);
                return Some(status);
            }
            Ok(_) => {}
            Err(e) => debug!("active application lookup failed: {}", e),
        }

        status.programme_title = DeviceStatus::LIVE_PLACEHOLDER.to_string();
        Some(status)
    }
}

impl Default for DeviceStatusModel {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MIN_INTERVAL)
    }
}
