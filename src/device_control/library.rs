//! Capability interface for an optional higher-level remote-control library.
//! A library either satisfies the whole method set or is treated as absent.

use async_trait::async_trait;

use super::types::{Command, DeviceInfo, Programme};
use crate::error::TransportError;

#[async_trait]
pub trait RemoteLibrary: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Device descriptor; also the verification call made before the
    /// library is trusted
    async fn device_info(&self) -> Result<DeviceInfo, TransportError>;

    /// Deliver one remote-control command
    async fn press(&self, command: &Command) -> Result<(), TransportError>;

    /// What is on the live channel right now, if anything
    async fn current_programme(&self) -> Result<Option<Programme>, TransportError>;

    /// Title of the foreground application, if any
    async fn active_application(&self) -> Result<Option<String>, TransportError>;
}
