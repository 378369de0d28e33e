//! Shared types for device control. Defines command tokens, endpoints, send
//! results, device descriptors, channel listings and the derived status
//! shape used across the transport, selector and status modules.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::TransportError;

/// A single wire token understood by the box firmware (e.g. `up`, `7`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Command(String);

impl Command {
    /// Validate a token: it must be non-empty and must not contain the
    /// newline delimiter used on the wire
    pub fn new(token: impl Into<String>) -> Result<Self, TransportError> {
        let token = token.into();
        if token.is_empty() || token.contains('\n') || token.contains('\r') {
            return Err(TransportError::InvalidCommand(token));
        }
        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bytes written to the remote-control port
    pub fn wire_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.0.len() + 1);
        bytes.extend_from_slice(self.0.as_bytes());
        bytes.push(b'\n');
        bytes
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of one command send attempt
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub command: String,
    pub succeeded: bool,
    pub elapsed_ms: u64,
    pub raw_response: Vec<u8>,
    pub failure_reason: Option<TransportError>,
}

impl CommandResult {
    pub fn success(command: &str, elapsed: Duration, raw_response: Vec<u8>) -> Self {
        Self {
            command: command.to_string(),
            succeeded: true,
            elapsed_ms: elapsed.as_millis() as u64,
            raw_response,
            failure_reason: None,
        }
    }

    pub fn failure(
        command: &str,
        elapsed: Duration,
        raw_response: Vec<u8>,
        reason: TransportError,
    ) -> Self {
        Self {
            command: command.to_string(),
            succeeded: false,
            elapsed_ms: elapsed.as_millis() as u64,
            raw_response,
            failure_reason: Some(reason),
        }
    }

    /// Response decoded leniently and trimmed, for logs
    pub fn response_text(&self) -> String {
        String::from_utf8_lossy(&self.raw_response).trim().to_string()
    }
}

/// Where one physical box can be reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEndpoint {
    pub host: String,
    pub rest_port: u16,
    pub remote_port: u16,
}

impl DeviceEndpoint {
    pub const DEFAULT_REST_PORT: u16 = 9006;
    pub const DEFAULT_REMOTE_PORT: u16 = 49160;

    pub fn new(host: impl Into<String>, rest_port: u16, remote_port: u16) -> Self {
        Self {
            host: host.into(),
            rest_port,
            remote_port,
        }
    }

    /// Host as it appears before `:port`; IPv6 literals are bracketed
    fn addr_host(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }

    /// `host:remote_port`, suitable for `TcpStream::connect`
    pub fn remote_addr(&self) -> String {
        format!("{}:{}", self.addr_host(), self.remote_port)
    }

    pub fn rest_base_url(&self) -> String {
        format!("http://{}:{}/", self.addr_host(), self.rest_port)
    }
}

impl fmt::Display for DeviceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (rest {}, remote {})", self.host, self.rest_port, self.remote_port)
    }
}

/// Device descriptor served by `/as/system/information`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// True when the box is in standby
    #[serde(rename = "activeStandby", default)]
    pub active_standby: Option<bool>,
    #[serde(rename = "modelName", default)]
    pub model_name: Option<String>,
    #[serde(rename = "hardwareModel", default)]
    pub hardware_model: Option<String>,
    #[serde(rename = "deviceName", default)]
    pub device_name: Option<String>,
    #[serde(rename = "serialNumber", default)]
    pub serial_number: Option<String>,
    #[serde(rename = "ASVersion", default)]
    pub software_version: Option<String>,
    #[serde(rename = "hardwareName", default)]
    pub hardware_name: Option<String>,
    #[serde(rename = "IPAddress", default)]
    pub ip_address: Option<String>,
    #[serde(rename = "MACAddress", default)]
    pub mac_address: Option<String>,
}

impl DeviceInfo {
    /// Model name, falling back to the hardware model
    pub fn model(&self) -> Option<&str> {
        self.model_name
            .as_deref()
            .or(self.hardware_model.as_deref())
            .filter(|m| !m.is_empty())
    }
}

/// One channel descriptor from `/as/services`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(deserialize_with = "string_or_number")]
    pub sid: String,
    /// Channel name
    #[serde(rename = "t", default)]
    pub name: String,
    /// Channel number as dialled on the remote
    #[serde(rename = "c", deserialize_with = "string_or_number")]
    pub number: String,
    /// Picture quality flag, e.g. `sd`/`hd`/`uhd`
    #[serde(rename = "sf", default)]
    pub quality: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceList {
    #[serde(rename = "documentId", default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub services: Vec<Service>,
}

impl ServiceList {
    pub fn find_by_number(&self, number: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.number == number)
    }

    pub fn find_by_sid(&self, sid: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.sid == sid)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Standby,
    Unknown,
}

impl PowerState {
    /// Map the device's standby flag onto a power state
    pub fn from_standby(standby: bool) -> Self {
        if standby { Self::Standby } else { Self::On }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::On => write!(f, "on"),
            PowerState::Standby => write!(f, "standby"),
            PowerState::Unknown => write!(f, "unknown"),
        }
    }
}

/// What is currently showing, as reported by a rich programme lookup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Programme {
    pub channel_name: String,
    pub title: String,
    pub image_url: Option<String>,
}

/// Latest known device state shown by the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub power: PowerState,
    pub channel_name: String,
    pub programme_title: String,
    pub image_url: String,
    pub application: Option<String>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl DeviceStatus {
    pub const LIVE_PLACEHOLDER: &'static str = "Live TV";

    pub fn empty() -> Self {
        Self {
            power: PowerState::Unknown,
            channel_name: String::new(),
            programme_title: String::new(),
            image_url: String::new(),
            application: None,
            last_refreshed_at: None,
        }
    }

    /// Minimal shape used while the box is in standby
    pub fn standby(at: DateTime<Utc>) -> Self {
        Self {
            power: PowerState::Standby,
            last_refreshed_at: Some(at),
            ..Self::empty()
        }
    }

    /// Title line combining channel and programme where both are known
    pub fn media_title(&self) -> String {
        match (self.channel_name.is_empty(), self.programme_title.is_empty()) {
            (false, false) => format!("{}: {}", self.channel_name, self.programme_title),
            (false, true) => self.channel_name.clone(),
            (true, false) => self.programme_title.clone(),
            (true, true) => String::new(),
        }
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::empty()
    }
}

/// Which delivery mechanism is authoritative for a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Uninitialized,
    DirectTcp,
    OptionalLibrary,
    HttpOnly,
    Unreachable,
}

impl TransportState {
    /// Whether commands outside the TCP-only list can be delivered
    pub fn can_deliver_commands(&self) -> bool {
        matches!(self, Self::DirectTcp | Self::OptionalLibrary)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Uninitialized => write!(f, "uninitialized"),
            TransportState::DirectTcp => write!(f, "direct_tcp"),
            TransportState::OptionalLibrary => write!(f, "optional_library"),
            TransportState::HttpOnly => write!(f, "http_only"),
            TransportState::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// A command as offered to the presentation layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandInfo {
    pub id: String,
    pub name: String,
    pub category: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_validation() {
        assert!(Command::new("up").is_ok());
        assert!(Command::new("0").is_ok());
        assert_eq!(
            Command::new(""),
            Err(TransportError::InvalidCommand(String::new()))
        );
        assert!(Command::new("up\nselect").is_err());
        assert!(Command::new("up\r").is_err());
    }

    #[test]
    fn test_command_wire_bytes() {
        let cmd = Command::new("select").unwrap();
        assert_eq!(cmd.wire_bytes(), b"select\n".to_vec());
    }

    #[test]
    fn test_endpoint_addresses() {
        let v4 = DeviceEndpoint::new("192.168.1.10", 9006, 49160);
        assert_eq!(v4.remote_addr(), "192.168.1.10:49160");
        assert_eq!(v4.rest_base_url(), "http://192.168.1.10:9006/");

        let v6 = DeviceEndpoint::new("fe80::1", 9006, 49160);
        assert_eq!(v6.remote_addr(), "[fe80::1]:49160");
        assert_eq!(v6.rest_base_url(), "http://[fe80::1]:9006/");
        assert!(v6.remote_addr().parse::<std::net::SocketAddr>().is_ok());

        let bracketed = DeviceEndpoint::new("[::1]", 8080, 49160);
        assert_eq!(bracketed.remote_addr(), "[::1]:49160");
    }

    #[test]
    fn test_device_info_parsing() {
        let json = r#"{
            "activeStandby": true,
            "modelName": "ES240",
            "deviceName": "Lounge Sky Q",
            "serialNumber": "0123456789",
            "ASVersion": "Q238.000.21.00-AS",
            "IPAddress": "192.168.1.10"
        }"#;
        let info: DeviceInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.active_standby, Some(true));
        assert_eq!(info.model(), Some("ES240"));
        assert_eq!(info.device_name.as_deref(), Some("Lounge Sky Q"));
        assert_eq!(info.software_version.as_deref(), Some("Q238.000.21.00-AS"));
        assert!(info.mac_address.is_none());
    }

    #[test]
    fn test_device_info_model_falls_back_to_hardware() {
        let info: DeviceInfo =
            serde_json::from_str(r#"{"hardwareModel": "ES140"}"#).unwrap();
        assert_eq!(info.model(), Some("ES140"));
        assert_eq!(info.active_standby, None);
    }

    #[test]
    fn test_service_list_parsing_mixed_types() {
        let json = r#"{
            "documentId": "1234",
            "services": [
                {"sid": "2002", "t": "BBC One", "c": "101", "sf": "hd"},
                {"sid": 2076, "t": "ITV1", "c": 103}
            ]
        }"#;
        let list: ServiceList = serde_json::from_str(json).unwrap();
        assert_eq!(list.services.len(), 2);
        assert_eq!(list.find_by_number("103").unwrap().name, "ITV1");
        assert_eq!(list.find_by_sid("2002").unwrap().quality.as_deref(), Some("hd"));
        assert!(list.find_by_number("999").is_none());
    }

    #[test]
    fn test_media_title() {
        let mut status = DeviceStatus::empty();
        assert_eq!(status.media_title(), "");

        status.channel_name = "BBC One".to_string();
        assert_eq!(status.media_title(), "BBC One");

        status.programme_title = "News".to_string();
        assert_eq!(status.media_title(), "BBC One: News");

        status.channel_name.clear();
        assert_eq!(status.media_title(), "News");
    }

    #[test]
    fn test_power_state_from_standby_flag() {
        assert_eq!(PowerState::from_standby(true), PowerState::Standby);
        assert_eq!(PowerState::from_standby(false), PowerState::On);
    }

    #[test]
    fn test_transport_state_display() {
        assert_eq!(TransportState::DirectTcp.to_string(), "direct_tcp");
        assert_eq!(TransportState::HttpOnly.to_string(), "http_only");
        assert!(TransportState::OptionalLibrary.can_deliver_commands());
        assert!(!TransportState::HttpOnly.can_deliver_commands());
        assert!(!TransportState::Unreachable.can_deliver_commands());
    }
}
