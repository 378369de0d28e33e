//! Presentation-layer entities. A media player and a remote per device, each
//! mapping host command ids onto the device session and answering with a
//! status code. Delivery failures are logged; callers only see the code.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::DeviceConfig;
use crate::device_control::{DeviceInfo, DeviceStatus, PowerState, commands};
use crate::session::DeviceSession;

/// Result reported back to the host for one command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Ok,
    BadRequest,
    NotImplemented,
    ServiceUnavailable,
    ServerError,
}

impl StatusCode {
    fn delivered(ok: bool) -> Self {
        if ok { Self::Ok } else { Self::ServerError }
    }
}

/// Entity state as shown by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityState {
    On,
    Off,
    Playing,
    Unknown,
    Unavailable,
}

/// Anything the host can hand a command to
#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn entity_id(&self) -> &str;

    fn name(&self) -> &str;

    async fn handle_command(&self, cmd_id: &str, params: Option<&Value>) -> StatusCode;
}

/// Wire tokens after which the status snapshot is refreshed immediately
const STATE_CHANGING: &[&str] = &[
    "power",
    "on",
    "off",
    "standby",
    "channelup",
    "channeldown",
    "select",
    "play",
    "stop",
];

fn changes_state(name: &str) -> bool {
    commands::wire_token(name).is_some_and(|token| STATE_CHANGING.contains(&token))
}

const GENERIC_NAMES: &[&str] = &["skyq device", "skyq", "device"];
const DEFAULT_MODEL: &str = "SkyQ";
const DEFAULT_DEVICE_NAME: &str = "SkyQ Device";

fn is_generic_name(config: &DeviceConfig) -> bool {
    let name = config.name.trim().to_lowercase();
    name.is_empty()
        || GENERIC_NAMES.contains(&name.as_str())
        || name == format!("skyq device ({})", config.host.to_lowercase())
}

/// Name the box reports for itself, unless it is the factory default
fn own_device_name(info: &DeviceInfo) -> Option<&str> {
    info.device_name
        .as_deref()
        .filter(|n| !n.is_empty() && *n != DEFAULT_DEVICE_NAME)
}

/// Last four characters of a real serial number
fn serial_suffix(info: &DeviceInfo) -> Option<String> {
    let serial = info.serial_number.as_deref()?;
    if serial.is_empty() || serial.starts_with("SIM") {
        return None;
    }
    let chars: Vec<char> = serial.chars().collect();
    let start = chars.len().saturating_sub(4);
    Some(chars[start..].iter().collect())
}

/// Display name for the media player entity
pub fn media_player_name(config: &DeviceConfig, info: Option<&DeviceInfo>) -> String {
    if !is_generic_name(config) {
        return config.name.clone();
    }
    let info = info.cloned().unwrap_or_default();
    if let Some(name) = own_device_name(&info) {
        return name.to_string();
    }
    let model = info.model().unwrap_or(DEFAULT_MODEL);
    match serial_suffix(&info) {
        Some(suffix) => format!("SkyQ {} ({})", model, suffix),
        None => format!("SkyQ {} ({})", model, config.host),
    }
}

/// Display name for the remote entity
pub fn remote_name(config: &DeviceConfig, info: Option<&DeviceInfo>) -> String {
    let info = info.cloned().unwrap_or_default();
    let model = info.model().unwrap_or(DEFAULT_MODEL);

    if !is_generic_name(config) {
        return if model != DEFAULT_MODEL {
            format!("{} Remote ({})", config.name, model)
        } else {
            format!("{} Remote", config.name)
        };
    }
    if let Some(name) = own_device_name(&info) {
        return format!("{} Remote", name);
    }
    match serial_suffix(&info) {
        Some(suffix) => format!("SkyQ {} Remote ({})", model, suffix),
        None => format!("SkyQ {} Remote ({})", model, config.host),
    }
}

/// Media player commands understood from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaPlayerCommand {
    On,
    Off,
    Toggle,
    PlayPause,
    Stop,
    Next,
    Previous,
    FastForward,
    Rewind,
    VolumeUp,
    VolumeDown,
    MuteToggle,
    Mute,
    Unmute,
    Seek,
}

impl MediaPlayerCommand {
    pub fn parse(cmd_id: &str) -> Option<Self> {
        let cmd = match cmd_id {
            "on" => Self::On,
            "off" => Self::Off,
            "toggle" => Self::Toggle,
            "play_pause" => Self::PlayPause,
            "stop" => Self::Stop,
            "next" => Self::Next,
            "previous" => Self::Previous,
            "fast_forward" => Self::FastForward,
            "rewind" => Self::Rewind,
            "volume_up" => Self::VolumeUp,
            "volume_down" => Self::VolumeDown,
            "mute_toggle" => Self::MuteToggle,
            "mute" => Self::Mute,
            "unmute" => Self::Unmute,
            "seek" => Self::Seek,
            _ => return None,
        };
        Some(cmd)
    }

    /// Remote-control command sent for this media command. On and Off
    /// resolve to a power toggle after a power-state check.
    pub fn command_name(&self) -> Option<&'static str> {
        match self {
            Self::On | Self::Off | Self::Toggle => Some("power"),
            Self::PlayPause => Some("play"),
            Self::Stop => Some("stop"),
            Self::Next => Some("channelup"),
            Self::Previous => Some("channeldown"),
            Self::FastForward => Some("fastforward"),
            Self::Rewind => Some("rewind"),
            Self::VolumeUp => Some("volumeup"),
            Self::VolumeDown => Some("volumedown"),
            Self::MuteToggle | Self::Mute | Self::Unmute => Some("mute"),
            Self::Seek => None,
        }
    }
}

/// Attribute set pushed to the host for a media player
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaPlayerAttributes {
    pub state: EntityState,
    pub media_title: String,
    pub media_image_url: String,
    pub muted: bool,
}

pub struct MediaPlayerEntity {
    entity_id: String,
    name: String,
    session: Arc<DeviceSession>,
    muted: AtomicBool,
}

impl MediaPlayerEntity {
    pub fn new(session: Arc<DeviceSession>, info: Option<&DeviceInfo>) -> Self {
        Self {
            entity_id: format!("{}_media_player", session.device_id()),
            name: media_player_name(session.config(), info),
            session,
            muted: AtomicBool::new(false),
        }
    }

    pub async fn attributes(&self) -> MediaPlayerAttributes {
        let status = self.session.current_status().await;
        let state = if self.session.is_available().await {
            Self::entity_state(&status)
        } else {
            EntityState::Unavailable
        };
        MediaPlayerAttributes {
            state,
            media_title: status.media_title(),
            media_image_url: status.image_url.clone(),
            muted: self.muted.load(Ordering::SeqCst),
        }
    }

    fn entity_state(status: &DeviceStatus) -> EntityState {
        match status.power {
            PowerState::On => EntityState::Playing,
            PowerState::Standby => EntityState::Off,
            PowerState::Unknown => EntityState::Unknown,
        }
    }

    /// Toggle power only when the box is known to be in the other state
    async fn set_power(&self, want_on: bool) -> StatusCode {
        let target = if want_on {
            PowerState::On
        } else {
            PowerState::Standby
        };
        match self.session.power_state().await {
            PowerState::Unknown => {
                warn!("{}: power state unknown, not sending power toggle", self.name);
                StatusCode::ServiceUnavailable
            }
            current if current == target => {
                debug!("{}: already {:?}, nothing to do", self.name, target);
                StatusCode::Ok
            }
            _ => self.send_and_refresh("power").await,
        }
    }

    async fn send_and_refresh(&self, name: &str) -> StatusCode {
        let delivered = self.session.send(name).await;
        if delivered && changes_state(name) {
            self.session.refresh(true).await;
        }
        StatusCode::delivered(delivered)
    }
}

#[async_trait]
impl CommandHandler for MediaPlayerEntity {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn handle_command(&self, cmd_id: &str, params: Option<&Value>) -> StatusCode {
        debug!("{}: media player command {} {:?}", self.name, cmd_id, params);

        let Some(command) = MediaPlayerCommand::parse(cmd_id) else {
            warn!("{}: unknown media player command {}", self.name, cmd_id);
            return StatusCode::NotImplemented;
        };

        if !self.session.is_available().await {
            warn!("{}: not available for {}", self.name, cmd_id);
            return StatusCode::ServiceUnavailable;
        }

        match command {
            MediaPlayerCommand::On => self.set_power(true).await,
            MediaPlayerCommand::Off => self.set_power(false).await,
            MediaPlayerCommand::Seek => {
                info!("{}: seek is not supported", self.name);
                StatusCode::NotImplemented
            }
            other => {
                let Some(name) = other.command_name() else {
                    return StatusCode::NotImplemented;
                };
                let code = self.send_and_refresh(name).await;
                if code == StatusCode::Ok {
                    match other {
                        MediaPlayerCommand::MuteToggle => {
                            self.muted.fetch_xor(true, Ordering::SeqCst);
                        }
                        MediaPlayerCommand::Mute => self.muted.store(true, Ordering::SeqCst),
                        MediaPlayerCommand::Unmute => self.muted.store(false, Ordering::SeqCst),
                        _ => {}
                    }
                }
                code
            }
        }
    }
}

/// Remote entity commands understood from the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    On,
    Off,
    Toggle,
    SendCmd,
    SendCmdSequence,
    Named(String),
}

impl RemoteCommand {
    pub fn parse(cmd_id: &str) -> Self {
        match cmd_id {
            "on" => Self::On,
            "off" => Self::Off,
            "toggle" => Self::Toggle,
            "send_cmd" => Self::SendCmd,
            "send_cmd_sequence" => Self::SendCmdSequence,
            other => Self::Named(other.to_string()),
        }
    }
}

fn default_sequence_delay() -> f64 {
    0.5
}

fn default_repeat() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct SendCmdParams {
    #[serde(default)]
    command: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SequenceParams {
    #[serde(default)]
    sequence: Vec<String>,
    /// Seconds between commands
    #[serde(default = "default_sequence_delay")]
    delay: f64,
    #[serde(default = "default_repeat")]
    repeat: u32,
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: Option<&Value>) -> Option<T> {
    let value = params.cloned().unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(value).ok()
}

/// Vocabulary name for a host command or physical button id
fn command_for(id: &str) -> Option<&'static str> {
    commands::command_for_button(id).or_else(|| commands::wire_token(id))
}

pub struct RemoteEntity {
    entity_id: String,
    name: String,
    session: Arc<DeviceSession>,
}

impl RemoteEntity {
    pub fn new(session: Arc<DeviceSession>, info: Option<&DeviceInfo>) -> Self {
        Self {
            entity_id: format!("{}_remote", session.device_id()),
            name: remote_name(session.config(), info),
            session,
        }
    }

    pub async fn state(&self) -> EntityState {
        if self.session.is_available().await {
            EntityState::On
        } else {
            EntityState::Unavailable
        }
    }

    async fn send_one(&self, name: &str) -> StatusCode {
        let delivered = self.session.send(name).await;
        if delivered && changes_state(name) {
            self.session.refresh(true).await;
        }
        StatusCode::delivered(delivered)
    }

    async fn send_sequence(&self, params: Option<&Value>) -> StatusCode {
        let Some(params) = parse_params::<SequenceParams>(params) else {
            warn!("{}: malformed send_cmd_sequence parameters", self.name);
            return StatusCode::BadRequest;
        };
        if params.sequence.is_empty() {
            warn!("{}: send_cmd_sequence without a sequence", self.name);
            return StatusCode::BadRequest;
        }
        if params.repeat == 0 {
            warn!("{}: send_cmd_sequence with repeat 0", self.name);
            return StatusCode::BadRequest;
        }

        let mut names = Vec::with_capacity(params.sequence.len());
        for id in &params.sequence {
            match command_for(id) {
                Some(name) => names.push(name),
                None => {
                    warn!("{}: unknown command {} in sequence", self.name, id);
                    return StatusCode::BadRequest;
                }
            }
        }

        let delay = Duration::try_from_secs_f64(params.delay.max(0.0)).unwrap_or(Duration::ZERO);
        for round in 0..params.repeat {
            if !self.session.send_sequence(names.as_slice(), delay).await {
                warn!(
                    "{}: sequence failed on repetition {}/{}",
                    self.name,
                    round + 1,
                    params.repeat
                );
                return StatusCode::ServerError;
            }
        }

        if names.iter().any(|n| changes_state(n)) {
            self.session.refresh(true).await;
        }
        StatusCode::Ok
    }
}

#[async_trait]
impl CommandHandler for RemoteEntity {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn handle_command(&self, cmd_id: &str, params: Option<&Value>) -> StatusCode {
        debug!("{}: remote command {} {:?}", self.name, cmd_id, params);

        if !self.session.is_available().await {
            warn!("{}: not available for {}", self.name, cmd_id);
            return StatusCode::ServiceUnavailable;
        }

        match RemoteCommand::parse(cmd_id) {
            RemoteCommand::On => self.send_one("on").await,
            RemoteCommand::Off => self.send_one("standby").await,
            RemoteCommand::Toggle => self.send_one("power").await,
            RemoteCommand::SendCmd => {
                let command = parse_params::<SendCmdParams>(params).and_then(|p| p.command);
                match command.as_deref().and_then(command_for) {
                    Some(name) => self.send_one(name).await,
                    None => {
                        warn!("{}: send_cmd without a known command: {:?}", self.name, command);
                        StatusCode::BadRequest
                    }
                }
            }
            RemoteCommand::SendCmdSequence => self.send_sequence(params).await,
            RemoteCommand::Named(id) => match command_for(&id) {
                Some(name) => self.send_one(name).await,
                None => {
                    warn!("{}: unsupported remote command {}", self.name, id);
                    StatusCode::NotImplemented
                }
            },
        }
    }
}
