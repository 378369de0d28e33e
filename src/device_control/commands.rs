//! Remote-control vocabulary. Maps user-facing command names onto the wire
//! tokens the box firmware accepts, and lists the commands the optional
//! remote library cannot carry.

use std::collections::HashMap;

use super::types::{Command, CommandInfo};
use crate::error::TransportError;

/// (name, wire token, display name, category)
const VOCABULARY: &[(&str, &str, &str, &str)] = &[
    ("power", "power", "Power", "Power"),
    ("standby", "standby", "Standby", "Power"),
    ("on", "on", "Power On", "Power"),
    ("off", "off", "Power Off", "Power"),
    ("up", "up", "Up", "Navigation"),
    ("down", "down", "Down", "Navigation"),
    ("left", "left", "Left", "Navigation"),
    ("right", "right", "Right", "Navigation"),
    ("select", "select", "OK", "Navigation"),
    ("back", "back", "Back", "Navigation"),
    ("home", "home", "Home", "Navigation"),
    ("menu", "menu", "Menu", "Navigation"),
    ("guide", "guide", "Guide", "Navigation"),
    ("info", "info", "Info", "Navigation"),
    ("channel_up", "channelup", "Channel Up", "Navigation"),
    ("channel_down", "channeldown", "Channel Down", "Navigation"),
    ("play", "play", "Play", "Playback"),
    ("pause", "pause", "Pause", "Playback"),
    ("stop", "stop", "Stop", "Playback"),
    ("record", "record", "Record", "Playback"),
    ("rewind", "rewind", "Rewind", "Playback"),
    ("fast_forward", "fastforward", "Fast Forward", "Playback"),
    ("volume_up", "volumeup", "Volume Up", "Volume"),
    ("volume_down", "volumedown", "Volume Down", "Volume"),
    ("mute", "mute", "Mute", "Volume"),
    ("0", "0", "0", "Numbers"),
    ("1", "1", "1", "Numbers"),
    ("2", "2", "2", "Numbers"),
    ("3", "3", "3", "Numbers"),
    ("4", "4", "4", "Numbers"),
    ("5", "5", "5", "Numbers"),
    ("6", "6", "6", "Numbers"),
    ("7", "7", "7", "Numbers"),
    ("8", "8", "8", "Numbers"),
    ("9", "9", "9", "Numbers"),
    ("red", "red", "Red", "Colours"),
    ("green", "green", "Green", "Colours"),
    ("yellow", "yellow", "Yellow", "Colours"),
    ("blue", "blue", "Blue", "Colours"),
    ("sky", "sky", "Sky", "Other"),
    ("search", "search", "Search", "Other"),
    ("text", "text", "Text", "Other"),
    ("help", "help", "Help", "Other"),
    ("services", "services", "Services", "Other"),
];

/// Wire tokens that must always go straight to the remote-control port
pub const TCP_ONLY_COMMANDS: &[&str] = &[
    "power",
    "on",
    "off",
    "standby",
    "sky",
    "services",
    "search",
    "text",
    "help",
    "channelup",
    "channeldown",
];

/// Physical remote buttons and the command each one triggers
pub const BUTTON_MAPPING: &[(&str, &str)] = &[
    ("POWER", "power"),
    ("HOME", "home"),
    ("VOLUME_UP", "volume_up"),
    ("VOLUME_DOWN", "volume_down"),
    ("MUTE", "mute"),
    ("DPAD_UP", "up"),
    ("DPAD_DOWN", "down"),
    ("DPAD_LEFT", "left"),
    ("DPAD_RIGHT", "right"),
    ("DPAD_MIDDLE", "select"),
    ("BACK", "back"),
    ("CHANNEL_UP", "channel_up"),
    ("CHANNEL_DOWN", "channel_down"),
    ("PLAY", "play"),
    ("NEXT", "fast_forward"),
    ("PREV", "rewind"),
    ("RED", "red"),
    ("GREEN", "green"),
    ("YELLOW", "yellow"),
    ("BLUE", "blue"),
];

lazy_static::lazy_static! {
    static ref BY_NAME: HashMap<&'static str, &'static str> =
        VOCABULARY.iter().map(|(name, token, _, _)| (*name, *token)).collect();
}

/// Resolve a command name or wire token to the wire token, if known
pub fn wire_token(name: &str) -> Option<&'static str> {
    let lower = name.trim().to_lowercase();
    if let Some(token) = BY_NAME.get(lower.as_str()).copied() {
        return Some(token);
    }
    VOCABULARY
        .iter()
        .find(|(_, token, _, _)| *token == lower)
        .map(|(_, token, _, _)| *token)
}

/// Resolve a command name into a validated wire command
pub fn resolve(name: &str) -> Result<Command, TransportError> {
    match wire_token(name) {
        Some(token) => Command::new(token),
        None => Err(TransportError::UnsupportedCommand(name.to_string())),
    }
}

pub fn is_tcp_only(command: &Command) -> bool {
    TCP_ONLY_COMMANDS.contains(&command.as_str())
}

/// Command for a physical button, if one is mapped
pub fn command_for_button(button: &str) -> Option<&'static str> {
    BUTTON_MAPPING
        .iter()
        .find(|(b, _)| b.eq_ignore_ascii_case(button))
        .map(|(_, cmd)| *cmd)
}

/// Every user-facing command name
pub fn supported_commands() -> Vec<&'static str> {
    VOCABULARY.iter().map(|(name, _, _, _)| *name).collect()
}

/// Full catalogue for the presentation layer
pub fn get_commands() -> Vec<CommandInfo> {
    VOCABULARY
        .iter()
        .map(|(name, _, display, category)| CommandInfo {
            id: name.to_string(),
            name: display.to_string(),
            category: category.to_string(),
        })
        .collect()
}

/// Digits of a channel number followed by `select`
pub fn channel_sequence(number: &str) -> Result<Vec<Command>, TransportError> {
    let mut commands: Vec<Command> = number
        .chars()
        .filter(|c| c.is_ascii_digit())
        .map(|c| Command::new(c.to_string()))
        .collect::<Result<_, _>>()?;

    if commands.is_empty() {
        return Err(TransportError::InvalidCommand(number.to_string()));
    }
    commands.push(Command::new("select")?);
    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_by_name_and_token() {
        assert_eq!(wire_token("fast_forward"), Some("fastforward"));
        assert_eq!(wire_token("fastforward"), Some("fastforward"));
        assert_eq!(wire_token("VOLUME_UP"), Some("volumeup"));
        assert_eq!(wire_token("7"), Some("7"));
        assert_eq!(wire_token("channel_up"), Some("channelup"));
        assert_eq!(wire_token("teleport"), None);
    }

    #[test]
    fn test_resolve_unknown_command() {
        assert_eq!(
            resolve("teleport"),
            Err(TransportError::UnsupportedCommand("teleport".to_string()))
        );
        assert_eq!(resolve("mute").unwrap().as_str(), "mute");
    }

    #[test]
    fn test_tcp_only_list() {
        assert!(is_tcp_only(&resolve("power").unwrap()));
        assert!(is_tcp_only(&resolve("standby").unwrap()));
        assert!(is_tcp_only(&resolve("channel_down").unwrap()));
        assert!(!is_tcp_only(&resolve("up").unwrap()));
        assert!(!is_tcp_only(&resolve("play").unwrap()));
    }

    #[test]
    fn test_tcp_only_tokens_are_in_vocabulary() {
        for token in TCP_ONLY_COMMANDS {
            assert!(wire_token(token).is_some(), "{} missing", token);
        }
    }

    #[test]
    fn test_button_mapping_targets_known_commands() {
        for (button, cmd) in BUTTON_MAPPING {
            assert!(wire_token(cmd).is_some(), "{} -> {} unknown", button, cmd);
        }
        assert_eq!(command_for_button("dpad_middle"), Some("select"));
        assert_eq!(command_for_button("STOP"), None);
    }

    #[test]
    fn test_channel_sequence() {
        let seq = channel_sequence("101").unwrap();
        let tokens: Vec<&str> = seq.iter().map(|c| c.as_str()).collect();
        assert_eq!(tokens, vec!["1", "0", "1", "select"]);

        let seq = channel_sequence(" 1-2 ").unwrap();
        assert_eq!(seq.len(), 3);

        assert!(channel_sequence("abc").is_err());
    }

    #[test]
    fn test_catalogue() {
        let commands = get_commands();
        assert_eq!(commands.len(), supported_commands().len());
        let select = commands.iter().find(|c| c.id == "select").unwrap();
        assert_eq!(select.name, "OK");
        assert_eq!(select.category, "Navigation");
    }
}
