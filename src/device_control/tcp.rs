//! Remote-control port channel. Opens one short-lived TCP connection per
//! command, writes the newline-terminated token, reads a short reply and
//! classifies the outcome. Connections are never reused.

use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::types::{Command, CommandResult, DeviceEndpoint};
use crate::error::TransportError;

/// How a reply (or the lack of one) is turned into success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckMode {
    /// Only a reply starting with the acknowledgement prefix counts
    #[default]
    Strict,
    /// Silence after a completed write also counts
    Lenient,
}

/// What came back after the command was written
#[derive(Debug)]
enum Reply {
    Data(Vec<u8>),
    Closed,
    Silent,
}

/// TCP command sender for the remote-control port
#[derive(Debug, Clone)]
pub struct TcpCommandChannel {
    connect_timeout: Duration,
    read_timeout: Duration,
    ack_mode: AckMode,
}

impl TcpCommandChannel {
    pub const ACK_PREFIX: &'static [u8] = b"SKY";
    pub const READ_BUFFER_SIZE: usize = 128;
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);

    pub fn new() -> Self {
        Self {
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            read_timeout: Self::DEFAULT_READ_TIMEOUT,
            ack_mode: AckMode::default(),
        }
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, read_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Send one command over a fresh connection. Never returns an error;
    /// every failure is reported in the result.
    pub async fn send(&self, endpoint: &DeviceEndpoint, command: &Command) -> CommandResult {
        let start = Instant::now();

        let mut stream = match self.open(endpoint).await {
            Ok(stream) => stream,
            Err(reason) => {
                warn!("{}: cannot send {}: {}", endpoint.host, command, reason);
                return CommandResult::failure(command.as_str(), start.elapsed(), Vec::new(), reason);
            }
        };

        let exchanged = self.exchange(&mut stream, command).await;

        // Close regardless of outcome
        let _ = stream.shutdown().await;
        drop(stream);

        let result = match exchanged {
            Ok(reply) => self.classify(command, reply, start.elapsed()),
            Err(reason) => {
                CommandResult::failure(command.as_str(), start.elapsed(), Vec::new(), reason)
            }
        };

        if result.succeeded {
            debug!(
                "{}: command {} acknowledged in {}ms: {:?}",
                endpoint.host,
                command,
                result.elapsed_ms,
                result.response_text()
            );
        } else if let Some(reason) = &result.failure_reason {
            warn!("{}: command {} failed: {}", endpoint.host, command, reason);
        }
        result
    }

    /// Send commands in order, pausing `delay` between them (not after the
    /// last). Stops at the first failure.
    pub async fn send_sequence(
        &self,
        endpoint: &DeviceEndpoint,
        commands: &[Command],
        delay: Duration,
    ) -> bool {
        if commands.is_empty() {
            return false;
        }

        let total = commands.len();
        for (i, command) in commands.iter().enumerate() {
            let result = self.send(endpoint, command).await;
            if !result.succeeded {
                warn!(
                    "{}: sequence aborted at command {}/{} ({})",
                    endpoint.host,
                    i + 1,
                    total,
                    command
                );
                return false;
            }
            if i + 1 < total && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        debug!("{}: sequence of {} commands delivered", endpoint.host, total);
        true
    }

    /// Check that the remote-control port accepts connections, without
    /// sending anything
    pub async fn probe(&self, endpoint: &DeviceEndpoint) -> Result<(), TransportError> {
        let mut stream = self.open(endpoint).await?;
        let _ = stream.shutdown().await;
        Ok(())
    }

    async fn open(&self, endpoint: &DeviceEndpoint) -> Result<TcpStream, TransportError> {
        match timeout(self.connect_timeout, TcpStream::connect(endpoint.remote_addr())).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                Ok(stream)
            }
            Ok(Err(e)) => Err(TransportError::from_connect_error(&e)),
            Err(_) => Err(TransportError::ConnectTimeout),
        }
    }

    async fn exchange(
        &self,
        stream: &mut TcpStream,
        command: &Command,
    ) -> Result<Reply, TransportError> {
        stream
            .write_all(&command.wire_bytes())
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        stream
            .flush()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;

        let mut buf = vec![0u8; Self::READ_BUFFER_SIZE];
        match timeout(self.read_timeout, stream.read(&mut buf)).await {
            Ok(Ok(0)) => Ok(Reply::Closed),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(Reply::Data(buf))
            }
            Ok(Err(e)) => Err(TransportError::Io(e.to_string())),
            Err(_) => Ok(Reply::Silent),
        }
    }

    fn classify(&self, command: &Command, reply: Reply, elapsed: Duration) -> CommandResult {
        let name = command.as_str();
        match reply {
            Reply::Data(data) => {
                if Self::is_acknowledgement(&data) {
                    CommandResult::success(name, elapsed, data)
                } else {
                    let text = String::from_utf8_lossy(&data).trim().to_string();
                    CommandResult::failure(
                        name,
                        elapsed,
                        data,
                        TransportError::UnexpectedResponse(text),
                    )
                }
            }
            Reply::Closed => match self.ack_mode {
                AckMode::Lenient => CommandResult::success(name, elapsed, Vec::new()),
                AckMode::Strict => CommandResult::failure(
                    name,
                    elapsed,
                    Vec::new(),
                    TransportError::NoAcknowledgement,
                ),
            },
            Reply::Silent => match self.ack_mode {
                AckMode::Lenient => CommandResult::success(name, elapsed, Vec::new()),
                AckMode::Strict => CommandResult::failure(
                    name,
                    elapsed,
                    Vec::new(),
                    TransportError::ReadTimeout,
                ),
            },
        }
    }

    fn is_acknowledgement(data: &[u8]) -> bool {
        let start = data
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(data.len());
        data[start..].starts_with(Self::ACK_PREFIX)
    }
}

impl Default for TcpCommandChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeRemotePort, RemoteBehavior, closed_port};

    fn fast_channel(mode: AckMode) -> TcpCommandChannel {
        TcpCommandChannel::new()
            .with_timeouts(Duration::from_millis(500), Duration::from_millis(200))
            .with_ack_mode(mode)
    }

    fn endpoint(remote_port: u16) -> DeviceEndpoint {
        DeviceEndpoint::new("127.0.0.1", 9, remote_port)
    }

    fn cmd(token: &str) -> Command {
        Command::new(token).unwrap()
    }

    #[test]
    fn test_channel_defaults() {
        let channel = TcpCommandChannel::default();
        assert_eq!(channel.connect_timeout, Duration::from_secs(5));
        assert_eq!(channel.read_timeout, Duration::from_secs(3));
        assert_eq!(channel.ack_mode(), AckMode::Strict);
        assert!(TcpCommandChannel::READ_BUFFER_SIZE >= 100);
    }

    #[test]
    fn test_acknowledgement_prefix() {
        assert!(TcpCommandChannel::is_acknowledgement(b"SKY 000.001\n"));
        assert!(TcpCommandChannel::is_acknowledgement(b"\r\nSKY"));
        assert!(!TcpCommandChannel::is_acknowledgement(b"ERROR"));
        assert!(!TcpCommandChannel::is_acknowledgement(b""));
    }

    #[tokio::test]
    async fn test_send_acknowledged() {
        let device = FakeRemotePort::start(RemoteBehavior::Ack).await;
        let channel = fast_channel(AckMode::Strict);

        let result = channel.send(&endpoint(device.port()), &cmd("up")).await;

        assert!(result.succeeded);
        assert!(result.failure_reason.is_none());
        assert!(result.response_text().starts_with("SKY"));
        assert_eq!(device.received().await, vec!["up".to_string()]);
    }

    #[tokio::test]
    async fn test_silent_device_times_out_in_strict_mode() {
        let device = FakeRemotePort::start(RemoteBehavior::Silent).await;
        let channel = fast_channel(AckMode::Strict);

        let start = Instant::now();
        let result = channel.send(&endpoint(device.port()), &cmd("menu")).await;

        assert!(start.elapsed() < Duration::from_millis(200) + Duration::from_secs(1));
        assert!(!result.succeeded);
        assert_eq!(result.failure_reason, Some(TransportError::ReadTimeout));
        assert!(result.failure_reason.unwrap().is_timeout());
    }

    #[tokio::test]
    async fn test_silent_device_succeeds_in_lenient_mode() {
        let device = FakeRemotePort::start(RemoteBehavior::Silent).await;
        let channel = fast_channel(AckMode::Lenient);

        let result = channel.send(&endpoint(device.port()), &cmd("menu")).await;

        assert!(result.succeeded);
        assert!(result.raw_response.is_empty());
    }

    #[tokio::test]
    async fn test_unexpected_reply_fails_in_both_modes() {
        let device = FakeRemotePort::start(RemoteBehavior::Reply("ERROR")).await;

        for mode in [AckMode::Strict, AckMode::Lenient] {
            let result = fast_channel(mode)
                .send(&endpoint(device.port()), &cmd("guide"))
                .await;
            assert!(!result.succeeded);
            assert_eq!(
                result.failure_reason,
                Some(TransportError::UnexpectedResponse("ERROR".to_string()))
            );
        }
    }

    #[tokio::test]
    async fn test_closed_without_reply() {
        let device = FakeRemotePort::start(RemoteBehavior::CloseImmediately).await;

        let strict = fast_channel(AckMode::Strict)
            .send(&endpoint(device.port()), &cmd("info"))
            .await;
        assert_eq!(strict.failure_reason, Some(TransportError::NoAcknowledgement));

        let lenient = fast_channel(AckMode::Lenient)
            .send(&endpoint(device.port()), &cmd("info"))
            .await;
        assert!(lenient.succeeded);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let port = closed_port().await;
        let result = fast_channel(AckMode::Lenient)
            .send(&endpoint(port), &cmd("up"))
            .await;

        assert!(!result.succeeded);
        assert_eq!(result.failure_reason, Some(TransportError::ConnectionRefused));
    }

    #[tokio::test]
    async fn test_every_send_closes_its_connection() {
        let device = FakeRemotePort::start(RemoteBehavior::FailOn(3)).await;
        let channel = fast_channel(AckMode::Strict);
        let ep = endpoint(device.port());

        let mut outcomes = Vec::new();
        for token in ["1", "2", "3", "4", "5"] {
            outcomes.push(channel.send(&ep, &cmd(token)).await.succeeded);
        }
        assert_eq!(outcomes, vec![true, true, false, true, true]);

        device.wait_until_idle(Duration::from_secs(2)).await;
        assert_eq!(device.accepted(), 5);
        assert_eq!(device.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_sequence_short_circuits() {
        let device = FakeRemotePort::start(RemoteBehavior::FailOn(3)).await;
        let channel = fast_channel(AckMode::Strict);
        let commands: Vec<Command> = ["1", "0", "1", "select"].into_iter().map(cmd).collect();

        let delivered = channel
            .send_sequence(&endpoint(device.port()), &commands, Duration::from_millis(200))
            .await;

        assert!(!delivered);
        assert_eq!(device.received().await, vec!["1", "0", "1"]);
    }

    #[tokio::test]
    async fn test_sequence_delays_between_commands_only() {
        let device = FakeRemotePort::start(RemoteBehavior::Ack).await;
        let channel = fast_channel(AckMode::Strict);
        let commands: Vec<Command> = ["1", "2", "select"].into_iter().map(cmd).collect();

        let start = Instant::now();
        let delivered = channel
            .send_sequence(&endpoint(device.port()), &commands, Duration::from_millis(100))
            .await;
        let elapsed = start.elapsed();

        assert!(delivered);
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(300) + Duration::from_secs(1));
        assert_eq!(device.received().await, vec!["1", "2", "select"]);
    }

    #[tokio::test]
    async fn test_empty_sequence_is_not_delivered() {
        let channel = fast_channel(AckMode::Lenient);
        assert!(!channel.send_sequence(&endpoint(1), &[], Duration::ZERO).await);
    }

    #[tokio::test]
    async fn test_probe() {
        let device = FakeRemotePort::start(RemoteBehavior::Ack).await;
        let channel = fast_channel(AckMode::Strict);
        assert!(channel.probe(&endpoint(device.port())).await.is_ok());
        assert!(device.received().await.is_empty());

        let port = closed_port().await;
        assert_eq!(
            channel.probe(&endpoint(port)).await,
            Err(TransportError::ConnectionRefused)
        );
    }
}
