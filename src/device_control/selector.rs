//! Transport selection and fallback. Chooses once per session, at connect
//! time, whether commands go over the remote-control port directly or
//! through an optional remote library, and routes each command accordingly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::{Mutex, RwLock};

use super::commands;
use super::http::HttpStatusReader;
use super::library::RemoteLibrary;
use super::status::StatusSource;
use super::tcp::TcpCommandChannel;
use super::types::{
    Command, CommandResult, DeviceEndpoint, DeviceInfo, PowerState, Programme, ServiceList,
    TransportState,
};
use crate::error::TransportError;

/// Where a single command will be delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Tcp,
    Library,
    Reject(TransportError),
}

/// Decide the route for one command given the session's tier
pub fn route(state: TransportState, command: &Command, has_library: bool) -> Route {
    match state {
        TransportState::Uninitialized | TransportState::Unreachable => {
            Route::Reject(TransportError::NotConnected(state))
        }
        _ if commands::is_tcp_only(command) => Route::Tcp,
        TransportState::DirectTcp => Route::Tcp,
        TransportState::OptionalLibrary if has_library => Route::Library,
        TransportState::OptionalLibrary => Route::Tcp,
        TransportState::HttpOnly => Route::Reject(TransportError::NotConnected(state)),
    }
}

/// Per-device transport selector
pub struct TransportSelector {
    endpoint: DeviceEndpoint,
    tcp: TcpCommandChannel,
    http: HttpStatusReader,
    library: Option<Arc<dyn RemoteLibrary>>,
    state: RwLock<TransportState>,
    send_lock: Mutex<()>,
}

impl TransportSelector {
    pub const CHANNEL_DIGIT_DELAY: Duration = Duration::from_millis(200);

    pub fn new(endpoint: DeviceEndpoint, tcp: TcpCommandChannel, http: HttpStatusReader) -> Self {
        Self {
            endpoint,
            tcp,
            http,
            library: None,
            state: RwLock::new(TransportState::Uninitialized),
            send_lock: Mutex::new(()),
        }
    }

    pub fn with_library(mut self, library: Arc<dyn RemoteLibrary>) -> Self {
        self.library = Some(library);
        self
    }

    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.endpoint
    }

    pub async fn state(&self) -> TransportState {
        *self.state.read().await
    }

    /// Settle the tier if this session has not done so yet. An already
    /// settled session keeps its tier; use `reconnect` to re-evaluate.
    pub async fn connect(&self) -> TransportState {
        let current = self.state().await;
        if current != TransportState::Uninitialized {
            return current;
        }
        self.reconnect().await
    }

    /// Probe the device again and pick a fresh tier
    pub async fn reconnect(&self) -> TransportState {
        let _guard = self.send_lock.lock().await;
        let next = self.evaluate().await;
        *self.state.write().await = next;
        next
    }

    /// Drop back to the uninitialized state
    pub async fn disconnect(&self) {
        let _guard = self.send_lock.lock().await;
        *self.state.write().await = TransportState::Uninitialized;
        debug!("{}: transport disconnected", self.endpoint.host);
    }

    async fn evaluate(&self) -> TransportState {
        let host = &self.endpoint.host;
        let (http, tcp) = tokio::join!(
            self.http.get_device_info(&self.endpoint),
            self.tcp.probe(&self.endpoint)
        );

        if let (Err(http_err), Err(tcp_err)) = (&http, &tcp) {
            error!(
                "{}: device unreachable (http: {}, remote port: {})",
                host, http_err, tcp_err
            );
            return TransportState::Unreachable;
        }

        if let Some(library) = &self.library {
            match library.device_info().await {
                Ok(_) => {
                    info!("{}: using remote library {}", host, library.name());
                    return TransportState::OptionalLibrary;
                }
                Err(e) => warn!(
                    "{}: remote library {} failed verification, falling back: {}",
                    host,
                    library.name(),
                    e
                ),
            }
        }

        match tcp {
            Ok(()) => {
                info!("{}: using direct TCP on port {}", host, self.endpoint.remote_port);
                TransportState::DirectTcp
            }
            Err(e) => {
                warn!("{}: remote port unavailable ({}), status only", host, e);
                TransportState::HttpOnly
            }
        }
    }

    /// Both the REST port and the remote-control port must answer
    pub async fn test_connection(&self) -> bool {
        let (http, tcp) = tokio::join!(
            self.http.get_device_info(&self.endpoint),
            self.tcp.probe(&self.endpoint)
        );
        match (http, tcp) {
            (Ok(_), Ok(())) => true,
            (http, tcp) => {
                warn!(
                    "{}: connection test failed (http ok: {}, remote port ok: {})",
                    self.endpoint.host,
                    http.is_ok(),
                    tcp.is_ok()
                );
                false
            }
        }
    }

    /// Send one command by name. Never returns an error.
    pub async fn send(&self, name: &str) -> CommandResult {
        match commands::resolve(name) {
            Ok(command) => self.send_command(&command).await,
            Err(reason) => {
                warn!("{}: {}", self.endpoint.host, reason);
                CommandResult::failure(name, Duration::ZERO, Vec::new(), reason)
            }
        }
    }

    pub async fn send_command(&self, command: &Command) -> CommandResult {
        let _guard = self.send_lock.lock().await;
        self.deliver(command).await
    }

    /// Send a sequence by name, stopping at the first failure. Unknown names
    /// reject the whole sequence before anything is sent.
    pub async fn send_sequence<S: AsRef<str>>(&self, names: &[S], delay: Duration) -> bool {
        let resolved: Result<Vec<Command>, TransportError> =
            names.iter().map(|n| commands::resolve(n.as_ref())).collect();
        match resolved {
            Ok(commands) => self.send_command_sequence(&commands, delay).await,
            Err(reason) => {
                warn!("{}: sequence rejected: {}", self.endpoint.host, reason);
                false
            }
        }
    }

    pub async fn send_command_sequence(&self, commands: &[Command], delay: Duration) -> bool {
        if commands.is_empty() {
            return false;
        }

        let _guard = self.send_lock.lock().await;
        let state = self.state().await;
        let has_library = self.library.is_some();

        if commands
            .iter()
            .all(|c| route(state, c, has_library) == Route::Tcp)
        {
            return self.tcp.send_sequence(&self.endpoint, commands, delay).await;
        }

        let total = commands.len();
        for (i, command) in commands.iter().enumerate() {
            if !self.deliver(command).await.succeeded {
                warn!(
                    "{}: sequence aborted at command {}/{} ({})",
                    self.endpoint.host,
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
        true
    }

    /// Dial a channel number digit by digit, then `select`
    pub async fn change_channel(&self, number: &str) -> bool {
        match commands::channel_sequence(number) {
            Ok(sequence) => {
                self.send_command_sequence(&sequence, Self::CHANNEL_DIGIT_DELAY)
                    .await
            }
            Err(reason) => {
                warn!("{}: cannot change channel: {}", self.endpoint.host, reason);
                false
            }
        }
    }

    async fn deliver(&self, command: &Command) -> CommandResult {
        let state = self.state().await;
        match route(state, command, self.library.is_some()) {
            Route::Tcp => self.tcp.send(&self.endpoint, command).await,
            Route::Library => self.press_via_library(command).await,
            Route::Reject(reason) => {
                warn!("{}: command {} not sent: {}", self.endpoint.host, command, reason);
                CommandResult::failure(command.as_str(), Duration::ZERO, Vec::new(), reason)
            }
        }
    }

    async fn press_via_library(&self, command: &Command) -> CommandResult {
        let start = Instant::now();
        let Some(library) = &self.library else {
            return CommandResult::failure(
                command.as_str(),
                start.elapsed(),
                Vec::new(),
                TransportError::Library("no library configured".to_string()),
            );
        };

        match library.press(command).await {
            Ok(()) => {
                debug!("{}: {} delivered via {}", self.endpoint.host, command, library.name());
                CommandResult::success(command.as_str(), start.elapsed(), Vec::new())
            }
            Err(e) => {
                warn!(
                    "{}: {} failed via {}: {}",
                    self.endpoint.host,
                    command,
                    library.name(),
                    e
                );
                self.demote_library().await;
                CommandResult::failure(command.as_str(), start.elapsed(), Vec::new(), e)
            }
        }
    }

    /// Leave the library tier after a failed press. The failed command is
    /// not retried; later commands use the tier the remote port allows.
    async fn demote_library(&self) {
        let next = match self.tcp.probe(&self.endpoint).await {
            Ok(()) => TransportState::DirectTcp,
            Err(_) => TransportState::HttpOnly,
        };

        let mut state = self.state.write().await;
        if *state == TransportState::OptionalLibrary {
            *state = next;
            warn!("{}: remote library dropped, now {}", self.endpoint.host, next);
        }
    }

    /// Device descriptor, from the library when it is authoritative
    pub async fn device_info(&self) -> Result<DeviceInfo, TransportError> {
        if self.state().await == TransportState::OptionalLibrary
            && let Some(library) = &self.library
            && let Ok(info) = library.device_info().await
        {
            return Ok(info);
        }
        self.http.get_device_info(&self.endpoint).await
    }

    pub async fn services(&self) -> Result<ServiceList, TransportError> {
        self.http.get_services(&self.endpoint).await
    }

    fn active_library(&self, state: TransportState) -> Option<&Arc<dyn RemoteLibrary>> {
        if state == TransportState::OptionalLibrary {
            self.library.as_ref()
        } else {
            None
        }
    }
}

#[async_trait]
impl StatusSource for TransportSelector {
    async fn power_state(&self) -> PowerState {
        let state = self.state().await;
        if state == TransportState::Unreachable {
            return PowerState::Unknown;
        }

        if let Some(library) = self.active_library(state)
            && let Ok(info) = library.device_info().await
            && let Some(standby) = info.active_standby
        {
            return PowerState::from_standby(standby);
        }

        match self.http.get_power_standby(&self.endpoint).await {
            Ok(standby) => PowerState::from_standby(standby),
            Err(e) => {
                debug!("{}: power state unknown: {}", self.endpoint.host, e);
                PowerState::Unknown
            }
        }
    }

    async fn current_programme(&self) -> Result<Option<Programme>, TransportError> {
        match self.active_library(self.state().await) {
            Some(library) => library.current_programme().await,
            None => Ok(None),
        }
    }

    async fn active_application(&self) -> Result<Option<String>, TransportError> {
        match self.active_library(self.state().await) {
            Some(library) => library.active_application().await,
            None => Ok(None),
        }
    }
}
