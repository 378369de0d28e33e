//! Device sessions. One session per configured box owns its transport
//! selector, its status model and its background poller; the registry owns
//! every live session for the lifetime of the process.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use log::{debug, error, info, warn};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::DeviceConfig;
use crate::device_control::{
    AckMode, DeviceInfo, DeviceStatus, DeviceStatusModel, HttpStatusReader, PowerState,
    StatusSource, TcpCommandChannel, TransportSelector, TransportState,
};

struct Poller {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// A connected (or connecting) device
pub struct DeviceSession {
    config: DeviceConfig,
    transport: TransportSelector,
    status: Mutex<DeviceStatusModel>,
    poller: Mutex<Option<Poller>>,
}

impl DeviceSession {
    /// Shortest poll period accepted; shorter requests are raised to it
    pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

    pub fn new(config: DeviceConfig, ack_mode: AckMode) -> Self {
        let transport = TransportSelector::new(
            config.endpoint(),
            TcpCommandChannel::new().with_ack_mode(ack_mode),
            HttpStatusReader::with_timeout(config.http_timeout()),
        );
        Self::with_transport(config, transport)
    }

    /// Session over a prepared selector, e.g. one carrying a remote library
    pub fn with_transport(config: DeviceConfig, transport: TransportSelector) -> Self {
        Self {
            config,
            transport,
            status: Mutex::new(DeviceStatusModel::default()),
            poller: Mutex::new(None),
        }
    }

    pub fn with_status_interval(self, min_interval: Duration) -> Self {
        Self {
            status: Mutex::new(DeviceStatusModel::new(min_interval)),
            ..self
        }
    }

    pub fn device_id(&self) -> &str {
        &self.config.device_id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn transport(&self) -> &TransportSelector {
        &self.transport
    }

    pub async fn connect(&self) -> TransportState {
        self.transport.connect().await
    }

    pub async fn state(&self) -> TransportState {
        self.transport.state().await
    }

    /// The session has settled on a tier that can reach the device
    pub async fn is_available(&self) -> bool {
        !matches!(
            self.state().await,
            TransportState::Uninitialized | TransportState::Unreachable
        )
    }

    /// Send one named command; the reason for a failure is only logged
    pub async fn send(&self, name: &str) -> bool {
        let result = self.transport.send(name).await;
        match &result.failure_reason {
            None => debug!("{}: sent {} in {}ms", self.name(), name, result.elapsed_ms),
            Some(reason) => warn!("{}: command {} not delivered: {}", self.name(), name, reason),
        }
        result.succeeded
    }

    pub async fn send_sequence<S: AsRef<str>>(&self, names: &[S], delay: Duration) -> bool {
        self.transport.send_sequence(names, delay).await
    }

    pub async fn change_channel(&self, number: &str) -> bool {
        self.transport.change_channel(number).await
    }

    pub async fn power_state(&self) -> PowerState {
        self.transport.power_state().await
    }

    pub async fn device_info(&self) -> Option<DeviceInfo> {
        match self.transport.device_info().await {
            Ok(info) => Some(info),
            Err(e) => {
                debug!("{}: device info unavailable: {}", self.name(), e);
                None
            }
        }
    }

    /// Rate-limited status refresh; `force` bypasses the limiter
    pub async fn refresh(&self, force: bool) -> DeviceStatus {
        self.status.lock().await.refresh(&self.transport, force).await
    }

    /// Last snapshot without touching the device
    pub async fn current_status(&self) -> DeviceStatus {
        self.status.lock().await.current().clone()
    }

    /// Poll at the configured status update interval
    pub async fn start_polling(self: &Arc<Self>) {
        self.start_polling_every(self.config.poll_interval()).await;
    }

    /// Start the background poller. A running poller is replaced.
    pub async fn start_polling_every(self: &Arc<Self>, interval: Duration) {
        self.stop_polling().await;

        if interval < Self::MIN_POLL_INTERVAL {
            warn!(
                "{}: poll interval {:?} too short, using {:?}",
                self.name(),
                interval,
                Self::MIN_POLL_INTERVAL
            );
        }
        let interval = interval.max(Self::MIN_POLL_INTERVAL);

        let (stop, mut stop_rx) = watch::channel(false);
        let session: Weak<Self> = Arc::downgrade(self);
        let name = self.name().to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let Some(session) = session.upgrade() else { break };
                        let status = session.refresh(false).await;
                        debug!("{}: polled, power {:?}", name, status.power);
                    }
                }
            }
            debug!("{}: poller stopped", name);
        });

        *self.poller.lock().await = Some(Poller { stop, handle });
        info!("{}: polling every {:?}", self.name(), interval);
    }

    /// Stop the poller and wait for it to finish
    pub async fn stop_polling(&self) {
        let Some(poller) = self.poller.lock().await.take() else {
            return;
        };
        let _ = poller.stop.send(true);
        if let Err(e) = poller.handle.await {
            error!("{}: poller task failed: {}", self.name(), e);
        }
    }

    pub async fn is_polling(&self) -> bool {
        self.poller.lock().await.is_some()
    }

    pub async fn disconnect(&self) {
        self.stop_polling().await;
        self.transport.disconnect().await;
        info!("{}: disconnected", self.name());
    }
}

/// Every live device session, keyed by device id
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<DeviceSession>>>,
    ack_mode: AckMode,
}

impl SessionRegistry {
    pub fn new(ack_mode: AckMode) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ack_mode,
        }
    }

    /// Connect all enabled devices concurrently. Devices that fail
    /// validation or cannot be reached are left out. Returns the ids of the
    /// registered sessions.
    pub async fn connect_all(&self, devices: &[DeviceConfig]) -> Vec<String> {
        let pending: Vec<Arc<DeviceSession>> = devices
            .iter()
            .filter(|d| d.enabled)
            .filter(|d| {
                let errors = d.validate();
                if !errors.is_empty() {
                    error!("{}: invalid configuration: {}", d.name, errors.join("; "));
                }
                errors.is_empty()
            })
            .map(|d| Arc::new(DeviceSession::new(d.clone(), self.ack_mode)))
            .collect();

        let states = join_all(pending.iter().map(|s| s.connect())).await;

        let mut connected = Vec::new();
        for (session, state) in pending.into_iter().zip(states) {
            if state == TransportState::Unreachable {
                error!("{}: unreachable, not registered", session.name());
                continue;
            }
            info!("{}: connected ({})", session.name(), state);
            connected.push(session.device_id().to_string());
            self.insert(session).await;
        }
        connected
    }

    /// Register a session, replacing and disconnecting any previous one
    pub async fn insert(&self, session: Arc<DeviceSession>) {
        let previous = self
            .sessions
            .write()
            .await
            .insert(session.device_id().to_string(), session);
        if let Some(previous) = previous {
            previous.disconnect().await;
        }
    }

    pub async fn get(&self, device_id: &str) -> Option<Arc<DeviceSession>> {
        self.sessions.read().await.get(device_id).cloned()
    }

    pub async fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn start_polling_all(&self) {
        let sessions: Vec<Arc<DeviceSession>> =
            self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            session.start_polling().await;
        }
    }

    /// Tear down one session
    pub async fn disconnect(&self, device_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(device_id);
        match removed {
            Some(session) => {
                session.disconnect().await;
                true
            }
            None => false,
        }
    }

    /// Tear down every session, stopping all pollers
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<DeviceSession>> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        join_all(sessions.iter().map(|s| s.disconnect())).await;
        info!("Shut down {} device sessions", sessions.len());
    }
}
