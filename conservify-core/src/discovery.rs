//! Discovery session: start/stop state machine, single-slot network queries,
//! and fan-out of found/lost/udp events to the consumer.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::client::{Client, Inner};
use crate::error::Error;
use crate::pending::{self, Completer, Pending};
use crate::registry::{TaskKind, Token};

/// Arguments for [`Client::start`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryOptions {
    /// Service type to browse for, e.g. `_fk._tcp`.
    pub service_type_search: String,
    /// Advertise ourselves under this name, if set.
    pub service_name_self: Option<String>,
    pub service_type_self: Option<String>,
}

impl DiscoveryOptions {
    pub fn search(service_type: impl Into<String>) -> Self {
        Self {
            service_type_search: service_type.into(),
            ..Self::default()
        }
    }

    pub fn advertise(mut self, name: impl Into<String>, service_type: impl Into<String>) -> Self {
        self.service_name_self = Some(name.into());
        self.service_type_self = Some(service_type.into());
        self
    }
}

/// Arguments for [`Client::stop`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopOptions {
    /// App is being suspended rather than shut down.
    pub suspending: bool,
}

/// A service seen or lost by discovery. Host and port may be missing on loss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAnnouncement {
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpMessage {
    pub address: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiNetwork {
    pub ssid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub connected: bool,
    pub connected_wifi: Option<WifiNetwork>,
    pub wifi_networks: Option<Vec<WifiNetwork>>,
}

impl NetworkStatus {
    /// Strip quoting some platforms put around SSIDs; drop nameless networks.
    pub fn normalized(self) -> Self {
        fn clean(n: WifiNetwork) -> Option<WifiNetwork> {
            let ssid = n.ssid.replace('"', "");
            (!ssid.is_empty()).then_some(WifiNetwork { ssid })
        }
        Self {
            connected: self.connected,
            connected_wifi: self.connected_wifi.and_then(clean),
            wifi_networks: self
                .wifi_networks
                .map(|list| list.into_iter().filter_map(clean).collect()),
        }
    }
}

/// Consumer-supplied sink for unsolicited discovery events.
pub trait DiscoveryEvents: Send + Sync {
    fn on_found_service(&self, service: &ServiceAnnouncement);
    fn on_lost_service(&self, service: &ServiceAnnouncement);
    fn on_udp_message(&self, _message: &UdpMessage) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Idle,
    Starting,
    Started,
    Stopping,
    /// Last start attempt failed. Behaves like `Idle`.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NetworkQueryKind {
    ConnectedNetwork,
    Scan,
}

struct NetworkQuery {
    id: Token,
    kind: NetworkQueryKind,
    completer: Completer<NetworkStatus>,
}

struct SessionState {
    phase: DiscoveryState,
    started: Option<Completer<()>>,
    stopped: Option<Completer<()>>,
}

pub(crate) struct DiscoverySession {
    state: Mutex<SessionState>,
    network: Mutex<Option<NetworkQuery>>,
}

impl DiscoverySession {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SessionState {
                phase: DiscoveryState::Idle,
                started: None,
                stopped: None,
            }),
            network: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn network(&self) -> MutexGuard<'_, Option<NetworkQuery>> {
        self.network.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn phase(&self) -> DiscoveryState {
        self.state().phase
    }

    /// Drop every slot; pending results settle as disposed.
    pub(crate) fn reset(&self) {
        let (started, stopped) = {
            let mut s = self.state();
            s.phase = DiscoveryState::Idle;
            (s.started.take(), s.stopped.take())
        };
        let network = self.network().take();
        drop((started, stopped, network));
    }
}

impl Client {
    /// Start discovery. Already started: resolves immediately.
    pub fn start(&self, options: DiscoveryOptions) -> Result<Pending<()>, Error> {
        let transport = self.inner.transport()?;
        let session = &self.inner.discovery;
        let (completer, pending) = pending::pending();
        {
            let mut s = session.state();
            match s.phase {
                DiscoveryState::Started => return Ok(Pending::ready(Ok(()))),
                DiscoveryState::Starting => return Ok(Pending::ready(Err(Error::Busy("discovery start")))),
                DiscoveryState::Stopping => return Ok(Pending::ready(Err(Error::Busy("discovery stop")))),
                DiscoveryState::Idle | DiscoveryState::Failed => {
                    s.phase = DiscoveryState::Starting;
                    s.started = Some(completer);
                }
            }
        }
        tracing::info!(search = %options.service_type_search, name = ?options.service_name_self, "starting discovery");
        if let Err(e) = transport.start_discovery(&options) {
            tracing::warn!(error = %e, "transport rejected discovery start");
            on_discovery_failed(&self.inner, e.message);
        }
        Ok(pending)
    }

    /// Stop discovery. Not running: resolves immediately.
    pub fn stop(&self, options: StopOptions) -> Result<Pending<()>, Error> {
        let transport = self.inner.transport()?;
        let session = &self.inner.discovery;
        let (completer, pending) = pending::pending();
        {
            let mut s = session.state();
            match s.phase {
                DiscoveryState::Idle | DiscoveryState::Failed => return Ok(Pending::ready(Ok(()))),
                DiscoveryState::Starting => return Ok(Pending::ready(Err(Error::Busy("discovery start")))),
                DiscoveryState::Stopping => return Ok(Pending::ready(Err(Error::Busy("discovery stop")))),
                DiscoveryState::Started => {
                    s.phase = DiscoveryState::Stopping;
                    s.stopped = Some(completer);
                }
            }
        }
        tracing::info!(suspending = options.suspending, "stopping discovery");
        if let Err(e) = transport.stop_discovery(&options) {
            tracing::warn!(error = %e, "transport rejected discovery stop");
            let stopped = {
                let mut s = session.state();
                s.phase = DiscoveryState::Started;
                s.stopped.take()
            };
            if let Some(c) = stopped {
                c.reject(Error::Discovery { message: e.message });
            }
        }
        Ok(pending)
    }

    pub fn discovery_state(&self) -> DiscoveryState {
        self.inner.discovery.phase()
    }

    /// Currently connected network. One network query at a time; a second
    /// concurrent query resolves to [`Error::Busy`].
    pub fn find_connected_network(&self) -> Result<Pending<NetworkStatus>, Error> {
        self.network_query(NetworkQueryKind::ConnectedNetwork)
    }

    /// Visible networks. Shares the single network-query slot.
    pub fn scan_networks(&self) -> Result<Pending<NetworkStatus>, Error> {
        self.network_query(NetworkQueryKind::Scan)
    }

    fn network_query(&self, kind: NetworkQueryKind) -> Result<Pending<NetworkStatus>, Error> {
        let transport = self.inner.transport()?;
        let session = &self.inner.discovery;
        let id = Token::new();
        let (completer, pending) = pending::pending();
        {
            let mut slot = session.network();
            if let Some(active) = slot.as_ref() {
                tracing::warn!(%id, active = %active.id, ?kind, "network query already outstanding");
                return Ok(Pending::ready(Err(Error::Busy("network query"))));
            }
            *slot = Some(NetworkQuery { id, kind, completer });
        }
        tracing::debug!(%id, ?kind, task = ?TaskKind::NetworkQuery, "issuing network query");
        let issued = match kind {
            NetworkQueryKind::ConnectedNetwork => transport.find_connected_network(),
            NetworkQueryKind::Scan => transport.scan_wifi(),
        };
        if let Err(e) = issued {
            let query = {
                let mut slot = session.network();
                match slot.as_ref() {
                    Some(q) if q.id == id => slot.take(),
                    _ => None,
                }
            };
            if let Some(q) = query {
                q.completer.reject(Error::NetworkQuery { message: e.message });
            }
        }
        Ok(pending)
    }
}

pub(crate) fn on_started(inner: &Inner) {
    let started = {
        let mut s = inner.discovery.state();
        s.phase = DiscoveryState::Started;
        s.started.take()
    };
    match started {
        Some(c) => {
            tracing::info!("discovery started");
            c.resolve(());
        }
        None => tracing::warn!("discovery started without a pending start"),
    }
}

pub(crate) fn on_stopped(inner: &Inner) {
    let (stopped, started) = {
        let mut s = inner.discovery.state();
        s.phase = DiscoveryState::Idle;
        (s.stopped.take(), s.started.take())
    };
    if let Some(c) = started {
        c.reject(Error::Discovery {
            message: "stopped before start completed".into(),
        });
    }
    match stopped {
        Some(c) => {
            tracing::info!("discovery stopped");
            c.resolve(());
        }
        None => tracing::warn!("discovery stopped without a pending stop"),
    }
}

/// The session is down: a pending start is rejected, a pending stop resolves.
pub(crate) fn on_discovery_failed(inner: &Inner, message: String) {
    let (started, stopped) = {
        let mut s = inner.discovery.state();
        s.phase = DiscoveryState::Failed;
        (s.started.take(), s.stopped.take())
    };
    if let Some(c) = stopped {
        tracing::warn!(%message, "discovery failed while stopping");
        c.resolve(());
    }
    match started {
        Some(c) => {
            tracing::warn!(%message, "discovery failed");
            c.reject(Error::Discovery { message });
        }
        None => tracing::warn!(%message, "discovery failed without a pending start"),
    }
}

pub(crate) fn on_network_status(inner: &Inner, status: Result<NetworkStatus, String>) {
    let Some(query) = inner.discovery.network().take() else {
        tracing::warn!("network status without a pending query (orphaned)");
        return;
    };
    tracing::debug!(id = %query.id, kind = ?query.kind, ok = status.is_ok(), "network status");
    match status {
        Ok(status) => query.completer.resolve(status.normalized()),
        Err(message) => query.completer.reject(Error::NetworkQuery { message }),
    }
}

pub(crate) fn on_service_found(inner: &Inner, service: ServiceAnnouncement) {
    tracing::debug!(name = %service.name, service_type = %service.service_type, host = ?service.host, port = ?service.port, "service found");
    inner.events.on_found_service(&service);
}

pub(crate) fn on_service_lost(inner: &Inner, service: ServiceAnnouncement) {
    tracing::debug!(name = %service.name, service_type = %service.service_type, "service lost");
    inner.events.on_lost_service(&service);
}

pub(crate) fn on_udp_message(inner: &Inner, message: UdpMessage) {
    tracing::trace!(address = %message.address, len = message.data.len(), "udp message");
    inner.events.on_udp_message(&message);
}
