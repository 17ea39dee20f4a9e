//! LAN discovery: UDP multicast announcements, track services seen, report found/lost.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use conservify_core::{DiscoveryOptions, Event, ServiceAnnouncement, Token, UdpMessage};
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::protocol::{self, Announcement, ProtocolError, PROTOCOL_VERSION};
use crate::transport::Emitter;

/// Where and how often to announce.
#[derive(Debug, Clone)]
pub struct Settings {
    pub group: Ipv4Addr,
    pub port: u16,
    /// Port advertised for our own service.
    pub service_port: u16,
    pub announce_interval: Duration,
    pub service_timeout: Duration,
}

struct Seen {
    service: ServiceAnnouncement,
    last_seen: Instant,
}

type Services = Arc<Mutex<HashMap<Token, Seen>>>;

/// A running discovery session.
pub struct DiscoveryHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DiscoveryHandle {
    /// Signal the loops to stop and wait for them; `Stopped` has been emitted when this returns.
    pub async fn stop(self) {
        if self.shutdown.send(true).is_err() {
            tracing::debug!("discovery already finished");
        }
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "discovery task ended abnormally");
        }
    }
}

/// Spawn a session. Emits `Started` once the socket is bound, or `DiscoveryFailed`.
pub fn spawn(runtime: &tokio::runtime::Handle, emit: Emitter, settings: Settings, options: DiscoveryOptions) -> DiscoveryHandle {
    let (shutdown, rx) = watch::channel(false);
    let task = runtime.spawn(run(emit, settings, options, rx));
    DiscoveryHandle { shutdown, task }
}

async fn run(emit: Emitter, settings: Settings, options: DiscoveryOptions, mut shutdown: watch::Receiver<bool>) {
    let socket = match make_multicast_socket(settings.group, settings.port) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::warn!(port = settings.port, error = %e, "discovery socket");
            emit(Event::DiscoveryFailed {
                message: e.to_string(),
            });
            return;
        }
    };
    let dest = SocketAddr::from((settings.group, settings.port));
    let instance = Token::new();
    let advertised = match (&options.service_name_self, &options.service_type_self) {
        (Some(name), Some(service_type)) => Some((name.clone(), service_type.clone())),
        _ => None,
    };
    tracing::info!(%dest, %instance, search = %options.service_type_search, "discovery running");
    emit(Event::Started);

    let services: Services = Arc::new(Mutex::new(HashMap::new()));
    let hello = advertised.as_ref().map(|(name, service_type)| Announcement::Hello {
        protocol_version: PROTOCOL_VERSION,
        instance,
        name: name.clone(),
        service_type: service_type.clone(),
        port: settings.service_port,
    });
    let loops = async {
        tokio::try_join!(
            beacon_loop(&socket, hello, dest, settings.announce_interval),
            recv_loop(&socket, &services, &emit, instance, &options.service_type_search),
            service_timeout_loop(&services, &emit, settings.announce_interval, settings.service_timeout),
        )
    };
    tokio::select! {
        r = loops => {
            if let Err(e) = r {
                tracing::warn!(error = %e, "discovery loop failed");
                emit(Event::DiscoveryFailed { message: e.to_string() });
                return;
            }
        }
        _ = shutdown.wait_for(|stop| *stop) => {}
    }

    if let Some((name, service_type)) = advertised {
        let goodbye = Announcement::Goodbye {
            protocol_version: PROTOCOL_VERSION,
            instance,
            name,
            service_type,
        };
        match protocol::encode(&goodbye) {
            Ok(frame) => {
                if let Err(e) = socket.send_to(&frame, dest).await {
                    tracing::debug!(error = %e, "goodbye not sent");
                }
            }
            Err(e) => tracing::warn!(error = %e, "goodbye encode"),
        }
    }
    tracing::info!("discovery stopped");
    emit(Event::Stopped);
}

fn make_multicast_socket(group: Ipv4Addr, port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
    std_sock.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_multicast_loop_v4(true)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

async fn beacon_loop(
    socket: &UdpSocket,
    hello: Option<Announcement>,
    dest: SocketAddr,
    interval: Duration,
) -> std::io::Result<()> {
    let Some(hello) = hello else {
        return std::future::pending().await;
    };
    let frame = protocol::encode(&hello).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    loop {
        if let Err(e) = socket.send_to(&frame, dest).await {
            tracing::debug!(error = %e, "beacon not sent");
        }
        tokio::time::sleep(interval).await;
    }
}

fn matches_search(search: &str, service_type: &str) -> bool {
    search.is_empty() || search == service_type
}

async fn recv_loop(
    socket: &UdpSocket,
    services: &Services,
    emit: &Emitter,
    instance: Token,
    search: &str,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; 65536];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        let datagram = &buf[..n];
        match protocol::decode(datagram) {
            Ok(announcement) => {
                if announcement.instance() == instance || !matches_search(search, announcement.service_type()) {
                    continue;
                }
                if let Some(event) = observe(services, announcement, from).await {
                    emit(event);
                }
            }
            Err(ProtocolError::Foreign) => emit(Event::UdpMessage(UdpMessage {
                address: from.to_string(),
                data: datagram.to_vec(),
            })),
            Err(e) => tracing::debug!(%from, error = %e, "ignoring announcement"),
        }
    }
}

/// Record an announcement; returns the event to report, if any.
async fn observe(services: &Services, announcement: Announcement, from: SocketAddr) -> Option<Event> {
    let host = from.ip().to_string();
    let mut seen = services.lock().await;
    match announcement {
        Announcement::Hello {
            instance,
            name,
            service_type,
            port,
            ..
        } => {
            let service = ServiceAnnouncement {
                name,
                service_type,
                host: Some(host),
                port: Some(port),
            };
            let is_new = seen
                .insert(
                    instance,
                    Seen {
                        service: service.clone(),
                        last_seen: Instant::now(),
                    },
                )
                .is_none();
            is_new.then_some(Event::ServiceFound(service))
        }
        Announcement::Goodbye {
            instance,
            name,
            service_type,
            ..
        } => {
            seen.remove(&instance)?;
            Some(Event::ServiceLost(ServiceAnnouncement {
                name,
                service_type,
                host: Some(host),
                port: None,
            }))
        }
    }
}

async fn service_timeout_loop(
    services: &Services,
    emit: &Emitter,
    interval: Duration,
    timeout: Duration,
) -> std::io::Result<()> {
    loop {
        tokio::time::sleep(interval).await;
        for service in expire(services, Instant::now(), timeout).await {
            emit(Event::ServiceLost(service));
        }
    }
}

async fn expire(services: &Services, now: Instant, timeout: Duration) -> Vec<ServiceAnnouncement> {
    let mut seen = services.lock().await;
    let stale: Vec<Token> = seen
        .iter()
        .filter(|(_, s)| now.duration_since(s.last_seen) >= timeout)
        .map(|(id, _)| *id)
        .collect();
    stale
        .iter()
        .filter_map(|id| seen.remove(id))
        .map(|s| s.service)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello(instance: Token, port: u16) -> Announcement {
        Announcement::Hello {
            protocol_version: PROTOCOL_VERSION,
            instance,
            name: "station".into(),
            service_type: "_fk._tcp".into(),
            port,
        }
    }

    fn from() -> SocketAddr {
        "192.168.1.20:54321".parse().unwrap()
    }

    #[tokio::test]
    async fn first_hello_is_found_repeats_are_not() {
        let services: Services = Arc::default();
        let id = Token::new();
        let first = observe(&services, hello(id, 80), from()).await;
        match first {
            Some(Event::ServiceFound(s)) => {
                assert_eq!(s.host.as_deref(), Some("192.168.1.20"));
                assert_eq!(s.port, Some(80));
                assert_eq!(s.name, "station");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(observe(&services, hello(id, 80), from()).await.is_none());
    }

    #[tokio::test]
    async fn goodbye_loses_known_services_only() {
        let services: Services = Arc::default();
        let id = Token::new();
        let goodbye = Announcement::Goodbye {
            protocol_version: PROTOCOL_VERSION,
            instance: id,
            name: "station".into(),
            service_type: "_fk._tcp".into(),
        };
        assert!(observe(&services, goodbye.clone(), from()).await.is_none());
        observe(&services, hello(id, 80), from()).await;
        assert!(matches!(
            observe(&services, goodbye, from()).await,
            Some(Event::ServiceLost(ServiceAnnouncement { port: None, .. }))
        ));
        assert!(services.lock().await.is_empty());
    }

    #[tokio::test]
    async fn stale_services_expire() {
        let services: Services = Arc::default();
        observe(&services, hello(Token::new(), 80), from()).await;
        let timeout = Duration::from_secs(16);
        assert!(expire(&services, Instant::now(), timeout).await.is_empty());
        let later = Instant::now() + timeout;
        let lost = expire(&services, later, timeout).await;
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].port, Some(80));
        assert!(services.lock().await.is_empty());
    }

    #[test]
    fn empty_search_matches_everything() {
        assert!(matches_search("", "_fk._tcp"));
        assert!(matches_search("_fk._tcp", "_fk._tcp"));
        assert!(!matches_search("_fk._tcp", "_http._tcp"));
    }
}
