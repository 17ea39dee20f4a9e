//! Network queries. A desktop host has no wifi scanner, so both queries report
//! routability only.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use conservify_core::{Event, NetworkStatus};
use tokio::net::UdpSocket;

use crate::transport::Emitter;

/// Public resolver used as the routing probe target. No packet is sent.
pub const PROBE_TARGET: &str = "8.8.8.8:53";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    Connected,
    Scan,
}

pub async fn run(emit: Emitter, query: Query, target: SocketAddr) {
    let status = match probe(target).await {
        Ok(connected) => Ok(NetworkStatus {
            connected,
            connected_wifi: None,
            wifi_networks: match query {
                Query::Scan => Some(Vec::new()),
                Query::Connected => None,
            },
        }),
        Err(e) => {
            tracing::debug!(error = %e, ?query, "network probe failed");
            Err(e.to_string())
        }
    };
    emit(Event::NetworkStatus(status));
}

/// True when the OS has a route (and a local address) towards `target`.
async fn probe(target: SocketAddr) -> std::io::Result<bool> {
    let bind: SocketAddr = if target.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    if let Err(e) = socket.connect(target).await {
        tracing::debug!(%target, error = %e, "no route");
        return Ok(false);
    }
    Ok(!socket.local_addr()?.ip().is_unspecified())
}
