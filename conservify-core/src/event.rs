//! Transport events and the router that dispatches them.

use std::collections::HashMap;

use crate::client::Inner;
use crate::discovery::{self, NetworkStatus, ServiceAnnouncement, UdpMessage};
use crate::file;
use crate::registry::Token;
use crate::transfer;

/// Everything a transport can report.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Started,
    Stopped,
    DiscoveryFailed {
        message: String,
    },
    ServiceFound(ServiceAnnouncement),
    ServiceLost(ServiceAnnouncement),
    /// Answers the outstanding network query.
    NetworkStatus(Result<NetworkStatus, String>),
    UdpMessage(UdpMessage),
    TransferProgress {
        token: Token,
        transferred: u64,
        total: u64,
    },
    TransferComplete {
        token: Token,
        headers: HashMap<String, String>,
        content_type: Option<String>,
        body: Option<String>,
        status_code: u16,
    },
    TransferError {
        token: Token,
        message: String,
    },
    FileInfo {
        token: Token,
        size: u64,
    },
    /// `records` absent or empty ends the stream.
    FileRecords {
        token: Token,
        position: u64,
        size: u64,
        records: Option<Vec<Vec<u8>>>,
    },
    FileError {
        token: Token,
        message: String,
    },
}

impl Event {
    pub fn token(&self) -> Option<Token> {
        match self {
            Event::TransferProgress { token, .. }
            | Event::TransferComplete { token, .. }
            | Event::TransferError { token, .. }
            | Event::FileInfo { token, .. }
            | Event::FileRecords { token, .. }
            | Event::FileError { token, .. } => Some(*token),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::Started => "started",
            Event::Stopped => "stopped",
            Event::DiscoveryFailed { .. } => "discovery-failed",
            Event::ServiceFound(_) => "service-found",
            Event::ServiceLost(_) => "service-lost",
            Event::NetworkStatus(_) => "network-status",
            Event::UdpMessage(_) => "udp-message",
            Event::TransferProgress { .. } => "transfer-progress",
            Event::TransferComplete { .. } => "transfer-complete",
            Event::TransferError { .. } => "transfer-error",
            Event::FileInfo { .. } => "file-info",
            Event::FileRecords { .. } => "file-records",
            Event::FileError { .. } => "file-error",
        }
    }
}

pub(crate) fn route(inner: &Inner, event: Event) {
    match event.token() {
        Some(token) => tracing::trace!(event = event.name(), %token, "routing"),
        None => tracing::trace!(event = event.name(), "routing"),
    }
    match event {
        Event::Started => discovery::on_started(inner),
        Event::Stopped => discovery::on_stopped(inner),
        Event::DiscoveryFailed { message } => discovery::on_discovery_failed(inner, message),
        Event::ServiceFound(service) => discovery::on_service_found(inner, service),
        Event::ServiceLost(service) => discovery::on_service_lost(inner, service),
        Event::NetworkStatus(status) => discovery::on_network_status(inner, status),
        Event::UdpMessage(message) => discovery::on_udp_message(inner, message),
        Event::TransferProgress {
            token,
            transferred,
            total,
        } => transfer::on_progress(inner, token, transferred, total),
        Event::TransferComplete {
            token,
            headers,
            content_type,
            body,
            status_code,
        } => transfer::on_complete(inner, token, headers, content_type, body, status_code),
        Event::TransferError { token, message } => transfer::on_error(inner, token, message),
        Event::FileInfo { token, size } => file::on_file_info(inner, token, size),
        Event::FileRecords {
            token,
            position,
            size,
            records,
        } => file::on_file_records(inner, token, position, size, records),
        Event::FileError { token, message } => file::on_file_error(inner, token, message),
    }
}
