//! Recording transport and discovery sink for unit tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::client::{Client, ClientConfig};
use crate::discovery::{DiscoveryEvents, DiscoveryOptions, ServiceAnnouncement, StopOptions, UdpMessage};
use crate::registry::Token;
use crate::transfer::Transfer;
use crate::transport::{FileHandle, Transport, TransportError};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    StartDiscovery(DiscoveryOptions),
    StopDiscovery(StopOptions),
    Transfer(Token, Transfer),
    OpenFile(PathBuf),
    ReadInfo(Token, FileHandle),
    ReadDelimited(Token, FileHandle, usize),
    ReadBlocks(Token, FileHandle, usize, usize),
    ScanWifi,
    FindConnectedNetwork,
}

impl Call {
    fn token(&self) -> Option<Token> {
        match self {
            Call::Transfer(t, _)
            | Call::ReadInfo(t, _)
            | Call::ReadDelimited(t, _, _)
            | Call::ReadBlocks(t, _, _, _) => Some(*t),
            _ => None,
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    failure: Mutex<Option<String>>,
    next_handle: AtomicU64,
}

impl RecordingTransport {
    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn last_token(&self) -> Token {
        self.calls()
            .iter()
            .rev()
            .find_map(Call::token)
            .expect("no correlated call recorded")
    }

    pub(crate) fn last_transfer(&self) -> (Token, Transfer) {
        self.calls()
            .into_iter()
            .rev()
            .find_map(|c| match c {
                Call::Transfer(t, transfer) => Some((t, transfer)),
                _ => None,
            })
            .expect("no transfer recorded")
    }

    /// Every later primitive fails synchronously with `message`.
    pub(crate) fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_owned());
    }

    pub(crate) fn succeed(&self) {
        *self.failure.lock().unwrap() = None;
    }

    fn record(&self, call: Call) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(call);
        match self.failure.lock().unwrap().as_ref() {
            Some(message) => Err(TransportError::new(message.clone())),
            None => Ok(()),
        }
    }
}

impl Transport for RecordingTransport {
    fn start_discovery(&self, options: &DiscoveryOptions) -> Result<(), TransportError> {
        self.record(Call::StartDiscovery(options.clone()))
    }

    fn stop_discovery(&self, options: &StopOptions) -> Result<(), TransportError> {
        self.record(Call::StopDiscovery(*options))
    }

    fn dispatch_transfer(&self, token: Token, transfer: &Transfer) -> Result<(), TransportError> {
        self.record(Call::Transfer(token, transfer.clone()))
    }

    fn open_file(&self, path: &Path) -> Result<FileHandle, TransportError> {
        self.record(Call::OpenFile(path.to_path_buf()))?;
        Ok(FileHandle::new(
            self.next_handle.fetch_add(1, Ordering::Relaxed),
            path,
        ))
    }

    fn read_info(&self, token: Token, file: &FileHandle) -> Result<(), TransportError> {
        self.record(Call::ReadInfo(token, file.clone()))
    }

    fn read_delimited(&self, token: Token, file: &FileHandle, batch_size: usize) -> Result<(), TransportError> {
        self.record(Call::ReadDelimited(token, file.clone(), batch_size))
    }

    fn read_blocks(
        &self,
        token: Token,
        file: &FileHandle,
        block_size: usize,
        batch_size: usize,
    ) -> Result<(), TransportError> {
        self.record(Call::ReadBlocks(token, file.clone(), block_size, batch_size))
    }

    fn scan_wifi(&self) -> Result<(), TransportError> {
        self.record(Call::ScanWifi)
    }

    fn find_connected_network(&self) -> Result<(), TransportError> {
        self.record(Call::FindConnectedNetwork)
    }
}

#[derive(Default)]
pub(crate) struct RecordingEvents {
    found: Mutex<Vec<ServiceAnnouncement>>,
    lost: Mutex<Vec<ServiceAnnouncement>>,
    udp: Mutex<Vec<UdpMessage>>,
}

impl RecordingEvents {
    pub(crate) fn found(&self) -> Vec<ServiceAnnouncement> {
        self.found.lock().unwrap().clone()
    }

    pub(crate) fn lost(&self) -> Vec<ServiceAnnouncement> {
        self.lost.lock().unwrap().clone()
    }

    pub(crate) fn udp(&self) -> Vec<UdpMessage> {
        self.udp.lock().unwrap().clone()
    }
}

impl DiscoveryEvents for RecordingEvents {
    fn on_found_service(&self, service: &ServiceAnnouncement) {
        self.found.lock().unwrap().push(service.clone());
    }

    fn on_lost_service(&self, service: &ServiceAnnouncement) {
        self.lost.lock().unwrap().push(service.clone());
    }

    fn on_udp_message(&self, message: &UdpMessage) {
        self.udp.lock().unwrap().push(message.clone());
    }
}

/// Initialized client over a recording transport.
pub(crate) fn client() -> (Client, Arc<RecordingTransport>, Arc<RecordingEvents>) {
    let events = Arc::new(RecordingEvents::default());
    let client = Client::new(ClientConfig::default(), events.clone());
    let transport = Arc::new(RecordingTransport::default());
    client.initialize(transport.clone());
    (client, transport, events)
}

/// Client with no transport.
pub(crate) fn bare_client() -> Client {
    Client::new(ClientConfig::default(), Arc::new(RecordingEvents::default()))
}
