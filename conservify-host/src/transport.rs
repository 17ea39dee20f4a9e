//! Desktop implementation of the core `Transport`: every primitive spawns its
//! work on the runtime and reports back through an emitter.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use conservify_core::{
    DiscoveryOptions, Event, EventSink, FileHandle, StopOptions, Token, Transfer, Transport, TransportError,
};
use tokio::runtime::Handle;

use crate::config::Config;
use crate::discovery::{self, DiscoveryHandle};
use crate::{files, web, wifi};

/// Where transport events go. Production wraps an [`EventSink`].
pub type Emitter = Arc<dyn Fn(Event) + Send + Sync>;

pub struct HostTransport {
    runtime: Handle,
    emit: Emitter,
    config: Config,
    http: reqwest::Client,
    discovery: Mutex<Option<DiscoveryHandle>>,
    next_handle: AtomicU64,
}

impl HostTransport {
    pub fn new(runtime: Handle, sink: EventSink, config: Config) -> Result<Self, TransportError> {
        Self::with_emitter(runtime, Arc::new(move |event| sink.send(event)), config)
    }

    pub fn with_emitter(runtime: Handle, emit: Emitter, config: Config) -> Result<Self, TransportError> {
        let http = web::client(config.connection_timeout(), config.default_timeout())
            .map_err(|e| TransportError::new(e.to_string()))?;
        Ok(Self {
            runtime,
            emit,
            config,
            http,
            discovery: Mutex::new(None),
            next_handle: AtomicU64::new(1),
        })
    }

    fn discovery_settings(&self) -> Result<discovery::Settings, TransportError> {
        let group: Ipv4Addr = self
            .config
            .multicast_group
            .parse()
            .map_err(|e| TransportError::new(format!("multicast group {:?}: {e}", self.config.multicast_group)))?;
        Ok(discovery::Settings {
            group,
            port: self.config.discovery_port,
            service_port: self.config.service_port,
            announce_interval: self.config.announce_interval(),
            service_timeout: self.config.service_timeout(),
        })
    }

    fn take_discovery(&self) -> Option<DiscoveryHandle> {
        self.discovery.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn network_query(&self, query: wifi::Query) -> Result<(), TransportError> {
        let target: SocketAddr = wifi::PROBE_TARGET
            .parse()
            .map_err(|e| TransportError::new(format!("probe target: {e}")))?;
        self.runtime.spawn(wifi::run(self.emit.clone(), query, target));
        Ok(())
    }
}

impl Transport for HostTransport {
    fn start_discovery(&self, options: &DiscoveryOptions) -> Result<(), TransportError> {
        let settings = self.discovery_settings()?;
        if let Some(previous) = self.take_discovery() {
            // A failed session may still hold its task handle.
            self.runtime.spawn(previous.stop());
        }
        let handle = discovery::spawn(&self.runtime, self.emit.clone(), settings, options.clone());
        *self.discovery.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    fn stop_discovery(&self, options: &StopOptions) -> Result<(), TransportError> {
        tracing::debug!(suspending = options.suspending, "stop discovery");
        let handle = self.take_discovery();
        let emit = self.emit.clone();
        self.runtime.spawn(async move {
            match handle {
                Some(handle) => handle.stop().await,
                None => emit(Event::Stopped),
            }
        });
        Ok(())
    }

    fn dispatch_transfer(&self, token: Token, transfer: &Transfer) -> Result<(), TransportError> {
        self.runtime
            .spawn(web::run(self.http.clone(), self.emit.clone(), token, transfer.clone()));
        Ok(())
    }

    fn open_file(&self, path: &Path) -> Result<FileHandle, TransportError> {
        Ok(FileHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed), path))
    }

    fn read_info(&self, token: Token, file: &FileHandle) -> Result<(), TransportError> {
        let emit = self.emit.clone();
        let path = file.path().to_path_buf();
        self.runtime.spawn(async move { files::read_info(emit, token, &path).await });
        Ok(())
    }

    fn read_delimited(&self, token: Token, file: &FileHandle, batch_size: usize) -> Result<(), TransportError> {
        let emit = self.emit.clone();
        let path = file.path().to_path_buf();
        self.runtime
            .spawn(async move { files::read_delimited(emit, token, &path, batch_size).await });
        Ok(())
    }

    fn read_blocks(
        &self,
        token: Token,
        file: &FileHandle,
        block_size: usize,
        batch_size: usize,
    ) -> Result<(), TransportError> {
        let emit = self.emit.clone();
        let path = file.path().to_path_buf();
        self.runtime
            .spawn(async move { files::read_blocks(emit, token, &path, block_size, batch_size).await });
        Ok(())
    }

    fn scan_wifi(&self) -> Result<(), TransportError> {
        self.network_query(wifi::Query::Scan)
    }

    fn find_connected_network(&self) -> Result<(), TransportError> {
        self.network_query(wifi::Query::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::encode_record;
    use conservify_core::{Client, DiscoveryEvents, DiscoveryState, Error, ServiceAnnouncement};
    use std::io::Write;

    struct Quiet;

    impl DiscoveryEvents for Quiet {
        fn on_found_service(&self, _: &ServiceAnnouncement) {}
        fn on_lost_service(&self, _: &ServiceAnnouncement) {}
    }

    fn host_client(config: Config) -> Client {
        let client = Client::new(config.client.clone(), Arc::new(Quiet));
        let transport = HostTransport::new(Handle::current(), client.events(), config).unwrap();
        client.initialize(Arc::new(transport));
        client
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn delimited_file_through_the_client() {
        let mut buf = Vec::new();
        for i in 0..12u8 {
            encode_record(&[i; 3], &mut buf);
        }
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&buf).unwrap();

        let client = host_client(Config::default());
        let file = client.open(f.path()).unwrap();
        let info = file.info().unwrap().await.unwrap();
        assert_eq!(info.size, buf.len() as u64);

        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = batches.clone();
        file.delimited(move |batch| sink.lock().unwrap().push(batch.records.len()))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(*batches.lock().unwrap(), vec![10, 2]);
        assert_eq!(client.active_tasks(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_file_rejects_with_path() {
        let client = host_client(Config::default());
        let file = client.open("/nonexistent/conservify.bin").unwrap();
        match file.info().unwrap().await {
            Err(Error::FileSystem(e)) => assert_eq!(e.path, Path::new("/nonexistent/conservify.bin")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_without_session_still_reports_stopped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let transport = HostTransport::with_emitter(
            Handle::current(),
            Arc::new(move |e: Event| sink.lock().unwrap().push(e)),
            Config::default(),
        )
        .unwrap();
        transport.stop_discovery(&StopOptions::default()).unwrap();
        for _ in 0..50 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(*seen.lock().unwrap(), vec![Event::Stopped]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn bad_multicast_group_rejects_start() {
        let client = host_client(Config {
            multicast_group: "not-an-address".into(),
            ..Config::default()
        });
        let started = client.start(DiscoveryOptions::search("_fk._tcp")).unwrap().await;
        assert!(matches!(started, Err(Error::Discovery { .. })));
        assert_eq!(client.discovery_state(), DiscoveryState::Failed);
    }
}
