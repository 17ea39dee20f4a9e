//! Client: owns the registry, the discovery session and the transport.

use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde::Deserialize;

use crate::discovery::{DiscoveryEvents, DiscoverySession};
use crate::error::Error;
use crate::event::{self, Event};
use crate::registry::{Task, TaskKind, TaskRegistry, Taken, Token};
use crate::transport::Transport;

/// Default records per batch for delimited reads.
pub const DEFAULT_DELIMITED_BATCH_SIZE: usize = 10;
/// Default block size for raw record reads.
pub const DEFAULT_RAW_BLOCK_SIZE: usize = 4096;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default = "default_delimited_batch_size")]
    pub delimited_batch_size: usize,
    #[serde(default = "default_raw_block_size")]
    pub raw_block_size: usize,
    #[serde(default = "default_delimited_batch_size")]
    pub raw_batch_size: usize,
}

fn default_delimited_batch_size() -> usize {
    DEFAULT_DELIMITED_BATCH_SIZE
}
fn default_raw_block_size() -> usize {
    DEFAULT_RAW_BLOCK_SIZE
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            delimited_batch_size: default_delimited_batch_size(),
            raw_block_size: default_raw_block_size(),
            raw_batch_size: default_delimited_batch_size(),
        }
    }
}

pub(crate) struct Inner {
    pub(crate) config: ClientConfig,
    pub(crate) registry: TaskRegistry,
    pub(crate) discovery: DiscoverySession,
    pub(crate) events: Arc<dyn DiscoveryEvents>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
}

impl Inner {
    pub(crate) fn transport(&self) -> Result<Arc<dyn Transport>, Error> {
        self.transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::NotInitialized)
    }

    /// Register `task`, then check the client was not disposed in between. A
    /// task that lands after `dispose` cleared the registry is dropped again,
    /// which settles its pending result as disposed. Returns false in that case.
    pub(crate) fn register_task(&self, token: Token, task: Task) -> bool {
        self.registry.register(token, task);
        if self.transport().is_ok() {
            return true;
        }
        tracing::debug!(%token, "client disposed during dispatch");
        if let Taken::Found(task) = self.registry.take(&token, Ok::<Task, Task>) {
            drop(task);
        }
        false
    }
}

/// Promise-style front end over a callback-driven [`Transport`].
///
/// Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<Inner>,
}

impl Client {
    pub fn new(config: ClientConfig, events: Arc<dyn DiscoveryEvents>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry: TaskRegistry::new(),
                discovery: DiscoverySession::new(),
                events,
                transport: RwLock::new(None),
            }),
        }
    }

    /// Sink for the transport to report events through. Hand this to the
    /// transport before calling [`Client::initialize`].
    pub fn events(&self) -> EventSink {
        EventSink {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn initialize(&self, transport: Arc<dyn Transport>) {
        *self
            .inner
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(transport);
        tracing::debug!("transport initialized");
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.transport().is_ok()
    }

    /// Detach the transport and drop every pending operation. Their pending
    /// results settle as [`Error::Disposed`]; later events are orphaned.
    pub fn dispose(&self) {
        self.inner
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let dropped = self.inner.registry.clear();
        self.inner.discovery.reset();
        tracing::debug!(dropped, "client disposed");
    }

    /// Route one transport event.
    pub fn handle_event(&self, event: Event) {
        event::route(&self.inner, event);
    }

    /// Registered operations still waiting for a terminal event.
    pub fn active_tasks(&self) -> usize {
        self.inner.registry.len()
    }

    /// Kind of the operation waiting on `token`, if it is still in flight.
    pub fn task_kind(&self, token: &Token) -> Option<TaskKind> {
        self.inner.registry.kind(token)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

/// Thread-safe handle a transport uses to deliver events. Does not keep the
/// client alive.
#[derive(Clone)]
pub struct EventSink {
    inner: Weak<Inner>,
}

impl EventSink {
    pub fn send(&self, event: Event) {
        match self.inner.upgrade() {
            Some(inner) => event::route(&inner, event),
            None => tracing::warn!(event = event.name(), "client gone; event dropped"),
        }
    }
}
