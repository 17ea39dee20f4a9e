//! Transfer dispatcher: builds transfer descriptors, registers a task per
//! request and settles it from progress/complete/error events.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;

use crate::body::{self, Body};
use crate::client::{Client, Inner};
use crate::error::{map_error, Error, ErrorContext};
use crate::pending::{self, Completer, Pending};
use crate::registry::{self, Task, Taken, Token};

/// Progress callback: `(total_bytes, transferred_bytes, request)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64, &TransferRequest) + Send + Sync>;

/// Request body as supplied by the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Bytes(Vec<u8>),
    Text(String),
}

impl RequestBody {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RequestBody::Bytes(b) => b,
            RequestBody::Text(s) => s.as_bytes(),
        }
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(b: Vec<u8>) -> Self {
        RequestBody::Bytes(b)
    }
}

impl From<&[u8]> for RequestBody {
    fn from(b: &[u8]) -> Self {
        RequestBody::Bytes(b.to_vec())
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Text(s)
    }
}

impl From<&str> for RequestBody {
    fn from(s: &str) -> Self {
        RequestBody::Text(s.to_owned())
    }
}

/// What the consumer asked for. Echoed back on success and on failure.
#[derive(Clone, Default)]
pub struct TransferRequest {
    pub url: String,
    /// Defaults to GET.
    pub method: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Option<RequestBody>,
    /// Destination for downloads, source for uploads.
    pub path: Option<PathBuf>,
    /// Upload from a copy of `path` rather than the live file.
    pub upload_copy: bool,
    pub connection_timeout: Option<Duration>,
    pub default_timeout: Option<Duration>,
    pub progress: Option<ProgressFn>,
}

impl TransferRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn upload_copy(mut self, copy: bool) -> Self {
        self.upload_copy = copy;
        self
    }

    pub fn timeouts(mut self, connection: Option<Duration>, default: Option<Duration>) -> Self {
        self.connection_timeout = connection;
        self.default_timeout = default;
        self
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(u64, u64, &TransferRequest) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(f));
        self
    }

    pub fn method_or_default(&self) -> &str {
        self.method.as_deref().unwrap_or("GET")
    }
}

impl fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferRequest")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(|b| b.as_bytes().len()))
            .field("path", &self.path)
            .field("upload_copy", &self.upload_copy)
            .field("connection_timeout", &self.connection_timeout)
            .field("default_timeout", &self.default_timeout)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Which transport primitive carries a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Text,
    Json,
    Binary,
    Download,
    Upload,
}

/// Transfer descriptor handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub kind: TransferKind,
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub path: Option<PathBuf>,
    pub upload_copy: bool,
    pub connection_timeout: Option<Duration>,
    pub default_timeout: Option<Duration>,
    /// `body` is base64 text; the transport decodes it before sending.
    pub base64_decode_request_body: bool,
    /// The transport reports the response body as base64.
    pub base64_encode_response_body: bool,
}

impl Transfer {
    pub(crate) fn build(kind: TransferKind, request: &TransferRequest) -> Self {
        let binary = kind == TransferKind::Binary;
        let body = request.body.as_ref().map(|b| {
            if binary {
                base64::engine::general_purpose::STANDARD
                    .encode(b.as_bytes())
                    .into_bytes()
            } else {
                b.as_bytes().to_vec()
            }
        });
        Self {
            kind,
            url: request.url.clone(),
            method: request.method_or_default().to_owned(),
            headers: request.headers.clone(),
            base64_decode_request_body: binary && body.is_some(),
            base64_encode_response_body: binary,
            body,
            path: request.path.clone(),
            upload_copy: request.upload_copy,
            connection_timeout: request.connection_timeout,
            default_timeout: request.default_timeout,
        }
    }
}

/// Settled transfer.
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub status_code: u16,
    /// Keys lower-cased.
    pub headers: HashMap<String, String>,
    pub body: Body,
    pub request: TransferRequest,
}

pub(crate) struct TransferTask {
    request: Arc<TransferRequest>,
    base64_response: bool,
    last_transferred: Option<u64>,
    completer: Completer<TransferResult>,
}

impl TransferTask {
    pub(crate) fn new(request: TransferRequest, base64_response: bool, completer: Completer<TransferResult>) -> Self {
        Self {
            request: Arc::new(request),
            base64_response,
            last_transferred: None,
            completer,
        }
    }

    fn into_parts(self) -> (TransferRequest, bool, Completer<TransferResult>) {
        let request = Arc::try_unwrap(self.request).unwrap_or_else(|shared| (*shared).clone());
        (request, self.base64_response, self.completer)
    }
}

impl Client {
    /// Plain request; the response body comes back as text.
    pub fn text(&self, request: TransferRequest) -> Result<Pending<TransferResult>, Error> {
        self.dispatch(TransferKind::Text, request)
    }

    /// Request whose response is expected as JSON.
    pub fn json(&self, request: TransferRequest) -> Result<Pending<TransferResult>, Error> {
        self.dispatch(TransferKind::Json, request)
    }

    /// Binary request. The body travels base64-encoded and the response
    /// comes back as bytes.
    pub fn protobuf(&self, request: TransferRequest) -> Result<Pending<TransferResult>, Error> {
        self.dispatch(TransferKind::Binary, request)
    }

    /// Stream the response into `request.path`.
    pub fn download(&self, request: TransferRequest) -> Result<Pending<TransferResult>, Error> {
        self.dispatch(TransferKind::Download, request)
    }

    /// Send the file at `request.path` as the request body.
    pub fn upload(&self, request: TransferRequest) -> Result<Pending<TransferResult>, Error> {
        self.dispatch(TransferKind::Upload, request)
    }

    fn dispatch(&self, kind: TransferKind, request: TransferRequest) -> Result<Pending<TransferResult>, Error> {
        let transport = self.inner.transport()?;
        let transfer = Transfer::build(kind, &request);
        let token = Token::new();
        let (completer, pending) = pending::pending();
        tracing::debug!(%token, ?kind, method = %transfer.method, url = %transfer.url, "dispatching transfer");
        let registered = self.inner.register_task(
            token,
            Task::Transfer(TransferTask::new(request, transfer.base64_encode_response_body, completer)),
        );
        if !registered {
            return Ok(pending);
        }
        if let Err(e) = transport.dispatch_transfer(token, &transfer) {
            tracing::warn!(%token, error = %e, "transport rejected transfer");
            if let Taken::Found(task) = self.inner.registry.take(&token, Task::into_transfer) {
                let (request, _, completer) = task.into_parts();
                completer.reject(map_error(e.message, ErrorContext::Transfer(request)));
            }
        }
        Ok(pending)
    }
}

pub(crate) fn on_progress(inner: &Inner, token: Token, transferred: u64, total: u64) {
    let found = inner.registry.lookup(&token, |task| match task {
        Task::Transfer(t) => match t.last_transferred {
            Some(last) if transferred < last => Ok(None),
            _ => {
                t.last_transferred = Some(transferred);
                Ok(t.request.progress.clone().map(|cb| (cb, t.request.clone())))
            }
        },
        other => Err(other.kind()),
    });
    match found {
        None => registry::orphaned("transfer progress", &token),
        Some(Err(kind)) => registry::mismatched("transfer progress", &token, kind),
        Some(Ok(None)) => {
            tracing::trace!(%token, transferred, total, "progress without callback or regressed");
        }
        Some(Ok(Some((callback, request)))) => {
            tracing::trace!(%token, transferred, total, "transfer progress");
            callback(total, transferred, &request);
        }
    }
}

pub(crate) fn on_complete(
    inner: &Inner,
    token: Token,
    headers: HashMap<String, String>,
    content_type: Option<String>,
    body: Option<String>,
    status_code: u16,
) {
    let task = match inner.registry.take(&token, Task::into_transfer) {
        Taken::Found(task) => task,
        Taken::Missing => return registry::orphaned("transfer complete", &token),
        Taken::Mismatched(kind) => return registry::mismatched("transfer complete", &token, kind),
    };
    let headers = normalize_headers(headers);
    let content_type = content_type.or_else(|| headers.get("content-type").cloned());
    let (request, base64_response, completer) = task.into_parts();
    tracing::debug!(%token, status_code, content_type = ?content_type, "transfer complete");
    match body::decode(content_type.as_deref(), base64_response, body.as_deref()) {
        Ok(body) => completer.resolve(TransferResult {
            status_code,
            headers,
            body,
            request,
        }),
        Err(source) => completer.reject(Error::Decode {
            source,
            request: Box::new(request),
        }),
    }
}

pub(crate) fn on_error(inner: &Inner, token: Token, message: String) {
    match inner.registry.take(&token, Task::into_transfer) {
        Taken::Found(task) => {
            tracing::debug!(%token, %message, "transfer failed");
            let (request, _, completer) = task.into_parts();
            completer.reject(map_error(message, ErrorContext::Transfer(request)));
        }
        Taken::Missing => registry::orphaned("transfer error", &token),
        Taken::Mismatched(kind) => registry::mismatched("transfer error", &token, kind),
    }
}

fn normalize_headers(headers: HashMap<String, String>) -> HashMap<String, String> {
    headers
        .into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v))
        .collect()
}
