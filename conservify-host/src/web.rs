//! HTTP transfers over reqwest, reported back as transfer events.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use base64::Engine;
use conservify_core::{Event, Token, Transfer, TransferKind};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use tokio::io::AsyncWriteExt;

use crate::transport::Emitter;

#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error("invalid method {0:?}")]
    Method(String),
    #[error("request body is not valid base64: {0}")]
    Body(#[from] base64::DecodeError),
    #[error("{0} transfer needs a path")]
    MissingPath(&'static str),
    /// Covers connecting and waiting for the response headers.
    #[error("no response within {0:?}")]
    ResponseTimeout(Duration),
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Build the shared HTTP client. Per-request timeouts override these.
pub fn client(connection_timeout: Duration, default_timeout: Duration) -> Result<reqwest::Client, WebError> {
    Ok(reqwest::Client::builder()
        .connect_timeout(connection_timeout)
        .timeout(default_timeout)
        .build()?)
}

/// Run one transfer to completion, emitting progress then exactly one terminal event.
pub async fn run(http: reqwest::Client, emit: Emitter, token: Token, transfer: Transfer) {
    tracing::debug!(%token, kind = ?transfer.kind, method = %transfer.method, url = %transfer.url, "transfer");
    let event = match execute(&http, &emit, token, &transfer).await {
        Ok(done) => Event::TransferComplete {
            token,
            headers: done.headers,
            content_type: done.content_type,
            body: done.body,
            status_code: done.status_code,
        },
        Err(e) => {
            tracing::debug!(%token, url = %transfer.url, error = %e, "transfer failed");
            Event::TransferError {
                token,
                message: e.to_string(),
            }
        }
    };
    emit(event);
}

struct Done {
    status_code: u16,
    headers: HashMap<String, String>,
    content_type: Option<String>,
    body: Option<String>,
}

async fn execute(http: &reqwest::Client, emit: &Emitter, token: Token, transfer: &Transfer) -> Result<Done, WebError> {
    let method = reqwest::Method::from_bytes(transfer.method.as_bytes())
        .map_err(|_| WebError::Method(transfer.method.clone()))?;
    let download_path = match transfer.kind {
        TransferKind::Download => Some(required_path(transfer, "download")?),
        _ => None,
    };
    let mut request = http.request(method, &transfer.url);
    for (k, v) in &transfer.headers {
        request = request.header(k, v);
    }
    if let Some(timeout) = transfer.default_timeout {
        request = request.timeout(timeout);
    }

    let upload_size = match transfer.kind {
        TransferKind::Upload => {
            let path = required_path(transfer, "upload")?;
            let data = tokio::fs::read(path).await?;
            let size = data.len() as u64;
            emit(Event::TransferProgress { token, transferred: 0, total: size });
            request = request.body(data);
            Some(size)
        }
        _ => {
            if let Some(body) = request_body(transfer)? {
                request = request.body(body);
            }
            None
        }
    };

    // Bounds connect plus response headers; reqwest has no per-request connect timeout.
    let response = match transfer.connection_timeout {
        Some(limit) => tokio::time::timeout(limit, request.send())
            .await
            .map_err(|_| WebError::ResponseTimeout(limit))??,
        None => request.send().await?,
    };
    if let Some(size) = upload_size {
        emit(Event::TransferProgress { token, transferred: size, total: size });
    }

    let status_code = response.status().as_u16();
    let headers = flatten(response.headers());
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let body = match download_path {
        Some(path) => {
            download(response, path, emit, token).await?;
            None
        }
        None => {
            let bytes = response.bytes().await?;
            if bytes.is_empty() {
                None
            } else if transfer.base64_encode_response_body {
                Some(base64::engine::general_purpose::STANDARD.encode(&bytes))
            } else {
                Some(String::from_utf8_lossy(&bytes).into_owned())
            }
        }
    };

    Ok(Done {
        status_code,
        headers,
        content_type,
        body,
    })
}

fn required_path<'a>(transfer: &'a Transfer, what: &'static str) -> Result<&'a Path, WebError> {
    transfer.path.as_deref().ok_or(WebError::MissingPath(what))
}

fn request_body(transfer: &Transfer) -> Result<Option<Vec<u8>>, WebError> {
    let Some(body) = &transfer.body else {
        return Ok(None);
    };
    if transfer.base64_decode_request_body {
        Ok(Some(base64::engine::general_purpose::STANDARD.decode(body)?))
    } else {
        Ok(Some(body.clone()))
    }
}

/// Header map with one value per name; repeated headers are comma-joined.
fn flatten(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        out.entry(name.as_str().to_owned())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_owned());
    }
    out
}

async fn download(mut response: reqwest::Response, path: &Path, emit: &Emitter, token: Token) -> Result<(), WebError> {
    let total = response.content_length().unwrap_or(0);
    let mut file = tokio::fs::File::create(path).await?;
    let mut transferred: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        transferred += chunk.len() as u64;
        emit(Event::TransferProgress {
            token,
            transferred,
            total: total.max(transferred),
        });
    }
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conservify_core::TransferRequest;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// One-shot HTTP server: answers the first connection with `response` and
    /// hands back the raw request it read.
    async fn serve_once(response: Vec<u8>) -> (String, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }
            stream.write_all(&response).await.unwrap();
            stream.shutdown().await.unwrap();
            request
        });
        (url, task)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..end]
            .lines()
            .find_map(|l| {
                let (k, v) = l.split_once(':')?;
                k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
            })
            .unwrap_or(0);
        request.len() >= end + 4 + length
    }

    fn http_response(content_type: &str, body: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nX-Station: one\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        )
        .into_bytes();
        out.extend_from_slice(body);
        out
    }

    fn collector() -> (Emitter, Arc<Mutex<Vec<Event>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Arc::new(move |e: Event| sink.lock().unwrap().push(e)), seen)
    }

    fn transfer(kind: TransferKind, request: &TransferRequest) -> Transfer {
        Transfer {
            kind,
            url: request.url.clone(),
            method: request.method_or_default().to_owned(),
            headers: request.headers.clone(),
            body: None,
            path: request.path.clone(),
            upload_copy: false,
            connection_timeout: None,
            default_timeout: None,
            base64_decode_request_body: false,
            base64_encode_response_body: kind == TransferKind::Binary,
        }
    }

    fn http() -> reqwest::Client {
        client(Duration::from_secs(5), Duration::from_secs(10)).unwrap()
    }

    #[tokio::test]
    async fn text_transfer_reports_body_and_headers() {
        let (url, server) = serve_once(http_response("text/plain", b"hello")).await;
        let (emit, seen) = collector();
        let token = Token::new();
        run(http(), emit, token, transfer(TransferKind::Text, &TransferRequest::new(url))).await;
        server.await.unwrap();
        let events = seen.lock().unwrap();
        match events.as_slice() {
            [Event::TransferComplete { token: t, headers, content_type, body, status_code }] => {
                assert_eq!(*t, token);
                assert_eq!(*status_code, 200);
                assert_eq!(body.as_deref(), Some("hello"));
                assert_eq!(content_type.as_deref(), Some("text/plain"));
                assert_eq!(headers.get("x-station").map(String::as_str), Some("one"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn binary_transfer_decodes_request_and_encodes_response() {
        let (url, server) = serve_once(http_response("application/octet-stream", &[0, 1, 2])).await;
        let (emit, seen) = collector();
        let request = TransferRequest::new(url).method("POST");
        let mut t = transfer(TransferKind::Binary, &request);
        t.body = Some(b"3q2+7w==".to_vec());
        t.base64_decode_request_body = true;
        run(http(), emit, Token::new(), t).await;
        let raw = server.await.unwrap();
        assert!(raw.ends_with(&[0xde, 0xad, 0xbe, 0xef]));
        let events = seen.lock().unwrap();
        assert!(matches!(
            events.as_slice(),
            [Event::TransferComplete { body: Some(b), .. }] if b == "AAEC"
        ));
    }

    #[tokio::test]
    async fn download_streams_to_path_with_progress() {
        let payload = vec![7u8; 50_000];
        let (url, server) = serve_once(http_response("application/octet-stream", &payload)).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download.bin");
        let (emit, seen) = collector();
        let request = TransferRequest::new(url).path(&path);
        run(http(), emit, Token::new(), transfer(TransferKind::Download, &request)).await;
        server.await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), payload);
        let events = seen.lock().unwrap();
        let (last, progress) = events.split_last().unwrap();
        assert!(matches!(last, Event::TransferComplete { body: None, .. }));
        assert!(!progress.is_empty());
        assert!(matches!(
            progress.last(),
            Some(Event::TransferProgress { transferred: 50_000, total: 50_000, .. })
        ));
    }

    #[tokio::test]
    async fn upload_sends_file() {
        let (url, server) = serve_once(http_response("text/plain", b"ok")).await;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, b"station data").unwrap();
        let (emit, seen) = collector();
        let request = TransferRequest::new(url).method("POST").path(f.path());
        run(http(), emit, Token::new(), transfer(TransferKind::Upload, &request)).await;
        let raw = server.await.unwrap();
        assert!(raw.ends_with(b"station data"));
        let events = seen.lock().unwrap();
        assert!(matches!(
            events.as_slice(),
            [
                Event::TransferProgress { transferred: 0, total: 12, .. },
                Event::TransferProgress { transferred: 12, total: 12, .. },
                Event::TransferComplete { .. }
            ]
        ));
    }

    #[tokio::test]
    async fn refused_connection_is_transfer_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let (emit, seen) = collector();
        let token = Token::new();
        run(http(), emit, token, transfer(TransferKind::Text, &TransferRequest::new(url))).await;
        let events = seen.lock().unwrap();
        assert!(matches!(events.as_slice(), [Event::TransferError { token: t, .. }] if *t == token));
    }

    #[tokio::test]
    async fn silent_server_hits_the_response_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });
        let mut t = transfer(TransferKind::Text, &TransferRequest::new(url));
        t.connection_timeout = Some(Duration::from_millis(200));
        let (emit, seen) = collector();
        run(http(), emit, Token::new(), t).await;
        server.abort();
        let events = seen.lock().unwrap();
        assert!(matches!(
            events.as_slice(),
            [Event::TransferError { message, .. }] if message.starts_with("no response within")
        ));
    }

    #[tokio::test]
    async fn download_without_path_fails() {
        let (emit, seen) = collector();
        let mut t = transfer(TransferKind::Download, &TransferRequest::new("http://127.0.0.1:9"));
        t.path = None;
        assert!(matches!(
            execute(&http(), &emit, Token::new(), &t).await,
            Err(WebError::MissingPath("download"))
        ));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn repeated_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", "a=1".parse().unwrap());
        headers.append("set-cookie", "b=2".parse().unwrap());
        assert_eq!(flatten(&headers)["set-cookie"], "a=1, b=2");
    }
}
