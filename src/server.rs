//! Mock server.
//!
//! Listens on a socket, records every request, and answers each one with the
//! first queued response that matches it. Requests that match nothing get a
//! fixed 503 response.

use crate::config::Configuration;
use crate::error::ServerError;
use crate::recorder::{RequestRecord, RequestRecorder};
use crate::registry::{ResponseBuilder, StubRegistry};
use crate::response::ResponseSpec;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{
    HeaderMap, HeaderValue, ACCEPT_ENCODING, CONNECTION, CONTENT_ENCODING, CONTENT_TYPE,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::io::Write;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Callback invoked with every request the server records.
pub type RequestCallback = Arc<dyn Fn(&RequestRecord) + Send + Sync>;

/// State shared between the server handle and its connection tasks.
#[derive(Default)]
struct Shared {
    registry: StubRegistry,
    recorder: RequestRecorder,
    gzip: AtomicBool,
    closed: AtomicBool,
    callback: RwLock<Option<RequestCallback>>,
    /// Total requests matched to a queued response.
    requests_matched: AtomicU64,
    /// Total requests that matched nothing.
    requests_unmatched: AtomicU64,
}

impl Shared {
    /// Record a request and pass it to the callback. A panicking callback
    /// is logged and otherwise ignored.
    fn record(&self, record: RequestRecord) {
        self.recorder.append(record.clone());

        let callback = self
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            if catch_unwind(AssertUnwindSafe(|| callback(&record))).is_err() {
                warn!(
                    method = %record.method,
                    path = %record.path,
                    "Request callback panicked"
                );
            }
        }
    }

    async fn handle(&self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        let method = request.method().as_str().to_string();
        let path = decode_path(request.uri().path());
        if self.closed.load(Ordering::SeqCst) {
            debug!(method = %method, path = %path, "Request refused, server closed");
            let mut response =
                text_response(StatusCode::SERVICE_UNAVAILABLE, "Server is closed".to_string());
            response
                .headers_mut()
                .insert(CONNECTION, HeaderValue::from_static("close"));
            return response;
        }
        let headers = flatten_headers(request.headers());
        let accepts_gzip = request
            .headers()
            .get_all(ACCEPT_ENCODING)
            .iter()
            .any(|v| String::from_utf8_lossy(v.as_bytes()).contains("gzip"));

        let mut record = RequestRecord {
            method: method.clone(),
            path: path.clone(),
            headers,
            files: BTreeMap::new(),
        };

        let body = match request.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(method = %method, path = %path, error = %e, "Failed to read request body");
                self.record(record);
                return text_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    format!(
                        "Failed response for method {} and path '{}': {}",
                        method, path, e
                    ),
                );
            }
        };
        record.files = body_parts(&method, &body);
        self.record(record);

        match self.registry.take_match(&method, &path) {
            Some(spec) => {
                self.requests_matched.fetch_add(1, Ordering::Relaxed);
                info!(
                    method = %method,
                    path = %path,
                    status = spec.status,
                    "Request matched response"
                );
                let gzip = accepts_gzip && self.gzip.load(Ordering::Relaxed);
                build_response(&spec, gzip)
            }
            None => {
                self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
                warn!(method = %method, path = %path, "No matching response");
                text_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    format!(
                        "No matching responses for method {} and path '{}'.",
                        method, path
                    ),
                )
            }
        }
    }
}

/// Percent-decode a request path. Paths that do not decode to UTF-8 are
/// kept as received.
fn decode_path(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Flatten a header map to single values, joining repeats with ", ".
fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    flat
}

/// Expose a request body the way form parsing does: POST bodies under
/// `postData`, PUT bodies under `content`.
fn body_parts(method: &str, body: &Bytes) -> BTreeMap<String, String> {
    let mut parts = BTreeMap::new();
    if body.is_empty() {
        return parts;
    }
    let key = match method {
        "POST" => "postData",
        "PUT" => "content",
        _ => return parts,
    };
    parts.insert(key.to_string(), String::from_utf8_lossy(body).into_owned());
    parts
}

fn text_response(status: StatusCode, message: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn build_response(spec: &ResponseSpec, gzip: bool) -> Response<Full<Bytes>> {
    let status = match StatusCode::from_u16(spec.status) {
        Ok(status) => status,
        Err(_) => {
            return text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Invalid status code {} in {}", spec.status, spec),
            );
        }
    };

    let mut builder = Response::builder().status(status);
    for (name, value) in &spec.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let mut body = spec.content.clone();
    if gzip {
        match gzip_encode(&spec.content) {
            Ok(encoded) => {
                builder = builder.header(CONTENT_ENCODING, "gzip");
                body = encoded;
            }
            Err(e) => warn!(error = %e, "Failed to compress response, sending identity"),
        }
    }

    builder.body(Full::new(body)).unwrap_or_else(|e| {
        text_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Invalid response {}: {}", spec, e),
        )
    })
}

fn gzip_encode(data: &[u8]) -> std::io::Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(Bytes::from(encoder.finish()?))
}

/// A running mock server.
///
/// Created listening; [`MockServer::close`] (or dropping the handle) stops
/// accepting connections and shuts down open ones. Once closed, operations that change the server
/// fail with [`ServerError::Closed`]; the snapshot accessors keep working.
pub struct MockServer {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    uri: String,
    shutdown_tx: watch::Sender<bool>,
}

impl MockServer {
    /// Listen on `localhost`.
    pub async fn create(port: u16) -> Result<Self, ServerError> {
        Self::bind("localhost", port).await
    }

    /// Listen on all interfaces.
    pub async fn create_for_all(port: u16) -> Result<Self, ServerError> {
        Self::bind(&Ipv6Addr::UNSPECIFIED.to_string(), port).await
    }

    /// Listen on a specific address.
    pub async fn create_for_address(address: IpAddr, port: u16) -> Result<Self, ServerError> {
        Self::bind(&address.to_string(), port).await
    }

    /// Listen where the configuration says, with its gzip setting and its
    /// responses queued in order.
    pub async fn create_for_configuration(
        configuration: &Configuration,
    ) -> Result<Self, ServerError> {
        let server = &configuration.server;
        let mock = Self::bind(&server.host_name, server.port).await?;
        mock.shared.gzip.store(server.gzip, Ordering::Relaxed);
        for response in &configuration.responses {
            mock.shared.registry.push(response.clone());
        }
        info!(
            address = %server.bind_address(),
            responses = configuration.responses.len(),
            gzip = server.gzip,
            "Responses loaded from configuration"
        );
        Ok(mock)
    }

    async fn bind(host: &str, port: u16) -> Result<Self, ServerError> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| ServerError::Bind {
                address: format!("{}:{}", host, port),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let uri = if host.contains(':') {
            format!("http://[{}]:{}/", host, local_addr.port())
        } else {
            format!("http://{}:{}/", host, local_addr.port())
        };

        let shared = Arc::new(Shared::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(accept_loop(listener, Arc::clone(&shared), shutdown_rx));

        info!(address = %local_addr, uri = %uri, "Mock server listening");

        Ok(Self {
            shared,
            local_addr,
            uri,
            shutdown_tx,
        })
    }

    fn ensure_open(&self) -> Result<(), ServerError> {
        if self.is_closed() {
            Err(ServerError::Closed)
        } else {
            Ok(())
        }
    }

    /// Base URI, with a trailing slash.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Compress responses for clients that accept gzip.
    pub fn enable_gzip(&self, enable: bool) -> Result<&Self, ServerError> {
        self.ensure_open()?;
        self.shared.gzip.store(enable, Ordering::Relaxed);
        Ok(self)
    }

    /// Queue a new response and return a builder for it.
    pub fn add_response(&self) -> Result<ResponseBuilder, ServerError> {
        self.ensure_open()?;
        Ok(self.shared.registry.add())
    }

    /// Responses still queued, in the order they were added.
    pub fn responses(&self) -> Vec<ResponseSpec> {
        self.shared.registry.snapshot()
    }

    /// Requests received so far, in the order they arrived.
    pub fn requests_received(&self) -> Vec<RequestRecord> {
        self.shared.recorder.snapshot()
    }

    /// Set the callback evaluated on each request, replacing any previous one.
    pub fn set_request_callback<F>(&self, callback: F) -> Result<(), ServerError>
    where
        F: Fn(&RequestRecord) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        *self
            .shared
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
        Ok(())
    }

    /// Get total requests matched.
    pub fn total_matched(&self) -> u64 {
        self.shared.requests_matched.load(Ordering::Relaxed)
    }

    /// Get total requests unmatched.
    pub fn total_unmatched(&self) -> u64 {
        self.shared.requests_unmatched.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting connections and shut down open ones. Requests that
    /// still arrive are refused without being recorded or matched. Closing
    /// twice is harmless.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        info!(address = %self.local_addr, "Mock server closed");
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, remote_addr) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };

                let io = TokioIo::new(stream);
                let shared = Arc::clone(&shared);
                let mut shutdown = shutdown_rx.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |request| {
                        let shared = Arc::clone(&shared);
                        async move { Ok::<_, Infallible>(shared.handle(request).await) }
                    });

                    let connection = http1::Builder::new().serve_connection(io, service);
                    tokio::pin!(connection);

                    let result = tokio::select! {
                        result = connection.as_mut() => result,
                        _ = shutdown.changed() => {
                            connection.as_mut().graceful_shutdown();
                            connection.await
                        }
                    };

                    if let Err(e) = result {
                        if !e.is_incomplete_message() {
                            debug!(remote = %remote_addr, error = %e, "HTTP connection error");
                        }
                    }
                });
            }
            _ = shutdown_rx.changed() => {
                debug!("Accept loop stopping");
                break;
            }
        }
    }
}
