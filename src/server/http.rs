//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo. The plain and TLS listeners share one
//! handler; the only difference is the scheme reported to the proxy.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Args;
use crate::logging::{AccessEvent, AccessLogger};
use crate::proxy::{InboundRequest, ProxiedResponse, ProxyService, CACHE_STATUS_HEADER};
use crate::server::tls;
use crate::types::{Result, VestibuleError};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub proxy: ProxyService,
    pub access_log: AccessLogger,
}

impl AppState {
    pub fn new(args: Args, proxy: ProxyService, access_log: AccessLogger) -> Self {
        Self {
            args,
            proxy,
            access_log,
        }
    }
}

/// Start the listeners and serve until one of them fails
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    info!("Vestibule listening on http://{}", state.args.listen);

    let tls_listener = match (&state.args.tls_cert, &state.args.tls_key) {
        (Some(cert), Some(key)) => {
            let acceptor = tls::load_acceptor(cert, key)?;
            let listener = TcpListener::bind(state.args.listen_tls).await?;
            info!("Vestibule listening on https://{}", state.args.listen_tls);
            Some((listener, acceptor))
        }
        _ => {
            info!("No TLS certificate configured, HTTPS listener disabled");
            None
        }
    };

    let plain = accept_plain(Arc::clone(&state), listener);
    match tls_listener {
        Some((listener, acceptor)) => {
            tokio::try_join!(plain, accept_tls(state, listener, acceptor))?;
        }
        None => plain.await?,
    }

    Ok(())
}

async fn accept_plain(state: Arc<AppState>, listener: TcpListener) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(serve_connection(state, stream, addr, false));
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

async fn accept_tls(state: Arc<AppState>, listener: TcpListener, acceptor: TlsAcceptor) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                let acceptor = acceptor.clone();
                // Handshake off the accept loop
                tokio::spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => serve_connection(state, tls_stream, addr, true).await,
                        Err(e) => debug!("TLS handshake with {} failed: {}", addr, e),
                    }
                });
            }
            Err(e) => {
                error!("Error accepting TLS connection: {:?}", e);
            }
        }
    }
}

async fn serve_connection<S>(state: Arc<AppState>, stream: S, addr: SocketAddr, tls: bool)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let read_timeout = state.args.read_timeout();
    let max_buf_size = state.args.max_header_bytes;

    let service = service_fn(move |req| {
        let state = Arc::clone(&state);
        async move { handle_request(state, addr, tls, req).await }
    });

    if let Err(err) = http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(read_timeout)
        .max_buf_size(max_buf_size)
        .serve_connection(io, service)
        .await
    {
        debug!("Error serving connection from {}: {:?}", addr, err);
    }
}

/// Proxy one request and record it
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    tls: bool,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let request_id = Uuid::new_v4();
    let span = info_span!("request", %request_id, client = %addr);

    async move {
        let started = Instant::now();
        let (parts, body) = req.into_parts();

        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();
        let mut event = AccessEvent::new(request_id, &host, parts.method.as_str(), parts.uri.path());

        let outcome = match read_body(body, state.args.max_body_bytes).await {
            Ok(body) => {
                let inbound = InboundRequest {
                    method: parts.method,
                    host,
                    uri: parts.uri,
                    headers: parts.headers,
                    body,
                    tls,
                };
                state.proxy.handle(inbound).await
            }
            Err(e) => Err(e),
        };

        let response = match outcome {
            Ok(reply) => {
                event = event.with_upstream(reply.upstream_url.clone(), reply.cache.as_str());
                proxied_response(reply)
            }
            Err(e) => {
                if e.is_client_error() {
                    debug!(error = %e, "Request rejected");
                } else {
                    warn!(error = %e, "Request failed");
                }
                event = event.with_error(e.to_string());
                error_response(e)
            }
        };

        let bytes = body_len(&response);
        let event = event
            .with_status(response.status().as_u16(), bytes)
            .with_duration(started.elapsed().as_millis() as u64);
        state.access_log.log(event).await;

        Ok(to_boxed(response))
    }
    .instrument(span)
    .await
}

async fn read_body(body: Incoming, limit: usize) -> Result<Bytes> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(
            VestibuleError::BadRequest(format!("Request body exceeds {} bytes", limit)),
        ),
        Err(e) => Err(VestibuleError::BadRequest(format!("Failed to read request body: {}", e))),
    }
}

fn proxied_response(reply: ProxiedResponse) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(reply.body));
    *response.status_mut() = reply.status;
    *response.headers_mut() = reply.headers;
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, reply.cache.header_value());
    response
}

/// Short plain-text diagnostic for a failed request
fn error_response(err: VestibuleError) -> Response<Full<Bytes>> {
    let (status, message) = err.into_status_code_and_body();
    let mut response = Response::new(Full::new(Bytes::from(format!("{}\n", message))));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn body_len(response: &Response<Full<Bytes>>) -> u64 {
    use hyper::body::Body;
    response.body().size_hint().exact().unwrap_or(0)
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}
