//! HTTP API over hyper 1.x.
//!
//! Routes:
//! - `GET /`: service status
//! - `GET /metrics`: Prometheus exposition
//! - `GET /test-gemini`: sample question straight to the generation backend
//! - `POST /ask`: question answering
//! - `GET /explore?keyword=&limit=`: graph histograms
//! - `GET /conversations`: session dump (only when exposed in config)
//! - `DELETE /conversations/{session_id}`

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_REQUEST_HEADERS,
    CONTENT_TYPE, ORIGIN, VARY,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use url::form_urlencoded;

use crate::error::Error;
use crate::metrics;
use crate::model::AskRequest;
use crate::service::{KnowledgeService, DEFAULT_EXPLORE_LIMIT};

const CONVERSATIONS_PREFIX: &str = "/conversations/";
/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Listener-independent server settings.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    pub expose_conversations: bool,
    pub cors_origins: Vec<String>,
}

impl ServerOptions {
    fn allows_origin(&self, origin: &str) -> bool {
        self.cors_origins.iter().any(|o| o == "*" || o == origin)
    }
}

pub struct AppState {
    pub service: KnowledgeService,
    pub options: ServerOptions,
}

impl AppState {
    pub fn new(service: KnowledgeService, options: ServerOptions) -> Self {
        Self { service, options }
    }
}

/// Accept connections until Ctrl-C.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_listener(listener, state, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve_listener<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()>,
{
    metrics::init_collectors();
    let addr = listener.local_addr()?;
    info!(%addr, "Knowledge graph API listening");

    tokio::pin!(shutdown);
    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping listener");
                return Ok(());
            }
        };
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, state.clone()));
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(?peer, "Connection error: {}", err);
            }
        });
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", err);
        std::future::pending::<()>().await;
    }
}

/// Route one request, recording request metrics and applying CORS headers.
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let origin = req
        .headers()
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if req.method() == Method::OPTIONS {
        let mut response = preflight_response(&req);
        apply_cors(&mut response, origin.as_deref(), &state.options);
        return Ok(response);
    }

    let route = route_label(req.method(), req.uri().path());
    let inflight = metrics::record_request_start(route);

    let mut response = route_request(req, &state).await;
    apply_cors(&mut response, origin.as_deref(), &state.options);

    inflight.finish(response.status());
    Ok(response)
}

async fn route_request<B>(req: Request<B>, state: &AppState) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (method, path.as_str()) {
        (Method::GET, "/") => json_response(StatusCode::OK, &state.service.status()),
        (Method::GET, "/metrics") => metrics::metrics_response(),
        (Method::GET, "/test-gemini") => {
            json_response(StatusCode::OK, &state.service.test_generation().await)
        }
        (Method::POST, "/ask") => {
            let body = match read_body(req).await {
                Ok(body) => body,
                Err(err) => return error_response(&err, None),
            };
            match handle_ask(state, &body).await {
                Ok(response) => response,
                Err(err) => error_response(&err, Some("Error processing query")),
            }
        }
        (Method::GET, "/explore") => match handle_explore(state, req.uri().query()).await {
            Ok(response) => response,
            Err(err) => error_response(&err, Some("Error exploring graph")),
        },
        (Method::GET, "/conversations") => {
            if !state.options.expose_conversations {
                return not_found();
            }
            json_response(StatusCode::OK, &state.service.list_conversations())
        }
        (Method::DELETE, p) if p.starts_with(CONVERSATIONS_PREFIX) => {
            let raw = &p[CONVERSATIONS_PREFIX.len()..];
            let result = urlencoding::decode(raw)
                .map_err(|e| Error::InvalidArgument(format!("invalid session id: {}", e)))
                .and_then(|id| state.service.delete_conversation(&id));
            match result {
                Ok(deleted) => json_response(StatusCode::OK, &deleted),
                Err(err) => error_response(&err, None),
            }
        }
        (_, "/" | "/metrics" | "/test-gemini" | "/ask" | "/explore" | "/conversations") => {
            detail_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
        }
        _ => not_found(),
    }
}

async fn read_body<B>(req: Request<B>) -> Result<Bytes, Error>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| {
            if e.is::<LengthLimitError>() {
                Error::PayloadTooLarge(MAX_BODY_BYTES)
            } else {
                Error::InvalidArgument(format!("failed to read request body: {}", e))
            }
        })
}

async fn handle_ask(state: &AppState, body: &[u8]) -> Result<Response<Full<Bytes>>, Error> {
    let request: AskRequest = serde_json::from_slice(body)?;
    let response = state.service.ask(request).await?;
    let response = json_response(StatusCode::OK, &response);
    info!("JSON response size: {} bytes", response.body().size_hint().lower());
    Ok(response)
}

async fn handle_explore(
    state: &AppState,
    query: Option<&str>,
) -> Result<Response<Full<Bytes>>, Error> {
    let params = parse_query_params(query);
    let limit = match params.get("limit") {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| Error::InvalidArgument(format!("invalid limit: {}", raw)))?,
        None => DEFAULT_EXPLORE_LIMIT,
    };
    let keyword = params.get("keyword").map(String::as_str);

    let explored = state.service.explore(keyword, limit).await?;
    Ok(json_response(StatusCode::OK, &explored))
}

fn parse_query_params(query: Option<&str>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Some(q) = query else {
        return out;
    };
    for (k, v) in form_urlencoded::parse(q.as_bytes()) {
        out.insert(k.into_owned(), v.into_owned());
    }
    out
}

/// Low-cardinality metrics label for a request.
fn route_label(method: &Method, path: &str) -> &'static str {
    match (method, path) {
        (&Method::GET, "/") => "status",
        (&Method::GET, "/metrics") => "metrics",
        (&Method::GET, "/test-gemini") => "test_gemini",
        (&Method::POST, "/ask") => "ask",
        (&Method::GET, "/explore") => "explore",
        (&Method::GET, "/conversations") => "list_conversations",
        (&Method::DELETE, p) if p.starts_with(CONVERSATIONS_PREFIX) => "delete_conversation",
        _ => "other",
    }
}

fn preflight_response<B>(req: &Request<B>) -> Response<Full<Bytes>> {
    let allow_headers = req
        .headers()
        .get(ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"));

    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
    );
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, allow_headers);
    response
}

fn apply_cors(response: &mut Response<Full<Bytes>>, origin: Option<&str>, options: &ServerOptions) {
    let Some(origin) = origin else {
        return;
    };
    if !options.allows_origin(origin) {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(origin) {
        let headers = response.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        headers.insert(VARY, HeaderValue::from_static("Origin"));
    }
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = match serde_json::to_vec(value) {
        Ok(body) => body,
        Err(err) => {
            error!("Failed to serialize response: {}", err);
            return detail_response(StatusCode::INTERNAL_SERVER_ERROR, "serialization failed");
        }
    };
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn detail_response(status: StatusCode, detail: &str) -> Response<Full<Bytes>> {
    let body = json!({ "detail": detail }).to_string();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn not_found() -> Response<Full<Bytes>> {
    detail_response(StatusCode::NOT_FOUND, "Not Found")
}

/// `{detail}` body for an error; server errors get `context` as a prefix.
fn error_response(err: &Error, context: Option<&str>) -> Response<Full<Bytes>> {
    let status = err.status_code();
    let detail = match context {
        Some(prefix) if status.is_server_error() => {
            error!("{}: {}", prefix, err);
            format!("{}: {}", prefix, err)
        }
        _ => {
            warn!("Request failed with {}: {}", status, err);
            err.to_string()
        }
    };
    detail_response(status, &detail)
}
