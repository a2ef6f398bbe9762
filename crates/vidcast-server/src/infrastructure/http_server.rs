//! HTTP server: static client files and the signaling WebSocket.
//!
//! One listener serves three routes:
//!
//! | Route                         | Response                               |
//! |-------------------------------|----------------------------------------|
//! | `GET /`                       | `index.html` from the static directory |
//! | `GET /static/video_client.js` | the browser signaling script           |
//! | `GET /ws`                     | WebSocket upgrade → one [`Session`]    |
//!
//! Every accepted WebSocket runs in its own task inside a
//! `session{id, peer}` span, so all log lines of one browser can be
//! filtered together.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, info_span, warn, Instrument};

use vidcast_core::SessionId;

use crate::application::media::MediaPipeline;
use crate::application::session::{Session, SessionOptions};
use crate::application::session_manager::SessionManager;
use crate::domain::ServerConfig;
use crate::infrastructure::ws_channel::split_socket;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    config: Arc<ServerConfig>,
    pipeline: Arc<dyn MediaPipeline>,
    manager: SessionManager,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        pipeline: Arc<dyn MediaPipeline>,
        manager: SessionManager,
    ) -> Self {
        Self {
            config: Arc::new(config),
            pipeline,
            manager,
        }
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/static/video_client.js", get(client_script))
        .route("/ws", get(signaling_ws))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `config.bind_addr` and serves until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound (port in use, missing
/// permission) or the server fails while running.
pub async fn run_server<F>(
    config: ServerConfig,
    pipeline: Arc<dyn MediaPipeline>,
    manager: SessionManager,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", config.bind_addr))?;
    serve(listener, AppState::new(config, pipeline, manager), shutdown).await
}

/// Serves on an already bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails while running.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().context("listener has no local address")?;
    info!("vidcast listening on http://{addr}");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("HTTP server failed")
}

// ── Static files ──────────────────────────────────────────────────────────────

async fn index(State(state): State<AppState>) -> Response {
    serve_file(
        &state.config.static_dir.join("index.html"),
        "text/html; charset=utf-8",
    )
    .await
}

async fn client_script(State(state): State<AppState>) -> Response {
    serve_file(
        &state.config.static_dir.join("video_client.js"),
        "application/javascript; charset=utf-8",
    )
    .await
}

async fn serve_file(path: &Path, content_type: &'static str) -> Response {
    match tokio::fs::read(path).await {
        Ok(body) => ([(header::CONTENT_TYPE, content_type)], body).into_response(),
        Err(e) => {
            warn!(path = %path.display(), "static file unavailable: {e}");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

// ── Signaling ─────────────────────────────────────────────────────────────────

async fn signaling_ws(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| {
        let id = SessionId::new();
        handle_browser_session(state, id, peer, socket)
            .instrument(info_span!("session", id = %id, %peer))
    })
}

/// Runs one browser connection from upgrade to close.
async fn handle_browser_session(state: AppState, id: SessionId, peer: SocketAddr, socket: WebSocket) {
    info!("browser connected");
    let (inbound, outbound, writer) = split_socket(socket, state.config.send_timeout);
    let options = SessionOptions {
        teardown_timeout: state.config.teardown_timeout,
    };

    match Session::open(
        id,
        peer.to_string(),
        state.pipeline.as_ref(),
        outbound,
        state.manager.clone(),
        options,
    )
    .await
    {
        Ok(session) => {
            session.run(inbound).await;
        }
        // The sender was dropped with the failed session, so the writer
        // closes the socket without a payload.
        Err(e) => error!("session not started: {e}"),
    }

    // A browser that stopped reading must not pin the connection task.
    let abort = writer.abort_handle();
    match timeout(state.config.send_timeout, writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("websocket writer ended abnormally: {e}"),
        Err(_) => {
            abort.abort();
            debug!("websocket writer stalled, socket dropped");
        }
    }
}
