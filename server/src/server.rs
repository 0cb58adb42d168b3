use std::io;
use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use fragcast_rt::tasks::{self as rt, CancellationToken, JoinHandle, TcpListener};
use fragcast_session::{
    Application, ConfigError, ConnectionActor, Registry, SessionBinding, SessionId,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::ws;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot listen on {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("server task failed: {0}")]
    Join(String),
}

struct AppState<A: Application> {
    registry: Registry<A>,
    max_message_bytes: usize,
}

impl<A: Application> Clone for AppState<A> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            max_message_bytes: self.max_message_bytes,
        }
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    sessions: usize,
}

/// Routes:
///
/// - `GET /events/{session_id}`: WebSocket bound to the session in the path
/// - `GET /events`: WebSocket whose first frame is `session:<id>`
/// - `GET /health`: JSON liveness probe
pub fn build_router<A: Application>(registry: Registry<A>, config: &ServerConfig) -> Router {
    let state = AppState {
        registry,
        max_message_bytes: config.max_message_bytes,
    };
    Router::new()
        .route("/events", get(handshake_events::<A>))
        .route("/events/{session_id}", get(path_events::<A>))
        .route("/health", get(health::<A>))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn path_events<A: Application>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<A>>,
    Path(session_id): Path<String>,
) -> Response {
    match SessionId::new(&session_id) {
        Ok(id) => upgrade(ws, state, SessionBinding::Path(id)),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

async fn handshake_events<A: Application>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<A>>,
) -> Response {
    upgrade(ws, state, SessionBinding::Handshake)
}

fn upgrade<A: Application>(
    ws: WebSocketUpgrade,
    state: AppState<A>,
    binding: SessionBinding,
) -> Response {
    let AppState {
        registry,
        max_message_bytes,
    } = state;
    ws.max_message_size(max_message_bytes)
        .on_upgrade(move |socket| async move {
            let actor = ConnectionActor::new(registry);
            let report = actor.run(binding, ws::transport(socket)).await;
            tracing::debug!(?report, "websocket finished");
        })
}

async fn health<A: Application>(State(state): State<AppState<A>>) -> impl IntoResponse {
    let registry = &state.registry;
    if registry.is_closed() {
        let body = Health {
            status: "shutting_down",
            sessions: 0,
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body));
    }
    let body = Health {
        status: "ok",
        sessions: registry.session_count(),
    };
    (StatusCode::OK, Json(body))
}

/// A running server. Dropping it leaves the server running; call
/// [`ServerHandle::shutdown`] to stop it.
pub struct ServerHandle<A: Application> {
    pub local_addr: SocketAddr,
    registry: Registry<A>,
    shutdown: CancellationToken,
    server: JoinHandle<io::Result<()>>,
    reaper: JoinHandle<()>,
}

impl<A: Application> ServerHandle<A> {
    pub fn registry(&self) -> &Registry<A> {
        &self.registry
    }

    /// Closes every session connection with a going-away code, then stops
    /// accepting requests and waits for the server task.
    pub async fn shutdown(self) -> Result<(), ServerError> {
        let sessions = self.registry.shutdown();
        tracing::info!(sessions, "shutting down");
        self.shutdown.cancel();
        if let Err(err) = self.reaper.await {
            tracing::warn!(%err, "reaper task failed");
        }
        self.server
            .await
            .map_err(|err| ServerError::Join(err.to_string()))??;
        Ok(())
    }
}

/// Binds `config.bind`, starts the idle reaper and serves until
/// [`ServerHandle::shutdown`].
pub async fn start<A: Application>(
    config: &ServerConfig,
    registry: Registry<A>,
) -> Result<ServerHandle<A>, ServerError> {
    config.validate()?;
    let listener = TcpListener::bind(&config.bind)
        .await
        .map_err(|source| ServerError::Bind {
            addr: config.bind.clone(),
            source,
        })?;
    serve(listener, config, registry)
}

/// Like [`start`] with an already bound listener. `extra` routes are merged in
/// ahead of the session routes.
pub fn serve_with<A: Application>(
    listener: TcpListener,
    config: &ServerConfig,
    registry: Registry<A>,
    extra: Router,
) -> Result<ServerHandle<A>, ServerError> {
    let local_addr = listener.local_addr()?;
    let shutdown = CancellationToken::new();
    let reaper = registry.spawn_reaper(shutdown.child_token());

    let router = extra.merge(build_router(registry.clone(), config));
    let graceful = shutdown.clone().cancelled_owned();
    let server = rt::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(graceful)
            .await
    });
    tracing::info!(%local_addr, "listening");

    Ok(ServerHandle {
        local_addr,
        registry,
        shutdown,
        server,
        reaper,
    })
}

pub fn serve<A: Application>(
    listener: TcpListener,
    config: &ServerConfig,
    registry: Registry<A>,
) -> Result<ServerHandle<A>, ServerError> {
    serve_with(listener, config, registry, Router::new())
}
