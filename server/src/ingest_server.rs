use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use common::{Event, Snapshot, SnapshotError};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::synchronizer::{IngestCommand, MatchSynchronizer, run_ingest_worker};

/// Snapshots larger than this are refused before parsing.
const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct IngestServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:3000"); port 0 picks a free port
    pub addr: String,
    /// Expected `auth.token` in every payload, if set
    pub auth_token: Option<String>,
    pub request_timeout: Duration,
    pub queue_capacity: usize,
}

impl From<&Config> for IngestServerConfig {
    fn from(config: &Config) -> Self {
        IngestServerConfig {
            addr: config.gsi_addr.clone(),
            auth_token: config.gsi_auth_token.clone(),
            request_timeout: config.request_timeout,
            queue_capacity: config.queue_capacity,
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed snapshot: {0}")]
    Malformed(#[from] SnapshotError),
    #[error("invalid or missing auth token")]
    Unauthorized,
    #[error("ingest worker is not running")]
    Unavailable,
    #[error("flush failed: {0:#}")]
    Flush(anyhow::Error),
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match &self {
            IngestError::Malformed(_) => StatusCode::BAD_REQUEST,
            IngestError::Unauthorized => StatusCode::UNAUTHORIZED,
            IngestError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            IngestError::Flush(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Cloneable way into the ingest worker's queue.
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<IngestCommand>,
}

impl IngestHandle {
    pub async fn submit(&self, snapshot: Snapshot, received_at: DateTime<Utc>) -> Result<(), IngestError> {
        self.tx
            .send(IngestCommand::Snapshot { snapshot, received_at })
            .await
            .map_err(|_| IngestError::Unavailable)
    }

    pub async fn flush(&self) -> Result<PathBuf, IngestError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(IngestCommand::Flush { reply })
            .await
            .map_err(|_| IngestError::Unavailable)?;
        response
            .await
            .map_err(|_| IngestError::Unavailable)?
            .map_err(IngestError::Flush)
    }

    pub async fn events_for_round(&self, round: u32) -> Result<Vec<Event>, IngestError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(IngestCommand::EventsForRound { round, reply })
            .await
            .map_err(|_| IngestError::Unavailable)?;
        response.await.map_err(|_| IngestError::Unavailable)
    }
}

#[derive(Clone)]
struct IngestState {
    handle: IngestHandle,
    auth_token: Option<Arc<str>>,
}

#[derive(Debug, Serialize)]
struct FlushResponse {
    path: PathBuf,
}

/// HTTP endpoint for the game-state feed, in front of a single ingest worker.
pub struct IngestServer {
    local_addr: SocketAddr,
    handle: IngestHandle,
    http_token: CancellationToken,
    worker_token: CancellationToken,
    http_task: JoinHandle<()>,
    worker_task: JoinHandle<Option<PathBuf>>,
}

impl IngestServer {
    pub async fn start(config: IngestServerConfig, synchronizer: MatchSynchronizer) -> Result<Self> {
        let listener = TcpListener::bind(&config.addr)
            .await
            .with_context(|| format!("Failed to bind ingest listener on {}", config.addr))?;
        let local_addr = listener.local_addr().context("Failed to read ingest listener address")?;

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let handle = IngestHandle { tx };

        let worker_token = CancellationToken::new();
        let worker_task = tokio::spawn(run_ingest_worker(synchronizer, rx, worker_token.clone()));

        let state = IngestState {
            handle: handle.clone(),
            auth_token: config.auth_token.map(Arc::from),
        };
        let app = router(state, config.request_timeout);

        let http_token = CancellationToken::new();
        let shutdown_signal = http_token.clone();
        let http_task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_signal.cancelled().await;
                    info!("Ingest server received shutdown signal");
                })
                .await;
            if let Err(e) = served {
                error!("Ingest server error: {}", e);
            }
        });

        info!("Ingest server listening on {}", local_addr);
        Ok(IngestServer {
            local_addr,
            handle,
            http_token,
            worker_token,
            http_task,
            worker_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> IngestHandle {
        self.handle.clone()
    }

    /// Stop accepting payloads, process what is already queued, then write
    /// the final record. Returns the path of that record, if one was written.
    pub async fn shutdown(self) -> Result<Option<PathBuf>> {
        info!("Shutting down ingest server");
        self.http_token.cancel();
        match tokio::time::timeout(Duration::from_secs(5), self.http_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("HTTP task panicked during shutdown: {:?}", e),
            Err(_) => warn!("HTTP shutdown timed out"),
        }

        self.worker_token.cancel();
        let final_record = self.worker_task.await.context("Ingest worker panicked")?;
        info!("Ingest server shut down");
        Ok(final_record)
    }
}

fn router(state: IngestState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/", post(receive_snapshot))
        .route("/health", get(health_check))
        .route("/flush", post(flush))
        .route("/rounds/:round/events", get(events_for_round))
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_BYTES))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(state)
}

async fn receive_snapshot(State(state): State<IngestState>, body: Bytes) -> Result<StatusCode, IngestError> {
    let received_at = common::util::now();

    let snapshot = Snapshot::from_slice(&body).map_err(|e| {
        warn!("Rejected malformed snapshot ({} bytes): {}", body.len(), e);
        IngestError::from(e)
    })?;

    if let Some(expected) = &state.auth_token {
        if snapshot.auth_token() != Some(expected.as_ref()) {
            warn!("Rejected snapshot with a bad auth token");
            return Err(IngestError::Unauthorized);
        }
    }

    state.handle.submit(snapshot, received_at).await?;
    Ok(StatusCode::OK)
}

async fn flush(State(state): State<IngestState>) -> Result<Json<FlushResponse>, IngestError> {
    let path = state.handle.flush().await?;
    info!("Flushed open match record to {}", path.display());
    Ok(Json(FlushResponse { path }))
}

async fn events_for_round(
    State(state): State<IngestState>,
    Path(round): Path<u32>,
) -> Result<Json<Vec<Event>>, IngestError> {
    Ok(Json(state.handle.events_for_round(round).await?))
}

async fn health_check() -> &'static str {
    "OK"
}
