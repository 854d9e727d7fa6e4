//! Read-only relay: pull API and push event channel over the same HTTP
//! listener the daemon already serves health checks from.

pub mod handlers;
pub mod responses;
pub mod routes;
pub mod websocket;

use crate::events::{DomainEvent, EventBus};
use crate::executor::Executor;
use crate::registry::Registry;
use crate::rpc::RpcClient;
use crate::subscriber::Subscriber;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct ProcessStats {
    pub start_time: std::time::Instant,
    pub last_harvest_unix: AtomicU64,
    pub last_sequencer_run_unix: AtomicU64,
}

impl ProcessStats {
    pub fn new() -> Self {
        Self {
            start_time: std::time::Instant::now(),
            last_harvest_unix: AtomicU64::new(0),
            last_sequencer_run_unix: AtomicU64::new(0),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for ProcessStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded ring buffer of recent events, used to replay history to newly
/// connected push clients.
pub struct EventHistory {
    max_len: usize,
    buffer: Mutex<VecDeque<(DomainEvent, i64)>>,
}

impl EventHistory {
    pub fn new(max_len: usize) -> Self {
        Self { max_len, buffer: Mutex::new(VecDeque::with_capacity(max_len)) }
    }

    pub async fn push(&self, event: DomainEvent) {
        let mut buffer = self.buffer.lock().await;
        if buffer.len() >= self.max_len {
            buffer.pop_front();
        }
        buffer.push_back((event, chrono::Utc::now().timestamp()));
    }

    pub async fn tail(&self, n: usize) -> Vec<(DomainEvent, i64)> {
        let buffer = self.buffer.lock().await;
        let skip = buffer.len().saturating_sub(n);
        buffer.iter().skip(skip).cloned().collect()
    }
}

#[derive(Clone)]
pub struct RelayState {
    pub registry: Arc<RwLock<Registry>>,
    pub executor: Arc<Executor>,
    pub subscriber: Arc<Subscriber>,
    pub rpc: Arc<RpcClient>,
    pub events: EventBus,
    pub history: Arc<EventHistory>,
    pub stats: Arc<ProcessStats>,
    pub replay_len: usize,
    pub started_at: std::time::Instant,
    pub push_clients: Arc<AtomicUsize>,
}

/// Wire the relay's routes onto an existing router, mounted at `/api` and
/// `/ws`, and spawn the task that drains the event bus into the ring
/// buffer. Everything else (health, other routes) is the caller's concern.
pub fn attach(router: axum::Router, state: RelayState) -> axum::Router {
    let history = state.history.clone();
    let mut rx = state.events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            history.push(event).await;
        }
    });

    router
        .merge(routes::build_routes(state.clone()))
        .layer(tower::ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()))
        .with_state(state)
}
