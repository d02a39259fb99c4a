use std::sync::Arc;

use ::time::{format_description::well_known, OffsetDateTime};
use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    address_space::AddressSpace,
    config::ScanConfig,
    error::ScanError,
    ports::{self, PortSpec},
    resolve::Target,
    scanner::{self, ScanCoordinator, SharedProgress},
    scanners::{HostSweepScanner, PortRangeScanner},
    types::ScanReport,
};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<RwLock<ServerState>>, // shared mutable state for progress/results
    config: Arc<ScanConfig>,
}

#[derive(Debug, Default)]
struct ServerState {
    /// Bumped per scan so a superseded scan cannot overwrite a newer one's state.
    generation: u64,
    status: Status,
    results: Option<ScanReport>,
    progress: Option<SharedProgress>,
    cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    #[default]
    Idle,
    Running,
    Done,
    Canceled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Status {
    pub total: u64,
    pub scanned: u64,
    pub open: u64,
    pub state: ScanState,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SweepRequest {
    pub network: String,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub count: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PortsRequest {
    pub target: String,
    #[serde(default)]
    pub ports: Vec<u32>,
    /// Half-open `[lo, hi)`, mutually exclusive with `ports`.
    #[serde(default)]
    pub range: Option<(u32, u32)>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl AppState {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ServerState::default())),
            config: Arc::new(config),
        }
    }

    /// Cancel any running scan and register a new one.
    async fn begin(&self, total: u64) -> (u64, SharedProgress, CancellationToken) {
        let mut s = self.inner.write().await;
        if let Some(c) = s.cancel.take() {
            c.cancel();
        }
        s.generation += 1;
        let progress = SharedProgress::new();
        let cancel = CancellationToken::new();
        s.status = Status {
            total,
            state: ScanState::Running,
            started_at: Some(now_rfc3339()),
            ..Status::default()
        };
        s.results = None;
        s.progress = Some(progress.clone());
        s.cancel = Some(cancel.clone());
        (s.generation, progress, cancel)
    }

    async fn finish(&self, generation: u64, outcome: Result<ScanReport, ScanError>) {
        let mut s = self.inner.write().await;
        if s.generation != generation {
            return;
        }
        if let Some(p) = s.progress.take() {
            let (_, scanned, open) = p.snapshot();
            s.status.scanned = scanned;
            s.status.open = open;
        }
        s.cancel = None;
        s.status.finished_at = Some(now_rfc3339());
        match outcome {
            Ok(report) => {
                s.status.state = ScanState::Done;
                s.results = Some(report);
            }
            Err(ScanError::Canceled) => {
                info!("scan canceled");
                s.status.state = ScanState::Canceled;
            }
            Err(e) => {
                error!(error = %e, "scan failed");
                s.status.state = ScanState::Failed;
                s.status.error = Some(e.to_string());
            }
        }
    }

    async fn status(&self) -> Status {
        let s = self.inner.read().await;
        let mut out = s.status.clone();
        if let Some(p) = s.progress.as_ref() {
            let (_, scanned, open) = p.snapshot();
            out.scanned = scanned;
            out.open = open;
        }
        out
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/results", get(get_results))
        .route("/sweep", post(post_sweep))
        .route("/ports", post(post_ports))
        .route("/cancel", post(post_cancel))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

pub async fn spawn_server(bind: &str, config: ScanConfig) -> Result<()> {
    let app = router(AppState::new(config));
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "serving scan API");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(app.status().await))
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    if let Some(res) = s.results.as_ref() {
        (StatusCode::OK, Json(res.clone())).into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn post_cancel(State(app): State<AppState>) -> impl IntoResponse {
    let cancel = app.inner.read().await.cancel.clone();
    match cancel {
        Some(c) => {
            c.cancel();
            (StatusCode::ACCEPTED, Json(app.status().await)).into_response()
        }
        None => (StatusCode::CONFLICT, "no scan running").into_response(),
    }
}

async fn post_sweep(State(app): State<AppState>, Json(req): Json<SweepRequest>) -> Response {
    let space = match AddressSpace::parse(&req.network) {
        Ok(space) => space,
        Err(e) => return bad_request(e),
    };
    let total = match scanner::check_work_size(space.size()) {
        Ok(n) => n as u64,
        Err(e) => return bad_request(e),
    };

    let mut config = (*app.config).clone();
    if req.concurrency.is_some() {
        config.concurrency = req.concurrency;
    }
    if let Some(count) = req.count {
        config.ping.count = count;
    }

    let (generation, progress, cancel) = app.begin(total).await;
    let coordinator = ScanCoordinator::new(config.budget())
        .with_cancel(cancel)
        .with_progress(progress);
    let scanner =
        HostSweepScanner::new(space, config.reachability_probe()).with_coordinator(coordinator);

    let app2 = app.clone();
    tokio::spawn(async move {
        let outcome = scanner
            .scan()
            .await
            .map(|hosts| ScanReport::sweep(space.prefix().to_string(), space.size(), hosts));
        app2.finish(generation, outcome).await;
    });

    (StatusCode::ACCEPTED, Json(app.status().await)).into_response()
}

async fn post_ports(State(app): State<AppState>, Json(req): Json<PortsRequest>) -> Response {
    let spec = match port_spec(&req) {
        Ok(spec) => spec,
        Err(e) => return bad_request(e),
    };
    let target: Target = match req.target.parse() {
        Ok(t) => t,
        Err(e) => return bad_request(e),
    };

    let mut config = (*app.config).clone();
    if req.concurrency.is_some() {
        config.concurrency = req.concurrency;
    }
    if let Some(ms) = req.timeout_ms {
        config.timeout_ms = ms;
    }

    // Resolve before accepting so a bad hostname is reported to the caller directly.
    let scanner = PortRangeScanner::new(config.port_probe());
    let address = match scanner.resolve(&target).await {
        Ok(ip) => ip,
        Err(e) => return (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response(),
    };

    let (generation, progress, cancel) = app.begin(spec.len() as u64).await;
    let coordinator = ScanCoordinator::new(config.budget())
        .with_cancel(cancel)
        .with_progress(progress);
    let scanner = scanner.with_coordinator(coordinator);

    let app2 = app.clone();
    tokio::spawn(async move {
        let outcome = scanner
            .scan_address(address, &spec)
            .await
            .map(|open| ScanReport::ports(target.to_string(), address, spec.len(), &open));
        app2.finish(generation, outcome).await;
    });

    (StatusCode::ACCEPTED, Json(app.status().await)).into_response()
}

fn port_spec(req: &PortsRequest) -> Result<PortSpec, ScanError> {
    match (req.range, req.ports.is_empty()) {
        (Some(_), false) => Err(ScanError::InvalidPort(
            "give either `ports` or `range`, not both".into(),
        )),
        (Some((lo, hi)), true) => PortSpec::range(lo, hi),
        (None, false) => PortSpec::list(req.ports.iter().copied()),
        (None, true) => Ok(ports::default_ports()),
    }
}

fn bad_request(e: ScanError) -> Response {
    (StatusCode::BAD_REQUEST, e.to_string()).into_response()
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

