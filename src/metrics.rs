//! Prometheus metrics and the health endpoint.
//!
//! Exposes:
//! - `channel_keeper_messages_total` (counter by template kind and status)
//! - `channel_keeper_join_requests_total` (counter by status)
//! - `channel_keeper_member_checks_total` (counter by outcome)
//! - `channel_keeper_pass_duration_seconds` (histogram)
//! - `channel_keeper_known_members` (gauge)
//! - process metrics via `process` collector
//!
//! `GET /` answers a plain-text liveness message, `GET /metrics` the
//! Prometheus text format.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_histogram, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounterVec, IntGauge, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const HEALTH_TEXT: &str = "Bot is alive and running! 🚀";

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "channel_keeper_messages_total",
        "Direct messages sent by template kind and status",
        &["kind", "status"]
    )
    .expect("failed to register messages counter")
});

static JOIN_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "channel_keeper_join_requests_total",
        "Join requests handled by approval status",
        &["status"]
    )
    .expect("failed to register join request counter")
});

static MEMBER_CHECKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "channel_keeper_member_checks_total",
        "Membership checks made by the reconciler, by outcome",
        &["outcome"]
    )
    .expect("failed to register member check counter")
});

static PASS_DURATION: Lazy<Histogram> = Lazy::new(|| {
    // Exponential buckets from 50ms up to ~7 minutes.
    let buckets =
        prometheus::exponential_buckets(0.05, 2.0, 14).expect("failed to create histogram buckets");
    register_histogram!(
        "channel_keeper_pass_duration_seconds",
        "Reconciliation pass duration in seconds",
        buckets
    )
    .expect("failed to register pass duration histogram")
});

static KNOWN_MEMBERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "channel_keeper_known_members",
        "Number of members in the known-members set"
    )
    .expect("failed to register known members gauge")
});

/// Ensure collectors are registered.
fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&MESSAGES_TOTAL);
    Lazy::force(&JOIN_REQUESTS_TOTAL);
    Lazy::force(&MEMBER_CHECKS_TOTAL);
    Lazy::force(&PASS_DURATION);
    Lazy::force(&KNOWN_MEMBERS);
}

fn status_label(success: bool) -> &'static str {
    if success {
        "ok"
    } else {
        "error"
    }
}

/// Count one direct message attempt.
pub fn record_message(kind: &'static str, success: bool) {
    init_collectors();
    MESSAGES_TOTAL
        .with_label_values(&[kind, status_label(success)])
        .inc();
}

/// Count one join request approval attempt.
pub fn record_join_request(approved: bool) {
    init_collectors();
    JOIN_REQUESTS_TOTAL
        .with_label_values(&[status_label(approved)])
        .inc();
}

/// Count one reconciler membership check (`member`, `departed`, `error`).
pub fn record_member_check(outcome: &'static str) {
    init_collectors();
    MEMBER_CHECKS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a finished reconciliation pass.
pub fn record_pass(duration: Duration, known_members: usize) {
    init_collectors();
    PASS_DURATION.observe(duration.as_secs_f64());
    KNOWN_MEMBERS.set(known_members as i64);
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Prometheus text exposition of every registered metric.
pub fn encode_text() -> prometheus::Result<Vec<u8>> {
    init_collectors();
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(buffer)
}

async fn metrics_response() -> Result<Response<Full<Bytes>>, Infallible> {
    match encode_text() {
        Ok(buffer) => {
            let mut response = text_response(StatusCode::OK, buffer);
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static(prometheus::TEXT_FORMAT),
            );
            Ok(response)
        }
        Err(err) => {
            error!("Failed to encode metrics: {}", err);
            Ok(text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "encode error",
            ))
        }
    }
}

async fn handle_request(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    route(req.method(), req.uri().path()).await
}

async fn route(method: &Method, path: &str) -> Result<Response<Full<Bytes>>, Infallible> {
    match (method, path) {
        (&Method::GET, "/") | (&Method::HEAD, "/") => {
            Ok(text_response(StatusCode::OK, HEALTH_TEXT))
        }
        (&Method::GET, "/metrics") => metrics_response().await,
        _ => Ok(text_response(StatusCode::NOT_FOUND, Bytes::new())),
    }
}

async fn serve(listener: TcpListener) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let service = service_fn(handle_request);
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(?peer, "Health connection error: {}", err);
            }
        });
    }
}

/// Spawn the health/metrics HTTP endpoint on the given address.
pub fn spawn_health_server(addr: SocketAddr) {
    init_collectors();
    tokio::spawn(async move {
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(err) => {
                error!(%addr, "Failed to bind health endpoint: {}", err);
                return;
            }
        };
        info!(%addr, "Health and metrics endpoint started");

        if let Err(err) = serve(listener).await {
            error!(%addr, "Health server failed: {}", err);
        }
    });
}
