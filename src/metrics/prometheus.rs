//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Total number of reconciliations by outcome
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "service_ingress_operator_reconciliations_total",
        "Total number of reconciliations by outcome",
        &["outcome"]
    ).unwrap();

    /// Total number of reconciliation errors
    pub static ref RECONCILIATION_ERRORS: CounterVec = register_counter_vec!(
        "service_ingress_operator_reconciliation_errors_total",
        "Total number of failed reconciliations",
        &["kind"]
    ).unwrap();

    /// Reconciliation duration histogram
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "service_ingress_operator_reconcile_duration_seconds",
        "Duration of reconciliations in seconds",
        &["kind"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Keys waiting in the work queue
    pub static ref QUEUE_DEPTH: GaugeVec = register_gauge_vec!(
        "service_ingress_operator_queue_depth",
        "Number of keys waiting in the work queue",
        &["queue"]
    ).unwrap();

    /// Keys accepted by the work queue
    pub static ref QUEUE_ADDS: CounterVec = register_counter_vec!(
        "service_ingress_operator_queue_adds_total",
        "Total number of keys added to the work queue",
        &["queue"]
    ).unwrap();

    /// Keys requeued with backoff after a failure
    pub static ref QUEUE_RETRIES: CounterVec = register_counter_vec!(
        "service_ingress_operator_queue_retries_total",
        "Total number of rate limited requeues",
        &["queue"]
    ).unwrap();

    /// Keys abandoned after exhausting their retries
    pub static ref DROPPED_KEYS: CounterVec = register_counter_vec!(
        "service_ingress_operator_dropped_keys_total",
        "Total number of keys dropped after too many failures",
        &["queue"]
    ).unwrap();

    /// Worker loops restarted after a panic
    pub static ref WORKER_RESTARTS: CounterVec = register_counter_vec!(
        "service_ingress_operator_worker_restarts_total",
        "Total number of worker restarts",
        &["queue"]
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: Gauge = register_gauge!(
        "service_ingress_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();

    /// Caches synced and workers running (1 = ready, 0 = not ready)
    pub static ref OPERATOR_READY: Gauge = register_gauge!(
        "service_ingress_operator_ready",
        "Operator readiness (1 = caches synced and workers running)"
    ).unwrap();
}

/// Serve metrics and health endpoints until `shutdown` is cancelled
pub async fn serve(port: u16, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, _) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = shutdown.cancelled() => {
                info!("Metrics server stopping");
                return Ok(());
            }
        };
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" => health_response(),
        "/readyz" | "/ready" => ready_response(),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

/// Generate metrics response
fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}

/// Health check response
fn health_response() -> Response<Full<Bytes>> {
    if OPERATOR_HEALTH.get() >= 1.0 {
        text_response(StatusCode::OK, "ok")
    } else {
        text_response(StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    }
}

/// Readiness check response
fn ready_response() -> Response<Full<Bytes>> {
    if OPERATOR_READY.get() >= 1.0 {
        text_response(StatusCode::OK, "ok")
    } else {
        text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}
