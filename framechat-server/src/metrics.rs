//! Prometheus metrics for the framechat server.
//!
//! This module provides:
//! - A metrics registry with connection, frame and error counters
//! - An HTTP server exposing them at `/metrics`, plus `/health`

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Prometheus metrics for the framechat server.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Total connections accepted.
    pub connections_total: Counter,
    /// Currently registered peers.
    pub connections_active: Gauge,
    /// Frames decoded from peers, by kind.
    pub frames_received_total: CounterVec,
    /// Frames delivered to peers, by kind.
    pub frames_sent_total: CounterVec,
    /// Connection errors, by error kind.
    pub errors_total: CounterVec,
    /// Per-peer send failures during routing.
    pub route_failures_total: Counter,
    /// Attachments waiting for a disposition.
    pub pending_attachments: Gauge,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let connections_total = Counter::with_opts(Opts::new(
            "framechat_connections_total",
            "Total number of connections accepted",
        ))?;
        registry.register(Box::new(connections_total.clone()))?;

        let connections_active = Gauge::with_opts(Opts::new(
            "framechat_connections_active",
            "Number of currently registered peers",
        ))?;
        registry.register(Box::new(connections_active.clone()))?;

        let frames_received_total = CounterVec::new(
            Opts::new("framechat_frames_received_total", "Frames received by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(frames_received_total.clone()))?;

        let frames_sent_total = CounterVec::new(
            Opts::new("framechat_frames_sent_total", "Frames sent by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(frames_sent_total.clone()))?;

        let errors_total = CounterVec::new(
            Opts::new("framechat_errors_total", "Connection errors by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        let route_failures_total = Counter::with_opts(Opts::new(
            "framechat_route_failures_total",
            "Per-peer send failures while routing",
        ))?;
        registry.register(Box::new(route_failures_total.clone()))?;

        let pending_attachments = Gauge::with_opts(Opts::new(
            "framechat_pending_attachments",
            "Attachments waiting for accept or discard",
        ))?;
        registry.register(Box::new(pending_attachments.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            frames_received_total,
            frames_sent_total,
            errors_total,
            route_failures_total,
            pending_attachments,
        })
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Runs the HTTP metrics server until `shutdown` flips to `true`.
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("Metrics connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Metrics server accept error: {}", e);
                    }
                }
            }
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    tracing::info!("Metrics server shutting down");
                    break;
                }
            }
        }
    }

    Ok(())
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => match metrics.encode() {
            Ok(body) => {
                let mut response = text_response(StatusCode::OK, body);
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
                );
                response
            }
            Err(e) => {
                tracing::warn!("Failed to encode metrics: {}", e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
            }
        },
        "/health" | "/healthz" => text_response(StatusCode::OK, "OK"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();

        metrics.connections_total.inc();
        metrics.connections_active.inc();
        metrics
            .frames_received_total
            .with_label_values(&["message"])
            .inc();
        metrics
            .errors_total
            .with_label_values(&["MALFORMED_FRAME"])
            .inc();

        let encoded = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(encoded.contains("framechat_connections_total"));
        assert!(encoded.contains("framechat_connections_active"));
        assert!(encoded.contains("framechat_frames_received_total"));
        assert!(encoded.contains("MALFORMED_FRAME"));
    }

    #[test]
    fn test_gauges() {
        let metrics = Metrics::new().unwrap();
        metrics.pending_attachments.set(3.0);
        metrics.route_failures_total.inc_by(2.0);

        let encoded = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(encoded.contains("framechat_pending_attachments 3"));
        assert!(encoded.contains("framechat_route_failures_total 2"));
    }

    #[test]
    fn test_text_response() {
        let response = text_response(StatusCode::NOT_FOUND, "Not Found");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
