//! HTTP face of the companion channel, built on axum

use crate::flow::{ControlMessage, FlowMonitor, FlowNotification, OutputBatch, DEFAULT_OUTPUT_LIMIT};
use crate::metrics::BrokerMetrics;
use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, Router},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer};
use tracing::{error, info};

/// Maximum request body size (64KB); control messages are tiny
const MAX_REQUEST_SIZE: usize = 64 * 1024;

/// Default request timeout (30 seconds)
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum concurrent requests
const MAX_CONCURRENT_REQUESTS: usize = 1000;

#[derive(Clone)]
pub struct RelayService {
    monitor: FlowMonitor,
    metrics: BrokerMetrics,
    start_time: std::time::Instant,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub live_sessions: usize,
}

#[derive(Debug, Deserialize)]
pub struct OutputsQuery {
    limit: Option<usize>,
}

impl RelayService {
    pub fn new(monitor: FlowMonitor, metrics: BrokerMetrics) -> Self {
        Self {
            monitor,
            metrics,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn router(&self) -> Router {
        let app = Router::new()
            .route("/health", get(Self::health_handler))
            .route("/status", get(Self::status_handler))
            .route("/outputs", get(Self::outputs_handler))
            .route("/control", post(Self::control_handler));

        #[cfg(feature = "metrics")]
        let app = app.route("/metrics", get(Self::metrics_handler));

        app.with_state(self.clone())
            .layer(DefaultBodyLimit::max(MAX_REQUEST_SIZE))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                DEFAULT_TIMEOUT,
            ))
            .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
            .layer(CorsLayer::permissive())
    }

    async fn health_handler(State(service): State<RelayService>) -> Json<HealthResponse> {
        Json(HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: service.start_time.elapsed().as_secs(),
            live_sessions: service.metrics.snapshot().live_sessions,
        })
    }

    async fn status_handler(State(service): State<RelayService>) -> Json<FlowNotification> {
        Json(service.monitor.handle(ControlMessage::GetStatus))
    }

    async fn outputs_handler(
        State(service): State<RelayService>,
        Query(query): Query<OutputsQuery>,
    ) -> Json<FlowNotification> {
        let limit = query.limit.unwrap_or(DEFAULT_OUTPUT_LIMIT);
        Json(FlowNotification::FlowOutput(OutputBatch::Batch(
            service.monitor.latest(limit),
        )))
    }

    async fn control_handler(
        State(service): State<RelayService>,
        Json(message): Json<ControlMessage>,
    ) -> (StatusCode, Json<FlowNotification>) {
        let notification = service.monitor.handle(message);
        let status = match notification {
            FlowNotification::Error { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::OK,
        };
        (status, Json(notification))
    }

    #[cfg(feature = "metrics")]
    async fn metrics_handler(State(service): State<RelayService>) -> Result<String, StatusCode> {
        service.metrics.render_prometheus().map_err(|e| {
            error!("Failed to render metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
    }

    pub async fn serve(
        self,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        let app = self.router();

        info!("Starting relay service on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
            return Err(e.into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{EventKind, FlowEvent};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use bytes::Bytes;
    use chrono::Utc;
    use tower::ServiceExt;

    fn service_with_outputs(n: i64) -> RelayService {
        let monitor = FlowMonitor::new();
        for offset in 0..n {
            monitor.record(&FlowEvent {
                kind: EventKind::FlowOutput,
                topic: "acme-jane-wf1-topic".to_string(),
                partition: 0,
                offset,
                key: None,
                value: Bytes::from_static(b"{\"ok\":true}"),
                decoded: Some(serde_json::json!({"ok": true})),
                timestamp: Utc::now(),
            });
        }
        RelayService::new(monitor, BrokerMetrics::new())
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = service_with_outputs(0).router();

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let health = body_json(response).await;
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["live_sessions"], 0);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let app = service_with_outputs(3).router();

        let response = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let status = body_json(response).await;
        assert_eq!(status["type"], "flow-status");
        assert_eq!(status["data"]["topicCount"], 1);
        assert_eq!(status["data"]["totalOutputs"], 3);
    }

    #[tokio::test]
    async fn test_outputs_endpoint_respects_limit() {
        let app = service_with_outputs(20).router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/outputs?limit=4")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let outputs = body_json(response).await;
        assert_eq!(outputs["type"], "flow-output");
        assert_eq!(outputs["data"].as_array().unwrap().len(), 4);
        assert_eq!(outputs["data"][0]["offset"], 19);
    }

    #[tokio::test]
    async fn test_control_endpoint() {
        let app = service_with_outputs(2).router();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/control")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"type":"get-latest-outputs","limit":1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let batch = body_json(response).await;
        assert_eq!(batch["data"].as_array().unwrap().len(), 1);

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/control")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"type":"monitor-specific-org","orgUsrNode":"bad"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["type"], "error");
    }

    #[tokio::test]
    async fn test_invalid_control_json() {
        let app = service_with_outputs(0).router();

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/control")
                    .header("content-type", "application/json")
                    .body(Body::from("{invalid json}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }
}
