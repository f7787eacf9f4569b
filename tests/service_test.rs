#[cfg(feature = "service")]
mod common;

#[cfg(feature = "service")]
mod service_tests {
    use super::common::{context, eventually};
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use broker_relay::service::RelayService;
    use broker_relay::{EventRouter, FlowMonitor, MemoryBroker, OrgUsrNode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_outputs_flow_from_broker_to_http() {
        let broker = MemoryBroker::new();
        let (context, _) = context(&broker);
        let node = OrgUsrNode::parse("acme-jane-wf1").unwrap();
        assert!(context.admin().create_flow_topic(&node, 1, 1).await);

        let monitor = FlowMonitor::new();
        let router = EventRouter::new();
        monitor.attach(&router);
        let session = context.flow_session(None, router).await.unwrap();

        for step in 0..3 {
            context
                .producer()
                .send_to_flow_topic(&node, &json!({ "step": step }))
                .await
                .unwrap();
        }
        assert!(eventually(|| monitor.status().total_outputs == 3).await);

        let app = RelayService::new(monitor, context.metrics().clone()).router();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/outputs?limit=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let outputs = body_json(response).await;
        assert_eq!(outputs["data"].as_array().unwrap().len(), 2);
        assert_eq!(outputs["data"][0]["payload"], json!({"step": 2}));

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/control")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"type":"get-status"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = body_json(response).await;
        assert_eq!(status["data"]["totalOutputs"], 3);
        assert_eq!(status["data"]["topicCount"], 1);

        session.stop().await;
    }
}
