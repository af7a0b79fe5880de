//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - HTTP → Ingestion → Dispatcher → Broker 端到端场景（内存 / 文件 broker）
//! - 熔断器探测行为

#[cfg(test)]
mod contract_tests {
    use chrono::Utc;
    use contracts::{CircuitState, DispatchEnvelope, DispatchStatus, WebhookEvent};

    #[test]
    fn test_contracts_compile() {
        // 验证 contracts crate 可编译
        let _ = contracts::ConfigVersion::V1;
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_value(CircuitState::HalfOpen).unwrap(),
            "half_open"
        );
        assert_eq!(
            serde_json::to_value(DispatchStatus::DeadLettered).unwrap(),
            "dead_lettered"
        );

        let env = DispatchEnvelope::new(WebhookEvent::new("c", "o", Utc::now()));
        let value = serde_json::to_value(&env).unwrap();
        for key in [
            "correlationId",
            "payload",
            "status",
            "attemptCount",
            "firstAttemptAt",
            "lastAttemptAt",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert!(value["payload"].get("receivedAt").is_some());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{Broker, BrokerErrorKind, CircuitState, DispatchConfig, DispatchStatus};
    use dispatcher::{
        create_dispatcher, DeadLetterReason, Dispatcher, DispatcherBuilder, MemoryBroker,
    };
    use http_body_util::BodyExt;
    use ingestion::{build_router, IngestionConfig, IngestionWorker};
    use serde_json::Value;
    use tower::ServiceExt;

    const TOPIC: &str = "webhooks";
    const DLQ: &str = "webhooks.dlq";
    const COOLDOWN_MS: u64 = 5_000;
    const VALID: &str = r#"{"clientId":"acme","opportunity":"deal-42"}"#;

    struct Harness {
        broker: MemoryBroker,
        dispatcher: Dispatcher<MemoryBroker>,
        router: Router,
    }

    fn dispatch_config(max_attempts: u32, threshold: u32) -> DispatchConfig {
        DispatchConfig {
            max_attempts,
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
            backoff_jitter: false,
            circuit_breaker_threshold: threshold,
            circuit_breaker_cooldown_ms: COOLDOWN_MS,
            broker_send_timeout_ms: 500,
            topic: TOPIC.into(),
            dead_letter_topic: DLQ.into(),
        }
    }

    fn harness(max_attempts: u32, threshold: u32) -> Harness {
        let broker = MemoryBroker::new("memory");
        let dispatcher = DispatcherBuilder::new(dispatch_config(max_attempts, threshold), broker.clone())
            .pool_size(4)
            .build()
            .unwrap();
        let worker = IngestionWorker::new(Arc::new(dispatcher.clone()));
        let router = build_router(worker, &IngestionConfig::default());
        Harness {
            broker,
            dispatcher,
            router,
        }
    }

    async fn post(router: &Router, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(router, request).await
    }

    async fn health(router: &Router) -> (StatusCode, Value) {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        send(router, request).await
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    /// Wait until every dispatch task has finished
    async fn settle<B: Broker + Sync + 'static>(dispatcher: &Dispatcher<B>) {
        while !dispatcher.in_flight().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Scenario A: healthy broker → 202 + one message keyed by that id
    #[tokio::test(start_paused = true)]
    async fn test_healthy_broker_delivers_once() {
        let h = harness(3, 5);

        let (status, body) = post(&h.router, VALID).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "accepted");
        let id = body["correlationId"].as_str().unwrap().to_string();

        settle(&h.dispatcher).await;
        let messages = h.broker.messages(TOPIC);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key.to_string(), id);

        let value: Value = serde_json::from_slice(&messages[0].value).unwrap();
        assert_eq!(value["correlationId"], id);
        assert_eq!(value["payload"]["clientId"], "acme");
        assert_eq!(value["payload"]["opportunity"], "deal-42");
        assert_eq!(value["attemptCount"], 1);
        assert_eq!(h.broker.send_count(), 1);
    }

    /// Scenario B: 3 transient failures then success → Delivered after 4 attempts
    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_delivery() {
        let h = harness(5, 10);
        h.broker.fail_next(3, BrokerErrorKind::Transient);

        let (status, body) = post(&h.router, VALID).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        settle(&h.dispatcher).await;
        let messages = h.broker.messages(TOPIC);
        assert_eq!(messages.len(), 1);
        let value: Value = serde_json::from_slice(&messages[0].value).unwrap();
        assert_eq!(value["correlationId"], body["correlationId"]);
        assert_eq!(value["attemptCount"], 4);

        let metrics = h.dispatcher.metrics();
        assert_eq!(metrics.attempts, 4);
        assert_eq!(metrics.delivered, 1);
        assert_eq!(metrics.dead_lettered, 0);
        assert_eq!(h.broker.send_count(), 4);
    }

    /// Scenario C: always failing, max_attempts = 3 → one dead letter after 3 attempts
    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_dead_letter() {
        let h = harness(3, 100);
        h.broker.fail_next(3, BrokerErrorKind::Transient);
        let mut dead_letters = h.dispatcher.subscribe_dead_letters();

        let (status, body) = post(&h.router, VALID).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        settle(&h.dispatcher).await;
        let record = dead_letters.recv().await.unwrap();
        assert_eq!(
            record.envelope.correlation_id().to_string(),
            body["correlationId"].as_str().unwrap()
        );
        assert_eq!(record.envelope.status(), DispatchStatus::DeadLettered);
        assert_eq!(record.envelope.attempt_count(), 3);
        assert!(matches!(record.reason, DeadLetterReason::RetriesExhausted { .. }));
        assert!(dead_letters.try_recv().is_err());

        assert_eq!(h.broker.message_count(TOPIC), 0);
        let dlq = h.broker.messages(DLQ);
        assert_eq!(dlq.len(), 1);
        let published: Value = serde_json::from_slice(&dlq[0].value).unwrap();
        assert_eq!(published["reason"]["kind"], "retriesExhausted");
        assert_eq!(published["envelope"]["attemptCount"], 3);
    }

    /// Scenario D: missing clientId → 400 InvalidPayload, zero broker calls
    #[tokio::test(start_paused = true)]
    async fn test_invalid_payload_never_reaches_broker() {
        let h = harness(3, 5);

        for body in [
            r#"{"opportunity":"deal-42"}"#,
            r#"{"clientId":"","opportunity":"deal-42"}"#,
            r#"{"clientId":"acme"}"#,
            "not json",
        ] {
            let (status, response) = post(&h.router, body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {body:?}");
            assert_eq!(response["error"], "InvalidPayload");
            assert!(response["detail"].as_str().is_some_and(|d| !d.is_empty()));
        }

        assert_eq!(h.dispatcher.metrics().submitted, 0);
        assert_eq!(h.broker.send_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_fails_fast_then_single_probe() {
        let h = harness(1, 2);
        h.broker.always_fail(Some(BrokerErrorKind::Transient));

        for _ in 0..2 {
            let (status, _) = post(&h.router, VALID).await;
            assert_eq!(status, StatusCode::ACCEPTED);
        }
        settle(&h.dispatcher).await;
        assert_eq!(h.dispatcher.circuit_state(), CircuitState::Open);

        let sends = h.broker.send_count();
        let (status, body) = post(&h.router, VALID).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, serde_json::json!({ "error": "CircuitOpen" }));
        assert_eq!(h.broker.send_count(), sends);

        let (status, body) = health(&h.router).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["circuit"], "open");

        tokio::time::sleep(Duration::from_millis(COOLDOWN_MS)).await;
        let (status, body) = health(&h.router).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["circuit"], "half_open");

        h.broker.always_fail(None);
        let (status, _) = post(&h.router, VALID).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        settle(&h.dispatcher).await;

        assert_eq!(h.broker.send_count(), sends + 1);
        assert_eq!(h.broker.message_count(TOPIC), 1);
        assert_eq!(h.dispatcher.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_correlation_ids_are_unique_and_used_as_keys() {
        let h = harness(3, 5);

        let mut ids = HashSet::new();
        for _ in 0..50 {
            let (status, body) = post(&h.router, VALID).await;
            assert_eq!(status, StatusCode::ACCEPTED);
            ids.insert(body["correlationId"].as_str().unwrap().to_string());
        }
        assert_eq!(ids.len(), 50);

        settle(&h.dispatcher).await;
        let keys: HashSet<_> = h
            .broker
            .messages(TOPIC)
            .iter()
            .map(|m| {
                let value: Value = serde_json::from_slice(&m.value).unwrap();
                assert_eq!(value["correlationId"], m.key.to_string());
                m.key.to_string()
            })
            .collect();
        assert_eq!(keys, ids);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_refuses_new_webhooks() {
        let h = harness(3, 5);
        let (status, _) = post(&h.router, VALID).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let report = h.dispatcher.shutdown(Duration::from_secs(1)).await;
        assert!(report.drained);
        assert_eq!(report.metrics.delivered, 1);

        let (status, body) = post(&h.router, VALID).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "ShuttingDown");
    }

    #[tokio::test]
    async fn test_file_backend_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let toml = format!(
            r#"
[dispatch]
max_attempts = 3
backoff_base_ms = 10
backoff_max_ms = 100
circuit_breaker_threshold = 5
circuit_breaker_cooldown_ms = 1000
broker_send_timeout_ms = 1000
topic = "{TOPIC}"
dead_letter_topic = "{DLQ}"

[broker]
backend = "file"
pool_size = 2

[broker.params]
base_path = "{}"
"#,
            dir.path().display()
        );
        let config = ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap();
        let dispatcher = create_dispatcher(&config).unwrap();
        let worker = IngestionWorker::new(Arc::new(dispatcher.clone()));
        let router = build_router(worker, &IngestionConfig::from(&config.server));

        let (status, body) = post(&router, VALID).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let report = dispatcher.shutdown(Duration::from_secs(5)).await;
        assert!(report.drained);

        let content = std::fs::read_to_string(dir.path().join(format!("{TOPIC}.jsonl"))).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["key"], body["correlationId"]);
        assert_eq!(lines[0]["value"]["payload"]["clientId"], "acme");
    }
}
