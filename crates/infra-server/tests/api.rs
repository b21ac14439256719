use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use infra_core::{AgentConfig, GrafanaWebhookConfig, PlanOutcome, ResourceState};
use infra_report::{MemorySink, Reporter};
use infra_runtime::{Agent, SimulatedCluster};
use infra_server::{AppState, create_router};
use infra_state::MemoryStore;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

struct Harness {
    app: Router,
    sink: Arc<MemorySink>,
    cluster: Arc<SimulatedCluster>,
}

fn harness(grafana: GrafanaWebhookConfig) -> Harness {
    let cluster = Arc::new(SimulatedCluster::new());
    cluster.seed("cache-cluster-1", ResourceState::new().with("scaled_to", 3));
    let sink = Arc::new(MemorySink::new());
    let mut config = AgentConfig::default();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 4;
    let agent = Agent::new(
        &config,
        cluster.registry().unwrap(),
        cluster.clone(),
        Arc::new(MemoryStore::new()),
        Reporter::new(sink.clone()),
    );
    Harness {
        app: create_router(AppState::new(Arc::new(agent), grafana)),
        sink,
        cluster,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Poll the plan until its record carries an outcome.
async fn wait_for_outcome(app: &Router, plan_id: &str) -> Value {
    for _ in 0..200 {
        let (status, record) = send(app, "GET", &format!("/plans/{plan_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        if record.get("outcome").is_some() {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("plan {plan_id} never finished");
}

#[tokio::test]
async fn probes_answer_empty_object() {
    let h = harness(GrafanaWebhookConfig::default());
    for uri in ["/healthz/live", "/healthz/ready"] {
        let (status, body) = send(&h.app, "GET", uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));
    }
}

#[tokio::test]
async fn submitted_intent_runs_in_background() {
    let h = harness(GrafanaWebhookConfig::default());
    let (status, body) = send(
        &h.app,
        "POST",
        "/intents",
        Some(json!({ "target": "cache-cluster-1", "desired": "scaled_to=5" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["nodes"].as_array().unwrap().len(), 2);

    let plan_id = body["plan_id"].as_str().unwrap().to_string();
    let record = wait_for_outcome(&h.app, &plan_id).await;
    assert_eq!(record["outcome"], json!("succeeded"));
    assert_eq!(
        h.cluster.state_of("cache-cluster-1").unwrap().get("scaled_to"),
        Some(&json!(5))
    );
    assert_eq!(h.sink.reports()[0].outcome, PlanOutcome::Succeeded);

    let (status, list) = send(&h.app, "GET", "/plans", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["plans"], json!([plan_id]));
}

#[tokio::test]
async fn unplannable_intent_is_unprocessable() {
    let h = harness(GrafanaWebhookConfig::default());
    let (status, body) = send(
        &h.app,
        "POST",
        "/intents",
        Some(json!({ "target": "cache-cluster-1", "desired": { "region": "eu-west-1" } })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("region"));
}

#[tokio::test]
async fn unknown_plans_are_not_found() {
    let h = harness(GrafanaWebhookConfig::default());
    let id = Uuid::new_v4();
    let (status, _) = send(&h.app, "GET", &format!("/plans/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&h.app, "POST", &format!("/plans/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn actions_lists_registered_definitions() {
    let h = harness(GrafanaWebhookConfig::default());
    let (status, body) = send(&h.app, "GET", "/actions", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"add_node"));
    assert!(names.contains(&"rollout_version"));
}

fn notification() -> Value {
    json!({
        "receiver": "infra-agent",
        "status": "firing",
        "groupKey": "{}:{alertname=\"CacheSaturated\"}",
        "alerts": [
            {
                "status": "firing",
                "labels": { "alertname": "CacheSaturated", "infra_target": "cache-cluster-1" },
                "annotations": { "desired_state": "scaled_to=4" },
                "fingerprint": "5f2c0b7e"
            },
            {
                "status": "resolved",
                "labels": { "infra_target": "cache-cluster-1" },
                "annotations": { "desired_state": "scaled_to=2" },
                "fingerprint": "77aa"
            },
            {
                "status": "firing",
                "labels": { "infra_target": "cache-cluster-1" },
                "annotations": { "desired_state": "scaled_to=-5" },
                "fingerprint": "88bb"
            }
        ]
    })
}

#[tokio::test]
async fn grafana_alerts_become_intents() {
    let h = harness(GrafanaWebhookConfig::default());
    let (status, body) = send(&h.app, "POST", "/webhooks/grafana", Some(notification())).await;
    assert_eq!(status, StatusCode::OK);

    let accepted = body["accepted"].as_array().unwrap();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0]["correlation_id"], json!("5f2c0b7e"));

    let skipped = body["skipped"].as_array().unwrap();
    assert_eq!(skipped.len(), 2);
    assert_eq!(skipped[0]["fingerprint"], json!("77aa"));
    assert_eq!(skipped[1]["fingerprint"], json!("88bb"));

    let plan_id = accepted[0]["plan_id"].as_str().unwrap();
    let record = wait_for_outcome(&h.app, plan_id).await;
    assert_eq!(record["correlation_id"], json!("5f2c0b7e"));
    assert_eq!(record["outcome"], json!("succeeded"));
}

#[tokio::test]
async fn disabled_grafana_webhook_is_not_found() {
    let h = harness(GrafanaWebhookConfig {
        enabled: false,
        ..Default::default()
    });
    let (status, _) = send(&h.app, "POST", "/webhooks/grafana", Some(notification())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
