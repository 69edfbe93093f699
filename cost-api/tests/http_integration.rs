// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! HTTP integration tests for the cost API.
//!
//! These tests use `axum-test` to drive the full HTTP request/response cycle
//! through the Axum router with all middleware applied. STS and every AWS
//! service behind the API are replaced by in-memory fakes that count their
//! calls.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum_test::TestServer;
use cost_api::application::{AppState, create_router};
use cost_api::budgets::{BudgetPlan, BudgetResponse, BudgetService};
use cost_api::configuration::{AccountConfig, CostApiOptions};
use cost_api::credentials::{AssumeRoleInput, RoleExchange};
use cost_api::errors::AppError;
use cost_api::inventory::{InventoryItem, ResourceInventory};
use cost_api::metrics::MetricWidgetRequest;
use cost_api::models::{CostResult, DateInterval, MetricValue, ScopedCredentials};
use cost_api::optimizer::{InstanceOptimizer, InstanceRecommendation, OptimizerQuery};
use cost_api::timewindow::TimeWindow;
use cost_api::upstream::{CostExplorer, CostQuery, MetricWidgets, Upstreams};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;
use serde_json::{Value, json};

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake";

#[derive(Default)]
struct FakeExchange {
    calls: AtomicUsize,
    deny: AtomicBool,
    inputs: Mutex<Vec<AssumeRoleInput>>,
}

#[async_trait]
impl RoleExchange for FakeExchange {
    async fn assume_role(&self, input: AssumeRoleInput) -> Result<ScopedCredentials, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().push(input);
        if self.deny.load(Ordering::SeqCst) {
            return Err(AppError::Forbidden(
                "AccessDenied: not authorized to perform sts:AssumeRole".into(),
            ));
        }
        Ok(ScopedCredentials {
            access_key_id: "ASIAFAKE".into(),
            secret_access_key: "secret".into(),
            session_token: "token".into(),
            region: "us-east-1".into(),
            expiration: None,
            scope: String::new(),
        })
    }
}

#[derive(Default)]
struct FakeCostExplorer {
    calls: AtomicUsize,
    delay_ms: AtomicU64,
    queries: Mutex<Vec<CostQuery>>,
}

#[async_trait]
impl CostExplorer for FakeCostExplorer {
    async fn get_cost_and_usage(
        &self,
        _credentials: &ScopedCredentials,
        query: &CostQuery,
    ) -> Result<Vec<CostResult>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(query.clone());
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(vec![CostResult {
            time_period: Some(DateInterval {
                start: query.window.start_date(),
                end: query.window.end_date(),
            }),
            total: BTreeMap::from([(
                "BLENDED_COST".to_string(),
                MetricValue {
                    amount: Some("42.17".into()),
                    unit: Some("USD".into()),
                },
            )]),
            groups: vec![],
            estimated: true,
        }])
    }
}

#[derive(Default)]
struct FakeMetricWidgets {
    calls: AtomicUsize,
    renders: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl MetricWidgets for FakeMetricWidgets {
    async fn get_metric_widget_image(
        &self,
        _credentials: &ScopedCredentials,
        region: &str,
        request: &MetricWidgetRequest,
    ) -> Result<Bytes, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.renders
            .lock()
            .push((region.to_string(), request.widget()));
        Ok(Bytes::from_static(PNG))
    }
}

#[derive(Default)]
struct FakeBudgets {
    created: Mutex<Vec<BudgetPlan>>,
    deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl BudgetService for FakeBudgets {
    async fn create_budget(
        &self,
        _credentials: &ScopedCredentials,
        plan: &BudgetPlan,
    ) -> Result<(), AppError> {
        let mut created = self.created.lock();
        if created.iter().any(|existing| existing.name == plan.name) {
            return Err(AppError::Conflict(format!("budget {} exists", plan.name)));
        }
        created.push(plan.clone());
        Ok(())
    }

    async fn list_budgets(
        &self,
        _credentials: &ScopedCredentials,
        _account_id: &str,
        prefix: &str,
    ) -> Result<Vec<String>, AppError> {
        Ok(self
            .created
            .lock()
            .iter()
            .filter(|plan| plan.name.starts_with(prefix))
            .map(|plan| plan.name.clone())
            .collect())
    }

    async fn describe_budget(
        &self,
        _credentials: &ScopedCredentials,
        _account_id: &str,
        name: &str,
    ) -> Result<BudgetResponse, AppError> {
        self.created
            .lock()
            .iter()
            .find(|plan| plan.name == name)
            .map(BudgetResponse::from)
            .ok_or_else(|| AppError::NotFound(format!("budget {} not found", name)))
    }

    async fn delete_budget(
        &self,
        _credentials: &ScopedCredentials,
        _account_id: &str,
        name: &str,
    ) -> Result<(), AppError> {
        self.created.lock().retain(|plan| plan.name != name);
        self.deleted.lock().push(name.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct FakeOptimizer {
    calls: AtomicUsize,
    arns: Mutex<Vec<String>>,
}

#[async_trait]
impl InstanceOptimizer for FakeOptimizer {
    async fn get_instance_recommendations(
        &self,
        _credentials: &ScopedCredentials,
        query: &OptimizerQuery,
    ) -> Result<Vec<InstanceRecommendation>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.arns.lock().push(query.instance_arn());
        Ok(vec![InstanceRecommendation {
            instance_arn: Some(query.instance_arn()),
            instance_name: Some("web-1".into()),
            account_id: Some(query.account_id.clone()),
            current_instance_type: Some("m5.large".into()),
            finding: Some("OVER_PROVISIONED".into()),
            finding_reason_codes: vec!["CPUOverprovisioned".into()],
            recommendation_options: vec![],
            last_refresh_timestamp: None,
        }])
    }
}

#[derive(Default)]
struct FakeInventory {
    requests: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ResourceInventory for FakeInventory {
    async fn list_space_resources(
        &self,
        _credentials: &ScopedCredentials,
        region: &str,
        space_id: &str,
    ) -> Result<Vec<InventoryItem>, AppError> {
        self.requests
            .lock()
            .push((region.to_string(), space_id.to_string()));
        Ok(vec![
            InventoryItem::new(
                "arn:aws:ec2:us-west-2:111111111111:instance/i-0abc",
                Some("web-1"),
            ),
            InventoryItem::new("arn:aws:s3:::acme-data", None),
        ])
    }
}

struct Harness {
    server: TestServer,
    exchange: Arc<FakeExchange>,
    cost_explorer: Arc<FakeCostExplorer>,
    metric_widgets: Arc<FakeMetricWidgets>,
    budgets: Arc<FakeBudgets>,
    optimizer: Arc<FakeOptimizer>,
    inventory: Arc<FakeInventory>,
}

/// The process-wide recorder, shared by every test server.
fn prometheus_handle() -> PrometheusHandle {
    static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
    HANDLE
        .get_or_init(|| PrometheusBuilder::new().install_recorder().unwrap())
        .clone()
}

/// Creates a test server with two accounts and fake upstreams.
///
/// The server includes the same middleware as production (timeout, tracing).
fn create_test_server() -> Harness {
    create_test_server_with(|_| {})
}

fn create_test_server_with(configure: impl FnOnce(&mut CostApiOptions)) -> Harness {
    let mut options = CostApiOptions {
        org: "acme".into(),
        accounts: vec![
            "name=prod,role=arn:aws:iam::111111111111:role/SpinupCost,external_id=ext-1,region=us-west-2"
                .parse::<AccountConfig>()
                .unwrap(),
            "name=dev,role=arn:aws:iam::222222222222:role/SpinupCost"
                .parse::<AccountConfig>()
                .unwrap(),
        ],
        policy_arns: vec!["arn:aws:iam::aws:policy/ReadOnlyAccess".into()],
        hashing_token: Some("test-token".into()),
        ..Default::default()
    };
    configure(&mut options);

    let exchange = Arc::new(FakeExchange::default());
    let cost_explorer = Arc::new(FakeCostExplorer::default());
    let metric_widgets = Arc::new(FakeMetricWidgets::default());
    let budgets = Arc::new(FakeBudgets::default());
    let optimizer = Arc::new(FakeOptimizer::default());
    let inventory = Arc::new(FakeInventory::default());

    let upstreams = Upstreams {
        cost_explorer: cost_explorer.clone(),
        metric_widgets: metric_widgets.clone(),
        budgets: budgets.clone(),
        optimizer: optimizer.clone(),
        inventory: inventory.clone(),
    };

    let state = Arc::new(AppState::new(
        options,
        exchange.clone(),
        upstreams,
        prometheus_handle(),
    ));

    Harness {
        server: TestServer::new(create_router(state)).unwrap(),
        exchange,
        cost_explorer,
        metric_widgets,
        budgets,
        optimizer,
        inventory,
    }
}

fn cache_hit(response: &axum_test::TestResponse) -> bool {
    response.headers()["x-cache-hit"] == "true"
}

fn cache_expire_secs(response: &axum_test::TestResponse) -> u64 {
    let value = response.headers()["x-cache-expire"].to_str().unwrap();
    value.strip_suffix('s').unwrap().parse().unwrap()
}

// =============================================================================
// Ping and version
// =============================================================================

#[tokio::test]
async fn test_ping_endpoints_return_pong() {
    let harness = create_test_server();
    for path in ["/v1/cost/ping", "/v1/metrics/ping", "/v1/inventory/ping"] {
        let response = harness.server.get(path).await;
        response.assert_status_ok();
        response.assert_text("pong");
    }
}

#[tokio::test]
async fn test_version_endpoint() {
    let harness = create_test_server();
    let response = harness.server.get("/v1/cost/version").await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let harness = create_test_server();
    let response = harness.server.get("/v1/budgets").await;
    response.assert_status_not_found();
}

// =============================================================================
// Space cost
// =============================================================================

#[tokio::test]
async fn test_space_cost_is_cached() {
    let harness = create_test_server();

    let first = harness.server.get("/v1/cost/prod/spaces/abc123").await;
    first.assert_status_ok();
    assert!(!cache_hit(&first));
    assert!(first.headers().get("x-cache-expire").is_none());

    let body: Value = first.json();
    assert_eq!(body[0]["Total"]["BLENDED_COST"]["Amount"], "42.17");
    assert_eq!(body[0]["Estimated"], true);

    let second = harness.server.get("/v1/cost/prod/spaces/abc123").await;
    second.assert_status_ok();
    assert!(cache_hit(&second));
    let remaining = cache_expire_secs(&second);
    assert!(remaining > 0 && remaining <= 4 * 60 * 60, "{remaining}");
    assert_eq!(second.json::<Value>(), body);

    assert_eq!(harness.cost_explorer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.exchange.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_space_cost_defaults_to_month_to_date() {
    let harness = create_test_server();

    harness
        .server
        .get("/v1/cost/prod/spaces/abc123")
        .await
        .assert_status_ok();

    let queries = harness.cost_explorer.queries.lock();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].org, "acme");
    assert_eq!(queries[0].space_id, "abc123");
    assert_eq!(queries[0].resource_name, None);
    assert_eq!(queries[0].window, TimeWindow::resolve(None, None).unwrap());
}

#[tokio::test]
async fn test_space_cost_uses_account_role_and_policies() {
    let harness = create_test_server();

    harness
        .server
        .get("/v1/cost/prod/spaces/abc123")
        .await
        .assert_status_ok();

    let inputs = harness.exchange.inputs.lock();
    assert_eq!(inputs[0].role_arn, "arn:aws:iam::111111111111:role/SpinupCost");
    assert_eq!(inputs[0].external_id.as_deref(), Some("ext-1"));
    assert_eq!(
        inputs[0].policy_arns,
        vec!["arn:aws:iam::aws:policy/ReadOnlyAccess".to_string()]
    );
    assert_eq!(inputs[0].tags, vec![("spinup:org".to_string(), "acme".to_string())]);
    assert!(inputs[0].session_name.starts_with("spinup-acme-cost-api-"));
}

#[tokio::test]
async fn test_equivalent_dates_share_a_cache_entry() {
    let harness = create_test_server();

    let first = harness
        .server
        .get("/v1/cost/prod/spaces/abc123?start=2021-2-1&end=2021-02-09")
        .await;
    first.assert_status_ok();
    assert!(!cache_hit(&first));

    let second = harness
        .server
        .get("/v1/cost/prod/spaces/abc123?start=2021-02-01&end=2021-02-09")
        .await;
    second.assert_status_ok();
    assert!(cache_hit(&second));

    let body: Value = second.json();
    assert_eq!(
        body[0]["TimePeriod"],
        json!({"Start": "2021-02-01", "End": "2021-02-09"})
    );
    assert_eq!(harness.cost_explorer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_group_by_is_part_of_the_cache_key() {
    let harness = create_test_server();

    for path in [
        "/v1/cost/prod/spaces/abc123",
        "/v1/cost/prod/spaces/abc123?groupby=SERVICE",
        "/v1/cost/prod/spaces/abc123?groupby=RESOURCE_NAME",
    ] {
        let response = harness.server.get(path).await;
        response.assert_status_ok();
        assert!(!cache_hit(&response), "{path}");
    }

    assert_eq!(harness.cost_explorer.calls.load(Ordering::SeqCst), 3);
    // the role session is shared across all three reports
    assert_eq!(harness.exchange.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_accounts_do_not_share_results() {
    let harness = create_test_server();

    harness
        .server
        .get("/v1/cost/prod/spaces/abc123")
        .await
        .assert_status_ok();
    let dev = harness.server.get("/v1/cost/dev/spaces/abc123").await;
    dev.assert_status_ok();
    assert!(!cache_hit(&dev));

    assert_eq!(harness.cost_explorer.calls.load(Ordering::SeqCst), 2);
    assert_eq!(harness.exchange.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unknown_account_returns_404() {
    let harness = create_test_server();

    let response = harness.server.get("/v1/cost/stage/spaces/abc123").await;
    response.assert_status_not_found();
    let json: Value = response.json();
    assert_eq!(json["code"], 404);

    assert_eq!(harness.exchange.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.cost_explorer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_bad_dates_return_400() {
    let harness = create_test_server();

    for (query, fragment) in [
        ("start=bad-date&end=2021-02-01", "start"),
        ("start=2021-02-01&end=2021-13-01", "end"),
        ("start=2021-02-10&end=2021-02-01", "end must be after start"),
        ("start=2021-02-10&end=2021-02-10", "end must be after start"),
        ("start=2021-02-10", "end"),
    ] {
        let response = harness
            .server
            .get(&format!("/v1/cost/prod/spaces/abc123?{query}"))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let json: Value = response.json();
        assert!(
            json["message"].as_str().unwrap().contains(fragment),
            "{query}: {json}"
        );
    }

    assert_eq!(harness.cost_explorer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_group_by_returns_400() {
    let harness = create_test_server();
    let response = harness
        .server
        .get("/v1/cost/prod/spaces/abc123?groupby=NOT_A_DIMENSION")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_forbidden_is_generic_and_not_cached() {
    let harness = create_test_server();
    harness.exchange.deny.store(true, Ordering::SeqCst);

    let response = harness.server.get("/v1/cost/prod/spaces/abc123").await;
    response.assert_status(StatusCode::FORBIDDEN);
    response.assert_json(&json!({"code": 403, "message": "Access denied"}));

    harness.exchange.deny.store(false, Ordering::SeqCst);

    let retry = harness.server.get("/v1/cost/prod/spaces/abc123").await;
    retry.assert_status_ok();
    assert!(!cache_hit(&retry));
    assert_eq!(harness.exchange.calls.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Resource cost
// =============================================================================

#[tokio::test]
async fn test_resource_cost_filters_by_name() {
    let harness = create_test_server();

    let response = harness
        .server
        .get("/v1/cost/prod/spaces/abc123/resources/web-1?start=2021-03-01&end=2021-03-05")
        .await;
    response.assert_status_ok();

    let queries = harness.cost_explorer.queries.lock();
    assert_eq!(queries[0].resource_name.as_deref(), Some("web-1"));
    assert_eq!(queries[0].window.start_date(), "2021-03-01");
}

#[tokio::test]
async fn test_resource_and_space_cost_are_cached_separately() {
    let harness = create_test_server();

    harness
        .server
        .get("/v1/cost/prod/spaces/abc123")
        .await
        .assert_status_ok();
    let resource = harness
        .server
        .get("/v1/cost/prod/spaces/abc123/resources/web-1")
        .await;
    resource.assert_status_ok();
    assert!(!cache_hit(&resource));
}

// =============================================================================
// Metric graphs
// =============================================================================

#[tokio::test]
async fn test_instance_graph_is_cached() {
    let harness = create_test_server();

    let first = harness
        .server
        .get("/v1/metrics/prod/instances/i-0123456789/graph?metric=CPUUtilization&metric=NetworkIn")
        .await;
    first.assert_status_ok();
    assert_eq!(first.headers()["content-type"], "image/png");
    assert_eq!(first.as_bytes().as_ref(), PNG);
    assert!(!cache_hit(&first));

    // same metrics in a different order
    let second = harness
        .server
        .get("/v1/metrics/prod/instances/i-0123456789/graph?metric=NetworkIn&metric=CPUUtilization")
        .await;
    second.assert_status_ok();
    assert!(cache_hit(&second));
    assert!(cache_expire_secs(&second) > 0);
    assert_eq!(second.as_bytes().as_ref(), PNG);

    assert_eq!(harness.metric_widgets.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_instance_graph_renders_in_account_region() {
    let harness = create_test_server();

    harness
        .server
        .get("/v1/metrics/prod/instances/i-1/graph?metric=CPUUtilization&period=5m&height=300")
        .await
        .assert_status_ok();
    harness
        .server
        .get("/v1/metrics/dev/instances/i-1/graph?metric=CPUUtilization")
        .await
        .assert_status_ok();

    let renders = harness.metric_widgets.renders.lock();
    assert_eq!(renders[0].0, "us-west-2");
    assert_eq!(renders[0].1["period"], 300);
    assert_eq!(renders[0].1["height"], 300);
    assert_eq!(renders[0].1["width"], 600);
    assert_eq!(
        renders[0].1["metrics"],
        json!([["AWS/EC2", "CPUUtilization", "InstanceId", "i-1"]])
    );
    assert_eq!(renders[1].0, "us-east-1");
}

#[tokio::test]
async fn test_render_options_change_the_cache_key() {
    let harness = create_test_server();

    for query in [
        "metric=CPUUtilization",
        "metric=CPUUtilization&width=601",
        "metric=CPUUtilization&stat=Maximum",
        "metric=CPUUtilization&start=-PT3H",
    ] {
        let response = harness
            .server
            .get(&format!("/v1/metrics/prod/instances/i-1/graph?{query}"))
            .await;
        response.assert_status_ok();
        assert!(!cache_hit(&response), "{query}");
    }

    assert_eq!(harness.metric_widgets.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_graph_requires_a_metric() {
    let harness = create_test_server();
    let response = harness
        .server
        .get("/v1/metrics/prod/instances/i-1/graph")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(harness.metric_widgets.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_graph_dimensions_are_bounded() {
    let harness = create_test_server();
    let response = harness
        .server
        .get("/v1/metrics/prod/instances/i-1/graph?metric=CPUUtilization&height=-100")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_json(&json!({
        "code": 400,
        "message": "invalid height -100, value must be >=1 and <= 2000"
    }));
}

#[tokio::test]
async fn test_graph_rejects_bad_period() {
    let harness = create_test_server();
    let response = harness
        .server
        .get("/v1/metrics/prod/instances/i-1/graph?metric=CPUUtilization&period=true")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_service_graph() {
    let harness = create_test_server();
    harness
        .server
        .get("/v1/metrics/prod/clusters/c1/services/s1/graph?metric=CPUUtilization")
        .await
        .assert_status_ok();

    let renders = harness.metric_widgets.renders.lock();
    assert_eq!(
        renders[0].1["metrics"][0],
        json!(["AWS/ECS", "CPUUtilization", "ClusterName", "c1", "ServiceName", "s1"])
    );
}

#[tokio::test]
async fn test_bucket_graph_only_accepts_storage_metrics() {
    let harness = create_test_server();

    harness
        .server
        .get("/v1/metrics/prod/buckets/my-bucket/graph?metric=BucketSizeBytes")
        .await
        .assert_status_ok();

    let response = harness
        .server
        .get("/v1/metrics/prod/buckets/my-bucket/graph?metric=CPUUtilization")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rds_graph() {
    let harness = create_test_server();

    harness
        .server
        .get("/v1/metrics/prod/rds/cluster/db-1/graph?metric=CPUUtilization")
        .await
        .assert_status_ok();
    harness
        .server
        .get("/v1/metrics/prod/rds/instance/db-1/graph?metric=CPUUtilization")
        .await
        .assert_status_ok();

    let response = harness
        .server
        .get("/v1/metrics/prod/rds/aurora/db-1/graph?metric=CPUUtilization")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let renders = harness.metric_widgets.renders.lock();
    assert_eq!(renders.len(), 2);
    assert_eq!(renders[0].1["metrics"][0][2], "DBClusterIdentifier");
    assert_eq!(renders[1].1["metrics"][0][2], "DBInstanceIdentifier");
}

#[tokio::test]
async fn test_datasync_graph() {
    let harness = create_test_server();
    let response = harness
        .server
        .get("/v1/metrics/prod/datasync/task-0abc/graph?metric=BytesTransferred")
        .await;
    response.assert_status_ok();
    assert_eq!(response.headers()["content-type"], "image/png");
}

#[tokio::test]
async fn test_graph_for_unknown_account_returns_404() {
    let harness = create_test_server();
    let response = harness
        .server
        .get("/v1/metrics/stage/instances/i-1/graph?metric=CPUUtilization")
        .await;
    response.assert_status_not_found();
    assert_eq!(harness.exchange.calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Request timeout
// =============================================================================

#[tokio::test]
async fn test_slow_upstream_times_out_and_is_not_cached() {
    let harness = create_test_server_with(|options| {
        options.request_timeout = Duration::from_millis(50);
    });
    harness.cost_explorer.delay_ms.store(200, Ordering::SeqCst);

    let response = harness.server.get("/v1/cost/prod/spaces/abc123").await;
    response.assert_status(StatusCode::REQUEST_TIMEOUT);

    harness.cost_explorer.delay_ms.store(0, Ordering::SeqCst);

    let retry = harness.server.get("/v1/cost/prod/spaces/abc123").await;
    retry.assert_status_ok();
    assert!(!cache_hit(&retry));
    assert_eq!(harness.cost_explorer.calls.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Budgets
// =============================================================================

fn budget_request() -> Value {
    json!({
        "Amount": "100",
        "TimeUnit": "MONTHLY",
        "Alerts": [{
            "Addresses": ["owner@example.edu"],
            "ComparisonOperator": "GREATER_THAN",
            "NotificationType": "ACTUAL",
            "Threshold": 80,
            "ThresholdType": "PERCENTAGE"
        }]
    })
}

#[tokio::test]
async fn test_create_budget() {
    let harness = create_test_server();

    let response = harness
        .server
        .post("/v1/cost/prod/spaces/space-1/budgets")
        .json(&budget_request())
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["Name"], "spinup_acme_space-1_MONTHLY-01");
    assert_eq!(body["Amount"], "100");
    assert_eq!(body["Alerts"][0]["Addresses"][0], "owner@example.edu");

    let created = harness.budgets.created.lock();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].account_id, "111111111111");
    assert_eq!(created[0].space_filter, "user:spinup:spaceid$space-1");
    assert_eq!(
        created[0].topic.arn,
        "arn:aws:sns:us-east-1:111111111111:budgets-spinup_acme_space-1_MONTHLY-01"
    );
}

#[tokio::test]
async fn test_budget_session_uses_inline_policy() {
    let harness = create_test_server();

    harness
        .server
        .post("/v1/cost/prod/spaces/space-1/budgets")
        .json(&budget_request())
        .await
        .assert_status_ok();

    let inputs = harness.exchange.inputs.lock();
    let policy: Value = serde_json::from_str(inputs[0].policy.as_deref().unwrap()).unwrap();
    let actions = policy["Statement"][0]["Action"].as_array().unwrap();
    assert!(actions.contains(&json!("budgets:ModifyBudget")));
    assert!(actions.contains(&json!("SNS:CreateTopic")));
    assert!(inputs[0].policy_arns.is_empty());
}

#[tokio::test]
async fn test_duplicate_budget_returns_409() {
    let harness = create_test_server();
    let path = "/v1/cost/prod/spaces/space-1/budgets";

    harness
        .server
        .post(path)
        .json(&budget_request())
        .await
        .assert_status_ok();

    let response = harness.server.post(path).json(&budget_request()).await;
    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_create_budget_rejects_bad_bodies() {
    let harness = create_test_server();
    let path = "/v1/cost/prod/spaces/space-1/budgets";

    let response = harness.server.post(path).text("{not json").await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let mut no_alerts = budget_request();
    no_alerts["Alerts"] = json!([]);
    let response = harness.server.post(path).json(&no_alerts).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], 400);

    let mut bad_unit = budget_request();
    bad_unit["TimeUnit"] = json!("WEEKLY");
    let response = harness.server.post(path).json(&bad_unit).await;
    response.assert_status(StatusCode::BAD_REQUEST);

    assert!(harness.budgets.created.lock().is_empty());
    assert_eq!(harness.exchange.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_list_and_show_budgets() {
    let harness = create_test_server();

    for space in ["space-1", "space-10"] {
        harness
            .server
            .post(&format!("/v1/cost/prod/spaces/{space}/budgets"))
            .json(&budget_request())
            .await
            .assert_status_ok();
    }

    let response = harness.server.get("/v1/cost/prod/spaces/space-1/budgets").await;
    response.assert_status_ok();
    response.assert_json(&json!(["spinup_acme_space-1_MONTHLY-01"]));

    let response = harness
        .server
        .get("/v1/cost/prod/spaces/space-1/budgets/spinup_acme_space-1_MONTHLY-01")
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["TimeUnit"], "MONTHLY");
}

#[tokio::test]
async fn test_budget_from_another_space_returns_400() {
    let harness = create_test_server();

    let response = harness
        .server
        .get("/v1/cost/prod/spaces/space-1/budgets/spinup_acme_space-2_MONTHLY-01")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let response = harness
        .server
        .delete("/v1/cost/prod/spaces/space-1/budgets/spinup_acme_space-2_MONTHLY-01")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    assert!(harness.budgets.deleted.lock().is_empty());
    assert_eq!(harness.exchange.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_delete_budget() {
    let harness = create_test_server();

    harness
        .server
        .post("/v1/cost/prod/spaces/space-1/budgets")
        .json(&budget_request())
        .await
        .assert_status_ok();

    let response = harness
        .server
        .delete("/v1/cost/prod/spaces/space-1/budgets/spinup_acme_space-1_MONTHLY-01")
        .await;
    response.assert_status_ok();
    response.assert_text("OK");

    assert_eq!(
        *harness.budgets.deleted.lock(),
        vec!["spinup_acme_space-1_MONTHLY-01".to_string()]
    );

    let response = harness
        .server
        .get("/v1/cost/prod/spaces/space-1/budgets/spinup_acme_space-1_MONTHLY-01")
        .await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn test_budgets_for_unknown_account_return_404() {
    let harness = create_test_server();
    let response = harness
        .server
        .get("/v1/cost/stage/spaces/space-1/budgets")
        .await;
    response.assert_status_not_found();
}

// =============================================================================
// Instance optimizer
// =============================================================================

#[tokio::test]
async fn test_instance_optimizer_is_cached() {
    let harness = create_test_server();
    let path = "/v1/cost/prod/spaces/space-1/instances/i-0abc/optimizer";

    let first = harness.server.get(path).await;
    first.assert_status_ok();
    assert!(!cache_hit(&first));
    let body: Value = first.json();
    assert_eq!(body[0]["CurrentInstanceType"], "m5.large");
    assert_eq!(body[0]["Finding"], "OVER_PROVISIONED");

    let second = harness.server.get(path).await;
    second.assert_status_ok();
    assert!(cache_hit(&second));
    assert!(cache_expire_secs(&second) > 0);

    assert_eq!(harness.optimizer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        *harness.optimizer.arns.lock(),
        vec!["arn:aws:ec2:us-west-2:111111111111:instance/i-0abc".to_string()]
    );
}

#[tokio::test]
async fn test_instance_optimizer_session_uses_managed_policy() {
    let harness = create_test_server();

    harness
        .server
        .get("/v1/cost/dev/spaces/space-1/instances/i-0abc/optimizer")
        .await
        .assert_status_ok();

    let inputs = harness.exchange.inputs.lock();
    assert_eq!(
        inputs[0].policy_arns,
        vec!["arn:aws:iam::aws:policy/ComputeOptimizerReadOnlyAccess".to_string()]
    );
    assert_eq!(inputs[0].policy, None);
}

// =============================================================================
// Inventory
// =============================================================================

#[tokio::test]
async fn test_space_inventory() {
    let harness = create_test_server();

    let response = harness.server.get("/v1/inventory/prod/spaces/space-1").await;
    response.assert_status_ok();
    assert_eq!(response.headers()["x-items"], "2");

    let body: Value = response.json();
    assert_eq!(body[0]["name"], "web-1");
    assert_eq!(body[0]["service"], "ec2");
    assert_eq!(body[0]["resource"], "instance/i-0abc");
    assert_eq!(body[1]["resource"], "acme-data");

    assert_eq!(
        *harness.inventory.requests.lock(),
        vec![("us-west-2".to_string(), "space-1".to_string())]
    );
    let inputs = harness.exchange.inputs.lock();
    assert_eq!(
        inputs[0].policy_arns,
        vec!["arn:aws:iam::aws:policy/AWSResourceGroupsReadOnlyAccess".to_string()]
    );
}

#[tokio::test]
async fn test_inventory_for_unknown_account_returns_404() {
    let harness = create_test_server();
    let response = harness.server.get("/v1/inventory/stage/spaces/space-1").await;
    response.assert_status_not_found();
    assert!(harness.inventory.requests.lock().is_empty());
}

// =============================================================================
// Prometheus metrics
// =============================================================================

#[tokio::test]
async fn test_metrics_endpoints_render_prometheus_text() {
    let harness = create_test_server();

    harness
        .server
        .get("/v1/cost/dev/spaces/abc123")
        .await
        .assert_status_ok();

    for path in ["/v1/cost/metrics", "/v1/metrics/metrics", "/v1/inventory/metrics"] {
        let response = harness.server.get(path).await;
        response.assert_status_ok();
        assert!(
            response.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
        let text = response.text();
        assert!(text.contains("cost_api_result_cache_total"), "{path}");
        assert!(text.contains("cost_api_role_sessions_total"), "{path}");
    }
}
