// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! HTTP route handlers for the cost, metrics and inventory API.
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | GET | `/v1/{cost,metrics,inventory}/ping` | [`ping`] |
//! | GET | `/v1/{cost,metrics,inventory}/version` | [`version`] |
//! | GET | `/v1/{cost,metrics,inventory}/metrics` | [`prometheus`] |
//! | GET | `/v1/cost/{account}/spaces/{space}` | [`space_cost`] |
//! | GET | `/v1/cost/{account}/spaces/{space}/resources/{name}` | [`resource_cost`] |
//! | POST | `/v1/cost/{account}/spaces/{space}/budgets` | [`create_budget`] |
//! | GET | `/v1/cost/{account}/spaces/{space}/budgets` | [`list_budgets`] |
//! | GET | `/v1/cost/{account}/spaces/{space}/budgets/{budget}` | [`show_budget`] |
//! | DELETE | `/v1/cost/{account}/spaces/{space}/budgets/{budget}` | [`delete_budget`] |
//! | GET | `/v1/cost/{account}/spaces/{space}/instances/{id}/optimizer` | [`instance_optimizer`] |
//! | GET | `/v1/metrics/{account}/instances/{id}/graph` | [`instance_graph`] |
//! | GET | `/v1/metrics/{account}/clusters/{cluster}/services/{service}/graph` | [`service_graph`] |
//! | GET | `/v1/metrics/{account}/buckets/{bucket}/graph` | [`bucket_graph`] |
//! | GET | `/v1/metrics/{account}/rds/{type}/{id}/graph` | [`rds_graph`] |
//! | GET | `/v1/metrics/{account}/datasync/{id}/graph` | [`datasync_graph`] |
//! | GET | `/v1/inventory/{account}/spaces/{space}` | [`space_inventory`] |
//!
//! Cost, optimizer and graph responses carry `X-Cache-Hit`, and cache hits
//! also carry `X-Cache-Expire` with the entry's remaining lifetime in
//! seconds. Budgets and inventories are always read live.

use std::sync::Arc;

use crate::application::AppState;
use crate::budgets::{BudgetCreateRequest, BudgetResponse, budget_prefix, check_ownership};
use crate::constants::{
    BUDGET_SESSION_POLICY, COMPUTE_OPTIMIZER_POLICY_ARN, RESOURCE_GROUPS_POLICY_ARN,
};
use crate::errors::AppError;
use crate::metrics::{MetricQuery, MetricTarget, MetricWidgetRequest, RdsKind, validate_identifier};
use crate::models::{CostQueryParams, CostResult, GroupBy, ScopedCredentials, VersionResponse};
use crate::optimizer::{InstanceRecommendation, OptimizerQuery};
use crate::results::{CacheStatus, get_or_fetch};
use crate::timewindow::TimeWindow;
use crate::upstream::CostQuery;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, RawQuery, State};
use axum::http::StatusCode;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use validator::Validate;

pub const X_CACHE_HIT: HeaderName = HeaderName::from_static("x-cache-hit");
pub const X_CACHE_EXPIRE: HeaderName = HeaderName::from_static("x-cache-expire");
pub const X_ITEMS: HeaderName = HeaderName::from_static("x-items");

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub async fn ping() -> &'static str {
    "pong"
}

pub async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        githash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        buildstamp: option_env!("BUILD_STAMP").unwrap_or("unknown").to_string(),
    })
}

/// Prometheus exposition of the process metrics.
pub async fn prometheus(State(state): State<Arc<AppState>>) -> Response {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.metrics.render(),
    )
        .into_response()
}

/// Cost and usage for every resource in a space.
///
/// Without `start`/`end` the report covers the current month to date.
#[tracing::instrument(skip(state))]
pub async fn space_cost(
    State(state): State<Arc<AppState>>,
    Path((account, space)): Path<(String, String)>,
    Query(params): Query<CostQueryParams>,
) -> Result<Response, AppError> {
    validate_identifier("space", &space)?;
    let query = cost_query(&state, space, None, &params)?;
    cost_response(&state, &account, query).await
}

/// Cost and usage for a single resource, matched by its `Name` tag.
#[tracing::instrument(skip(state))]
pub async fn resource_cost(
    State(state): State<Arc<AppState>>,
    Path((account, space, name)): Path<(String, String, String)>,
    Query(params): Query<CostQueryParams>,
) -> Result<Response, AppError> {
    validate_identifier("space", &space)?;
    validate_identifier("resource name", &name)?;
    let query = cost_query(&state, space, Some(name), &params)?;
    cost_response(&state, &account, query).await
}

/// Creates the space's budget for the requested time unit, along with an SNS
/// topic that relays its alerts.
#[tracing::instrument(skip(state, body))]
pub async fn create_budget(
    State(state): State<Arc<AppState>>,
    Path((account, space)): Path<(String, String)>,
    body: Bytes,
) -> Result<Response, AppError> {
    validate_identifier("space", &space)?;

    let request: BudgetCreateRequest = serde_json::from_slice(&body).map_err(|e| {
        tracing::error!("[cost-api] failed to parse budget request: {}", e);
        AppError::BadRequest(format!("invalid budget request: {}", e))
    })?;

    let account_id = state.account_id(&account)?;
    let plan = request.plan(&state.options.org, account_id, &space)?;

    let credentials = budget_credentials(&state, &account).await?;
    state
        .upstreams
        .budgets
        .create_budget(&credentials, &plan)
        .await?;

    tracing::info!("[cost-api] created budget {}", plan.name);

    Ok(Json(BudgetResponse::from(&plan)).into_response())
}

/// Names of the budgets that belong to a space.
#[tracing::instrument(skip(state))]
pub async fn list_budgets(
    State(state): State<Arc<AppState>>,
    Path((account, space)): Path<(String, String)>,
) -> Result<Response, AppError> {
    validate_identifier("space", &space)?;
    let account_id = state.account_id(&account)?;

    let credentials = budget_credentials(&state, &account).await?;
    let names = state
        .upstreams
        .budgets
        .list_budgets(
            &credentials,
            account_id,
            &budget_prefix(&state.options.org, &space),
        )
        .await?;

    Ok(Json(names).into_response())
}

#[tracing::instrument(skip(state))]
pub async fn show_budget(
    State(state): State<Arc<AppState>>,
    Path((account, space, budget)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    validate_identifier("space", &space)?;
    check_ownership(&state.options.org, &space, &budget)?;
    let account_id = state.account_id(&account)?;

    let credentials = budget_credentials(&state, &account).await?;
    let response = state
        .upstreams
        .budgets
        .describe_budget(&credentials, account_id, &budget)
        .await?;

    Ok(Json(response).into_response())
}

#[tracing::instrument(skip(state))]
pub async fn delete_budget(
    State(state): State<Arc<AppState>>,
    Path((account, space, budget)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    validate_identifier("space", &space)?;
    check_ownership(&state.options.org, &space, &budget)?;
    let account_id = state.account_id(&account)?;

    let credentials = budget_credentials(&state, &account).await?;
    state
        .upstreams
        .budgets
        .delete_budget(&credentials, account_id, &budget)
        .await?;

    tracing::info!("[cost-api] deleted budget {}", budget);

    Ok((StatusCode::OK, "OK").into_response())
}

/// Right-sizing recommendations for one EC2 instance in a space.
#[tracing::instrument(skip(state))]
pub async fn instance_optimizer(
    State(state): State<Arc<AppState>>,
    Path((account, space, instance_id)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    validate_identifier("space", &space)?;
    validate_identifier("instance id", &instance_id)?;

    let query = OptimizerQuery {
        org: state.options.org.clone(),
        account_id: state.account_id(&account)?.to_string(),
        region: state.region_for(&account).to_string(),
        space_id: space,
        instance_id,
    };

    let cache = state.result_caches.for_account(&account)?;
    let key = query.fingerprint(&account).canonical();

    let (recommendations, status) = get_or_fetch(cache, &key, || async {
        let policy_arns = [COMPUTE_OPTIMIZER_POLICY_ARN.to_string()];
        let credentials = state
            .scoped_credentials_for(&account, None, &policy_arns)
            .await?;
        let recommendations = state
            .upstreams
            .optimizer
            .get_instance_recommendations(&credentials, &query)
            .await?;
        Ok::<_, AppError>(Arc::new(recommendations))
    })
    .await?;

    let body: &[InstanceRecommendation] = &recommendations;
    with_cache_headers(Json(body).into_response(), status)
}

/// Every resource tagged with the space id in the account's region.
#[tracing::instrument(skip(state))]
pub async fn space_inventory(
    State(state): State<Arc<AppState>>,
    Path((account, space)): Path<(String, String)>,
) -> Result<Response, AppError> {
    validate_identifier("space", &space)?;

    let policy_arns = [RESOURCE_GROUPS_POLICY_ARN.to_string()];
    let credentials = state
        .scoped_credentials_for(&account, None, &policy_arns)
        .await?;
    let items = state
        .upstreams
        .inventory
        .list_space_resources(&credentials, state.region_for(&account), &space)
        .await?;

    let count = HeaderValue::from(items.len());
    let mut response = Json(items).into_response();
    response.headers_mut().insert(X_ITEMS, count);
    Ok(response)
}

#[tracing::instrument(skip(state))]
pub async fn instance_graph(
    State(state): State<Arc<AppState>>,
    Path((account, instance_id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response, AppError> {
    graph_response(&state, &account, MetricTarget::Ec2 { instance_id }, query).await
}

#[tracing::instrument(skip(state))]
pub async fn service_graph(
    State(state): State<Arc<AppState>>,
    Path((account, cluster, service)): Path<(String, String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response, AppError> {
    graph_response(&state, &account, MetricTarget::Ecs { cluster, service }, query).await
}

#[tracing::instrument(skip(state))]
pub async fn bucket_graph(
    State(state): State<Arc<AppState>>,
    Path((account, bucket)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response, AppError> {
    graph_response(&state, &account, MetricTarget::S3 { bucket }, query).await
}

#[tracing::instrument(skip(state))]
pub async fn rds_graph(
    State(state): State<Arc<AppState>>,
    Path((account, kind, id)): Path<(String, String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response, AppError> {
    let kind: RdsKind = kind.parse()?;
    graph_response(&state, &account, MetricTarget::Rds { kind, id }, query).await
}

#[tracing::instrument(skip(state))]
pub async fn datasync_graph(
    State(state): State<Arc<AppState>>,
    Path((account, task_id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response, AppError> {
    graph_response(&state, &account, MetricTarget::DataSync { task_id }, query).await
}

fn cost_query(
    state: &AppState,
    space_id: String,
    resource_name: Option<String>,
    params: &CostQueryParams,
) -> Result<CostQuery, AppError> {
    params.validate().map_err(|e| {
        tracing::error!("[cost-api] validation failed: {}", e);
        AppError::BadRequest(e.to_string())
    })?;

    let window = TimeWindow::resolve(params.start.as_deref(), params.end.as_deref())?;

    Ok(CostQuery {
        org: state.options.org.clone(),
        space_id,
        resource_name,
        window,
        group_by: GroupBy::parse(params.groupby.as_deref()),
    })
}

async fn cost_response(
    state: &AppState,
    account: &str,
    query: CostQuery,
) -> Result<Response, AppError> {
    let cache = state.result_caches.for_account(account)?;
    let key = query.fingerprint(account).canonical();

    let (results, status) = get_or_fetch(cache, &key, || async {
        let credentials = state.credentials_for(account).await?;
        let results = state
            .upstreams
            .cost_explorer
            .get_cost_and_usage(&credentials, &query)
            .await?;
        Ok::<_, AppError>(Arc::new(results))
    })
    .await?;

    let body: &[CostResult] = &results;
    with_cache_headers(Json(body).into_response(), status)
}

async fn graph_response(
    state: &AppState,
    account: &str,
    target: MetricTarget,
    raw_query: Option<String>,
) -> Result<Response, AppError> {
    let query = MetricQuery::parse(raw_query.as_deref())?;
    let request = MetricWidgetRequest::new(target, query.metrics, query.options)?;

    let cache = state.result_caches.for_account(account)?;
    let key = request
        .fingerprint(&state.options.org, account)
        .hashed(&state.hashing_token);

    tracing::debug!("[cost-api] metric widget {} has cache key {}", request.target(), key);

    let (image, status) = get_or_fetch(cache, &key, || async {
        let credentials = state.credentials_for(account).await?;
        state
            .upstreams
            .metric_widgets
            .get_metric_widget_image(&credentials, state.region_for(account), &request)
            .await
    })
    .await?;

    with_cache_headers(png(image), status)
}

async fn budget_credentials(
    state: &AppState,
    account: &str,
) -> Result<Arc<ScopedCredentials>, AppError> {
    state
        .scoped_credentials_for(account, Some(BUDGET_SESSION_POLICY), &[])
        .await
}

fn png(image: Bytes) -> Response {
    ([(header::CONTENT_TYPE, "image/png")], image).into_response()
}

fn with_cache_headers(mut response: Response, status: CacheStatus) -> Result<Response, AppError> {
    let headers = response.headers_mut();
    headers.insert(
        X_CACHE_HIT,
        HeaderValue::from_static(if status.hit { "true" } else { "false" }),
    );
    if let Some(remaining) = status.remaining.filter(|_| status.hit) {
        let seconds = (remaining.as_secs_f64().round() as u64).max(1);
        let value = HeaderValue::from_str(&format!("{}s", seconds))
            .map_err(|_| AppError::InternalServerError)?;
        headers.insert(X_CACHE_EXPIRE, value);
    }
    Ok(response)
}
