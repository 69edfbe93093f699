// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use crate::cache::TtlCache;
use crate::configuration::{AccountConfig, CostApiOptions};
use crate::constants::{CREDENTIAL_CACHE_PURGE_INTERVAL, CREDENTIAL_CACHE_TTL};
use crate::credentials::{CredentialBroker, RoleExchange};
use crate::errors::AppError;
use crate::models::ScopedCredentials;
use crate::results::ResultCaches;
use crate::routes;
use crate::upstream::Upstreams;
use axum::Router;
use axum::routing::get;
use axum::serve::Serve;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

const HASHING_TOKEN_LENGTH: usize = 32;

pub struct AppState {
    pub options: CostApiOptions,
    pub broker: CredentialBroker,
    pub result_caches: ResultCaches,
    pub upstreams: Upstreams,
    pub hashing_token: String,
    pub metrics: PrometheusHandle,
}

impl AppState {
    /// Wires the caches and upstream clients together. Spawns the cache
    /// janitors, so it must run inside a Tokio runtime.
    pub fn new(
        options: CostApiOptions,
        exchange: Arc<dyn RoleExchange>,
        upstreams: Upstreams,
        metrics: PrometheusHandle,
    ) -> Self {
        let credential_cache =
            TtlCache::with_janitor(CREDENTIAL_CACHE_TTL, CREDENTIAL_CACHE_PURGE_INTERVAL);
        let broker = CredentialBroker::new(options.org.clone(), exchange, credential_cache);

        let result_caches = ResultCaches::new(
            options.accounts.iter().map(|account| account.name.clone()),
            options.cache_expire_time,
            options.cache_purge_time,
        );

        let hashing_token = options.hashing_token.clone().unwrap_or_else(|| {
            tracing::warn!("[cost-api] no hashing token configured, generating a random one");
            std::iter::repeat_with(fastrand::alphanumeric)
                .take(HASHING_TOKEN_LENGTH)
                .collect()
        });

        Self {
            options,
            broker,
            result_caches,
            upstreams,
            hashing_token,
            metrics,
        }
    }

    /// Scoped credentials for a configured account, limited by the
    /// configured managed policies.
    pub async fn credentials_for(&self, account: &str) -> Result<Arc<ScopedCredentials>, AppError> {
        self.scoped_credentials_for(account, None, &self.options.policy_arns)
            .await
    }

    /// Scoped credentials for a configured account with an explicit session
    /// policy.
    pub async fn scoped_credentials_for(
        &self,
        account: &str,
        inline_policy: Option<&str>,
        policy_arns: &[String],
    ) -> Result<Arc<ScopedCredentials>, AppError> {
        let config = self.account(account)?;

        self.broker
            .assume_role(
                config.external_id.as_deref(),
                &config.role_arn,
                inline_policy,
                policy_arns,
            )
            .await
    }

    pub fn account(&self, account: &str) -> Result<&AccountConfig, AppError> {
        self.options
            .account(account)
            .ok_or_else(|| AppError::NotFound(format!("account {} not found", account)))
    }

    /// AWS account id behind a configured account.
    pub fn account_id(&self, account: &str) -> Result<&str, AppError> {
        self.account(account)?.account_id().ok_or_else(|| {
            AppError::ConfigError(format!("account {} has no account id in its role", account))
        })
    }

    /// Region used for regional calls against `account`.
    pub fn region_for(&self, account: &str) -> &str {
        self.options
            .account(account)
            .map(|config| self.options.account_region(config))
            .unwrap_or(&self.options.region)
    }
}

pub struct Application {
    server: Serve<TcpListener, Router, Router>,
}

impl Application {
    pub async fn build(state: Arc<AppState>) -> Result<Self, std::io::Error> {
        let address = format!("{}:{}", state.options.host, state.options.port);
        let listener = TcpListener::bind(address).await?;
        let host = state.options.host.clone();
        let server = run(listener, state)?;
        let port = server.local_addr()?.port();

        tracing::info!("[cost-api] listening at http://{}:{}", host, port);

        Ok(Self { server })
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        self.server.await
    }
}

/// Builds the router with every route and middleware layer.
pub fn create_router(state: Arc<AppState>) -> Router {
    let request_timeout = state.options.request_timeout;

    Router::new()
        .route("/v1/cost/ping", get(routes::ping))
        .route("/v1/cost/version", get(routes::version))
        .route("/v1/cost/metrics", get(routes::prometheus))
        .route("/v1/cost/{account}/spaces/{space}", get(routes::space_cost))
        .route(
            "/v1/cost/{account}/spaces/{space}/resources/{name}",
            get(routes::resource_cost),
        )
        .route(
            "/v1/cost/{account}/spaces/{space}/budgets",
            get(routes::list_budgets).post(routes::create_budget),
        )
        .route(
            "/v1/cost/{account}/spaces/{space}/budgets/{budget}",
            get(routes::show_budget).delete(routes::delete_budget),
        )
        .route(
            "/v1/cost/{account}/spaces/{space}/instances/{id}/optimizer",
            get(routes::instance_optimizer),
        )
        .route("/v1/metrics/ping", get(routes::ping))
        .route("/v1/metrics/version", get(routes::version))
        .route("/v1/metrics/metrics", get(routes::prometheus))
        .route(
            "/v1/metrics/{account}/instances/{id}/graph",
            get(routes::instance_graph),
        )
        .route(
            "/v1/metrics/{account}/clusters/{cluster}/services/{service}/graph",
            get(routes::service_graph),
        )
        .route(
            "/v1/metrics/{account}/buckets/{bucket}/graph",
            get(routes::bucket_graph),
        )
        .route(
            "/v1/metrics/{account}/rds/{type}/{id}/graph",
            get(routes::rds_graph),
        )
        .route(
            "/v1/metrics/{account}/datasync/{id}/graph",
            get(routes::datasync_graph),
        )
        .route("/v1/inventory/ping", get(routes::ping))
        .route("/v1/inventory/version", get(routes::version))
        .route("/v1/inventory/metrics", get(routes::prometheus))
        .route(
            "/v1/inventory/{account}/spaces/{space}",
            get(routes::space_inventory),
        )
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tracing::instrument(skip(listener, state))]
pub fn run(
    listener: TcpListener,
    state: Arc<AppState>,
) -> Result<Serve<TcpListener, Router, Router>, std::io::Error> {
    let app = create_router(state);
    Ok(axum::serve(listener, app))
}
