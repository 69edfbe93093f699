// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Upstream AWS data sources.
//!
//! Handlers talk to every AWS service through a trait ([`CostExplorer`],
//! [`MetricWidgets`] and the budget, optimizer and inventory seams), bundled
//! in [`Upstreams`] so tests can substitute fakes. The AWS
//! implementations build a short-lived client per call from a shared base
//! [`SdkConfig`] (HTTP client, sleep implementation, operation timeout) and
//! the caller's scoped credentials.

use std::collections::{BTreeMap, HashMap};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_costexplorer::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_costexplorer::types::{
    DateInterval as CeDateInterval, Expression, Granularity, GroupDefinition,
    GroupDefinitionType, MetricValue as CeMetricValue, ResultByTime, TagValues,
};
use aws_smithy_runtime_api::client::result::SdkError;
use axum::body::Bytes;

use crate::budgets::{AwsBudgets, BudgetService};
use crate::constants::{
    COST_EXPLORER_REGION, COST_METRICS, DEFAULT_REGION, METRIC_WIDGET_FORMAT, NAME_TAG_KEY,
    ORG_TAG_KEYS, SPACE_TAG_KEY, SUBSIDIZED_TAG_KEYS,
};
use crate::errors::AppError;
use crate::fingerprint::Fingerprint;
use crate::inventory::{AwsResourceInventory, ResourceInventory};
use crate::metrics::MetricWidgetRequest;
use crate::models::{CostGroup, CostResult, DateInterval, GroupBy, MetricValue, ScopedCredentials};
use crate::optimizer::{AwsInstanceOptimizer, InstanceOptimizer};
use crate::timewindow::TimeWindow;

/// A cost and usage report request for one space, optionally narrowed to a
/// single named resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostQuery {
    pub org: String,
    pub space_id: String,
    pub resource_name: Option<String>,
    pub window: TimeWindow,
    pub group_by: Option<GroupBy>,
}

impl CostQuery {
    pub fn fingerprint(&self, account: &str) -> Fingerprint {
        let kind = if self.resource_name.is_some() {
            "resource-cost"
        } else {
            "space-cost"
        };
        Fingerprint::new(kind, &self.org)
            .with("account", account)
            .with("space", &self.space_id)
            .with_opt("resource", self.resource_name.as_ref())
            .with("start", self.window.start_date())
            .with("end", self.window.end_date())
            .with_opt("groupby", self.group_by.as_ref())
    }
}

#[async_trait]
pub trait CostExplorer: Send + Sync {
    async fn get_cost_and_usage(
        &self,
        credentials: &ScopedCredentials,
        query: &CostQuery,
    ) -> Result<Vec<CostResult>, AppError>;
}

#[async_trait]
pub trait MetricWidgets: Send + Sync {
    /// Renders `request` as a PNG in `region`.
    async fn get_metric_widget_image(
        &self,
        credentials: &ScopedCredentials,
        region: &str,
        request: &MetricWidgetRequest,
    ) -> Result<Bytes, AppError>;
}

/// Every upstream collaborator the handlers talk to.
#[derive(Clone)]
pub struct Upstreams {
    pub cost_explorer: Arc<dyn CostExplorer>,
    pub metric_widgets: Arc<dyn MetricWidgets>,
    pub budgets: Arc<dyn BudgetService>,
    pub optimizer: Arc<dyn InstanceOptimizer>,
    pub inventory: Arc<dyn ResourceInventory>,
}

impl Upstreams {
    /// AWS-backed collaborators sharing one base configuration.
    pub fn aws(base: &SdkConfig) -> Self {
        Self {
            cost_explorer: Arc::new(AwsCostExplorer::new(base.clone())),
            metric_widgets: Arc::new(AwsMetricWidgets::new(base.clone())),
            budgets: Arc::new(AwsBudgets::new(base.clone())),
            optimizer: Arc::new(AwsInstanceOptimizer::new(base.clone())),
            inventory: Arc::new(AwsResourceInventory::new(base.clone())),
        }
    }
}

/// Loads the shared SDK configuration every upstream client is derived from.
pub async fn load_base_config(timeout: Duration) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(DEFAULT_REGION))
        .timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build())
        .load()
        .await
}

pub(crate) fn scoped_config(base: &SdkConfig, credentials: &ScopedCredentials, region: &str) -> SdkConfig {
    base.to_builder()
        .region(Region::new(region.to_string()))
        .credentials_provider(SharedCredentialsProvider::new(
            aws_credential_types::Credentials::from(credentials),
        ))
        .build()
}

pub struct AwsCostExplorer {
    base: SdkConfig,
}

impl AwsCostExplorer {
    pub fn new(base: SdkConfig) -> Self {
        Self { base }
    }
}

#[async_trait]
impl CostExplorer for AwsCostExplorer {
    #[tracing::instrument(skip(self, credentials), fields(scope = %credentials.scope))]
    async fn get_cost_and_usage(
        &self,
        credentials: &ScopedCredentials,
        query: &CostQuery,
    ) -> Result<Vec<CostResult>, AppError> {
        let config = scoped_config(&self.base, credentials, COST_EXPLORER_REGION);
        let client = aws_sdk_costexplorer::Client::new(&config);

        let time_period = CeDateInterval::builder()
            .start(query.window.start_date())
            .end(query.window.end_date())
            .build()
            .map_err(|e| {
                tracing::error!("[cost-api] failed to build date interval: {:?}", e);
                AppError::InternalServerError
            })?;

        let mut results = Vec::new();
        let mut next_page_token: Option<String> = None;

        loop {
            tracing::debug!(
                "[cost-api] getting cost and usage for space {} over {}",
                query.space_id,
                query.window
            );

            let output = client
                .get_cost_and_usage()
                .time_period(time_period.clone())
                .granularity(Granularity::Monthly)
                .set_metrics(Some(COST_METRICS.iter().map(|m| m.to_string()).collect()))
                .filter(cost_filter(query))
                .set_group_by(query.group_by.as_ref().map(|g| vec![group_definition(g)]))
                .set_next_page_token(next_page_token.take())
                .send()
                .await
                .map_err(|e| classify_sdk_error("failed to get cost and usage report", e))?;

            results.extend(output.results_by_time().iter().map(convert_result));

            match output.next_page_token() {
                Some(token) if !token.is_empty() => next_page_token = Some(token.to_string()),
                _ => break,
            }
        }

        tracing::debug!("[cost-api] got {} cost result(s)", results.len());

        Ok(results)
    }
}

pub struct AwsMetricWidgets {
    base: SdkConfig,
}

impl AwsMetricWidgets {
    pub fn new(base: SdkConfig) -> Self {
        Self { base }
    }
}

#[async_trait]
impl MetricWidgets for AwsMetricWidgets {
    #[tracing::instrument(skip(self, credentials), fields(scope = %credentials.scope))]
    async fn get_metric_widget_image(
        &self,
        credentials: &ScopedCredentials,
        region: &str,
        request: &MetricWidgetRequest,
    ) -> Result<Bytes, AppError> {
        let config = scoped_config(&self.base, credentials, region);
        let client = aws_sdk_cloudwatch::Client::new(&config);

        let widget = serde_json::to_string(&request.widget())?;
        tracing::debug!("[cost-api] getting metric widget image {}", widget);

        let output = client
            .get_metric_widget_image()
            .metric_widget(widget)
            .output_format(METRIC_WIDGET_FORMAT)
            .send()
            .await
            .map_err(|e| classify_sdk_error("failed to get metric widget image", e))?;

        let image = widget_image(output.metric_widget_image().map(|blob| blob.as_ref()))?;

        tracing::debug!("[cost-api] got {} byte metric widget image", image.len());

        Ok(image)
    }
}

/// A response without image data is an upstream failure, never a result.
fn widget_image(image: Option<&[u8]>) -> Result<Bytes, AppError> {
    match image {
        Some(image) if !image.is_empty() => Ok(Bytes::copy_from_slice(image)),
        _ => {
            tracing::error!("[cost-api] metric widget image response had no image");
            Err(AppError::ServiceUnavailable(
                "empty metric widget image".to_string(),
            ))
        }
    }
}

fn tag(key: &str, value: &str) -> Expression {
    Expression::builder()
        .tags(TagValues::builder().key(key).values(value).build())
        .build()
}

fn any_tag(keys: &[&str], value: &str) -> Expression {
    Expression::builder()
        .set_or(Some(keys.iter().map(|key| tag(key, value)).collect()))
        .build()
}

/// Space tag and either org tag must match; resources carrying either
/// subsidy tag are excluded.
fn cost_filter(query: &CostQuery) -> Expression {
    let mut filters = vec![
        tag(SPACE_TAG_KEY, &query.space_id),
        any_tag(&ORG_TAG_KEYS, &query.org),
        Expression::builder()
            .not(any_tag(&SUBSIDIZED_TAG_KEYS, "true"))
            .build(),
    ];
    if let Some(name) = &query.resource_name {
        filters.push(tag(NAME_TAG_KEY, name));
    }
    Expression::builder().set_and(Some(filters)).build()
}

fn group_definition(group_by: &GroupBy) -> GroupDefinition {
    match group_by {
        GroupBy::ResourceName => GroupDefinition::builder()
            .r#type(GroupDefinitionType::Tag)
            .key(NAME_TAG_KEY)
            .build(),
        GroupBy::Dimension(dimension) => GroupDefinition::builder()
            .r#type(GroupDefinitionType::Dimension)
            .key(dimension)
            .build(),
    }
}

fn convert_metrics(metrics: Option<&HashMap<String, CeMetricValue>>) -> BTreeMap<String, MetricValue> {
    metrics
        .into_iter()
        .flatten()
        .map(|(name, value)| {
            (
                name.clone(),
                MetricValue {
                    amount: value.amount().map(str::to_string),
                    unit: value.unit().map(str::to_string),
                },
            )
        })
        .collect()
}

fn convert_result(result: &ResultByTime) -> CostResult {
    CostResult {
        time_period: result.time_period().map(|period| DateInterval {
            start: period.start().to_string(),
            end: period.end().to_string(),
        }),
        total: convert_metrics(result.total()),
        groups: result
            .groups()
            .iter()
            .map(|group| CostGroup {
                keys: group.keys().to_vec(),
                metrics: convert_metrics(group.metrics()),
            })
            .collect(),
        estimated: result.estimated(),
    }
}

/// Maps an SDK failure onto an [`AppError`], using the service error code
/// when the service answered and treating transport failures as outages.
pub fn classify_sdk_error<E, R>(context: &str, error: SdkError<E, R>) -> AppError
where
    E: ProvideErrorMetadata + StdError + Send + Sync + 'static,
    R: fmt::Debug + Send + Sync + 'static,
{
    tracing::error!("[cost-api] {}: {}", context, DisplayErrorContext(&error));

    match &error {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            AppError::ServiceUnavailable(context.to_string())
        }
        SdkError::ConstructionFailure(_) => AppError::InternalServerError,
        _ => classify_code(
            context,
            error.code(),
            error.message().unwrap_or_default(),
        ),
    }
}

/// Maps an AWS error code to an error kind; unknown codes are bad requests.
pub fn classify_code(context: &str, code: Option<&str>, message: &str) -> AppError {
    let detail = if message.is_empty() {
        context.to_string()
    } else {
        format!("{}: {}", context, message)
    };

    match code.unwrap_or_default() {
        "AccessDenied" | "AccessDeniedException" | "AccountProblem" | "Forbidden"
        | "InvalidAccessKeyId" | "InvalidClientTokenId" | "ExpiredToken" => {
            AppError::Forbidden(detail)
        }
        "NotFound" | "NotFoundException" | "DataUnavailableException" | "ResourceNotFound"
        | "ResourceNotFoundException" => AppError::NotFound(detail),
        "DuplicateRecordException" | "CreationLimitExceededException" => {
            AppError::Conflict(detail)
        }
        "SlowDown" | "LimitExceeded" | "LimitExceededException" | "Throttling"
        | "ThrottlingException" | "TooManyRequestsException" => AppError::LimitExceeded(detail),
        "InternalError" | "InternalErrorException" | "InternalFailure" | "InternalServerException"
        | "NotImplemented" | "RequestTimeout" | "ServiceUnavailable"
        | "ServiceUnavailableException" | "TemporaryRedirect" => {
            AppError::ServiceUnavailable(detail)
        }
        _ => AppError::BadRequest(detail),
    }
}
