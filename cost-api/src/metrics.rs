// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! CloudWatch metric widget requests.
//!
//! Each resource kind that can be graphed is a [`MetricTarget`] variant that
//! knows its CloudWatch namespace and dimensions. A [`MetricWidgetRequest`]
//! pairs a target with the requested metric names and rendering options,
//! validates them at construction and renders both the widget definition sent
//! to `GetMetricWidgetImage` and the request's [`Fingerprint`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde_json::{Value, json};

use crate::constants::{
    DEFAULT_METRIC_END, DEFAULT_METRIC_PERIOD, DEFAULT_METRIC_START, DEFAULT_METRIC_STAT,
    DEFAULT_WIDGET_HEIGHT, DEFAULT_WIDGET_WIDTH, MAX_IDENTIFIER_LENGTH, MAX_METRICS_PER_WIDGET,
    MAX_QUERY_VALUE_LENGTH, MAX_WIDGET_DIMENSION, MIN_WIDGET_DIMENSION,
};
use crate::errors::AppError;
use crate::fingerprint::Fingerprint;

const S3_BUCKET_SIZE_BYTES: &str = "BucketSizeBytes";
const S3_NUMBER_OF_OBJECTS: &str = "NumberOfObjects";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdsKind {
    Instance,
    Cluster,
}

impl FromStr for RdsKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instance" => Ok(RdsKind::Instance),
            "cluster" => Ok(RdsKind::Cluster),
            other => Err(AppError::BadRequest(format!(
                "invalid rds type '{}', expected instance or cluster",
                other
            ))),
        }
    }
}

/// The resource a metric widget graphs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricTarget {
    Ec2 { instance_id: String },
    Ecs { cluster: String, service: String },
    S3 { bucket: String },
    Rds { kind: RdsKind, id: String },
    DataSync { task_id: String },
}

impl MetricTarget {
    pub fn namespace(&self) -> &'static str {
        match self {
            MetricTarget::Ec2 { .. } => "AWS/EC2",
            MetricTarget::Ecs { .. } => "AWS/ECS",
            MetricTarget::S3 { .. } => "AWS/S3",
            MetricTarget::Rds { .. } => "AWS/RDS",
            MetricTarget::DataSync { .. } => "AWS/DataSync",
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            MetricTarget::Ec2 { .. } => "ec2",
            MetricTarget::Ecs { .. } => "ecs",
            MetricTarget::S3 { .. } => "s3",
            MetricTarget::Rds {
                kind: RdsKind::Instance,
                ..
            } => "rds-instance",
            MetricTarget::Rds {
                kind: RdsKind::Cluster,
                ..
            } => "rds-cluster",
            MetricTarget::DataSync { .. } => "datasync",
        }
    }

    fn identifiers(&self) -> Vec<(&'static str, &str)> {
        match self {
            MetricTarget::Ec2 { instance_id } => vec![("instance", instance_id.as_str())],
            MetricTarget::Ecs { cluster, service } => {
                vec![("cluster", cluster.as_str()), ("service", service.as_str())]
            }
            MetricTarget::S3 { bucket } => vec![("bucket", bucket.as_str())],
            MetricTarget::Rds { id, .. } => vec![("rds", id.as_str())],
            MetricTarget::DataSync { task_id } => vec![("task", task_id.as_str())],
        }
    }

    /// CloudWatch dimension name/value pairs for `metric`.
    fn dimensions(&self, metric: &str) -> Vec<(&'static str, String)> {
        match self {
            MetricTarget::Ec2 { instance_id } => vec![("InstanceId", instance_id.clone())],
            MetricTarget::Ecs { cluster, service } => vec![
                ("ClusterName", cluster.clone()),
                ("ServiceName", service.clone()),
            ],
            MetricTarget::S3 { bucket } => {
                let storage_type = if metric == S3_NUMBER_OF_OBJECTS {
                    "AllStorageTypes"
                } else {
                    "StandardStorage"
                };
                vec![
                    ("BucketName", bucket.clone()),
                    ("StorageType", storage_type.to_string()),
                ]
            }
            MetricTarget::Rds {
                kind: RdsKind::Instance,
                id,
            } => vec![("DBInstanceIdentifier", id.clone())],
            MetricTarget::Rds {
                kind: RdsKind::Cluster,
                id,
            } => vec![("DBClusterIdentifier", id.clone())],
            MetricTarget::DataSync { task_id } => vec![("TaskId", task_id.clone())],
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        for (name, value) in self.identifiers() {
            validate_identifier(name, value)?;
        }
        Ok(())
    }

    fn validate_metric(&self, metric: &str) -> Result<(), AppError> {
        validate_identifier("metric", metric)?;
        if matches!(self, MetricTarget::S3 { .. })
            && metric != S3_BUCKET_SIZE_BYTES
            && metric != S3_NUMBER_OF_OBJECTS
        {
            return Err(AppError::BadRequest(format!(
                "invalid s3 metric '{}', expected {} or {}",
                metric, S3_BUCKET_SIZE_BYTES, S3_NUMBER_OF_OBJECTS
            )));
        }
        Ok(())
    }
}

impl fmt::Display for MetricTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind())?;
        for (_, value) in self.identifiers() {
            write!(f, "/{}", value)?;
        }
        Ok(())
    }
}

/// Rendering options shared by every metric widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetOptions {
    pub start: String,
    pub end: String,
    pub period: Duration,
    pub stat: String,
    pub height: u32,
    pub width: u32,
}

impl Default for WidgetOptions {
    fn default() -> Self {
        Self {
            start: DEFAULT_METRIC_START.to_string(),
            end: DEFAULT_METRIC_END.to_string(),
            period: DEFAULT_METRIC_PERIOD,
            stat: DEFAULT_METRIC_STAT.to_string(),
            height: DEFAULT_WIDGET_HEIGHT,
            width: DEFAULT_WIDGET_WIDTH,
        }
    }
}

/// Metric names and widget options parsed from a query string such as
/// `metric=CPUUtilization&metric=NetworkIn&period=5m&height=300`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetricQuery {
    pub metrics: Vec<String>,
    pub options: WidgetOptions,
}

impl MetricQuery {
    pub fn parse(raw: Option<&str>) -> Result<Self, AppError> {
        let mut query = MetricQuery::default();
        let mut height = None;
        let mut width = None;

        for (key, value) in url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
            let value = value.trim().to_string();
            match key.as_ref() {
                "metric" => query.metrics.push(value),
                "start" if !value.is_empty() => query.options.start = bounded("start", value)?,
                "end" if !value.is_empty() => query.options.end = bounded("end", value)?,
                "stat" if !value.is_empty() => query.options.stat = bounded("stat", value)?,
                "period" if !value.is_empty() => query.options.period = parse_period(&value)?,
                "height" => height = Some(value),
                "width" => width = Some(value),
                _ => {}
            }
        }

        if let Some(height) = height {
            query.options.height = parse_dimension("height", &height)?;
        }
        if let Some(width) = width {
            query.options.width = parse_dimension("width", &width)?;
        }

        Ok(query)
    }
}

/// A validated request for one metric widget image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricWidgetRequest {
    target: MetricTarget,
    metrics: Vec<String>,
    options: WidgetOptions,
}

impl MetricWidgetRequest {
    /// Validates the target, metric names and options. Metric names are
    /// sorted so that equivalent requests compare and fingerprint equal.
    pub fn new(
        target: MetricTarget,
        mut metrics: Vec<String>,
        options: WidgetOptions,
    ) -> Result<Self, AppError> {
        target.validate()?;

        if metrics.is_empty() {
            return Err(AppError::BadRequest(
                "at least one metric is required".to_string(),
            ));
        }
        if metrics.len() > MAX_METRICS_PER_WIDGET {
            return Err(AppError::BadRequest(format!(
                "too many metrics, at most {} are allowed",
                MAX_METRICS_PER_WIDGET
            )));
        }
        for metric in &metrics {
            target.validate_metric(metric)?;
        }
        check_dimension("height", i64::from(options.height))?;
        check_dimension("width", i64::from(options.width))?;
        if options.period.as_secs() == 0 {
            return Err(AppError::BadRequest(
                "period must be at least 1s".to_string(),
            ));
        }

        metrics.sort();

        Ok(Self {
            target,
            metrics,
            options,
        })
    }

    pub fn target(&self) -> &MetricTarget {
        &self.target
    }

    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    pub fn options(&self) -> &WidgetOptions {
        &self.options
    }

    /// Cache fingerprint covering every input that affects the rendered image.
    pub fn fingerprint(&self, org: &str, account: &str) -> Fingerprint {
        let mut fingerprint = Fingerprint::new("metric-widget", org)
            .with("account", account)
            .with("target", self.target.kind())
            .with_list("metrics", &self.metrics)
            .with("start", &self.options.start)
            .with("end", &self.options.end)
            .with("period", self.options.period.as_secs())
            .with("stat", &self.options.stat)
            .with("height", self.options.height)
            .with("width", self.options.width);
        for (name, value) in self.target.identifiers() {
            fingerprint = fingerprint.with(name, value);
        }
        fingerprint
    }

    /// Widget definition accepted by CloudWatch `GetMetricWidgetImage`.
    pub fn widget(&self) -> Value {
        let metrics: Vec<Value> = self
            .metrics
            .iter()
            .map(|metric| {
                let mut line = vec![
                    Value::from(self.target.namespace()),
                    Value::from(metric.as_str()),
                ];
                for (name, value) in self.target.dimensions(metric) {
                    line.push(Value::from(name));
                    line.push(Value::from(value));
                }
                Value::Array(line)
            })
            .collect();

        json!({
            "metrics": metrics,
            "start": self.options.start,
            "end": self.options.end,
            "period": self.options.period.as_secs(),
            "stat": self.options.stat,
            "height": self.options.height,
            "width": self.options.width,
        })
    }
}

pub(crate) fn validate_identifier(name: &str, value: &str) -> Result<(), AppError> {
    if value.is_empty() || value.len() as u64 > MAX_IDENTIFIER_LENGTH {
        return Err(AppError::BadRequest(format!(
            "invalid {}, length must be between 1 and {}",
            name, MAX_IDENTIFIER_LENGTH
        )));
    }
    Ok(())
}

fn bounded(name: &str, value: String) -> Result<String, AppError> {
    if value.len() as u64 > MAX_QUERY_VALUE_LENGTH {
        return Err(AppError::BadRequest(format!(
            "invalid {}, at most {} characters are allowed",
            name, MAX_QUERY_VALUE_LENGTH
        )));
    }
    Ok(value)
}

fn parse_period(value: &str) -> Result<Duration, AppError> {
    humantime::parse_duration(value).map_err(|e| {
        AppError::BadRequest(format!("failed to parse period as duration: {}", e))
    })
}

fn parse_dimension(name: &str, value: &str) -> Result<u32, AppError> {
    let parsed: i64 = value.parse().map_err(|_| {
        AppError::BadRequest(format!("invalid {} {}, value must be an integer", name, value))
    })?;
    check_dimension(name, parsed)?;
    u32::try_from(parsed).map_err(|_| AppError::InternalServerError)
}

fn check_dimension(name: &str, value: i64) -> Result<(), AppError> {
    if !(MIN_WIDGET_DIMENSION..=MAX_WIDGET_DIMENSION).contains(&value) {
        return Err(AppError::BadRequest(format!(
            "invalid {} {}, value must be >={} and <= {}",
            name, value, MIN_WIDGET_DIMENSION, MAX_WIDGET_DIMENSION
        )));
    }
    Ok(())
}
