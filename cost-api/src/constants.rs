// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

pub const DEFAULT_CACHE_EXPIRE_TIME: &str = "4h";
pub const DEFAULT_CACHE_PURGE_TIME: &str = "15m";
pub const DEFAULT_REQUEST_TIMEOUT: &str = "15s";

/// Credential sessions are cached for a fixed window, independent of the
/// expiration STS reports for them.
pub const CREDENTIAL_CACHE_TTL: Duration = Duration::from_secs(600); // 10 minutes
pub const CREDENTIAL_CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(300);
pub const SESSION_DURATION_SECONDS: i32 = 900;
/// Upper bound of an IAM role session name.
pub const MAX_SESSION_NAME_LENGTH: usize = 64;
pub const SESSION_ORG_TAG_KEY: &str = "spinup:org";

/// Cost Explorer is a global service served from us-east-1.
pub const COST_EXPLORER_REGION: &str = "us-east-1";
pub const DEFAULT_REGION: &str = "us-east-1";

pub const SPACE_TAG_KEY: &str = "spinup:spaceid";
/// Org and subsidy tags, legacy key first. Either key matches.
pub const ORG_TAG_KEYS: [&str; 2] = ["yale:org", "spinup:org"];
pub const SUBSIDIZED_TAG_KEYS: [&str; 2] = ["yale:subsidized", "spinup:subsidized"];
pub const NAME_TAG_KEY: &str = "Name";
pub const COST_METRICS: [&str; 3] = ["BLENDED_COST", "UNBLENDED_COST", "USAGE_QUANTITY"];

/// `groupby` value that groups costs by the `Name` tag instead of a dimension.
pub const GROUP_BY_RESOURCE_NAME: &str = "RESOURCE_NAME";
pub const GROUP_BY_DIMENSIONS: [&str; 12] = [
    "AZ",
    "INSTANCE_TYPE",
    "LINKED_ACCOUNT",
    "OPERATION",
    "PURCHASE_TYPE",
    "REGION",
    "SERVICE",
    "USAGE_TYPE",
    "USAGE_TYPE_GROUP",
    "RECORD_TYPE",
    "PLATFORM",
    "TENANCY",
];

/// Calendar date format used for time windows and cache keys.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// On the first day of a month the default window ends on this day, so the
/// window always spans a few days of (possibly not yet propagated) usage.
pub const FIRST_OF_MONTH_END_DAY: u32 = 3;

// Metric widget defaults and limits
pub const DEFAULT_METRIC_START: &str = "-P1D";
pub const DEFAULT_METRIC_END: &str = "PT0H";
pub const DEFAULT_METRIC_PERIOD: Duration = Duration::from_secs(300);
pub const DEFAULT_METRIC_STAT: &str = "Average";
pub const DEFAULT_WIDGET_HEIGHT: u32 = 400;
pub const DEFAULT_WIDGET_WIDTH: u32 = 600;
pub const MIN_WIDGET_DIMENSION: i64 = 1;
pub const MAX_WIDGET_DIMENSION: i64 = 2000;
pub const MAX_METRICS_PER_WIDGET: usize = 50;
pub const METRIC_WIDGET_FORMAT: &str = "png";

// Validation constants for path and query parameters
pub const MAX_IDENTIFIER_LENGTH: u64 = 256;
pub const MAX_QUERY_VALUE_LENGTH: u64 = 64;

// Space budgets
/// Budgets and their notification topics live in us-east-1.
pub const BUDGETS_REGION: &str = "us-east-1";
pub const DEFAULT_BUDGET_TIME_UNIT: &str = "MONTHLY";
pub const BUDGET_CURRENCY: &str = "USD";
pub const MAX_BUDGET_ALERTS: usize = 5;
pub const MAX_ALERT_ADDRESSES: usize = 10;
/// Percentage thresholds come back from the Budgets API without a type.
pub const DEFAULT_THRESHOLD_TYPE: &str = "PERCENTAGE";
pub const BUDGETS_DESCRIBE_PAGE_SIZE: i32 = 100;
/// Inline session policy for budget management sessions.
pub const BUDGET_SESSION_POLICY: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":["budgets:ViewBudget","budgets:ModifyBudget","SNS:CreateTopic","SNS:DeleteTopic","SNS:Subscribe"],"Resource":["*"]}]}"#;

// Instance optimizer and inventory
pub const COMPUTE_OPTIMIZER_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/ComputeOptimizerReadOnlyAccess";
pub const RESOURCE_GROUPS_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/AWSResourceGroupsReadOnlyAccess";
pub const INVENTORY_PAGE_SIZE: i32 = 100;
