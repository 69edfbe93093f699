// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use aws_credential_types::Credentials;
use serde::{Deserialize, Serialize};
use validator::Validate;
use zeroize::ZeroizeOnDrop;

use crate::constants::{GROUP_BY_DIMENSIONS, GROUP_BY_RESOURCE_NAME, MAX_QUERY_VALUE_LENGTH};

/// Temporary credentials issued for an assumed role session.
#[derive(Clone, ZeroizeOnDrop)]
pub struct ScopedCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub region: String,
    #[zeroize(skip)]
    pub expiration: Option<SystemTime>,
    /// Cache key of the role, external id and policies the session was issued for.
    pub scope: String,
}

impl ScopedCredentials {
    /// True once the expiration reported by the identity provider has passed.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expiration.is_some_and(|expiration| now >= expiration)
    }
}

// Custom Debug implementation to prevent accidental logging of sensitive data
impl fmt::Debug for ScopedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &"[REDACTED]")
            .field("region", &self.region)
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl From<&ScopedCredentials> for Credentials {
    fn from(credentials: &ScopedCredentials) -> Self {
        Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            Some(credentials.session_token.clone()),
            credentials.expiration,
            "cost-api-assumed-role",
        )
    }
}

/// Query string of the space and resource cost endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct CostQueryParams {
    #[validate(length(max = MAX_QUERY_VALUE_LENGTH))]
    pub start: Option<String>,

    #[validate(length(max = MAX_QUERY_VALUE_LENGTH))]
    pub end: Option<String>,

    #[validate(custom(function = "validate_group_by"))]
    pub groupby: Option<String>,
}

fn validate_group_by(group_by: &str) -> Result<(), validator::ValidationError> {
    if group_by.is_empty()
        || group_by == GROUP_BY_RESOURCE_NAME
        || GROUP_BY_DIMENSIONS.contains(&group_by)
    {
        return Ok(());
    }
    Err(validator::ValidationError::new("invalid_group_by"))
}

/// How Cost Explorer should group a cost report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupBy {
    /// Group by the `Name` tag.
    ResourceName,
    /// Group by a Cost Explorer dimension such as `SERVICE`.
    Dimension(String),
}

impl GroupBy {
    /// Parses the `groupby` query value; empty means no grouping.
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim) {
            None | Some("") => None,
            Some(GROUP_BY_RESOURCE_NAME) => Some(GroupBy::ResourceName),
            Some(dimension) => Some(GroupBy::Dimension(dimension.to_string())),
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupBy::ResourceName => f.write_str(GROUP_BY_RESOURCE_NAME),
            GroupBy::Dimension(dimension) => f.write_str(dimension),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateInterval {
    #[serde(rename = "Start")]
    pub start: String,
    #[serde(rename = "End")]
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    #[serde(rename = "Amount")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(rename = "Unit")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostGroup {
    #[serde(rename = "Keys")]
    pub keys: Vec<String>,
    #[serde(rename = "Metrics")]
    pub metrics: BTreeMap<String, MetricValue>,
}

/// One time period of a cost and usage report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostResult {
    #[serde(rename = "TimePeriod")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_period: Option<DateInterval>,
    #[serde(rename = "Total")]
    pub total: BTreeMap<String, MetricValue>,
    #[serde(rename = "Groups")]
    pub groups: Vec<CostGroup>,
    #[serde(rename = "Estimated")]
    pub estimated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub githash: String,
    pub buildstamp: String,
}
