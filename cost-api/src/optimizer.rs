// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Compute Optimizer right-sizing recommendations for EC2 instances.

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_computeoptimizer::types::{
    InstanceRecommendation as SdkRecommendation, InstanceRecommendationOption,
};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::fingerprint::Fingerprint;
use crate::models::ScopedCredentials;
use crate::upstream::{classify_sdk_error, scoped_config};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceRecommendation {
    pub instance_arn: Option<String>,
    pub instance_name: Option<String>,
    pub account_id: Option<String>,
    pub current_instance_type: Option<String>,
    pub finding: Option<String>,
    pub finding_reason_codes: Vec<String>,
    pub recommendation_options: Vec<RecommendationOption>,
    /// RFC 3339 time the recommendation was last refreshed.
    pub last_refresh_timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecommendationOption {
    pub instance_type: Option<String>,
    pub rank: i32,
    pub performance_risk: f64,
    pub migration_effort: Option<String>,
    pub savings_opportunity_percentage: Option<f64>,
    pub estimated_monthly_savings: Option<MonthlySavings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MonthlySavings {
    pub currency: Option<String>,
    pub value: f64,
}

/// An instance to get recommendations for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizerQuery {
    pub org: String,
    pub account_id: String,
    pub region: String,
    pub space_id: String,
    pub instance_id: String,
}

impl OptimizerQuery {
    pub fn instance_arn(&self) -> String {
        format!(
            "arn:aws:ec2:{}:{}:instance/{}",
            self.region, self.account_id, self.instance_id
        )
    }

    pub fn fingerprint(&self, account: &str) -> Fingerprint {
        Fingerprint::new("instance-optimizer", &self.org)
            .with("account", account)
            .with("region", &self.region)
            .with("space", &self.space_id)
            .with("instance", &self.instance_id)
    }
}

#[async_trait]
pub trait InstanceOptimizer: Send + Sync {
    async fn get_instance_recommendations(
        &self,
        credentials: &ScopedCredentials,
        query: &OptimizerQuery,
    ) -> Result<Vec<InstanceRecommendation>, AppError>;
}

pub struct AwsInstanceOptimizer {
    base: SdkConfig,
}

impl AwsInstanceOptimizer {
    pub fn new(base: SdkConfig) -> Self {
        Self { base }
    }
}

#[async_trait]
impl InstanceOptimizer for AwsInstanceOptimizer {
    #[tracing::instrument(skip(self, credentials), fields(scope = %credentials.scope))]
    async fn get_instance_recommendations(
        &self,
        credentials: &ScopedCredentials,
        query: &OptimizerQuery,
    ) -> Result<Vec<InstanceRecommendation>, AppError> {
        let config = scoped_config(&self.base, credentials, &query.region);
        let client = aws_sdk_computeoptimizer::Client::new(&config);
        let arn = query.instance_arn();

        tracing::info!("[cost-api] getting recommendations for ec2 instance {}", arn);

        let output = client
            .get_ec2_instance_recommendations()
            .instance_arns(&arn)
            .send()
            .await
            .map_err(|e| classify_sdk_error("failed to get instance recommendations", e))?;

        Ok(output
            .instance_recommendations()
            .iter()
            .map(convert_recommendation)
            .collect())
    }
}

fn convert_option(option: &InstanceRecommendationOption) -> RecommendationOption {
    let savings = option.savings_opportunity();
    RecommendationOption {
        instance_type: option.instance_type().map(str::to_string),
        rank: option.rank(),
        performance_risk: option.performance_risk(),
        migration_effort: option.migration_effort().map(|e| e.as_str().to_string()),
        savings_opportunity_percentage: savings.map(|s| s.savings_opportunity_percentage()),
        estimated_monthly_savings: savings
            .and_then(|s| s.estimated_monthly_savings())
            .map(|monthly| MonthlySavings {
                currency: monthly.currency().map(|c| c.as_str().to_string()),
                value: monthly.value(),
            }),
    }
}

fn convert_recommendation(recommendation: &SdkRecommendation) -> InstanceRecommendation {
    InstanceRecommendation {
        instance_arn: recommendation.instance_arn().map(str::to_string),
        instance_name: recommendation.instance_name().map(str::to_string),
        account_id: recommendation.account_id().map(str::to_string),
        current_instance_type: recommendation.current_instance_type().map(str::to_string),
        finding: recommendation.finding().map(|f| f.as_str().to_string()),
        finding_reason_codes: recommendation
            .finding_reason_codes()
            .iter()
            .map(|code| code.as_str().to_string())
            .collect(),
        recommendation_options: recommendation
            .recommendation_options()
            .iter()
            .map(convert_option)
            .collect(),
        last_refresh_timestamp: recommendation
            .last_refresh_timestamp()
            .and_then(|at| chrono::DateTime::from_timestamp(at.secs(), 0))
            .map(|at| at.to_rfc3339()),
    }
}
