// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Space budgets.
//!
//! A space budget is an AWS cost budget filtered on the space tag and named
//! `spinup_{org}_{space}_{TIMEUNIT}-01`. Every budget gets an SNS topic,
//! `budgets-{budget name}`, that receives each alert alongside the email
//! subscribers. A create request is validated completely before anything is
//! created upstream.

use std::fmt;

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_budgets::types::{
    Budget, BudgetType, ComparisonOperator, CostTypes, Notification, NotificationType,
    NotificationWithSubscribers, Spend, Subscriber, SubscriptionType, ThresholdType, TimeUnit,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::constants::{
    BUDGET_CURRENCY, BUDGETS_DESCRIBE_PAGE_SIZE, BUDGETS_REGION, DEFAULT_BUDGET_TIME_UNIT,
    DEFAULT_THRESHOLD_TYPE, MAX_ALERT_ADDRESSES, MAX_BUDGET_ALERTS, SPACE_TAG_KEY,
};
use crate::errors::AppError;
use crate::models::ScopedCredentials;
use crate::upstream::{classify_sdk_error, scoped_config};

/// Body of a budget create request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BudgetCreateRequest {
    /// Limit in USD.
    pub amount: String,
    /// DAILY, MONTHLY, QUARTERLY or ANNUALLY. Defaults to MONTHLY.
    pub time_unit: String,
    pub alerts: Vec<BudgetAlert>,
    /// Tags for the notification topic.
    pub tags: Vec<Tag>,
}

/// A threshold notification and the addresses it is sent to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BudgetAlert {
    pub addresses: Vec<String>,
    pub comparison_operator: String,
    /// Reported by the Budgets API, ignored on create.
    pub notification_state: String,
    pub notification_type: String,
    pub threshold: f64,
    pub threshold_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BudgetResponse {
    pub amount: String,
    pub name: String,
    pub time_unit: String,
    pub alerts: Vec<BudgetAlert>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// The SNS topic that relays a budget's alerts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetTopic {
    pub name: String,
    pub arn: String,
}

impl BudgetTopic {
    pub fn for_budget(account_id: &str, budget: &str) -> Self {
        let name = format!("budgets-{}", budget);
        let arn = format!("arn:aws:sns:{}:{}:{}", BUDGETS_REGION, account_id, name);
        Self { name, arn }
    }

    /// Topic policy that lets the Budgets service publish to the topic.
    pub fn policy(&self) -> String {
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Sid": "AWSBudgetsSNSPublishingPermissions",
                "Effect": "Allow",
                "Principal": {"Service": ["budgets.amazonaws.com"]},
                "Action": ["SNS:Publish"],
                "Resource": [self.arn],
            }]
        })
        .to_string()
    }
}

/// A validated budget, ready to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetPlan {
    pub account_id: String,
    pub name: String,
    pub amount: String,
    pub time_unit: String,
    /// `TagKeyValue` cost filter selecting the space's resources.
    pub space_filter: String,
    pub topic: BudgetTopic,
    pub alerts: Vec<BudgetAlert>,
    pub tags: Vec<Tag>,
}

/// Name prefix shared by every budget of a space, separator included.
pub fn budget_prefix(org: &str, space: &str) -> String {
    format!("spinup_{}_{}_", org, space)
}

/// Rejects budget names outside the space's namespace.
pub fn check_ownership(org: &str, space: &str, budget: &str) -> Result<(), AppError> {
    if budget.starts_with(&budget_prefix(org, space)) {
        Ok(())
    } else {
        Err(AppError::BadRequest(
            "budget doesn't belong to provided space".to_string(),
        ))
    }
}

impl BudgetCreateRequest {
    pub fn plan(self, org: &str, account_id: &str, space: &str) -> Result<BudgetPlan, AppError> {
        if self.amount.trim().is_empty() {
            return Err(AppError::BadRequest("Amount is required".to_string()));
        }
        if !self
            .amount
            .trim()
            .parse::<f64>()
            .is_ok_and(|amount| amount.is_finite() && amount > 0.0)
        {
            return Err(AppError::BadRequest(format!(
                "invalid amount '{}'",
                self.amount
            )));
        }

        let time_unit = if self.time_unit.is_empty() {
            DEFAULT_BUDGET_TIME_UNIT.to_string()
        } else {
            self.time_unit
        };
        check_value("time unit", &time_unit, TimeUnit::values())?;

        if self.alerts.is_empty() {
            return Err(AppError::BadRequest(
                "at least 1 Alert is required".to_string(),
            ));
        }
        if self.alerts.len() > MAX_BUDGET_ALERTS {
            return Err(AppError::BadRequest(format!(
                "up to {} Alerts per budget are supported",
                MAX_BUDGET_ALERTS
            )));
        }

        for alert in &self.alerts {
            if alert.addresses.is_empty() {
                return Err(AppError::BadRequest(
                    "at least 1 email address is required per alert".to_string(),
                ));
            }
            if alert.addresses.len() > MAX_ALERT_ADDRESSES {
                return Err(AppError::BadRequest(format!(
                    "up to {} email addresses per alert are supported",
                    MAX_ALERT_ADDRESSES
                )));
            }
            check_value(
                "comparison operator",
                &alert.comparison_operator,
                ComparisonOperator::values(),
            )?;
            check_value(
                "notification type",
                &alert.notification_type,
                NotificationType::values(),
            )?;
            check_value(
                "threshold type",
                &alert.threshold_type,
                ThresholdType::values(),
            )?;
        }

        let name = format!("{}{}-01", budget_prefix(org, space), time_unit);

        Ok(BudgetPlan {
            account_id: account_id.to_string(),
            topic: BudgetTopic::for_budget(account_id, &name),
            space_filter: format!("user:{}${}", SPACE_TAG_KEY, space),
            name,
            amount: self.amount.trim().to_string(),
            time_unit,
            alerts: self.alerts,
            tags: self.tags,
        })
    }
}

fn check_value(kind: &str, value: &str, valid: &[&str]) -> Result<(), AppError> {
    if valid.contains(&value) {
        return Ok(());
    }
    Err(AppError::BadRequest(format!(
        "invalid {} '{}', valid values {}",
        kind,
        value,
        valid.join(", ")
    )))
}

impl From<&BudgetPlan> for BudgetResponse {
    fn from(plan: &BudgetPlan) -> Self {
        Self {
            amount: plan.amount.clone(),
            name: plan.name.clone(),
            time_unit: plan.time_unit.clone(),
            alerts: plan.alerts.clone(),
        }
    }
}

#[async_trait]
pub trait BudgetService: Send + Sync {
    /// Creates the budget and its notification topic.
    async fn create_budget(
        &self,
        credentials: &ScopedCredentials,
        plan: &BudgetPlan,
    ) -> Result<(), AppError>;

    /// Names of the account's budgets that start with `prefix`.
    async fn list_budgets(
        &self,
        credentials: &ScopedCredentials,
        account_id: &str,
        prefix: &str,
    ) -> Result<Vec<String>, AppError>;

    async fn describe_budget(
        &self,
        credentials: &ScopedCredentials,
        account_id: &str,
        name: &str,
    ) -> Result<BudgetResponse, AppError>;

    /// Deletes the notification topic, then the budget.
    async fn delete_budget(
        &self,
        credentials: &ScopedCredentials,
        account_id: &str,
        name: &str,
    ) -> Result<(), AppError>;
}

pub struct AwsBudgets {
    base: SdkConfig,
}

impl AwsBudgets {
    pub fn new(base: SdkConfig) -> Self {
        Self { base }
    }

    fn clients(
        &self,
        credentials: &ScopedCredentials,
    ) -> (aws_sdk_budgets::Client, aws_sdk_sns::Client) {
        let config = scoped_config(&self.base, credentials, BUDGETS_REGION);
        (
            aws_sdk_budgets::Client::new(&config),
            aws_sdk_sns::Client::new(&config),
        )
    }
}

#[async_trait]
impl BudgetService for AwsBudgets {
    #[tracing::instrument(skip(self, credentials, plan), fields(budget = %plan.name))]
    async fn create_budget(
        &self,
        credentials: &ScopedCredentials,
        plan: &BudgetPlan,
    ) -> Result<(), AppError> {
        let (budgets, sns) = self.clients(credentials);

        let budget = budget_from(plan)?;
        let tags = plan
            .tags
            .iter()
            .map(|tag| {
                aws_sdk_sns::types::Tag::builder()
                    .key(&tag.key)
                    .value(&tag.value)
                    .build()
                    .map_err(invalid_input)
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!("[cost-api] creating sns topic {}", plan.topic.name);

        let topic = sns
            .create_topic()
            .name(&plan.topic.name)
            .attributes("Policy", plan.topic.policy())
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| classify_sdk_error("failed to create sns topic", e))?;
        let topic_arn = topic.topic_arn().unwrap_or(&plan.topic.arn).to_string();

        let notifications = notifications_from(plan, &topic_arn)?;

        tracing::info!("[cost-api] creating budget {}", plan.name);

        let created = budgets
            .create_budget()
            .account_id(&plan.account_id)
            .budget(budget)
            .set_notifications_with_subscribers(Some(notifications))
            .send()
            .await;

        if let Err(e) = created {
            let error = classify_sdk_error("failed to create budget", e);
            if let Err(cleanup) = sns.delete_topic().topic_arn(&topic_arn).send().await {
                tracing::warn!(
                    "[cost-api] failed to remove sns topic {} after budget failure: {}",
                    topic_arn,
                    aws_sdk_sns::error::DisplayErrorContext(&cleanup)
                );
            }
            return Err(error);
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, credentials))]
    async fn list_budgets(
        &self,
        credentials: &ScopedCredentials,
        account_id: &str,
        prefix: &str,
    ) -> Result<Vec<String>, AppError> {
        let (budgets, _) = self.clients(credentials);

        let mut names = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = budgets
                .describe_budgets()
                .account_id(account_id)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| classify_sdk_error("failed to describe budgets", e))?;

            names.extend(
                output
                    .budgets()
                    .iter()
                    .map(|budget| budget.budget_name())
                    .filter(|name| name.starts_with(prefix))
                    .map(str::to_string),
            );

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        tracing::debug!("[cost-api] found {} budget(s) with prefix {}", names.len(), prefix);

        Ok(names)
    }

    #[tracing::instrument(skip(self, credentials))]
    async fn describe_budget(
        &self,
        credentials: &ScopedCredentials,
        account_id: &str,
        name: &str,
    ) -> Result<BudgetResponse, AppError> {
        let (budgets, _) = self.clients(credentials);

        let output = budgets
            .describe_budget()
            .account_id(account_id)
            .budget_name(name)
            .send()
            .await
            .map_err(|e| classify_sdk_error("failed to describe budget", e))?;
        let budget = output
            .budget()
            .ok_or_else(|| AppError::NotFound(format!("budget {} not found", name)))?;

        let notifications = budgets
            .describe_notifications_for_budget()
            .account_id(account_id)
            .budget_name(name)
            .max_results(BUDGETS_DESCRIBE_PAGE_SIZE)
            .send()
            .await
            .map_err(|e| classify_sdk_error("failed to describe budget notifications", e))?;

        let mut alerts = Vec::new();
        for notification in notifications.notifications() {
            let subscribers = budgets
                .describe_subscribers_for_notification()
                .account_id(account_id)
                .budget_name(name)
                .notification(notification.clone())
                .max_results(BUDGETS_DESCRIBE_PAGE_SIZE)
                .send()
                .await
                .map_err(|e| classify_sdk_error("failed to describe budget subscribers", e))?;
            alerts.push(alert_from(notification, subscribers.subscribers()));
        }

        Ok(response_from(budget, alerts))
    }

    #[tracing::instrument(skip(self, credentials))]
    async fn delete_budget(
        &self,
        credentials: &ScopedCredentials,
        account_id: &str,
        name: &str,
    ) -> Result<(), AppError> {
        let (budgets, sns) = self.clients(credentials);
        let topic = BudgetTopic::for_budget(account_id, name);

        tracing::info!("[cost-api] deleting sns topic {}", topic.arn);

        sns.delete_topic()
            .topic_arn(&topic.arn)
            .send()
            .await
            .map_err(|e| classify_sdk_error("failed to delete sns topic", e))?;

        tracing::info!("[cost-api] deleting budget {} in account {}", name, account_id);

        budgets
            .delete_budget()
            .account_id(account_id)
            .budget_name(name)
            .send()
            .await
            .map_err(|e| classify_sdk_error("failed to delete budget", e))?;

        Ok(())
    }
}

fn invalid_input(error: impl fmt::Display) -> AppError {
    tracing::error!("[cost-api] failed to build budget input: {}", error);
    AppError::InternalServerError
}

fn budget_from(plan: &BudgetPlan) -> Result<Budget, AppError> {
    let limit = Spend::builder()
        .amount(&plan.amount)
        .unit(BUDGET_CURRENCY)
        .build()
        .map_err(invalid_input)?;

    // actual spend after discounts, without credits, refunds, tax or support
    let cost_types = CostTypes::builder()
        .include_credit(false)
        .include_discount(true)
        .include_other_subscription(false)
        .include_recurring(true)
        .include_refund(false)
        .include_subscription(true)
        .include_support(false)
        .include_tax(false)
        .include_upfront(false)
        .use_amortized(false)
        .use_blended(false)
        .build();

    Budget::builder()
        .budget_name(&plan.name)
        .budget_limit(limit)
        .budget_type(BudgetType::Cost)
        .cost_filters("TagKeyValue", vec![plan.space_filter.clone()])
        .cost_types(cost_types)
        .time_unit(TimeUnit::from(plan.time_unit.as_str()))
        .build()
        .map_err(invalid_input)
}

fn notifications_from(
    plan: &BudgetPlan,
    topic_arn: &str,
) -> Result<Vec<NotificationWithSubscribers>, AppError> {
    plan.alerts
        .iter()
        .map(|alert| {
            let notification = Notification::builder()
                .comparison_operator(ComparisonOperator::from(alert.comparison_operator.as_str()))
                .notification_type(NotificationType::from(alert.notification_type.as_str()))
                .threshold(alert.threshold)
                .threshold_type(ThresholdType::from(alert.threshold_type.as_str()))
                .build()
                .map_err(invalid_input)?;

            let subscribers = std::iter::once((SubscriptionType::Sns, topic_arn))
                .chain(
                    alert
                        .addresses
                        .iter()
                        .map(|address| (SubscriptionType::Email, address.as_str())),
                )
                .map(|(kind, address)| {
                    Subscriber::builder()
                        .subscription_type(kind)
                        .address(address)
                        .build()
                        .map_err(invalid_input)
                })
                .collect::<Result<Vec<_>, _>>()?;

            NotificationWithSubscribers::builder()
                .notification(notification)
                .set_subscribers(Some(subscribers))
                .build()
                .map_err(invalid_input)
        })
        .collect()
}

/// The topic subscriber is an ARN and is left out of the alert's addresses.
fn alert_from(notification: &Notification, subscribers: &[Subscriber]) -> BudgetAlert {
    BudgetAlert {
        addresses: subscribers
            .iter()
            .map(Subscriber::address)
            .filter(|address| !address.starts_with("arn:"))
            .map(str::to_string)
            .collect(),
        comparison_operator: notification.comparison_operator().as_str().to_string(),
        notification_state: notification
            .notification_state()
            .map(|state| state.as_str().to_string())
            .unwrap_or_default(),
        notification_type: notification.notification_type().as_str().to_string(),
        threshold: notification.threshold(),
        threshold_type: notification
            .threshold_type()
            .map(|kind| kind.as_str())
            .unwrap_or(DEFAULT_THRESHOLD_TYPE)
            .to_string(),
    }
}

fn response_from(budget: &Budget, alerts: Vec<BudgetAlert>) -> BudgetResponse {
    BudgetResponse {
        amount: budget
            .budget_limit()
            .map(|limit| limit.amount().to_string())
            .unwrap_or_default(),
        name: budget.budget_name().to_string(),
        time_unit: budget.time_unit().as_str().to_string(),
        alerts,
    }
}
