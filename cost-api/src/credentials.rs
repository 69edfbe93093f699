// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Cross-account role sessions.
//!
//! [`CredentialBroker`] hands out temporary credentials for a role, scoped by
//! an optional external id, inline session policy and managed policy ARNs.
//! Sessions are cached under a key derived from the org and every scoping
//! input, so repeated requests for the same scope reuse one STS session until
//! the credential cache's own TTL runs out.
//!
//! The cache window ([`CREDENTIAL_CACHE_TTL`]) is fixed and independent of the
//! expiration STS reports; it is shorter than the session duration, so a
//! session is re-exchanged before it lapses upstream. A cached session whose
//! reported expiration has passed is never returned.
//!
//! Two concurrent first-time requests for the same scope may both perform an
//! exchange; the later result overwrites the earlier one in the cache.
//!
//! [`CREDENTIAL_CACHE_TTL`]: crate::constants::CREDENTIAL_CACHE_TTL

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use async_trait::async_trait;
use aws_sdk_sts::error::DisplayErrorContext;
use aws_sdk_sts::types::{PolicyDescriptorType, Tag};
use uuid::Uuid;
use uuid::fmt::Hyphenated;

use crate::cache::TtlCache;
use crate::constants::{MAX_SESSION_NAME_LENGTH, SESSION_DURATION_SECONDS, SESSION_ORG_TAG_KEY};
use crate::errors::AppError;
use crate::fingerprint::Fingerprint;
use crate::models::ScopedCredentials;

/// Parameters of a single credential exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct AssumeRoleInput {
    pub role_arn: String,
    pub session_name: String,
    pub duration_seconds: i32,
    pub external_id: Option<String>,
    pub policy: Option<String>,
    pub policy_arns: Vec<String>,
    pub tags: Vec<(String, String)>,
}

/// Performs the actual credential exchange against the identity provider.
#[async_trait]
pub trait RoleExchange: Send + Sync {
    /// Exchanges the caller's identity for a role session. Any failure is
    /// reported as [`AppError::Forbidden`].
    async fn assume_role(&self, input: AssumeRoleInput) -> Result<ScopedCredentials, AppError>;
}

/// [`RoleExchange`] backed by AWS STS.
pub struct StsRoleExchange {
    client: aws_sdk_sts::Client,
    region: String,
}

impl StsRoleExchange {
    pub fn new(client: aws_sdk_sts::Client, region: String) -> Self {
        Self { client, region }
    }
}

#[async_trait]
impl RoleExchange for StsRoleExchange {
    #[tracing::instrument(skip(self, input), fields(role = %input.role_arn, session = %input.session_name))]
    async fn assume_role(&self, input: AssumeRoleInput) -> Result<ScopedCredentials, AppError> {
        let tags = input
            .tags
            .iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                tracing::error!("[cost-api] invalid session tag: {}", e);
                AppError::InternalServerError
            })?;

        let policy_arns = (!input.policy_arns.is_empty()).then(|| {
            input
                .policy_arns
                .iter()
                .map(|arn| PolicyDescriptorType::builder().arn(arn).build())
                .collect::<Vec<_>>()
        });

        let output = self
            .client
            .assume_role()
            .role_arn(&input.role_arn)
            .role_session_name(&input.session_name)
            .duration_seconds(input.duration_seconds)
            .set_external_id(input.external_id.clone())
            .set_policy(input.policy.clone())
            .set_policy_arns(policy_arns)
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| {
                let detail = DisplayErrorContext(&e).to_string();
                tracing::error!("[cost-api] failed to assume role {}: {}", input.role_arn, detail);
                AppError::Forbidden(format!("failed to assume role {}: {}", input.role_arn, detail))
            })?;

        let credentials = output.credentials().ok_or_else(|| {
            AppError::Forbidden(format!("no credentials returned for role {}", input.role_arn))
        })?;

        Ok(ScopedCredentials {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            region: self.region.clone(),
            expiration: SystemTime::try_from(*credentials.expiration()).ok(),
            scope: String::new(),
        })
    }
}

/// Caching front for a [`RoleExchange`].
pub struct CredentialBroker {
    org: String,
    exchange: Arc<dyn RoleExchange>,
    cache: TtlCache<Arc<ScopedCredentials>>,
}

impl CredentialBroker {
    pub fn new(
        org: String,
        exchange: Arc<dyn RoleExchange>,
        cache: TtlCache<Arc<ScopedCredentials>>,
    ) -> Self {
        Self {
            org,
            exchange,
            cache,
        }
    }

    /// Returns credentials for `role_arn` under the given scope, reusing a
    /// cached session when one is still valid.
    #[tracing::instrument(skip(self, inline_policy), fields(role = %role_arn))]
    pub async fn assume_role(
        &self,
        external_id: Option<&str>,
        role_arn: &str,
        inline_policy: Option<&str>,
        policy_arns: &[String],
    ) -> Result<Arc<ScopedCredentials>, AppError> {
        let started = Instant::now();
        let key = self.cache_key(external_id, role_arn, inline_policy, policy_arns);

        tracing::debug!("[cost-api] checking for session with cache key: '{}'", key);

        if let Some((credentials, expires_at)) = self.cache.get_with_expiration(&key)
            && !credentials.is_expired(SystemTime::now())
        {
            tracing::info!(
                "[cost-api] using cached session (cache expires in {:?})",
                expires_at.map(|at| at.saturating_duration_since(tokio::time::Instant::now()))
            );
            ::metrics::counter!("cost_api_role_sessions_total", "result" => "cached").increment(1);
            return Ok(credentials);
        }

        let input = AssumeRoleInput {
            role_arn: role_arn.to_string(),
            session_name: self.session_name(),
            duration_seconds: SESSION_DURATION_SECONDS,
            external_id: non_empty(external_id),
            policy: non_empty(inline_policy),
            policy_arns: policy_arns.to_vec(),
            tags: vec![(SESSION_ORG_TAG_KEY.to_string(), self.org.clone())],
        };

        let mut credentials = self.exchange.assume_role(input).await.map_err(|e| {
            ::metrics::counter!("cost_api_role_sessions_total", "result" => "failed").increment(1);
            e
        })?;
        credentials.scope = key.clone();
        ::metrics::counter!("cost_api_role_sessions_total", "result" => "exchanged").increment(1);

        tracing::info!(
            "[cost-api] got temporary credentials {} (expiration: {:?}) in {:?}",
            credentials.access_key_id,
            credentials.expiration,
            started.elapsed()
        );

        let credentials = Arc::new(credentials);
        self.cache.set_default(key, credentials.clone());

        Ok(credentials)
    }

    /// Cache key for a scope. Every scoping input is a separate fingerprint
    /// dimension, so no value can spill into a neighbouring one. Empty inputs
    /// are left out and policy ARNs are sorted.
    pub fn cache_key(
        &self,
        external_id: Option<&str>,
        role_arn: &str,
        inline_policy: Option<&str>,
        policy_arns: &[String],
    ) -> String {
        let fingerprint = Fingerprint::new("session", &self.org)
            .with("role", role_arn)
            .with_opt("ext", non_empty(external_id))
            .with_opt("policy", non_empty(inline_policy));

        if policy_arns.is_empty() {
            fingerprint.canonical()
        } else {
            fingerprint.with_list("arns", policy_arns).canonical()
        }
    }

    /// A unique session name within the org's namespace, limited to the
    /// characters IAM accepts.
    fn session_name(&self) -> String {
        let prefix: String = format!("spinup-{}-cost-api-", self.org)
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || "+=,.@-_".contains(c) {
                    c
                } else {
                    '-'
                }
            })
            .take(MAX_SESSION_NAME_LENGTH - Hyphenated::LENGTH)
            .collect();
        prefix + &Uuid::new_v4().to_string()
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}
