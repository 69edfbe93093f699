// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

use crate::constants::{
    DEFAULT_CACHE_EXPIRE_TIME, DEFAULT_CACHE_PURGE_TIME, DEFAULT_REGION, DEFAULT_REQUEST_TIMEOUT,
};
use crate::errors::AppError;

/// A target account the API can report on.
///
/// Parsed from `name=<name>,role=<role arn>[,external_id=<id>][,region=<region>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountConfig {
    pub name: String,
    pub role_arn: String,
    pub external_id: Option<String>,
    pub region: Option<String>,
}

impl FromStr for AccountConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut name = None;
        let mut role_arn = None;
        let mut external_id = None;
        let mut region = None;

        for field in s.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| format!("invalid account field '{}', expected key=value", field))?;
            let value = value.trim().to_string();
            match key.trim() {
                "name" => name = Some(value),
                "role" => role_arn = Some(value),
                "external_id" => external_id = Some(value),
                "region" => region = Some(value),
                other => return Err(format!("unknown account field '{}'", other)),
            }
        }

        let name = name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| "account name is required".to_string())?;
        let role_arn = role_arn
            .filter(|r| r.starts_with("arn:") && arn_account_id(r).is_some())
            .ok_or_else(|| format!("account {} requires a role arn", name))?;

        Ok(Self {
            name,
            role_arn,
            external_id: external_id.filter(|e| !e.is_empty()),
            region: region.filter(|r| !r.is_empty()),
        })
    }
}

impl AccountConfig {
    /// AWS account id, taken from the role ARN.
    pub fn account_id(&self) -> Option<&str> {
        arn_account_id(&self.role_arn)
    }
}

fn arn_account_id(arn: &str) -> Option<&str> {
    arn.split(':').nth(4).filter(|id| !id.is_empty())
}

#[derive(Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct CostApiOptions {
    #[arg(long, default_value = "127.0.0.1", env("COST_API_HTTP_HOST"))]
    pub host: String,
    #[arg(long, default_value = "8080", env("COST_API_HTTP_PORT"))]
    pub port: u16,
    /// Org discriminator used in every cache key and session tag.
    #[arg(long, env("COST_API_ORG"))]
    pub org: String,
    #[arg(long, default_value = DEFAULT_CACHE_EXPIRE_TIME, env("COST_API_CACHE_EXPIRE_TIME"), value_parser = humantime::parse_duration)]
    pub cache_expire_time: Duration,
    #[arg(long, default_value = DEFAULT_CACHE_PURGE_TIME, env("COST_API_CACHE_PURGE_TIME"), value_parser = humantime::parse_duration)]
    pub cache_purge_time: Duration,
    #[arg(long, default_value = DEFAULT_REQUEST_TIMEOUT, env("COST_API_REQUEST_TIMEOUT"), value_parser = humantime::parse_duration)]
    pub request_timeout: Duration,
    /// Default region for accounts that do not set one.
    #[arg(long, default_value = DEFAULT_REGION, env("COST_API_REGION"))]
    pub region: String,
    #[arg(long = "account", env("COST_API_ACCOUNTS"), value_delimiter = ';')]
    pub accounts: Vec<AccountConfig>,
    /// Managed policies attached to every assumed role session.
    #[arg(long = "policy-arn", env("COST_API_POLICY_ARNS"), value_delimiter = ',')]
    pub policy_arns: Vec<String>,
    /// Salt for image cache keys; a random token is generated when unset.
    #[arg(long, env("COST_API_HASHING_TOKEN"), hide_env_values = true)]
    pub hashing_token: Option<String>,
}

impl CostApiOptions {
    /// Checks the settings that clap cannot express.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.org.trim().is_empty() {
            return Err(AppError::ConfigError("org must not be empty".to_string()));
        }
        if self.cache_expire_time.is_zero() {
            return Err(AppError::ConfigError(
                "cache expire time must be greater than zero".to_string(),
            ));
        }
        if self.cache_purge_time.is_zero() {
            return Err(AppError::ConfigError(
                "cache purge time must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "request timeout must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            if !seen.insert(account.name.as_str()) {
                return Err(AppError::ConfigError(format!(
                    "account {} is configured more than once",
                    account.name
                )));
            }
        }

        Ok(())
    }

    pub fn account(&self, name: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|account| account.name == name)
    }

    /// Region used for an account's sessions and metric widgets.
    pub fn account_region<'a>(&'a self, account: &'a AccountConfig) -> &'a str {
        account.region.as_deref().unwrap_or(&self.region)
    }
}

// Custom Debug implementation to keep the hashing token out of the logs
impl fmt::Debug for CostApiOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CostApiOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("org", &self.org)
            .field("cache_expire_time", &self.cache_expire_time)
            .field("cache_purge_time", &self.cache_purge_time)
            .field("request_timeout", &self.request_timeout)
            .field("region", &self.region)
            .field("accounts", &self.accounts)
            .field("policy_arns", &self.policy_arns)
            .field(
                "hashing_token",
                &self.hashing_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Default for CostApiOptions {
    fn default() -> Self {
        CostApiOptions {
            host: "127.0.0.1".to_string(),
            port: 8080,
            org: "localdev".to_string(),
            cache_expire_time: Duration::from_secs(4 * 60 * 60),
            cache_purge_time: Duration::from_secs(15 * 60),
            request_timeout: Duration::from_secs(15),
            region: DEFAULT_REGION.to_string(),
            accounts: Vec::new(),
            policy_arns: Vec::new(),
            hashing_token: None,
        }
    }
}
