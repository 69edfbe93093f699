// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Per-account caches of upstream results.
//!
//! Every configured account owns one [`TtlCache`] of [`CachedResult`] values.
//! Handlers go through [`get_or_fetch`], which serves a live entry together
//! with its remaining lifetime or runs the upstream fetch and stores the
//! result with the cache's default TTL. Failed fetches are never stored.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use tokio::time::Instant;

use crate::cache::TtlCache;
use crate::errors::AppError;
use crate::models::CostResult;
use crate::optimizer::InstanceRecommendation;

/// A value stored in a result cache.
#[derive(Debug, Clone)]
pub enum CachedResult {
    Cost(Arc<Vec<CostResult>>),
    Image(Bytes),
    Recommendations(Arc<Vec<InstanceRecommendation>>),
}

impl CachedResult {
    fn kind(&self) -> &'static str {
        match self {
            CachedResult::Cost(_) => "cost report",
            CachedResult::Image(_) => "image",
            CachedResult::Recommendations(_) => "recommendations",
        }
    }
}

/// Conversion between a concrete result type and its cached representation.
pub trait CacheValue: Clone + Sized {
    const KIND: &'static str;

    fn into_cached(self) -> CachedResult;

    /// Fails with [`AppError::CacheConflict`] when the entry holds another kind.
    fn from_cached(cached: CachedResult) -> Result<Self, AppError>;
}

fn conflict<T: CacheValue>(cached: &CachedResult) -> AppError {
    AppError::CacheConflict(format!("expected {}, found {}", T::KIND, cached.kind()))
}

impl CacheValue for Arc<Vec<CostResult>> {
    const KIND: &'static str = "cost report";

    fn into_cached(self) -> CachedResult {
        CachedResult::Cost(self)
    }

    fn from_cached(cached: CachedResult) -> Result<Self, AppError> {
        match cached {
            CachedResult::Cost(results) => Ok(results),
            other => Err(conflict::<Self>(&other)),
        }
    }
}

impl CacheValue for Bytes {
    const KIND: &'static str = "image";

    fn into_cached(self) -> CachedResult {
        CachedResult::Image(self)
    }

    fn from_cached(cached: CachedResult) -> Result<Self, AppError> {
        match cached {
            CachedResult::Image(image) => Ok(image),
            other => Err(conflict::<Self>(&other)),
        }
    }
}

impl CacheValue for Arc<Vec<InstanceRecommendation>> {
    const KIND: &'static str = "recommendations";

    fn into_cached(self) -> CachedResult {
        CachedResult::Recommendations(self)
    }

    fn from_cached(cached: CachedResult) -> Result<Self, AppError> {
        match cached {
            CachedResult::Recommendations(recommendations) => Ok(recommendations),
            other => Err(conflict::<Self>(&other)),
        }
    }
}

/// Whether a response was served from cache and for how much longer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatus {
    pub hit: bool,
    pub remaining: Option<Duration>,
}

impl CacheStatus {
    pub fn miss() -> Self {
        Self {
            hit: false,
            remaining: None,
        }
    }

    pub fn hit(remaining: Option<Duration>) -> Self {
        Self {
            hit: true,
            remaining,
        }
    }
}

/// Result caches for every configured account, created once at startup.
#[derive(Clone, Debug)]
pub struct ResultCaches {
    caches: Arc<HashMap<String, TtlCache<CachedResult>>>,
}

impl ResultCaches {
    /// Creates one cache per account. A zero `purge_interval` disables the
    /// background purge.
    pub fn new<I, S>(accounts: I, default_ttl: Duration, purge_interval: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let caches = accounts
            .into_iter()
            .map(|account| {
                (
                    account.into(),
                    TtlCache::with_janitor(default_ttl, purge_interval),
                )
            })
            .collect();
        Self {
            caches: Arc::new(caches),
        }
    }

    pub fn for_account(&self, account: &str) -> Result<&TtlCache<CachedResult>, AppError> {
        self.caches
            .get(account)
            .ok_or_else(|| AppError::NotFound(format!("account {} not found", account)))
    }
}

/// Serves `key` from `cache`, or runs `fetch` and caches its result.
pub async fn get_or_fetch<T, F, Fut>(
    cache: &TtlCache<CachedResult>,
    key: &str,
    fetch: F,
) -> Result<(T, CacheStatus), AppError>
where
    T: CacheValue,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    if let Some((cached, expires_at)) = cache.get_with_expiration(key) {
        let value = T::from_cached(cached).map_err(|e| {
            tracing::error!("[cost-api] cached value for {} is unusable: {}", key, e);
            e
        })?;
        let remaining = expires_at.map(|at| at.saturating_duration_since(Instant::now()));
        tracing::debug!("[cost-api] cache hit for {}", key);
        ::metrics::counter!("cost_api_result_cache_total", "kind" => T::KIND, "result" => "hit")
            .increment(1);
        return Ok((value, CacheStatus::hit(remaining)));
    }

    tracing::debug!("[cost-api] cache miss for {}", key);
    ::metrics::counter!("cost_api_result_cache_total", "kind" => T::KIND, "result" => "miss")
        .increment(1);
    let value = fetch().await?;
    cache.set_default(key, value.clone().into_cached());

    Ok((value, CacheStatus::miss()))
}
