// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! # Cost API
//!
//! A multi-tenant proxy in front of AWS Cost Explorer and CloudWatch.
//!
//! The API assumes a role in each configured account and re-exposes cost and
//! usage reports, space budgets, instance right-sizing recommendations,
//! tagged resource inventories and rendered metric graphs, scoped by "space"
//! (a tenant grouping tagged on AWS resources).
//!
//! ## Architecture
//!
//! ```text
//! Client -> HTTP API -> result cache -> credential broker -> STS
//!                            |
//!                            +-> Cost Explorer (cost reports)
//!                            +-> CloudWatch (metric widget images)
//!                            +-> Compute Optimizer (recommendations)
//!
//! Client -> HTTP API -> credential broker -> Budgets, SNS, tagging API
//! ```
//!
//! Every request is normalized and fingerprinted. A fresh cached result is
//! returned with its remaining lifetime; otherwise the broker supplies
//! credentials for the account (reusing a cached role session when it can),
//! the upstream service is queried and the result is cached.
//!
//! ## Modules
//!
//! - [`application`]: HTTP server setup with Axum, timeouts and request tracing
//! - [`budgets`]: space budgets and their alert topics
//! - [`cache`]: generic TTL cache with a background purge task
//! - [`configuration`]: CLI argument parsing with clap
//! - [`constants`]: configuration constants for the application
//! - [`credentials`]: STS role sessions and their cache
//! - [`errors`]: application error types with HTTP response mapping
//! - [`fingerprint`]: canonical cache keys for upstream requests
//! - [`inventory`]: resources tagged with a space
//! - [`metrics`]: typed CloudWatch metric widget requests
//! - [`models`]: request/response types with validation
//! - [`optimizer`]: Compute Optimizer instance recommendations
//! - [`results`]: per-account result caches
//! - [`routes`]: HTTP route handlers
//! - [`timewindow`]: reporting window normalization
//! - [`upstream`]: Cost Explorer and CloudWatch clients
//!
//! ## Usage
//!
//! ```bash
//! cost-api --org acme \
//!     --account name=prod,role=arn:aws:iam::123456789012:role/SpinupCost \
//!     --cache-expire-time 4h --cache-purge-time 15m
//! ```
//!
//! ## Security Considerations
//!
//! - Credentials are zeroized on drop and never logged
//! - Image cache keys are salted hashes and do not reveal request parameters
//! - Upstream authorization failures are returned as a generic access denied

pub mod application;
pub mod budgets;
pub mod cache;
pub mod configuration;
pub mod constants;
pub mod credentials;
pub mod errors;
pub mod fingerprint;
pub mod inventory;
pub mod metrics;
pub mod models;
pub mod optimizer;
pub mod results;
pub mod routes;
pub mod timewindow;
pub mod upstream;
