// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use anyhow::Context;
use aws_config::Region;
use clap::Parser;
use cost_api::application::{AppState, Application};
use cost_api::configuration::CostApiOptions;
use cost_api::credentials::StsRoleExchange;
use cost_api::upstream::{Upstreams, load_base_config};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("[cost-api] init");

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        // this needs to be set to remove duplicated information in the log.
        .with_current_span(false)
        // this needs to be set to false, otherwise ANSI color codes will
        // show up in a confusing manner in CloudWatch logs.
        .with_ansi(false)
        // disabling time is handy because CloudWatch will add the ingestion time.
        .without_time()
        // remove the name of the function from every log entry
        .with_target(false)
        .init();

    // get configuration options from arguments and environment variables
    let options = CostApiOptions::parse();

    tracing::info!("[cost-api] {:?}", &options);

    options.validate().map_err(|e| {
        tracing::error!("[cost-api] invalid configuration: {}", e);
        e
    })?;

    if options.accounts.is_empty() {
        tracing::warn!("[cost-api] no accounts configured, every account request will be not found");
    }

    let base_config = load_base_config(options.request_timeout).await;
    let sts_config = base_config
        .to_builder()
        .region(Region::new(options.region.clone()))
        .build();
    let exchange = Arc::new(StsRoleExchange::new(
        aws_sdk_sts::Client::new(&sts_config),
        options.region.clone(),
    ));
    let upstreams = Upstreams::aws(&base_config);

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install the prometheus recorder")?;

    let state = Arc::new(AppState::new(options, exchange, upstreams, metrics));

    let application = Application::build(state)
        .await
        .context("failed to start the http server")?;

    application
        .run_until_stopped()
        .await
        .context("http server stopped unexpectedly")
}
