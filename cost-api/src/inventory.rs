// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Inventory of the resources tagged with a space id.

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_resourcegroupstagging::types::{ResourceTagMapping, TagFilter};
use serde::{Deserialize, Serialize};

use crate::constants::{INVENTORY_PAGE_SIZE, NAME_TAG_KEY, SPACE_TAG_KEY};
use crate::errors::AppError;
use crate::models::ScopedCredentials;
use crate::upstream::{classify_sdk_error, scoped_config};

/// One tagged resource, with its ARN broken into parts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub name: String,
    pub arn: String,
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account_id: String,
    pub resource: String,
}

impl InventoryItem {
    /// Builds an item from a resource ARN. An ARN that cannot be parsed is
    /// kept as is with the other parts left empty.
    pub fn new(arn: &str, name: Option<&str>) -> Self {
        let mut item = InventoryItem {
            name: name.unwrap_or_default().to_string(),
            arn: arn.to_string(),
            ..Default::default()
        };

        match arn.splitn(6, ':').collect::<Vec<_>>()[..] {
            ["arn", partition, service, region, account_id, resource]
                if !partition.is_empty() && !service.is_empty() && !resource.is_empty() =>
            {
                item.partition = partition.to_string();
                item.service = service.to_string();
                item.region = region.to_string();
                item.account_id = account_id.to_string();
                item.resource = resource.to_string();
            }
            _ => tracing::warn!("[cost-api] failed to parse resource ARN: {}", arn),
        }

        item
    }
}

#[async_trait]
pub trait ResourceInventory: Send + Sync {
    /// Every resource in `region` tagged with the space id.
    async fn list_space_resources(
        &self,
        credentials: &ScopedCredentials,
        region: &str,
        space_id: &str,
    ) -> Result<Vec<InventoryItem>, AppError>;
}

pub struct AwsResourceInventory {
    base: SdkConfig,
}

impl AwsResourceInventory {
    pub fn new(base: SdkConfig) -> Self {
        Self { base }
    }
}

#[async_trait]
impl ResourceInventory for AwsResourceInventory {
    #[tracing::instrument(skip(self, credentials), fields(scope = %credentials.scope))]
    async fn list_space_resources(
        &self,
        credentials: &ScopedCredentials,
        region: &str,
        space_id: &str,
    ) -> Result<Vec<InventoryItem>, AppError> {
        let config = scoped_config(&self.base, credentials, region);
        let client = aws_sdk_resourcegroupstagging::Client::new(&config);
        let filter = TagFilter::builder()
            .key(SPACE_TAG_KEY)
            .values(space_id)
            .build();

        let mut items = Vec::new();
        let mut pagination_token: Option<String> = None;

        loop {
            let output = client
                .get_resources()
                .tag_filters(filter.clone())
                .resources_per_page(INVENTORY_PAGE_SIZE)
                .set_pagination_token(pagination_token.take())
                .send()
                .await
                .map_err(|e| classify_sdk_error("failed to list resources with tags", e))?;

            items.extend(output.resource_tag_mapping_list().iter().map(convert_mapping));

            match output.pagination_token() {
                Some(token) if !token.is_empty() => pagination_token = Some(token.to_string()),
                _ => break,
            }
        }

        tracing::debug!("[cost-api] {} resource(s) in space {}", items.len(), space_id);

        Ok(items)
    }
}

fn convert_mapping(mapping: &ResourceTagMapping) -> InventoryItem {
    let name = mapping
        .tags()
        .iter()
        .find(|tag| tag.key() == NAME_TAG_KEY)
        .map(|tag| tag.value());
    InventoryItem::new(mapping.resource_arn().unwrap_or_default(), name)
}
