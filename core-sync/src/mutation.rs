//! Seam between the queue and the backend.

use async_trait::async_trait;
use core_api::{ResourceApi, ResourceKind};
use serde::de::IgnoredAny;
use serde_json::Value;

/// Create, update and delete on a domain collection.
#[async_trait]
pub trait MutationApi: Send + Sync {
    async fn create(&self, resource: ResourceKind, data: &Value) -> core_api::Result<()>;

    async fn update(&self, resource: ResourceKind, id: &str, data: &Value) -> core_api::Result<()>;

    async fn delete(&self, resource: ResourceKind, id: &str) -> core_api::Result<()>;
}

#[async_trait]
impl MutationApi for ResourceApi {
    async fn create(&self, resource: ResourceKind, data: &Value) -> core_api::Result<()> {
        let _: IgnoredAny = ResourceApi::create::<Value, IgnoredAny>(self, resource, data).await?;
        Ok(())
    }

    async fn update(&self, resource: ResourceKind, id: &str, data: &Value) -> core_api::Result<()> {
        let _: IgnoredAny =
            ResourceApi::update::<Value, IgnoredAny>(self, resource, id, data).await?;
        Ok(())
    }

    async fn delete(&self, resource: ResourceKind, id: &str) -> core_api::Result<()> {
        ResourceApi::delete(self, resource, id).await
    }
}
