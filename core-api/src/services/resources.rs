//! Mood, journal and assessment collections.

use crate::cache::CacheTtl;
use crate::client::{ApiClient, RequestOptions};
use crate::error::Result;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain collections that accept create, update and delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    MoodEntries,
    JournalEntries,
    Assessments,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::MoodEntries,
        ResourceKind::JournalEntries,
        ResourceKind::Assessments,
    ];

    pub fn path(self) -> &'static str {
        match self {
            ResourceKind::MoodEntries => "/mood/entries",
            ResourceKind::JournalEntries => "/journal/entries",
            ResourceKind::Assessments => "/assessments",
        }
    }

    /// Collection whose path occurs anywhere in `endpoint`.
    pub fn from_endpoint(endpoint: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| endpoint.contains(kind.path()))
    }

    fn item_path(self, id: &str) -> String {
        format!("{}/{}", self.path(), id)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// CRUD over the domain collections. Listing is cached for a week; every
/// mutation invalidates the collection.
#[derive(Clone)]
pub struct ResourceApi {
    client: ApiClient,
}

impl ResourceApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn list<T: DeserializeOwned>(&self, kind: ResourceKind) -> Result<Vec<T>> {
        self.client
            .get(kind.path(), RequestOptions::new().cache_ttl(CacheTtl::Week))
            .await
    }

    pub async fn create<B, T>(&self, kind: ResourceKind, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.client.post(kind.path(), body).await
    }

    pub async fn update<B, T>(&self, kind: ResourceKind, id: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.client.put(&kind.item_path(id), body).await
    }

    pub async fn delete(&self, kind: ResourceKind, id: &str) -> Result<()> {
        let _: IgnoredAny = self.client.delete(&kind.item_path(id)).await?;
        Ok(())
    }
}
