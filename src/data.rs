//! Host data collaborator: how the resolver and seeding read persisted
//! instances.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::errors::{SecError, SecResult};
use crate::models::id_string;
use crate::query::where_matches;

/// Read access to persisted model instances. Lookups made through this
/// trait are internal and bypass access checks.
#[async_trait]
pub trait InstanceSource: Send + Sync {
    async fn find_by_id(&self, model: &str, id: &str) -> SecResult<Option<Value>>;
}

/// JSON instances kept in memory, keyed by model name.
#[derive(Debug, Default)]
pub struct MemoryInstances {
    id_names: BTreeMap<String, String>,
    rows: RwLock<BTreeMap<String, Vec<Value>>>,
}

impl MemoryInstances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `id_name` instead of `id` as the primary key of `model`.
    pub fn with_id_name(mut self, model: impl Into<String>, id_name: impl Into<String>) -> Self {
        self.id_names.insert(model.into(), id_name.into());
        self
    }

    fn id_name(&self, model: &str) -> &str {
        self.id_names.get(model).map(String::as_str).unwrap_or("id")
    }

    /// Store an instance, replacing any existing one with the same id.
    pub async fn insert(&self, model: &str, instance: Value) -> SecResult<()> {
        let id_name = self.id_name(model);
        let id = instance
            .get(id_name)
            .and_then(id_string)
            .ok_or_else(|| SecError::data_source(format!("{model} instance has no {id_name}")))?;

        let mut rows = self.rows.write().await;
        let table = rows.entry(model.to_string()).or_default();
        table.retain(|row| row.get(id_name).and_then(id_string).as_deref() != Some(id.as_str()));
        table.push(instance);
        Ok(())
    }

    /// Instances of `model` matching a host `where` predicate.
    pub async fn find(&self, model: &str, predicate: Option<&Value>) -> Vec<Value> {
        let rows = self.rows.read().await;
        rows.get(model)
            .map(|table| {
                table
                    .iter()
                    .filter(|row| predicate.map(|p| where_matches(p, row)).unwrap_or(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn count(&self, model: &str, predicate: Option<&Value>) -> usize {
        self.find(model, predicate).await.len()
    }
}

#[async_trait]
impl InstanceSource for MemoryInstances {
    async fn find_by_id(&self, model: &str, id: &str) -> SecResult<Option<Value>> {
        let id_name = self.id_name(model);
        let rows = self.rows.read().await;
        Ok(rows.get(model).and_then(|table| {
            table
                .iter()
                .find(|row| row.get(id_name).and_then(id_string).as_deref() == Some(id))
                .cloned()
        }))
    }
}

/// Source with no instances; every lookup misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInstances;

#[async_trait]
impl InstanceSource for NoInstances {
    async fn find_by_id(&self, _model: &str, _id: &str) -> SecResult<Option<Value>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_replaces_by_id_and_find_filters() {
        let source = MemoryInstances::new();
        source.insert("Invoice", json!({"id": 1, "storeId": "A"})).await.unwrap();
        source.insert("Invoice", json!({"id": 2, "storeId": "B"})).await.unwrap();
        source.insert("Invoice", json!({"id": 1, "storeId": "B"})).await.unwrap();

        assert_eq!(source.count("Invoice", None).await, 2);
        assert_eq!(source.count("Invoice", Some(&json!({"storeId": "B"}))).await, 2);

        let found = source.find_by_id("Invoice", "1").await.unwrap().unwrap();
        assert_eq!(found["storeId"], "B");
        assert!(source.find_by_id("Invoice", "3").await.unwrap().is_none());
        assert!(source.find_by_id("Store", "1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn custom_id_name_is_used_for_lookup() {
        let source = MemoryInstances::new().with_id_name("Account", "uid");
        source.insert("Account", json!({"uid": "u1"})).await.unwrap();

        assert!(source.find_by_id("Account", "u1").await.unwrap().is_some());
        assert!(source.insert("Account", json!({"id": "u2"})).await.is_err());
    }
}
