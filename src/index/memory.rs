//! In-process search index.
//!
//! Keeps entities in a map keyed by id and ranks hits by how often the query
//! terms occur in the entity content. Used for dry runs and tests.

use super::{IndexEntity, SearchIndex, SearchQuery, SearchResults};
use crate::error::Result;

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryIndex {
    entities: RwLock<BTreeMap<String, IndexEntity>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored ids, sorted.
    pub async fn ids(&self) -> Vec<String> {
        self.entities.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn add(&self, entity: &IndexEntity) -> Result<()> {
        self.entities
            .write()
            .await
            .insert(entity.id.clone(), entity.clone());
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.entities.write().await.remove(id);
        Ok(())
    }

    async fn remove_all(&self) -> Result<()> {
        self.entities.write().await.clear();
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<IndexEntity>> {
        Ok(self.entities.read().await.get(id).cloned())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entities.read().await.len())
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResults> {
        let terms: Vec<String> = query
            .text
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();

        let mut scored: Vec<(usize, IndexEntity)> = Vec::new();
        if !terms.is_empty() {
            let entities = self.entities.read().await;
            for entity in entities.values().filter(|e| e.user_id == query.user_id) {
                let content = entity.search_content().to_lowercase();
                let score: usize = terms
                    .iter()
                    .map(|term| content.matches(term.as_str()).count())
                    .sum();
                if score > 0 {
                    scored.push((score, entity.clone()));
                }
            }
        }

        // Highest score first; ties keep id order from the map.
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let hits = scored
            .into_iter()
            .skip(query.offset())
            .take(query.page_size.max(1))
            .map(|(_, entity)| entity)
            .collect();

        Ok(SearchResults {
            page_number: query.page_number.max(1),
            page_size: query.page_size,
            hits,
        })
    }
}
