//! Search index façade.
//!
//! [`IndexEntity`] is the denormalized record stored in the index. Backends
//! implement [`SearchIndex`]: upsert by id, idempotent removal, paginated
//! per-user search. No backend retries or buffers; failures go to the caller.

pub mod lance;
pub mod memory;
pub mod schema;

pub use lance::LanceIndex;
pub use memory::MemoryIndex;
pub use schema::{SchemaAction, SchemaManager};

use crate::error::Result;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Kind of record held in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Folder,
    Page,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Folder => "folder",
            EntityType::Page => "page",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "folder" => Some(EntityType::Folder),
            "page" => Some(EntityType::Page),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One index record.
///
/// The id is the folder's node id for folders and the page's own id for
/// pages, so pages can be added and removed individually.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntity {
    pub id: String,
    pub title: String,
    pub user_id: String,
    pub entity_type: EntityType,
    pub parent_id: Option<String>,
    pub document_id: Option<String>,
    pub document_version_id: Option<String>,
    pub page_number: Option<i64>,
    pub page_count: Option<i64>,
    pub text: Option<String>,
    pub tags: Vec<String>,
    /// `(node id, title)` pairs from the root down to the owning node.
    pub breadcrumb: Vec<(String, String)>,
}

impl IndexEntity {
    /// Text fed to the full-text index: title, tags and page text.
    pub fn search_content(&self) -> String {
        let mut content = self.title.clone();
        for tag in &self.tags {
            content.push('\n');
            content.push_str(tag);
        }
        if let Some(text) = self.text.as_deref().filter(|text| !text.is_empty()) {
            content.push('\n');
            content.push_str(text);
        }
        content
    }
}

/// A paginated, user-scoped search.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    pub user_id: String,
    /// 1-based.
    pub page_number: usize,
    pub page_size: usize,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            user_id: user_id.into(),
            page_number: 1,
            page_size: 10,
        }
    }

    pub fn page(mut self, page_number: usize, page_size: usize) -> Self {
        self.page_number = page_number.max(1);
        self.page_size = page_size.max(1);
        self
    }

    pub fn offset(&self) -> usize {
        (self.page_number.max(1) - 1).saturating_mul(self.page_size)
    }
}

/// One page of search hits in the backend's relevance order.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub page_number: usize,
    pub page_size: usize,
    pub hits: Vec<IndexEntity>,
}

/// Operations the synchronizer needs from a search backend.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Insert or replace the entity with the same id.
    async fn add(&self, entity: &IndexEntity) -> Result<()>;

    /// Upsert several entities. Same end state as calling [`SearchIndex::add`] for each.
    async fn add_many(&self, entities: &[IndexEntity]) -> Result<()> {
        for entity in entities {
            self.add(entity).await?;
        }
        Ok(())
    }

    /// Delete by id. Absent ids are not an error.
    async fn remove(&self, id: &str) -> Result<()>;

    /// Delete every entity.
    async fn remove_all(&self) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<IndexEntity>>;

    async fn count(&self) -> Result<usize>;

    async fn search(&self, query: &SearchQuery) -> Result<SearchResults>;

    /// Compact backend storage after bulk writes.
    async fn optimize(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_content_skips_empty_text() {
        let entity = IndexEntity {
            id: "p1".into(),
            title: "receipt_001.pdf".into(),
            user_id: "u1".into(),
            entity_type: EntityType::Page,
            parent_id: None,
            document_id: Some("d1".into()),
            document_version_id: Some("v1".into()),
            page_number: Some(1),
            page_count: Some(2),
            text: Some(String::new()),
            tags: vec!["paid".into()],
            breadcrumb: Vec::new(),
        };
        assert_eq!(entity.search_content(), "receipt_001.pdf\npaid");
    }

    #[test]
    fn query_offset_is_one_based() {
        let query = SearchQuery::new("invoice", "u1").page(3, 10);
        assert_eq!(query.offset(), 20);
        assert_eq!(SearchQuery::new("x", "u").page(0, 0).offset(), 0);
    }
}
