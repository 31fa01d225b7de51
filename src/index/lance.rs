//! LanceDB-backed search index with full-text search over entity content.

use super::schema::{create_fts_index, entity_schema};
use super::{EntityType, IndexEntity, SearchIndex, SearchQuery, SearchResults};
use crate::config::SearchConfig;
use crate::error::{IndexError, Result};

use arrow_array::builder::{ListBuilder, StringBuilder};
use arrow_array::cast::AsArray;
use arrow_array::types::Int64Type;
use arrow_array::{Array, ArrayRef, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use std::sync::Arc;

/// Search index stored in a LanceDB table.
#[derive(Clone)]
pub struct LanceIndex {
    table: lancedb::Table,
}

impl LanceIndex {
    /// Connect to the configured dataset and open (or create) the table.
    pub async fn open(config: &SearchConfig) -> Result<Self> {
        let uri = config.path.to_string_lossy().to_string();
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| IndexError::LanceDb(e.to_string()))?;
        Self::open_or_create(&connection, &config.table).await
    }

    /// Open existing table or create a new one.
    ///
    /// If the table exists but is corrupted (e.g. process killed mid-write),
    /// it is dropped and recreated.
    pub async fn open_or_create(connection: &lancedb::Connection, name: &str) -> Result<Self> {
        match connection.open_table(name).execute().await {
            Ok(table) => return Ok(Self { table }),
            Err(error) => {
                tracing::debug!(%error, table = name, "failed to open index table, will create");
            }
        }

        match Self::create_empty_table(connection, name).await {
            Ok(table) => return Self::with_fts(table).await,
            Err(error) => {
                tracing::warn!(
                    %error,
                    table = name,
                    "failed to create index table, attempting recovery from corrupted state"
                );
            }
        }

        if let Err(error) = connection.drop_table(name, &[]).await {
            tracing::warn!(%error, "drop_table failed during recovery, proceeding anyway");
        }

        let table = Self::create_empty_table(connection, name).await?;
        tracing::info!(table = name, "index table recovered, a full reindex is required");
        Self::with_fts(table).await
    }

    async fn with_fts(table: lancedb::Table) -> Result<Self> {
        create_fts_index(&table).await?;
        Ok(Self { table })
    }

    async fn create_empty_table(
        connection: &lancedb::Connection,
        name: &str,
    ) -> Result<lancedb::Table> {
        let batches =
            RecordBatchIterator::new(vec![].into_iter().map(Ok), Arc::new(entity_schema()));

        connection
            .create_table(name, Box::new(batches))
            .execute()
            .await
            .map_err(|e| IndexError::LanceDb(e.to_string()).into())
    }

    async fn delete_where(&self, predicate: &str) -> Result<()> {
        self.table
            .delete(predicate)
            .await
            .map_err(|e| IndexError::LanceDb(e.to_string()))?;
        Ok(())
    }

    async fn fetch(
        &self,
        predicate: Option<String>,
        limit: Option<usize>,
    ) -> Result<Vec<IndexEntity>> {
        let mut query = self.table.query();
        if let Some(predicate) = predicate {
            query = query.only_if(predicate);
        }
        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        let batches: Vec<RecordBatch> = query
            .execute()
            .await
            .map_err(|e| IndexError::LanceDb(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| IndexError::LanceDb(e.to_string()))?;

        decode_batches(&batches)
    }
}

#[async_trait]
impl SearchIndex for LanceIndex {
    async fn add(&self, entity: &IndexEntity) -> Result<()> {
        self.add_many(std::slice::from_ref(entity)).await
    }

    async fn add_many(&self, entities: &[IndexEntity]) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }

        // Replace rather than append so repeated adds never duplicate ids.
        let ids: Vec<&str> = entities.iter().map(|e| e.id.as_str()).collect();
        self.delete_where(&in_predicate("id", &ids)).await?;

        let batch = encode_batch(entities)?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], Arc::new(entity_schema()));
        self.table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| IndexError::LanceDb(e.to_string()))?;

        tracing::trace!(count = entities.len(), "entities written to index");
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.delete_where(&format!("id = {}", quote(id))).await
    }

    async fn remove_all(&self) -> Result<()> {
        self.delete_where("true").await
    }

    async fn get(&self, id: &str) -> Result<Option<IndexEntity>> {
        let mut found = self.fetch(Some(format!("id = {}", quote(id))), Some(1)).await?;
        Ok(found.pop())
    }

    async fn count(&self) -> Result<usize> {
        let count = self
            .table
            .count_rows(None)
            .await
            .map_err(|e| IndexError::LanceDb(e.to_string()))?;
        Ok(count)
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResults> {
        let text = query.text.trim();
        let mut results = SearchResults {
            page_number: query.page_number.max(1),
            page_size: query.page_size,
            hits: Vec::new(),
        };
        if text.is_empty() {
            return Ok(results);
        }

        let batches: Vec<RecordBatch> = self
            .table
            .query()
            .full_text_search(lance_index::scalar::FullTextSearchQuery::new(text.to_string()))
            .only_if(format!("user_id = {}", quote(&query.user_id)))
            .offset(query.offset())
            .limit(query.page_size.max(1))
            .execute()
            .await
            .map_err(|e| IndexError::LanceDb(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| IndexError::LanceDb(e.to_string()))?;

        results.hits = decode_batches(&batches)?;
        Ok(results)
    }

    async fn optimize(&self) -> Result<()> {
        self.table
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| IndexError::LanceDb(e.to_string()))?;
        Ok(())
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn in_predicate(column: &str, values: &[&str]) -> String {
    let quoted = values.iter().map(|v| quote(v)).collect::<Vec<_>>().join(", ");
    format!("{column} IN ({quoted})")
}

fn encode_batch(entities: &[IndexEntity]) -> Result<RecordBatch> {
    let strings = |f: fn(&IndexEntity) -> &str| -> ArrayRef {
        Arc::new(StringArray::from(entities.iter().map(f).collect::<Vec<_>>()))
    };
    let optional_strings = |f: fn(&IndexEntity) -> Option<&str>| -> ArrayRef {
        Arc::new(StringArray::from(entities.iter().map(f).collect::<Vec<_>>()))
    };
    let optional_ints = |f: fn(&IndexEntity) -> Option<i64>| -> ArrayRef {
        Arc::new(Int64Array::from(entities.iter().map(f).collect::<Vec<_>>()))
    };

    let mut tags = ListBuilder::new(StringBuilder::new());
    for entity in entities {
        for tag in &entity.tags {
            tags.values().append_value(tag);
        }
        tags.append(true);
    }

    let mut breadcrumbs = Vec::with_capacity(entities.len());
    let mut contents = Vec::with_capacity(entities.len());
    for entity in entities {
        breadcrumbs.push(
            serde_json::to_string(&entity.breadcrumb)
                .map_err(|e| IndexError::Schema(e.to_string()))?,
        );
        contents.push(entity.search_content());
    }

    let columns: Vec<ArrayRef> = vec![
        strings(|e| e.id.as_str()),
        strings(|e| e.title.as_str()),
        strings(|e| e.user_id.as_str()),
        strings(|e| e.entity_type.as_str()),
        optional_strings(|e| e.parent_id.as_deref()),
        optional_strings(|e| e.document_id.as_deref()),
        optional_strings(|e| e.document_version_id.as_deref()),
        optional_ints(|e| e.page_number),
        optional_ints(|e| e.page_count),
        optional_strings(|e| e.text.as_deref()),
        Arc::new(tags.finish()),
        Arc::new(StringArray::from(breadcrumbs)),
        Arc::new(StringArray::from(contents)),
    ];

    Ok(RecordBatch::try_new(Arc::new(entity_schema()), columns)?)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|column| column.as_string_opt::<i32>())
        .ok_or_else(|| IndexError::Schema(format!("missing or mistyped column {name}")).into())
}

fn optional_string(array: &StringArray, row: usize) -> Option<String> {
    array.is_valid(row).then(|| array.value(row).to_string())
}

fn decode_batches(batches: &[RecordBatch]) -> Result<Vec<IndexEntity>> {
    let mut entities = Vec::new();

    for batch in batches {
        let ids = string_column(batch, "id")?;
        let titles = string_column(batch, "title")?;
        let user_ids = string_column(batch, "user_id")?;
        let entity_types = string_column(batch, "entity_type")?;
        let parent_ids = string_column(batch, "parent_id")?;
        let document_ids = string_column(batch, "document_id")?;
        let version_ids = string_column(batch, "document_version_id")?;
        let texts = string_column(batch, "text")?;
        let breadcrumbs = string_column(batch, "breadcrumb")?;
        let page_numbers = batch
            .column_by_name("page_number")
            .and_then(|c| c.as_primitive_opt::<Int64Type>())
            .ok_or_else(|| IndexError::Schema("missing column page_number".into()))?;
        let page_counts = batch
            .column_by_name("page_count")
            .and_then(|c| c.as_primitive_opt::<Int64Type>())
            .ok_or_else(|| IndexError::Schema("missing column page_count".into()))?;
        let tags = batch
            .column_by_name("tags")
            .and_then(|c| c.as_list_opt::<i32>())
            .ok_or_else(|| IndexError::Schema("missing column tags".into()))?;

        for row in 0..batch.num_rows() {
            if !ids.is_valid(row) {
                continue;
            }

            let entity_type = EntityType::parse(entity_types.value(row)).ok_or_else(|| {
                IndexError::Schema(format!("unknown entity type {:?}", entity_types.value(row)))
            })?;

            let row_tags = if tags.is_valid(row) {
                let values = tags.value(row);
                values
                    .as_string_opt::<i32>()
                    .map(|names| names.iter().flatten().map(str::to_string).collect())
                    .unwrap_or_default()
            } else {
                Vec::new()
            };

            let breadcrumb = serde_json::from_str(breadcrumbs.value(row))
                .map_err(|e| IndexError::Schema(format!("bad breadcrumb: {e}")))?;

            entities.push(IndexEntity {
                id: ids.value(row).to_string(),
                title: titles.value(row).to_string(),
                user_id: user_ids.value(row).to_string(),
                entity_type,
                parent_id: optional_string(parent_ids, row),
                document_id: optional_string(document_ids, row),
                document_version_id: optional_string(version_ids, row),
                page_number: page_numbers.is_valid(row).then(|| page_numbers.value(row)),
                page_count: page_counts.is_valid(row).then(|| page_counts.value(row)),
                text: optional_string(texts, row),
                tags: row_tags,
                breadcrumb,
            });
        }
    }

    Ok(entities)
}
