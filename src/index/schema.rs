//! Index record shape and table lifecycle (create, apply, delete).

use crate::config::SearchConfig;
use crate::error::{IndexError, Result};

use arrow_array::RecordBatchIterator;
use arrow_schema::{DataType, Field, Schema};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Arrow schema matching [`super::IndexEntity`] plus the FTS `content` column.
pub fn entity_schema() -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("user_id", DataType::Utf8, false),
        Field::new("entity_type", DataType::Utf8, false),
        Field::new("parent_id", DataType::Utf8, true),
        Field::new("document_id", DataType::Utf8, true),
        Field::new("document_version_id", DataType::Utf8, true),
        Field::new("page_number", DataType::Int64, true),
        Field::new("page_count", DataType::Int64, true),
        Field::new("text", DataType::Utf8, true),
        Field::new(
            "tags",
            DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
            false,
        ),
        // JSON array of [id, title] pairs.
        Field::new("breadcrumb", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
    ])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaAction {
    /// Create the table and indexes; fails if the table exists.
    Create,
    /// Make the table match the current record shape, recreating it on mismatch.
    Apply,
    /// Drop the table.
    Delete,
}

impl SchemaAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaAction::Create => "create",
            SchemaAction::Apply => "apply",
            SchemaAction::Delete => "delete",
        }
    }
}

/// Applies [`SchemaAction`]s to the configured LanceDB table.
pub struct SchemaManager {
    connection: lancedb::Connection,
    table_name: String,
}

impl SchemaManager {
    pub async fn connect(config: &SearchConfig) -> Result<Self> {
        let uri = config.path.to_string_lossy().to_string();
        let connection = lancedb::connect(&uri).execute().await?;
        Ok(Self::new(connection, &config.table))
    }

    pub fn new(connection: lancedb::Connection, table_name: &str) -> Self {
        Self {
            connection,
            table_name: table_name.to_string(),
        }
    }

    /// What `action` would do, without touching the index.
    pub fn describe(&self, action: SchemaAction) -> serde_json::Value {
        let fields: Vec<serde_json::Value> = entity_schema()
            .fields()
            .iter()
            .map(|field| {
                json!({
                    "name": field.name(),
                    "type": field.data_type().to_string(),
                    "nullable": field.is_nullable(),
                })
            })
            .collect();

        json!({
            "action": action.as_str(),
            "table": self.table_name,
            "fields": fields,
            "fts_index": ["content"],
        })
    }

    pub async fn run(&self, action: SchemaAction) -> Result<()> {
        match action {
            SchemaAction::Create => {
                let table = self.create_table().await?;
                create_fts_index(&table).await?;
            }
            SchemaAction::Apply => {
                let table = self.apply().await?;
                create_fts_index(&table).await?;
            }
            SchemaAction::Delete => {
                self.connection
                    .drop_table(&self.table_name, &[])
                    .await
                    .map_err(|e| IndexError::LanceDb(e.to_string()))?;
                tracing::info!(table = %self.table_name, "index table dropped");
            }
        }
        Ok(())
    }

    async fn create_table(&self) -> Result<lancedb::Table> {
        let schema = Arc::new(entity_schema());
        let batches = RecordBatchIterator::new(vec![].into_iter().map(Ok), schema);

        let table = self
            .connection
            .create_table(&self.table_name, Box::new(batches))
            .execute()
            .await
            .map_err(|e| IndexError::LanceDb(e.to_string()))?;
        tracing::info!(table = %self.table_name, "index table created");
        Ok(table)
    }

    async fn apply(&self) -> Result<lancedb::Table> {
        let table = match self.connection.open_table(&self.table_name).execute().await {
            Ok(table) => table,
            Err(error) => {
                tracing::debug!(%error, table = %self.table_name, "index table missing, creating");
                return self.create_table().await;
            }
        };

        let current = table.schema().await?;
        if fields_match(&current, &entity_schema()) {
            tracing::debug!(table = %self.table_name, "index schema up to date");
            return Ok(table);
        }

        tracing::warn!(
            table = %self.table_name,
            "index schema changed, recreating table; a full reindex is required"
        );
        self.connection
            .drop_table(&self.table_name, &[])
            .await
            .map_err(|e| IndexError::LanceDb(e.to_string()))?;
        self.create_table().await
    }
}

fn fields_match(current: &Schema, expected: &Schema) -> bool {
    current.fields().len() == expected.fields().len()
        && expected.fields().iter().all(|field| {
            current
                .field_with_name(field.name())
                .map(|existing| existing.data_type() == field.data_type())
                .unwrap_or(false)
        })
}

/// Create the FTS index on `content`, tolerating an existing one.
pub(crate) async fn create_fts_index(table: &lancedb::Table) -> Result<()> {
    match table
        .create_index(&["content"], lancedb::index::Index::FTS(Default::default()))
        .execute()
        .await
    {
        Ok(()) => {
            tracing::debug!("FTS index created on content column");
            Ok(())
        }
        Err(error) => {
            let message = error.to_string();
            if message.contains("already") || message.contains("index") {
                tracing::trace!("FTS index already exists");
                Ok(())
            } else {
                Err(IndexError::LanceDb(format!("Failed to create FTS index: {message}")).into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_has_one_column_per_entity_field() {
        let schema = entity_schema();
        for name in [
            "id",
            "title",
            "user_id",
            "entity_type",
            "document_id",
            "document_version_id",
            "page_number",
            "text",
            "tags",
            "breadcrumb",
        ] {
            assert!(schema.field_with_name(name).is_ok(), "missing {name}");
        }
        assert!(fields_match(&schema, &entity_schema()));
    }

    #[tokio::test]
    async fn create_apply_delete_cycle() {
        let temp = tempfile::tempdir().expect("tempdir");
        let connection = lancedb::connect(temp.path().to_str().expect("path utf8"))
            .execute()
            .await
            .expect("connect lancedb");
        let manager = SchemaManager::new(connection.clone(), "entities");

        let plan = manager.describe(SchemaAction::Create);
        assert_eq!(plan["table"], "entities");
        assert_eq!(plan["fields"].as_array().map(Vec::len), Some(13));

        manager.run(SchemaAction::Create).await.expect("create");
        assert!(manager.run(SchemaAction::Create).await.is_err());
        manager.run(SchemaAction::Apply).await.expect("apply is idempotent");

        manager.run(SchemaAction::Delete).await.expect("delete");
        let names = connection.table_names().execute().await.expect("table names");
        assert!(!names.contains(&"entities".to_string()));
    }
}
