//! Shared fixtures for in-crate tests.

use crate::db::Database;
use crate::models::{NodeId, PageId, TagId, UserId, VersionId};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

/// Fresh in-memory database with the schema applied.
///
/// A single long-lived connection, since every `:memory:` connection is its
/// own database.
pub async fn memory_database() -> Database {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("memory url")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .expect("connect memory database");

    let db = Database::from_pool(pool);
    db.migrate().await.expect("migrate");
    db
}

/// Ids created by [`Fixture::version`].
pub struct VersionFixture {
    pub version_id: VersionId,
    pub page_ids: Vec<PageId>,
}

/// Writes seed rows. Must not be used while a session is open.
pub struct Fixture {
    db: Database,
    pub user_id: UserId,
}

impl Fixture {
    pub async fn new(db: &Database) -> Self {
        let user_id = UserId::new_v4();
        sqlx::query("INSERT INTO users (id, username, email) VALUES (?, ?, ?)")
            .bind(user_id.to_string())
            .bind("socrates")
            .bind("socrates@example.com")
            .execute(db.pool())
            .await
            .expect("insert user");

        Self {
            db: db.clone(),
            user_id,
        }
    }

    async fn node(&self, title: &str, ctype: &str, parent: Option<NodeId>) -> NodeId {
        let id = NodeId::new_v4();
        sqlx::query(
            "INSERT INTO nodes (id, title, ctype, lang, user_id, parent_id) VALUES (?, ?, ?, 'en', ?, ?)",
        )
        .bind(id.to_string())
        .bind(title)
        .bind(ctype)
        .bind(self.user_id.to_string())
        .bind(parent.map(|p| p.to_string()))
        .execute(self.db.pool())
        .await
        .expect("insert node");

        let table = if ctype == "folder" { "folders" } else { "documents" };
        sqlx::query(&format!("INSERT INTO {table} (node_id) VALUES (?)"))
            .bind(id.to_string())
            .execute(self.db.pool())
            .await
            .expect("insert specialization");
        id
    }

    pub async fn folder(&self, title: &str, parent: Option<NodeId>) -> NodeId {
        self.node(title, "folder", parent).await
    }

    pub async fn document(&self, title: &str, parent: Option<NodeId>) -> NodeId {
        self.node(title, "document", parent).await
    }

    /// Create a tag and attach it to `node_id`.
    pub async fn tag(&self, node_id: NodeId, name: &str) -> TagId {
        let tag_id = TagId::new_v4();
        sqlx::query("INSERT INTO tags (id, name) VALUES (?, ?)")
            .bind(tag_id.to_string())
            .bind(name)
            .execute(self.db.pool())
            .await
            .expect("insert tag");
        sqlx::query("INSERT INTO nodes_tags (node_id, tag_id) VALUES (?, ?)")
            .bind(node_id.to_string())
            .bind(tag_id.to_string())
            .execute(self.db.pool())
            .await
            .expect("attach tag");
        tag_id
    }

    /// Create version `number` of `document_id` with one page per text.
    pub async fn version(
        &self,
        document_id: NodeId,
        number: i64,
        texts: &[&str],
    ) -> VersionFixture {
        let version_id = VersionId::new_v4();
        sqlx::query(
            "INSERT INTO document_versions (id, number, file_name, page_count, document_id) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(version_id.to_string())
        .bind(number)
        .bind(format!("v{number}.pdf"))
        .bind(texts.len() as i64)
        .bind(document_id.to_string())
        .execute(self.db.pool())
        .await
        .expect("insert version");

        let mut page_ids = Vec::with_capacity(texts.len());
        for (index, text) in texts.iter().enumerate() {
            let page_id = PageId::new_v4();
            sqlx::query(
                "INSERT INTO pages (id, number, text, document_version_id) VALUES (?, ?, ?, ?)",
            )
            .bind(page_id.to_string())
            .bind(index as i64 + 1)
            .bind(*text)
            .bind(version_id.to_string())
            .execute(self.db.pool())
            .await
            .expect("insert page");
            page_ids.push(page_id);
        }

        VersionFixture {
            version_id,
            page_ids,
        }
    }
}
