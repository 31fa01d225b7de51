//! Read-only access to the document-management database.
//!
//! [`Database`] owns the connection pool. Every synchronization operation
//! opens exactly one [`Session`] and passes it by `&mut` through its call
//! chain; queries live on the session (see `nodes` and `versions`).

mod nodes;
mod versions;

use crate::config::DatabaseConfig;
use crate::error::{DbError, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use uuid::Uuid;

/// Maximum number of bound parameters per `IN (...)` clause.
const BIND_CHUNK: usize = 500;

/// Handle to the system of record.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect using explicit settings. Nothing is cached globally.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(DbError::Sqlx)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(DbError::Sqlx)?;

        tracing::debug!(url = %config.url, "connected to database");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply the bundled schema. Used by tests and local setups.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(DbError::Migrate)?;
        Ok(())
    }

    /// Open a unit of work. Reads inside it see one consistent snapshot.
    pub async fn session(&self) -> Result<Session> {
        let tx = self.pool.begin().await.map_err(DbError::Sqlx)?;
        Ok(Session { tx })
    }
}

/// Unit of work shared by all reads of one operation.
pub struct Session {
    tx: Transaction<'static, Sqlite>,
}

impl Session {
    /// End the unit of work. Nothing is written, so this only releases the snapshot.
    pub async fn close(self) -> Result<()> {
        self.tx.rollback().await.map_err(DbError::Sqlx)?;
        Ok(())
    }
}

/// Decode a TEXT uuid column into a typed identifier.
fn decode_id<T: From<Uuid>>(entity: &'static str, value: &str) -> Result<T> {
    Uuid::parse_str(value).map(T::from).map_err(|error| {
        DbError::Corrupt {
            entity,
            reason: format!("bad id {value:?}: {error}"),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use crate::test_support::{Fixture, memory_database};

    #[tokio::test]
    async fn session_reads_after_migrate() {
        let db = memory_database().await;
        let fixture = Fixture::new(&db).await;
        let folder = fixture.folder("Inbox", None).await;

        let mut session = db.session().await.expect("session");
        let node = session.get_node(folder).await.expect("get node");
        session.close().await.expect("close");

        assert_eq!(node.title, "Inbox");
    }
}
