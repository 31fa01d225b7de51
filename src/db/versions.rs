//! Document version and page queries.

use super::nodes::VersionRow;
use super::{Session, decode_id};
use crate::error::{DbError, Error, Result};
use crate::models::{DocumentVersion, NodeId, Page, PageId, VersionId};

const VERSION_COLUMNS: &str =
    "SELECT id, number, file_name, size, page_count, document_id FROM document_versions";
const PAGE_COLUMNS: &str = "SELECT id, number, lang, text, document_version_id FROM pages";

#[derive(sqlx::FromRow)]
struct PageRow {
    id: String,
    number: i64,
    lang: String,
    text: String,
    document_version_id: String,
}

impl PageRow {
    fn into_page(self) -> Result<Page> {
        Ok(Page {
            id: decode_id("page", &self.id)?,
            document_version_id: decode_id("page", &self.document_version_id)?,
            number: self.number,
            lang: self.lang,
            text: self.text,
        })
    }
}

impl Session {
    /// Highest-numbered version of a document. Never a version of another document.
    pub async fn get_latest_version(&mut self, document_id: NodeId) -> Result<DocumentVersion> {
        let row: Option<VersionRow> = sqlx::query_as(&format!(
            "{VERSION_COLUMNS} WHERE document_id = ? ORDER BY number DESC LIMIT 1"
        ))
        .bind(document_id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(DbError::Sqlx)?;

        row.ok_or_else(|| Error::not_found("latest version of document", document_id))?
            .into_version()
    }

    pub async fn get_version(&mut self, version_id: VersionId) -> Result<DocumentVersion> {
        let row: Option<VersionRow> = sqlx::query_as(&format!("{VERSION_COLUMNS} WHERE id = ?"))
            .bind(version_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(DbError::Sqlx)?;

        row.ok_or_else(|| Error::not_found("document version", version_id))?
            .into_version()
    }

    /// Pages of a version ordered by page number ascending.
    pub async fn get_pages(&mut self, version_id: VersionId) -> Result<Vec<Page>> {
        let rows: Vec<PageRow> = sqlx::query_as(&format!(
            "{PAGE_COLUMNS} WHERE document_version_id = ? ORDER BY number ASC"
        ))
        .bind(version_id.to_string())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(DbError::Sqlx)?;

        rows.into_iter().map(PageRow::into_page).collect()
    }

    /// A single page. Its version, and through it the document, stay resolvable.
    pub async fn get_page(&mut self, page_id: PageId) -> Result<Page> {
        let row: Option<PageRow> = sqlx::query_as(
            "SELECT p.id, p.number, p.lang, p.text, p.document_version_id \
             FROM pages p \
             JOIN document_versions v ON v.id = p.document_version_id \
             JOIN documents d ON d.node_id = v.document_id \
             WHERE p.id = ?",
        )
        .bind(page_id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(DbError::Sqlx)?;

        row.ok_or_else(|| Error::not_found("page", page_id))?
            .into_page()
    }

    /// Return `version` with its pages loaded.
    pub async fn with_pages(&mut self, mut version: DocumentVersion) -> Result<DocumentVersion> {
        version.pages = self.get_pages(version.id).await?;
        Ok(version)
    }
}
