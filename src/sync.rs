//! Synchronization operations.
//!
//! Each public operation opens one database session, projects what it read
//! and applies the result to the index. Every operation is idempotent, so
//! the task runner may re-run it as a whole after any failure.

use crate::db::{Database, Session};
use crate::error::{Error, Result};
use crate::index::{IndexEntity, SearchIndex};
use crate::models::{NodeId, PageId, VersionId, parse_ids};
use crate::projection::{self, Diagnostic, Projection};

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Counters reported by an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub added: usize,
    pub removed: usize,
    pub skipped: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl SyncReport {
    fn merge(&mut self, other: SyncReport) {
        self.added += other.added;
        self.removed += other.removed;
        self.skipped += other.skipped;
        self.diagnostics.extend(other.diagnostics);
    }
}

/// How a full reindex applies its entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReindexMode {
    /// Add to the index as is.
    #[default]
    Update,
    /// Clear the index before adding.
    Rebuild,
    /// Project only; leave the index untouched.
    DryRun,
}

/// Runs synchronization operations against one database and one index.
#[derive(Clone)]
pub struct Synchronizer {
    db: Database,
    index: Arc<dyn SearchIndex>,
}

impl Synchronizer {
    pub fn new(db: Database, index: Arc<dyn SearchIndex>) -> Self {
        Self { db, index }
    }

    pub fn index(&self) -> &Arc<dyn SearchIndex> {
        &self.index
    }

    /// Add or update one folder, or the latest-version pages of one document.
    ///
    /// Pages of older versions are left alone; see [`Synchronizer::swap_version`].
    pub async fn add_node(&self, node_id: &str) -> Result<SyncReport> {
        let node_id = NodeId::parse(node_id)?;
        let mut session = self.db.session().await?;

        let node = session.get_node(node_id).await?;
        tracing::debug!(
            %node_id,
            title = %node.title,
            ctype = %node.ctype(),
            "adding node to index"
        );
        let projection = projection::project_node(&mut session, &node).await?;
        session.close().await?;

        self.apply(projection).await
    }

    /// Add the latest-version pages of several documents.
    ///
    /// Every document is attempted. If any failed, the whole call fails
    /// after the others were applied.
    pub async fn add_documents(&self, document_ids: &[String]) -> Result<SyncReport> {
        let document_ids: Vec<NodeId> = parse_ids(document_ids)?;
        tracing::debug!(count = document_ids.len(), "adding documents to index");

        let mut session = self.db.session().await?;
        let documents = session.get_documents(&document_ids).await?;
        if documents.len() < document_ids.len() {
            tracing::debug!(
                requested = document_ids.len(),
                found = documents.len(),
                "some requested documents do not exist"
            );
        }

        let mut report = SyncReport::default();
        let mut failures = Vec::new();
        for document in &documents {
            let outcome = match projection::project_node(&mut session, document).await {
                Ok(projection) => self.apply(projection).await,
                Err(error) => Err(error),
            };
            match outcome {
                Ok(done) => report.merge(done),
                Err(error) => {
                    tracing::warn!(document_id = %document.id, %error, "failed to index document");
                    failures.push(error);
                }
            }
        }
        session.close().await?;

        finish_batch(report, failures, documents.len())
    }

    /// Remove folders or pages by id. Absent ids are fine.
    pub async fn remove_items(&self, item_ids: &[String]) -> Result<SyncReport> {
        let item_ids = item_ids
            .iter()
            .map(|id| {
                Uuid::parse_str(id.trim())
                    .map(|uuid| uuid.hyphenated().to_string())
                    .map_err(|_| Error::validation("item id", id.as_str()))
            })
            .collect::<Result<Vec<String>>>()?;
        tracing::debug!(count = item_ids.len(), "removing items from index");

        let mut report = SyncReport::default();
        let mut failures = Vec::new();
        for item_id in &item_ids {
            match self.index.remove(item_id).await {
                Ok(()) => report.removed += 1,
                Err(error) => {
                    tracing::error!(%item_id, %error, "failed to remove item from index");
                    failures.push(error);
                }
            }
        }

        finish_batch(report, failures, item_ids.len())
    }

    /// Re-index specific pages, e.g. after OCR finished for them.
    pub async fn add_pages(&self, page_ids: &[String]) -> Result<SyncReport> {
        let page_ids: Vec<PageId> = parse_ids(page_ids)?;
        let mut session = self.db.session().await?;
        let report = self.add_pages_in(&mut session, &page_ids).await?;
        session.close().await?;
        Ok(report)
    }

    async fn add_pages_in(&self, session: &mut Session, page_ids: &[PageId]) -> Result<SyncReport> {
        let mut projection = Projection::default();
        for page_id in page_ids {
            projection.extend(projection::project_page(session, *page_id).await?);
        }
        tracing::debug!(count = projection.entities.len(), "adding pages to index");
        self.apply(projection).await
    }

    /// Replace the pages of `remove_version_id` with those of `add_version_id`.
    ///
    /// The add side runs first so a failure in between leaves old and new
    /// pages indexed rather than neither. A side whose version does not
    /// exist is skipped.
    pub async fn swap_version(
        &self,
        add_version_id: &str,
        remove_version_id: &str,
    ) -> Result<SyncReport> {
        let add_version_id = VersionId::parse(add_version_id)?;
        let remove_version_id = VersionId::parse(remove_version_id)?;
        tracing::debug!(
            add = %add_version_id,
            remove = %remove_version_id,
            "swapping indexed version"
        );

        let mut session = self.db.session().await?;
        let add_pages = resolve_side(&mut session, add_version_id, "add").await?;
        let remove_pages = resolve_side(&mut session, remove_version_id, "remove").await?;

        let mut report = SyncReport::default();
        match add_pages {
            Some(pages) if !pages.is_empty() => {
                report.merge(self.add_pages_in(&mut session, &pages).await?);
            }
            Some(_) => tracing::debug!(version_id = %add_version_id, "no pages to add to index"),
            None => report.skipped += 1,
        }
        session.close().await?;

        match remove_pages {
            Some(pages) if !pages.is_empty() => {
                let ids: Vec<String> = pages.iter().map(|id| id.to_string()).collect();
                report.merge(self.remove_items(&ids).await?);
            }
            Some(_) => {
                tracing::debug!(version_id = %remove_version_id, "no pages to remove from index")
            }
            None => report.skipped += 1,
        }

        Ok(report)
    }

    /// Project the given nodes (all nodes when empty) and write them to the index.
    ///
    /// Documents without any version are skipped. Returns the projected
    /// entities, which is all a dry run produces.
    pub async fn reindex(
        &self,
        node_ids: &[String],
        mode: ReindexMode,
    ) -> Result<(Vec<IndexEntity>, SyncReport)> {
        let node_ids: Vec<NodeId> = parse_ids(node_ids)?;
        let mut session = self.db.session().await?;
        let nodes = session.get_nodes(&node_ids).await?;
        tracing::info!(count = nodes.len(), ?mode, "reindexing nodes");

        let mut projection = Projection::default();
        let mut report = SyncReport::default();
        for node in &nodes {
            match projection::project_node(&mut session, node).await {
                Ok(projected) => projection.extend(projected),
                Err(error) if error.is_not_found() => {
                    tracing::warn!(
                        node_id = %node.id,
                        title = %node.title,
                        "document has no versions, skipping"
                    );
                    report.skipped += 1;
                }
                Err(error) => return Err(error),
            }
        }
        session.close().await?;

        report.diagnostics = projection.diagnostics;
        let entities = projection.entities;
        match mode {
            ReindexMode::DryRun => return Ok((entities, report)),
            ReindexMode::Rebuild => {
                tracing::info!("clearing index before rebuild");
                self.index.remove_all().await?;
            }
            ReindexMode::Update => {}
        }

        self.index.add_many(&entities).await?;
        self.index.optimize().await?;
        report.added = entities.len();
        tracing::info!(added = report.added, skipped = report.skipped, "reindex complete");

        Ok((entities, report))
    }

    async fn apply(&self, projection: Projection) -> Result<SyncReport> {
        for entity in &projection.entities {
            tracing::trace!(id = %entity.id, kind = %entity.entity_type, "adding entity to index");
            self.index.add(entity).await?;
        }
        Ok(SyncReport {
            added: projection.entities.len(),
            diagnostics: projection.diagnostics,
            ..SyncReport::default()
        })
    }
}

/// Page ids of a version, `None` if the version does not exist.
async fn resolve_side(
    session: &mut Session,
    version_id: VersionId,
    side: &'static str,
) -> Result<Option<Vec<PageId>>> {
    match session.get_version(version_id).await {
        Ok(version) => {
            let pages = session.get_pages(version.id).await?;
            Ok(Some(pages.into_iter().map(|page| page.id).collect()))
        }
        Err(error) if error.is_not_found() => {
            tracing::warn!(%version_id, side, "document version not found, skipping");
            Ok(None)
        }
        Err(error) => Err(error),
    }
}

fn finish_batch(report: SyncReport, failures: Vec<Error>, total: usize) -> Result<SyncReport> {
    if failures.is_empty() {
        return Ok(report);
    }
    Err(Error::batch(failures, total))
}
