//! Node, folder/document and tag queries.

use super::{BIND_CHUNK, Session, decode_id};
use crate::error::{DbError, Error, Result};
use crate::models::{
    BreadcrumbItem, CType, DocumentVersion, Node, NodeId, NodeKind, Tag, TagId, UserId,
};

use chrono::NaiveDateTime;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashMap;

/// Guard against parent cycles in corrupt trees.
const MAX_DEPTH: i64 = 64;

const NODE_COLUMNS: &str =
    "SELECT id, title, ctype, lang, user_id, parent_id, created_at, updated_at FROM nodes";

#[derive(sqlx::FromRow)]
struct NodeRow {
    id: String,
    title: String,
    ctype: String,
    lang: String,
    user_id: String,
    parent_id: Option<String>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(sqlx::FromRow)]
struct NodeTagRow {
    node_id: String,
    id: String,
    name: String,
    fg_color: String,
    bg_color: String,
    description: String,
    pinned: bool,
}

#[derive(sqlx::FromRow)]
pub(super) struct VersionRow {
    pub(super) id: String,
    pub(super) number: i64,
    pub(super) file_name: Option<String>,
    pub(super) size: i64,
    pub(super) page_count: i64,
    pub(super) document_id: String,
}

impl VersionRow {
    pub(super) fn into_version(self) -> Result<DocumentVersion> {
        Ok(DocumentVersion {
            id: decode_id("document version", &self.id)?,
            document_id: decode_id("document version", &self.document_id)?,
            number: self.number,
            file_name: self.file_name,
            size: self.size,
            page_count: self.page_count,
            pages: Vec::new(),
        })
    }
}

impl NodeTagRow {
    fn into_tag(self) -> Result<(NodeId, Tag)> {
        let node_id = decode_id("node tag", &self.node_id)?;
        let tag = Tag {
            id: decode_id::<TagId>("tag", &self.id)?,
            name: self.name,
            fg_color: self.fg_color,
            bg_color: self.bg_color,
            description: self.description,
            pinned: self.pinned,
        };
        Ok((node_id, tag))
    }
}

impl Session {
    /// Fetch a folder or document with its tags and breadcrumb.
    pub async fn get_node(&mut self, node_id: NodeId) -> Result<Node> {
        let row: Option<NodeRow> = sqlx::query_as(&format!("{NODE_COLUMNS} WHERE id = ?"))
            .bind(node_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(DbError::Sqlx)?;
        let row = row.ok_or_else(|| Error::not_found("node", node_id))?;

        let mut nodes = self.assemble(vec![row]).await?;
        nodes.pop().ok_or_else(|| Error::not_found("node", node_id))
    }

    /// Fetch the given nodes, or every node when `node_ids` is empty.
    ///
    /// Unknown ids are ignored. Result order is unspecified.
    pub async fn get_nodes(&mut self, node_ids: &[NodeId]) -> Result<Vec<Node>> {
        let mut rows: Vec<NodeRow> = Vec::new();

        if node_ids.is_empty() {
            rows = sqlx::query_as(NODE_COLUMNS)
                .fetch_all(&mut *self.tx)
                .await
                .map_err(DbError::Sqlx)?;
        } else {
            for chunk in node_ids.chunks(BIND_CHUNK) {
                let mut builder = QueryBuilder::<Sqlite>::new(NODE_COLUMNS);
                push_in_clause(&mut builder, "id", chunk);
                let chunk_rows: Vec<NodeRow> = builder
                    .build_query_as()
                    .fetch_all(&mut *self.tx)
                    .await
                    .map_err(DbError::Sqlx)?;
                rows.extend(chunk_rows);
            }
        }

        self.assemble(rows).await
    }

    /// Like [`Session::get_node`], restricted to documents.
    pub async fn get_document(&mut self, document_id: NodeId) -> Result<Node> {
        let node = self.get_node(document_id).await.map_err(|error| {
            if error.is_not_found() {
                Error::not_found("document", document_id)
            } else {
                error
            }
        })?;

        if node.is_document() {
            Ok(node)
        } else {
            Err(Error::not_found("document", document_id))
        }
    }

    /// Like [`Session::get_nodes`], restricted to documents.
    pub async fn get_documents(&mut self, document_ids: &[NodeId]) -> Result<Vec<Node>> {
        let nodes = self.get_nodes(document_ids).await?;
        Ok(nodes.into_iter().filter(Node::is_document).collect())
    }

    /// Ancestor path of a node, root first, ending with the node itself.
    pub async fn get_breadcrumb(&mut self, node_id: NodeId) -> Result<Vec<BreadcrumbItem>> {
        let mut breadcrumbs = self.breadcrumbs_for(&[node_id]).await?;
        Ok(breadcrumbs.remove(&node_id).unwrap_or_default())
    }

    /// Breadcrumbs keyed by node id, one recursive query per chunk of ids.
    async fn breadcrumbs_for(
        &mut self,
        node_ids: &[NodeId],
    ) -> Result<HashMap<NodeId, Vec<BreadcrumbItem>>> {
        let mut breadcrumbs: HashMap<NodeId, Vec<BreadcrumbItem>> = HashMap::new();

        for chunk in node_ids.chunks(BIND_CHUNK) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "WITH RECURSIVE ancestors(origin, id, title, parent_id, depth) AS ( \
                 SELECT id, id, title, parent_id, 0 FROM nodes",
            );
            push_in_clause(&mut builder, "id", chunk);
            builder
                .push(
                    " UNION ALL \
                     SELECT a.origin, n.id, n.title, n.parent_id, a.depth + 1 \
                     FROM nodes n JOIN ancestors a ON n.id = a.parent_id \
                     WHERE a.depth < ",
                )
                .push_bind(MAX_DEPTH)
                .push(") SELECT origin, id, title FROM ancestors ORDER BY origin, depth DESC");

            let rows: Vec<(String, String, String)> = builder
                .build_query_as()
                .fetch_all(&mut *self.tx)
                .await
                .map_err(DbError::Sqlx)?;

            for (origin, id, title) in rows {
                let origin: NodeId = decode_id("node", &origin)?;
                breadcrumbs
                    .entry(origin)
                    .or_default()
                    .push((decode_id("node", &id)?, title));
            }
        }

        Ok(breadcrumbs)
    }

    /// Turn raw node rows into domain nodes: tags, versions and breadcrumbs attached.
    async fn assemble(&mut self, rows: Vec<NodeRow>) -> Result<Vec<Node>> {
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            ids.push(decode_id::<NodeId>("node", &row.id)?);
        }

        let mut tags = self.tags_for(&ids).await?;
        let document_ids: Vec<NodeId> = rows
            .iter()
            .zip(&ids)
            .filter(|(row, _)| row.ctype == CType::Document.as_str())
            .map(|(_, id)| *id)
            .collect();
        let mut versions = self.versions_for(&document_ids).await?;
        let mut breadcrumbs = self.breadcrumbs_for(&ids).await?;

        let mut nodes = Vec::with_capacity(rows.len());
        for (row, id) in rows.into_iter().zip(ids) {
            let kind = match CType::parse(&row.ctype) {
                Some(CType::Folder) => NodeKind::Folder,
                Some(CType::Document) => NodeKind::Document {
                    versions: versions.remove(&id).unwrap_or_default(),
                },
                None => {
                    return Err(DbError::Corrupt {
                        entity: "node",
                        reason: format!("unknown ctype {:?} for {id}", row.ctype),
                    }
                    .into());
                }
            };

            nodes.push(Node {
                id,
                title: row.title,
                user_id: decode_id::<UserId>("node", &row.user_id)?,
                parent_id: row
                    .parent_id
                    .as_deref()
                    .map(|parent| decode_id("node", parent))
                    .transpose()?,
                lang: row.lang,
                tags: tags.remove(&id).unwrap_or_default(),
                breadcrumb: breadcrumbs.remove(&id).unwrap_or_default(),
                created_at: row.created_at,
                updated_at: row.updated_at,
                kind,
            });
        }

        Ok(nodes)
    }

    /// Tags keyed by node id, in association order.
    async fn tags_for(&mut self, node_ids: &[NodeId]) -> Result<HashMap<NodeId, Vec<Tag>>> {
        let mut tags: HashMap<NodeId, Vec<Tag>> = HashMap::new();

        for chunk in node_ids.chunks(BIND_CHUNK) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT nt.node_id, t.id, t.name, t.fg_color, t.bg_color, t.description, t.pinned \
                 FROM nodes_tags nt JOIN tags t ON t.id = nt.tag_id",
            );
            push_in_clause(&mut builder, "nt.node_id", chunk);
            builder.push(" ORDER BY nt.id");

            let rows: Vec<NodeTagRow> = builder
                .build_query_as()
                .fetch_all(&mut *self.tx)
                .await
                .map_err(DbError::Sqlx)?;

            for row in rows {
                let (node_id, tag) = row.into_tag()?;
                tags.entry(node_id).or_default().push(tag);
            }
        }

        Ok(tags)
    }

    /// Versions keyed by document id, ordered by number ascending.
    async fn versions_for(
        &mut self,
        document_ids: &[NodeId],
    ) -> Result<HashMap<NodeId, Vec<DocumentVersion>>> {
        let mut versions: HashMap<NodeId, Vec<DocumentVersion>> = HashMap::new();

        for chunk in document_ids.chunks(BIND_CHUNK) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT id, number, file_name, size, page_count, document_id FROM document_versions",
            );
            push_in_clause(&mut builder, "document_id", chunk);
            builder.push(" ORDER BY number ASC");

            let rows: Vec<VersionRow> = builder
                .build_query_as()
                .fetch_all(&mut *self.tx)
                .await
                .map_err(DbError::Sqlx)?;

            for row in rows {
                let version = row.into_version()?;
                versions.entry(version.document_id).or_default().push(version);
            }
        }

        Ok(versions)
    }
}

fn push_in_clause(builder: &mut QueryBuilder<'_, Sqlite>, column: &str, ids: &[NodeId]) {
    builder.push(" WHERE ").push(column).push(" IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id.to_string());
    }
    separated.push_unseparated(")");
}
