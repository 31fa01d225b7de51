//! Projection of repository entities into index entities.
//!
//! A folder becomes one entity. A document fans out into one entity per page
//! of its latest version, keyed by page id and carrying the document's tags.

use crate::db::Session;
use crate::error::Result;
use crate::index::{EntityType, IndexEntity};
use crate::models::{DocumentVersion, Node, NodeId, Page, PageId, VersionId};

use serde::Serialize;

/// Data-quality signal raised while projecting. Never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A page of a non-first version has no extracted text yet.
    MissingText {
        document_id: NodeId,
        title: String,
        version_id: VersionId,
        version_number: i64,
        page_id: PageId,
        page_number: i64,
    },
}

/// Entities produced from one node or page, plus any diagnostics.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    pub entities: Vec<IndexEntity>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Projection {
    pub fn extend(&mut self, other: Projection) {
        self.entities.extend(other.entities);
        self.diagnostics.extend(other.diagnostics);
    }
}

fn breadcrumb_strings(node: &Node) -> Vec<(String, String)> {
    node.breadcrumb
        .iter()
        .map(|(id, title)| (id.to_string(), title.clone()))
        .collect()
}

/// Exactly one folder entity, keyed by the node id.
pub fn project_folder(node: &Node) -> IndexEntity {
    IndexEntity {
        id: node.id.to_string(),
        title: node.title.clone(),
        user_id: node.user_id.to_string(),
        entity_type: EntityType::Folder,
        parent_id: node.parent_id.map(|id| id.to_string()),
        document_id: None,
        document_version_id: None,
        page_number: None,
        page_count: None,
        text: None,
        tags: node.tag_names(),
        breadcrumb: breadcrumb_strings(node),
    }
}

/// One page entity per page of `latest`, in page order.
///
/// `latest` must be the document's latest version with pages loaded.
pub fn project_document(document: &Node, latest: &DocumentVersion) -> Projection {
    let mut projection = Projection::default();
    for page in &latest.pages {
        let (entity, diagnostic) = page_entity(document, latest, page);
        projection.entities.push(entity);
        projection.diagnostics.extend(diagnostic);
    }
    projection
}

fn page_entity(
    document: &Node,
    version: &DocumentVersion,
    page: &Page,
) -> (IndexEntity, Option<Diagnostic>) {
    let diagnostic = missing_text(document, version, page);

    let page_count = if version.page_count > 0 {
        version.page_count
    } else {
        version.pages.len() as i64
    };

    let entity = IndexEntity {
        id: page.id.to_string(),
        title: document.title.clone(),
        user_id: document.user_id.to_string(),
        entity_type: EntityType::Page,
        parent_id: document.parent_id.map(|id| id.to_string()),
        document_id: Some(document.id.to_string()),
        document_version_id: Some(version.id.to_string()),
        page_number: Some(page.number),
        page_count: Some(page_count),
        text: Some(page.text.clone()),
        tags: document.tag_names(),
        breadcrumb: breadcrumb_strings(document),
    };

    (entity, diagnostic)
}

fn missing_text(document: &Node, version: &DocumentVersion, page: &Page) -> Option<Diagnostic> {
    if !page.text.is_empty() || version.is_first() {
        return None;
    }

    tracing::warn!(
        document_id = %document.id,
        title = %document.title,
        version = version.number,
        page_number = page.number,
        "no OCR text found for page"
    );

    Some(Diagnostic::MissingText {
        document_id: document.id,
        title: document.title.clone(),
        version_id: version.id,
        version_number: version.number,
        page_id: page.id,
        page_number: page.number,
    })
}

/// Project a node loaded from `session`. Documents use their latest version.
pub async fn project_node(session: &mut Session, node: &Node) -> Result<Projection> {
    if !node.is_document() {
        return Ok(Projection {
            entities: vec![project_folder(node)],
            diagnostics: Vec::new(),
        });
    }

    let latest = session.get_latest_version(node.id).await?;
    let latest = session.with_pages(latest).await?;
    Ok(project_document(node, &latest))
}

/// Resolve page → version → document and build that page's entity.
pub async fn project_page(session: &mut Session, page_id: PageId) -> Result<Projection> {
    let page = session.get_page(page_id).await?;
    let version = session.get_version(page.document_version_id).await?;
    let version = session.with_pages(version).await?;
    let document = session.get_document(version.document_id).await?;

    let (entity, diagnostic) = page_entity(&document, &version, &page);
    Ok(Projection {
        entities: vec![entity],
        diagnostics: diagnostic.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NodeKind, Tag, TagId, UserId};
    use crate::test_support::{Fixture, memory_database};

    fn node(title: &str, kind: NodeKind, tags: &[&str]) -> Node {
        let id = NodeId::new_v4();
        Node {
            id,
            title: title.to_string(),
            user_id: UserId::new_v4(),
            parent_id: None,
            lang: "en".to_string(),
            tags: tags
                .iter()
                .map(|name| Tag {
                    id: TagId::new_v4(),
                    name: name.to_string(),
                    fg_color: "#ffff00".to_string(),
                    bg_color: "#ff0000".to_string(),
                    description: String::new(),
                    pinned: false,
                })
                .collect(),
            breadcrumb: vec![(id, title.to_string())],
            created_at: chrono::NaiveDateTime::default(),
            updated_at: chrono::NaiveDateTime::default(),
            kind,
        }
    }

    fn version(document: &Node, number: i64, texts: &[&str]) -> DocumentVersion {
        let id = VersionId::new_v4();
        DocumentVersion {
            id,
            document_id: document.id,
            number,
            file_name: Some("receipt_001.pdf".to_string()),
            size: 0,
            page_count: texts.len() as i64,
            pages: texts
                .iter()
                .enumerate()
                .map(|(index, text)| Page {
                    id: PageId::new_v4(),
                    document_version_id: id,
                    number: index as i64 + 1,
                    lang: "en".to_string(),
                    text: text.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn folder_keeps_tags_and_kind() {
        let folder = node("My Documents", NodeKind::Folder, &["one", "two"]);
        let entity = project_folder(&folder);

        assert_eq!(entity.id, folder.id.to_string());
        assert_eq!(entity.title, "My Documents");
        assert_eq!(entity.entity_type, EntityType::Folder);
        assert_eq!(entity.tags, vec!["one", "two"]);
        assert!(entity.document_id.is_none());
    }

    #[test]
    fn document_fans_out_one_entity_per_page() {
        let doc = node(
            "receipt_001.pdf",
            NodeKind::Document { versions: Vec::new() },
            &["paid"],
        );
        let latest = version(&doc, 1, &["total 12.50", "thank you"]);

        let projection = project_document(&doc, &latest);

        assert_eq!(projection.entities.len(), 2);
        for (entity, page) in projection.entities.iter().zip(&latest.pages) {
            assert_eq!(entity.id, page.id.to_string());
            assert_eq!(entity.page_number, Some(page.number));
            assert_eq!(entity.title, "receipt_001.pdf");
            assert_eq!(entity.tags, vec!["paid"]);
            assert_eq!(entity.entity_type, EntityType::Page);
            assert_eq!(entity.document_version_id, Some(latest.id.to_string()));
            assert_eq!(entity.page_count, Some(2));
        }
        assert!(projection.diagnostics.is_empty());
    }

    #[test]
    fn empty_text_flags_only_later_versions() {
        let doc = node("scan.pdf", NodeKind::Document { versions: Vec::new() }, &[]);

        let first = version(&doc, 1, &[""]);
        assert!(project_document(&doc, &first).diagnostics.is_empty());

        let second = version(&doc, 2, &["", "text"]);
        let projection = project_document(&doc, &second);
        assert_eq!(projection.entities.len(), 2);
        assert_eq!(
            projection.diagnostics,
            vec![Diagnostic::MissingText {
                document_id: doc.id,
                title: "scan.pdf".to_string(),
                version_id: second.id,
                version_number: 2,
                page_id: second.pages[0].id,
                page_number: 1,
            }]
        );
    }

    #[tokio::test]
    async fn project_page_resolves_owning_document() {
        let db = memory_database().await;
        let fixture = Fixture::new(&db).await;
        let inbox = fixture.folder("Inbox", None).await;
        let doc = fixture.document("letter.pdf", Some(inbox)).await;
        fixture.tag(doc, "urgent").await;
        fixture.version(doc, 1, &["dear sir"]).await;
        let v2 = fixture.version(doc, 2, &["", "regards"]).await;

        let mut session = db.session().await.expect("session");
        let projection = project_page(&mut session, v2.page_ids[0]).await.expect("project");

        let entity = &projection.entities[0];
        assert_eq!(entity.id, v2.page_ids[0].to_string());
        assert_eq!(entity.title, "letter.pdf");
        assert_eq!(entity.document_id, Some(doc.to_string()));
        assert_eq!(entity.parent_id, Some(inbox.to_string()));
        assert_eq!(entity.tags, vec!["urgent"]);
        assert_eq!(entity.page_count, Some(2));
        assert_eq!(projection.diagnostics.len(), 1);
    }

    #[tokio::test]
    async fn project_node_uses_latest_version() {
        let db = memory_database().await;
        let fixture = Fixture::new(&db).await;
        let doc = fixture.document("report.pdf", None).await;
        fixture.version(doc, 1, &["draft"]).await;
        let v2 = fixture.version(doc, 2, &["final", "appendix"]).await;

        let mut session = db.session().await.expect("session");
        let node = session.get_node(doc).await.expect("node");
        let projection = project_node(&mut session, &node).await.expect("project");

        let ids: Vec<String> = projection.entities.iter().map(|e| e.id.clone()).collect();
        let expected: Vec<String> = v2.page_ids.iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, expected);
    }
}
