//! Domain types read from the system of record.

use crate::error::{Error, Result};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Parse a string-encoded identifier.
            pub fn parse(value: &str) -> Result<Self> {
                Uuid::parse_str(value.trim())
                    .map(Self)
                    .map_err(|_| Error::validation($kind, value))
            }

            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0.hyphenated())
            }
        }

        impl std::str::FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::parse(s)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

uuid_id!(
    /// Identity shared by a node and its folder/document specialization.
    NodeId,
    "node id"
);
uuid_id!(VersionId, "document version id");
uuid_id!(PageId, "page id");
uuid_id!(UserId, "user id");
uuid_id!(TagId, "tag id");

/// Parse a list of string identifiers, failing on the first malformed one.
pub fn parse_ids<T: std::str::FromStr<Err = Error>>(values: &[String]) -> Result<Vec<T>> {
    values.iter().map(|value| value.parse()).collect()
}

/// Content-type discriminator stored in the `ctype` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CType {
    Folder,
    Document,
}

impl CType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CType::Folder => "folder",
            CType::Document => "document",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "folder" => Some(CType::Folder),
            "document" => Some(CType::Document),
            _ => None,
        }
    }
}

impl std::fmt::Display for CType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A shared label attached to nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    pub fg_color: String,
    pub bg_color: String,
    pub description: String,
    pub pinned: bool,
}

/// One entry of a node's path from the root: `(id, title)`.
pub type BreadcrumbItem = (NodeId, String);

/// A tree item. The variant payload lives in [`NodeKind`].
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub title: String,
    pub user_id: UserId,
    pub parent_id: Option<NodeId>,
    pub lang: String,
    pub tags: Vec<Tag>,
    /// Root first, ending with the node itself.
    pub breadcrumb: Vec<BreadcrumbItem>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Folder,
    /// Versions ordered by number ascending; pages are not loaded here.
    Document { versions: Vec<DocumentVersion> },
}

impl Node {
    pub fn ctype(&self) -> CType {
        match self.kind {
            NodeKind::Folder => CType::Folder,
            NodeKind::Document { .. } => CType::Document,
        }
    }

    pub fn is_document(&self) -> bool {
        matches!(self.kind, NodeKind::Document { .. })
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.tags.iter().map(|tag| tag.name.clone()).collect()
    }

    /// Highest-numbered version, if this is a document with any versions.
    pub fn latest_version(&self) -> Option<&DocumentVersion> {
        match &self.kind {
            NodeKind::Document { versions } => versions.iter().max_by_key(|v| v.number),
            NodeKind::Folder => None,
        }
    }
}

/// An immutable snapshot of a document's content.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentVersion {
    pub id: VersionId,
    pub document_id: NodeId,
    /// Starts at 1.
    pub number: i64,
    pub file_name: Option<String>,
    pub size: i64,
    pub page_count: i64,
    /// Ordered by page number; empty unless explicitly loaded.
    pub pages: Vec<Page>,
}

impl DocumentVersion {
    pub fn is_first(&self) -> bool {
        self.number <= 1
    }
}

/// Extracted text of one page of a version.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub id: PageId,
    pub document_version_id: VersionId,
    /// Starts at 1.
    pub number: i64,
    pub lang: String,
    /// Empty until OCR produced text.
    pub text: String,
}
