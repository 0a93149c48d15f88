//! Untyped content-tree input, parsed once into a closed set of block kinds.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::children::Position;
use crate::error::CoreError;
use crate::ids::RecordId;
use crate::records::BlockType;
use crate::rich_text;
use crate::schema::SchemaUnit;
use crate::view::ViewSpec;

/// One block to create, with everything it nests.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawBlockSpec")]
pub struct BlockSpec {
    pub kind: BlockKind,
    pub properties: Map<String, Value>,
    pub format: Map<String, Value>,
    /// Where the block lands in its parent; appended when absent.
    pub position: Option<Position>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    Page {
        is_private: bool,
        contents: Vec<BlockSpec>,
    },
    /// A new collection rendered by a `collection_view` or
    /// `collection_view_page` block.
    Collection {
        block_type: BlockType,
        is_private: bool,
        schema: Vec<SchemaUnit>,
        views: Vec<ViewSpec>,
        rows: Vec<BlockSpec>,
    },
    /// New views over a collection that already exists.
    LinkedDatabase {
        collection_id: RecordId,
        views: Vec<ViewSpec>,
    },
    /// Pre-typed leaves created with their parent in one step.
    Factory { contents: Vec<LeafSpec> },
    Embed { provider: BlockType, source: String },
    Bookmark { link: String },
    Drive { file_id: String },
    /// Lists an existing page; creates nothing.
    LinkToPage { page_id: RecordId },
    Basic(BlockType),
}

/// A factory child. Never recursed into.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafSpec {
    pub block_type: BlockType,
    pub properties: Map<String, Value>,
    pub format: Map<String, Value>,
}

impl BlockSpec {
    pub fn new(kind: BlockKind) -> Self {
        Self {
            kind,
            properties: Map::new(),
            format: Map::new(),
            position: None,
        }
    }

    pub fn page(title: &str, contents: Vec<BlockSpec>) -> Self {
        Self::new(BlockKind::Page {
            is_private: false,
            contents,
        })
        .titled(title)
    }

    pub fn basic(block_type: BlockType, title: &str) -> Self {
        Self::new(BlockKind::Basic(block_type)).titled(title)
    }

    pub fn titled(mut self, title: &str) -> Self {
        self.properties.insert("title".into(), rich_text::text(title));
        self
    }

    pub fn at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    /// Block type of the record this spec creates. Linked databases render
    /// as `collection_view` blocks.
    pub fn block_type(&self) -> BlockType {
        match &self.kind {
            BlockKind::Page { .. } => BlockType::Page,
            BlockKind::Collection { block_type, .. } => *block_type,
            BlockKind::LinkedDatabase { .. } => BlockType::CollectionView,
            BlockKind::Factory { .. } => BlockType::Factory,
            BlockKind::Embed { provider, .. } => *provider,
            BlockKind::Bookmark { .. } => BlockType::Bookmark,
            BlockKind::Drive { .. } => BlockType::Drive,
            BlockKind::LinkToPage { .. } => BlockType::LinkToPage,
            BlockKind::Basic(block_type) => *block_type,
        }
    }

    /// Ids of existing collections this tree builds views over.
    pub fn referenced_collections(specs: &[BlockSpec]) -> Vec<RecordId> {
        let mut found = Vec::new();
        for spec in specs {
            match &spec.kind {
                BlockKind::LinkedDatabase { collection_id, .. } => found.push(collection_id.clone()),
                BlockKind::Page { contents, .. } => found.extend(Self::referenced_collections(contents)),
                BlockKind::Collection { rows, .. } => found.extend(Self::referenced_collections(rows)),
                _ => {}
            }
        }
        found
    }
}

/// Properties/format changes to an existing block.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct BlockUpdate {
    pub id: RecordId,
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
    #[serde(default)]
    pub format: Option<Map<String, Value>>,
}

fn page_type() -> String {
    "page".into()
}

#[derive(Deserialize)]
struct RawBlockSpec {
    #[serde(rename = "type", default = "page_type")]
    block_type: String,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
    #[serde(default)]
    format: Option<Map<String, Value>>,
    #[serde(default)]
    position: Option<Position>,
    #[serde(default, alias = "isPrivate")]
    is_private: bool,
    #[serde(default)]
    contents: Vec<BlockSpec>,
    #[serde(default)]
    schema: Vec<SchemaUnit>,
    #[serde(default)]
    views: Vec<ViewSpec>,
    #[serde(default)]
    rows: Vec<BlockSpec>,
    #[serde(default)]
    collection_id: Option<RecordId>,
    #[serde(default)]
    page_id: Option<RecordId>,
    #[serde(default)]
    file_id: Option<String>,
}

fn required<T>(value: Option<T>, what: &str, block_type: &str) -> Result<T, CoreError> {
    value.ok_or_else(|| CoreError::InvalidContent(format!("{block_type} block needs {what}")))
}

impl TryFrom<RawBlockSpec> for BlockSpec {
    type Error = CoreError;

    fn try_from(raw: RawBlockSpec) -> Result<Self, CoreError> {
        let properties = raw.properties.unwrap_or_default();
        let format = raw.format.unwrap_or_default();
        let name = raw.block_type.as_str();

        let kind = if name == "linked_db" {
            BlockKind::LinkedDatabase {
                collection_id: required(raw.collection_id, "a collection_id", name)?,
                views: raw.views,
            }
        } else {
            let block_type: BlockType = serde_json::from_value(Value::String(raw.block_type.clone()))
                .map_err(|e| CoreError::InvalidContent(e.to_string()))?;
            match block_type {
                BlockType::Other => {
                    return Err(CoreError::InvalidContent(format!("unknown block type {name:?}")));
                }
                BlockType::Page => BlockKind::Page {
                    is_private: raw.is_private,
                    contents: raw.contents,
                },
                BlockType::CollectionView | BlockType::CollectionViewPage => {
                    if let Some(row) = raw.rows.iter().find(|r| r.block_type() != BlockType::Page) {
                        return Err(CoreError::InvalidContent(format!(
                            "collection rows must be pages, got {}",
                            row.block_type().as_str()
                        )));
                    }
                    BlockKind::Collection {
                        block_type,
                        is_private: raw.is_private,
                        schema: raw.schema,
                        views: raw.views,
                        rows: raw.rows,
                    }
                }
                BlockType::Factory => BlockKind::Factory {
                    contents: raw
                        .contents
                        .into_iter()
                        .map(LeafSpec::try_from)
                        .collect::<Result<_, _>>()?,
                },
                BlockType::Bookmark => BlockKind::Bookmark {
                    link: required(
                        properties.get("link").and_then(rich_text::first_segment),
                        "a link property",
                        name,
                    )?
                    .to_string(),
                },
                BlockType::Drive => BlockKind::Drive {
                    file_id: required(raw.file_id, "a file_id", name)?,
                },
                BlockType::LinkToPage => BlockKind::LinkToPage {
                    page_id: required(raw.page_id, "a page_id", name)?,
                },
                provider if provider.is_embed() && provider != BlockType::Embed => BlockKind::Embed {
                    provider,
                    source: required(
                        properties.get("source").and_then(rich_text::first_segment),
                        "a source property",
                        name,
                    )?
                    .to_string(),
                },
                other => BlockKind::Basic(other),
            }
        };

        Ok(Self {
            kind,
            properties,
            format,
            position: raw.position,
        })
    }
}

impl TryFrom<BlockSpec> for LeafSpec {
    type Error = CoreError;

    fn try_from(spec: BlockSpec) -> Result<Self, CoreError> {
        match spec.kind {
            BlockKind::Basic(block_type) => Ok(Self {
                block_type,
                properties: spec.properties,
                format: spec.format,
            }),
            other => Err(CoreError::InvalidContent(format!(
                "factory children must be plain blocks, got {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_tree_parses_into_kinds() {
        let spec: BlockSpec = serde_json::from_value(json!({
            "properties": { "title": [["Root"]] },
            "isPrivate": true,
            "contents": [
                { "type": "to_do", "properties": { "title": [["task"]] }, "position": 0 },
                {
                    "type": "collection_view",
                    "properties": { "title": [["Tasks"]] },
                    "schema": [{ "name": "Name", "type": "title" }],
                    "views": [{ "name": "All", "type": "table" }],
                    "rows": [{ "type": "page", "properties": { "title": [["row"]] } }]
                },
                { "type": "linked_db", "collection_id": "c-1", "views": [] }
            ]
        }))
        .unwrap();

        let BlockKind::Page { is_private, contents } = &spec.kind else {
            panic!("expected page")
        };
        assert!(is_private);
        assert_eq!(contents[0].kind, BlockKind::Basic(BlockType::ToDo));
        assert_eq!(contents[0].position, Some(Position::Index(0)));
        assert!(matches!(contents[1].kind, BlockKind::Collection { ref rows, .. } if rows.len() == 1));
        assert_eq!(contents[2].block_type(), BlockType::CollectionView);
        assert_eq!(BlockSpec::referenced_collections(&[spec]), vec![RecordId::from("c-1")]);
    }

    #[test]
    fn side_channel_blocks_need_their_inputs() {
        let spec: BlockSpec = serde_json::from_value(json!({
            "type": "gist",
            "properties": { "source": [["https://gist.github.com/x"]] }
        }))
        .unwrap();
        assert_eq!(
            spec.kind,
            BlockKind::Embed {
                provider: BlockType::Gist,
                source: "https://gist.github.com/x".into()
            }
        );

        let missing = serde_json::from_value::<BlockSpec>(json!({ "type": "bookmark" }));
        assert!(missing.is_err());
        let missing = serde_json::from_value::<BlockSpec>(json!({ "type": "link_to_page" }));
        assert!(missing.is_err());
    }

    #[test]
    fn rejects_bad_trees() {
        let unknown = serde_json::from_value::<BlockSpec>(json!({ "type": "hologram" }));
        assert!(unknown.is_err());

        let nested_factory = serde_json::from_value::<BlockSpec>(json!({
            "type": "factory",
            "contents": [{ "type": "page" }]
        }));
        assert!(nested_factory.is_err());

        let bad_rows = serde_json::from_value::<BlockSpec>(json!({
            "type": "collection_view_page",
            "rows": [{ "type": "text" }]
        }));
        assert!(bad_rows.is_err());
    }
}
