use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::children::ChildField;
use crate::error::CoreError;
use crate::ids::RecordId;
use crate::operations::Table;
use crate::rich_text;
use crate::schema::Schema;
use crate::view::{PropertyFormat, Query2, ViewKind};

/// Treat an explicit `null` as the field's default.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn alive() -> bool {
    true
}

fn block_table() -> Table {
    Table::Block
}

fn is_false(b: &bool) -> bool {
    !*b
}

// ============================================================================
// Block kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    #[default]
    Page,
    CollectionView,
    CollectionViewPage,
    LinkToPage,
    Factory,
    Text,
    Header,
    SubHeader,
    SubSubHeader,
    ToDo,
    BulletedList,
    NumberedList,
    Toggle,
    Quote,
    Divider,
    Callout,
    Code,
    Equation,
    TableOfContents,
    Breadcrumb,
    Image,
    Video,
    Audio,
    File,
    Bookmark,
    Embed,
    Drive,
    Tweet,
    Gist,
    Codepen,
    Maps,
    Figma,
    ColumnList,
    Column,
    /// Any kind this client does not model.
    #[serde(other)]
    Other,
}

impl BlockType {
    /// Blocks that render a collection through `view_ids`.
    pub fn is_collection(&self) -> bool {
        matches!(self, Self::CollectionView | Self::CollectionViewPage)
    }

    /// Blocks that can be listed as workspace root pages.
    pub fn is_root_page(&self) -> bool {
        matches!(self, Self::Page | Self::CollectionViewPage)
    }

    /// Embed providers whose render data is resolved before creation.
    pub fn is_embed(&self) -> bool {
        matches!(
            self,
            Self::Embed | Self::Tweet | Self::Gist | Self::Codepen | Self::Maps | Self::Figma
        )
    }

    pub fn as_str(&self) -> String {
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }
}

/// A block's wire `type`. Names this client does not model read as
/// [`BlockType::Other`] but are written back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WireType {
    kind: BlockType,
    unmodeled: Option<String>,
}

impl WireType {
    pub fn kind(&self) -> BlockType {
        self.kind
    }

    pub fn name(&self) -> String {
        self.unmodeled.clone().unwrap_or_else(|| self.kind.as_str())
    }
}

impl From<BlockType> for WireType {
    fn from(kind: BlockType) -> Self {
        Self { kind, unmodeled: None }
    }
}

impl Serialize for WireType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.unmodeled {
            Some(name) => serializer.serialize_str(name),
            None => self.kind.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for WireType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        let kind: BlockType =
            serde_json::from_value(Value::String(name.clone())).map_err(serde::de::Error::custom)?;
        let unmodeled = (kind == BlockType::Other).then_some(name);
        Ok(Self { kind, unmodeled })
    }
}

// ============================================================================
// Permissions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionType {
    UserPermission,
    SpacePermission,
    PublicPermission,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionRole {
    Editor,
    ReadAndWrite,
    CommentOnly,
    Reader,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(rename = "type")]
    pub permission_type: PermissionType,
    pub role: PermissionRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<RecordId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Permission {
    pub fn new(permission_type: PermissionType, role: PermissionRole, user_id: Option<RecordId>) -> Self {
        Self {
            permission_type,
            role,
            user_id,
            extra: Map::new(),
        }
    }

    /// Two entries address the same grant when type and user agree.
    pub fn same_grant(&self, other: &Permission) -> bool {
        self.permission_type == other.permission_type && self.user_id == other.user_id
    }
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: RecordId,
    #[serde(default)]
    pub version: u64,
    #[serde(rename = "type", default)]
    pub wire_type: WireType,
    #[serde(default = "alive")]
    pub alive: bool,
    #[serde(default)]
    pub parent_id: RecordId,
    #[serde(default = "block_table")]
    pub parent_table: Table,
    #[serde(default, deserialize_with = "nullable")]
    pub properties: Map<String, Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub format: Map<String, Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub content: Vec<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<RecordId>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub view_ids: Vec<RecordId>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Permission>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_template: bool,
    #[serde(default)]
    pub created_time: u64,
    #[serde(default)]
    pub last_edited_time: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Block {
    pub fn block_type(&self) -> BlockType {
        self.wire_type.kind()
    }

    pub fn title(&self) -> String {
        self.properties.get("title").map(rich_text::plain).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: RecordId,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub name: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub icon: Value,
    #[serde(default = "alive")]
    pub alive: bool,
    #[serde(default)]
    pub parent_id: RecordId,
    #[serde(default = "block_table")]
    pub parent_table: Table,
    #[serde(default)]
    pub schema: Schema,
    #[serde(default, deserialize_with = "nullable")]
    pub format: Map<String, Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub template_pages: Vec<RecordId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Collection {
    pub fn title(&self) -> String {
        rich_text::plain(&self.name)
    }
}

/// A saved rendering/query configuration over a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub id: RecordId,
    #[serde(default)]
    pub version: u64,
    #[serde(rename = "type")]
    pub kind: ViewKind,
    #[serde(default)]
    pub name: String,
    #[serde(default = "alive")]
    pub alive: bool,
    #[serde(default)]
    pub parent_id: RecordId,
    #[serde(default = "block_table")]
    pub parent_table: Table,
    #[serde(default, deserialize_with = "nullable")]
    pub format: Map<String, Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub query2: Query2,
    #[serde(default, deserialize_with = "nullable")]
    pub page_sort: Vec<RecordId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl View {
    /// The `{kind}_properties` list of `format`.
    pub fn properties(&self) -> Result<Vec<PropertyFormat>, CoreError> {
        match self.format.get(&self.kind.properties_field()) {
            Some(list) => serde_json::from_value(list.clone())
                .map_err(|e| CoreError::Serialization(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    pub fn set_properties(&mut self, properties: &[PropertyFormat]) -> Result<(), CoreError> {
        let list = serde_json::to_value(properties).map_err(|e| CoreError::Serialization(e.to_string()))?;
        self.format.insert(self.kind.properties_field(), list);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: RecordId,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default = "alive")]
    pub alive: bool,
    #[serde(default, deserialize_with = "nullable")]
    pub pages: Vec<RecordId>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Permission>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-user view of a workspace; holds the user's bookmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceView {
    pub id: RecordId,
    #[serde(default)]
    pub version: u64,
    #[serde(default = "alive")]
    pub alive: bool,
    #[serde(default)]
    pub parent_id: RecordId,
    #[serde(default = "user_root_table")]
    pub parent_table: Table,
    #[serde(default)]
    pub space_id: RecordId,
    #[serde(default, deserialize_with = "nullable")]
    pub bookmarked_pages: Vec<RecordId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn user_root_table() -> Table {
    Table::UserRoot
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: RecordId,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub id: RecordId,
    #[serde(default)]
    pub version: u64,
    #[serde(default, deserialize_with = "nullable")]
    pub settings: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRoot {
    pub id: RecordId,
    #[serde(default)]
    pub version: u64,
    #[serde(default, deserialize_with = "nullable")]
    pub space_views: Vec<RecordId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Any record of the document graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Block(Block),
    Collection(Collection),
    View(View),
    Workspace(Workspace),
    WorkspaceView(WorkspaceView),
    User(User),
    UserSettings(UserSettings),
    UserRoot(UserRoot),
}

impl Record {
    pub fn table(&self) -> Table {
        match self {
            Self::Block(_) => Table::Block,
            Self::Collection(_) => Table::Collection,
            Self::View(_) => Table::CollectionView,
            Self::Workspace(_) => Table::Workspace,
            Self::WorkspaceView(_) => Table::WorkspaceView,
            Self::User(_) => Table::User,
            Self::UserSettings(_) => Table::UserSettings,
            Self::UserRoot(_) => Table::UserRoot,
        }
    }

    pub fn id(&self) -> &RecordId {
        match self {
            Self::Block(r) => &r.id,
            Self::Collection(r) => &r.id,
            Self::View(r) => &r.id,
            Self::Workspace(r) => &r.id,
            Self::WorkspaceView(r) => &r.id,
            Self::User(r) => &r.id,
            Self::UserSettings(r) => &r.id,
            Self::UserRoot(r) => &r.id,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            Self::Block(r) => r.version,
            Self::Collection(r) => r.version,
            Self::View(r) => r.version,
            Self::Workspace(r) => r.version,
            Self::WorkspaceView(r) => r.version,
            Self::User(r) => r.version,
            Self::UserSettings(r) => r.version,
            Self::UserRoot(r) => r.version,
        }
    }

    pub fn alive(&self) -> bool {
        match self {
            Self::Block(r) => r.alive,
            Self::Collection(r) => r.alive,
            Self::View(r) => r.alive,
            Self::Workspace(r) => r.alive,
            Self::WorkspaceView(r) => r.alive,
            Self::User(_) | Self::UserSettings(_) | Self::UserRoot(_) => true,
        }
    }

    /// Parent reference. Workspaces and user records have none.
    pub fn parent(&self) -> Option<(&RecordId, Table)> {
        match self {
            Self::Block(r) => Some((&r.parent_id, r.parent_table)),
            Self::Collection(r) => Some((&r.parent_id, r.parent_table)),
            Self::View(r) => Some((&r.parent_id, r.parent_table)),
            Self::WorkspaceView(r) => Some((&r.parent_id, r.parent_table)),
            Self::Workspace(_) | Self::User(_) | Self::UserSettings(_) | Self::UserRoot(_) => None,
        }
    }

    /// The ordered child array this record owns, and the table its children
    /// live in.
    pub fn child_array(&self) -> Option<(ChildField, Table)> {
        match self {
            Self::Block(b) if b.block_type().is_collection() => {
                Some((ChildField::ViewIds, Table::CollectionView))
            }
            Self::Block(_) => Some((ChildField::Content, Table::Block)),
            Self::Workspace(_) => Some((ChildField::Pages, Table::Block)),
            Self::Collection(_) => Some((ChildField::TemplatePages, Table::Block)),
            Self::UserRoot(_) => Some((ChildField::SpaceViews, Table::WorkspaceView)),
            Self::WorkspaceView(_) => Some((ChildField::BookmarkedPages, Table::Block)),
            Self::View(_) | Self::User(_) | Self::UserSettings(_) => None,
        }
    }

    /// Mutable access to a named child array, if this record has it.
    pub fn child_ids_mut(&mut self, field: ChildField) -> Option<&mut Vec<RecordId>> {
        match (self, field) {
            (Self::Block(b), ChildField::Content) => Some(&mut b.content),
            (Self::Block(b), ChildField::ViewIds) => Some(&mut b.view_ids),
            (Self::Workspace(w), ChildField::Pages) => Some(&mut w.pages),
            (Self::Collection(c), ChildField::TemplatePages) => Some(&mut c.template_pages),
            (Self::UserRoot(u), ChildField::SpaceViews) => Some(&mut u.space_views),
            (Self::WorkspaceView(v), ChildField::BookmarkedPages) => Some(&mut v.bookmarked_pages),
            _ => None,
        }
    }

    pub fn child_ids(&self, field: ChildField) -> Option<&[RecordId]> {
        match (self, field) {
            (Self::Block(b), ChildField::Content) => Some(&b.content),
            (Self::Block(b), ChildField::ViewIds) => Some(&b.view_ids),
            (Self::Workspace(w), ChildField::Pages) => Some(&w.pages),
            (Self::Collection(c), ChildField::TemplatePages) => Some(&c.template_pages),
            (Self::UserRoot(u), ChildField::SpaceViews) => Some(&u.space_views),
            (Self::WorkspaceView(v), ChildField::BookmarkedPages) => Some(&v.bookmarked_pages),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Result<Value, CoreError> {
        let value = match self {
            Self::Block(r) => serde_json::to_value(r),
            Self::Collection(r) => serde_json::to_value(r),
            Self::View(r) => serde_json::to_value(r),
            Self::Workspace(r) => serde_json::to_value(r),
            Self::WorkspaceView(r) => serde_json::to_value(r),
            Self::User(r) => serde_json::to_value(r),
            Self::UserSettings(r) => serde_json::to_value(r),
            Self::UserRoot(r) => serde_json::to_value(r),
        };
        value.map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_value(table: Table, value: Value) -> Result<Self, CoreError> {
        let record = match table {
            Table::Block => serde_json::from_value(value).map(Self::Block),
            Table::Collection => serde_json::from_value(value).map(Self::Collection),
            Table::CollectionView => serde_json::from_value(value).map(Self::View),
            Table::Workspace => serde_json::from_value(value).map(Self::Workspace),
            Table::WorkspaceView => serde_json::from_value(value).map(Self::WorkspaceView),
            Table::User => serde_json::from_value(value).map(Self::User),
            Table::UserSettings => serde_json::from_value(value).map(Self::UserSettings),
            Table::UserRoot => serde_json::from_value(value).map(Self::UserRoot),
        };
        record.map_err(|e| CoreError::Serialization(format!("{table} record: {e}")))
    }
}
