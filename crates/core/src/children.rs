use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::CoreError;
use crate::ids::RecordId;
use crate::operations::{Operation, Table};

/// Named ordered-id field on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildField {
    Content,
    ViewIds,
    Pages,
    TemplatePages,
    SpaceViews,
    BookmarkedPages,
}

impl ChildField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::ViewIds => "view_ids",
            Self::Pages => "pages",
            Self::TemplatePages => "template_pages",
            Self::SpaceViews => "space_views",
            Self::BookmarkedPages => "bookmarked_pages",
        }
    }
}

/// Which child array of which record an edit targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChildSlot {
    pub table: Table,
    pub owner: RecordId,
    pub field: ChildField,
}

impl ChildSlot {
    pub fn new(table: Table, owner: &RecordId, field: ChildField) -> Self {
        Self {
            table,
            owner: owner.clone(),
            field,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Before,
    After,
}

/// Where a child goes in its container.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "RawPosition")]
pub enum Position {
    #[default]
    Append,
    /// Lands at this index of the container (clamped to its length).
    Index(usize),
    Before(RecordId),
    After(RecordId),
}

impl Position {
    pub fn relative(sibling: &RecordId, side: Side) -> Self {
        match side {
            Side::Before => Self::Before(sibling.clone()),
            Side::After => Self::After(sibling.clone()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPosition {
    Index(usize),
    Relative { id: RecordId, position: Side },
    Named(String),
}

impl TryFrom<RawPosition> for Position {
    type Error = CoreError;

    fn try_from(raw: RawPosition) -> Result<Self, Self::Error> {
        match raw {
            RawPosition::Index(n) => Ok(Self::Index(n)),
            RawPosition::Relative { id, position } => Ok(Self::relative(&id, position)),
            RawPosition::Named(name) if name == "append" => Ok(Self::Append),
            RawPosition::Named(name) => Err(CoreError::InvalidContent(format!("unknown position {name:?}"))),
        }
    }
}

/// Place `child` into `container` and return the remote operation that
/// performs the same edit.
///
/// An id already present is moved: it is taken out first and then
/// re-inserted, so the container never holds duplicates. For a numeric
/// index the local splice and the emitted primitive always agree:
/// `listBefore` the id currently at that index, or `listAfter` the last
/// id when the index is at (or past) the end.
pub fn insert_into(
    container: &mut Vec<RecordId>,
    slot: &ChildSlot,
    child: &RecordId,
    position: &Position,
) -> Result<Operation, CoreError> {
    if let Position::Before(sibling) | Position::After(sibling) = position
        && (sibling == child || !container.contains(sibling))
    {
        return Err(CoreError::SiblingNotFound {
            owner: slot.owner.to_string(),
            field: slot.field.as_str(),
            sibling: sibling.to_string(),
        });
    }

    if let Some(existing) = container.iter().position(|id| id == child) {
        container.remove(existing);
    }

    let path = [slot.field.as_str()];
    let op = match position {
        Position::Append => {
            container.push(child.clone());
            slot.table.list_after(&slot.owner, &path, json!({ "after": "", "id": child }))
        }
        Position::Index(index) => {
            let index = (*index).min(container.len());
            if let Some(anchor) = container.get(index).cloned() {
                container.insert(index, child.clone());
                slot.table.list_before(&slot.owner, &path, json!({ "before": anchor, "id": child }))
            } else {
                let anchor = container.last().cloned().unwrap_or_else(RecordId::sentinel);
                container.push(child.clone());
                slot.table.list_after(&slot.owner, &path, json!({ "after": anchor, "id": child }))
            }
        }
        Position::Before(sibling) => {
            let at = sibling_index(container, sibling);
            container.insert(at, child.clone());
            slot.table.list_before(&slot.owner, &path, json!({ "before": sibling, "id": child }))
        }
        Position::After(sibling) => {
            let at = sibling_index(container, sibling) + 1;
            container.insert(at, child.clone());
            slot.table.list_after(&slot.owner, &path, json!({ "after": sibling, "id": child }))
        }
    };
    Ok(op)
}

/// Take `child` out of `container`. Returns `None` when it was not there.
pub fn remove_from(
    container: &mut Vec<RecordId>,
    slot: &ChildSlot,
    child: &RecordId,
) -> Option<Operation> {
    let index = container.iter().position(|id| id == child)?;
    container.remove(index);
    Some(slot.table.list_remove(&slot.owner, &[slot.field.as_str()], json!({ "id": child })))
}

fn sibling_index(container: &[RecordId], sibling: &RecordId) -> usize {
    // Presence is checked before the container is touched.
    container.iter().position(|id| id == sibling).unwrap_or(container.len())
}
