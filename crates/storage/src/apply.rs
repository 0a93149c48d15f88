use serde_json::{Map, Value};

use docgraph_core::{
    ids::RecordId,
    operations::{Command, Operation},
};

use crate::error::StorageError;

/// Apply `op` to the JSON form of one record and return the new form.
///
/// `current` is `None` when the record does not exist yet; only `set` and
/// `update` may create one.
pub fn materialize_op(current: Option<Value>, op: &Operation) -> Result<Value, StorageError> {
    let mut record = match current {
        Some(value) => value,
        None if matches!(op.command, Command::Set | Command::Update) => {
            Value::Object(Map::new())
        }
        None => {
            return Err(StorageError::NotFound {
                table: op.table,
                id: op.id.to_string(),
            });
        }
    };

    let target = slot_mut(&mut record, &op.path);
    match op.command {
        Command::Set => *target = op.args.clone(),
        Command::Update => merge(target, &op.args),
        Command::ListBefore | Command::ListAfter => list_insert(target, op)?,
        Command::ListRemove => {
            let id = arg_id(op, "id")?;
            if let Value::Array(items) = target {
                items.retain(|item| item.as_str() != Some(id.as_str()));
            }
        }
        Command::SetPermissionItem => upsert_permission(target, &op.args),
    }

    if let Value::Object(map) = &mut record {
        map.entry("id").or_insert_with(|| Value::String(op.id.to_string()));
    }
    Ok(record)
}

fn slot_mut<'a>(root: &'a mut Value, path: &[String]) -> &'a mut Value {
    let mut target = root;
    for key in path {
        if !target.is_object() {
            *target = Value::Object(Map::new());
        }
        target = match target {
            Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
            other => other,
        };
    }
    target
}

fn merge(target: &mut Value, args: &Value) {
    match (target, args) {
        (Value::Object(existing), Value::Object(fields)) => {
            for (key, value) in fields {
                existing.insert(key.clone(), value.clone());
            }
        }
        (target, args) => *target = args.clone(),
    }
}

fn arg_id(op: &Operation, field: &str) -> Result<RecordId, StorageError> {
    op.args
        .get(field)
        .and_then(Value::as_str)
        .map(RecordId::from)
        .ok_or_else(|| invalid(op, format!("args.{field} is missing")))
}

fn invalid(op: &Operation, reason: String) -> StorageError {
    StorageError::InvalidOperation {
        table: op.table,
        id: op.id.to_string(),
        command: format!("{:?}", op.command),
        path: op.path.clone(),
        reason,
    }
}

/// Positional insert. An id already in the list is moved; a missing or
/// empty anchor means the start (`listBefore`) or end (`listAfter`).
fn list_insert(target: &mut Value, op: &Operation) -> Result<(), StorageError> {
    let id = arg_id(op, "id")?;
    if !target.is_array() {
        *target = Value::Array(Vec::new());
    }
    let Value::Array(items) = target else {
        return Err(invalid(op, "target is not a list".into()));
    };
    items.retain(|item| item.as_str() != Some(id.as_str()));

    let anchor_field = if op.command == Command::ListBefore { "before" } else { "after" };
    let anchor = op.args.get(anchor_field).and_then(Value::as_str).unwrap_or("");
    let found = (!anchor.is_empty())
        .then(|| items.iter().position(|item| item.as_str() == Some(anchor)))
        .flatten();

    let index = match (op.command, found) {
        (Command::ListBefore, Some(at)) => at,
        (Command::ListBefore, None) => 0,
        (_, Some(at)) => at + 1,
        (_, None) => items.len(),
    };
    items.insert(index, Value::String(id.to_string()));
    Ok(())
}

fn upsert_permission(target: &mut Value, args: &Value) {
    if !target.is_array() {
        *target = Value::Array(Vec::new());
    }
    let Value::Array(items) = target else { return };
    let same_grant = |item: &Value| {
        item.get("type") == args.get("type") && item.get("user_id") == args.get("user_id")
    };
    match items.iter_mut().find(|item| same_grant(item)) {
        Some(existing) => *existing = args.clone(),
        None => items.push(args.clone()),
    }
}
