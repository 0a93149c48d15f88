use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::CoreError;

/// Reserved key of the title column.
pub const TITLE_KEY: &str = "title";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaType {
    Title,
    Text,
    Number,
    Select,
    MultiSelect,
    Date,
    Person,
    File,
    Checkbox,
    Url,
    Email,
    PhoneNumber,
    Formula,
    Relation,
    Rollup,
    CreatedTime,
    CreatedBy,
    LastEditedTime,
    LastEditedBy,
}

/// One column descriptor. Type-specific settings (select options, formula,
/// relation target, ...) ride along untouched in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaUnit {
    pub name: String,
    #[serde(rename = "type")]
    pub unit_type: SchemaType,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SchemaUnit {
    pub fn new(name: impl Into<String>, unit_type: SchemaType) -> Self {
        Self {
            name: name.into(),
            unit_type,
            extra: Map::new(),
        }
    }

    /// Internal key derived from the column name.
    pub fn key(&self) -> String {
        schema_key(&self.name)
    }
}

/// Slug a human column name into its schema key: lower-cased, every
/// whitespace character replaced by `_`. Any casing of "title" maps to the
/// reserved title key.
pub fn schema_key(name: &str) -> String {
    if name.eq_ignore_ascii_case(TITLE_KEY) {
        return TITLE_KEY.to_string();
    }
    name.chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect::<String>()
        .to_lowercase()
}

/// Key-ordered column map of a collection. Order is the order columns were
/// declared in, which is also the order hidden view properties are listed in.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    entries: Vec<(String, SchemaUnit)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schema from declared units, slugging each name.
    pub fn from_units(collection_id: &str, units: &[SchemaUnit]) -> Result<Self, CoreError> {
        let mut schema = Self::new();
        for unit in units {
            schema.insert_new(collection_id, unit.key(), unit.clone())?;
        }
        Ok(schema)
    }

    /// Insert a column whose key must not exist yet.
    pub fn insert_new(
        &mut self,
        collection_id: &str,
        key: String,
        unit: SchemaUnit,
    ) -> Result<(), CoreError> {
        if self.get(&key).is_some() {
            return Err(CoreError::DuplicateSchemaKey {
                collection_id: collection_id.to_string(),
                key,
            });
        }
        self.entries.push((key, unit));
        Ok(())
    }

    /// Insert or replace a column, keeping its position when replaced.
    pub fn upsert(&mut self, key: String, unit: SchemaUnit) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = unit,
            None => self.entries.push((key, unit)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<SchemaUnit> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn get(&self, key: &str) -> Option<&SchemaUnit> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, u)| u)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut SchemaUnit> {
        self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, u)| u)
    }

    /// Resolve a human column name to its key.
    pub fn key_for_name(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, unit)| unit.name == name)
            .map(|(key, _)| key.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SchemaUnit)> {
        self.entries.iter().map(|(k, u)| (k.as_str(), u))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, unit) in &self.entries {
            map.serialize_entry(key, unit)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SchemaVisitor;

        impl<'de> Visitor<'de> for SchemaVisitor {
            type Value = Schema;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of schema key to column")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Schema, E> {
                Ok(Schema::new())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Schema, A::Error> {
                let mut schema = Schema::new();
                while let Some((key, unit)) = access.next_entry::<String, SchemaUnit>()? {
                    schema.upsert(key, unit);
                }
                Ok(schema)
            }
        }

        deserializer.deserialize_any(SchemaVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slug_rules() {
        assert_eq!(schema_key("Title"), "title");
        assert_eq!(schema_key("TITLE"), "title");
        assert_eq!(schema_key("Due Date"), "due_date");
        assert_eq!(schema_key("Score"), "score");
        assert_eq!(schema_key("a\tb c"), "a_b_c");
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let units = vec![
            SchemaUnit::new("Name", SchemaType::Title),
            SchemaUnit::new("name", SchemaType::Text),
        ];
        let err = Schema::from_units("c1", &units).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateSchemaKey { ref key, .. } if key == "name"));
    }

    #[test]
    fn serde_keeps_declaration_order() {
        let units = vec![
            SchemaUnit::new("Zeta", SchemaType::Title),
            SchemaUnit::new("Alpha", SchemaType::Number),
        ];
        let schema = Schema::from_units("c1", &units).unwrap();
        let value = serde_json::to_value(&schema).unwrap();
        let back: Schema = serde_json::from_value(value).unwrap();
        assert_eq!(back.keys().collect::<Vec<_>>(), vec!["zeta", "alpha"]);
        assert_eq!(back.key_for_name("Alpha"), Some("alpha"));
    }

    #[test]
    fn extra_fields_survive() {
        let unit: SchemaUnit = serde_json::from_value(json!({
            "name": "Status",
            "type": "select",
            "options": [{ "id": "o1", "value": "Done" }]
        }))
        .unwrap();
        assert_eq!(unit.unit_type, SchemaType::Select);
        assert!(unit.extra.contains_key("options"));
    }
}
