//! View/schema compiler: view specs over a collection schema into
//! `collection_view` create operations.

use std::collections::HashSet;

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use docgraph_core::{
    CoreError, Operation, RecordId, Schema, Table, View, ViewKind, ViewSpec,
    view::{
        Aggregation, Cover, FilterSpec, PropertyFilter, PropertyFormat, PropertyUpdate, Query2, Sort, SortSpec,
        ViewOptions,
    },
};

/// Ops creating the views, in spec order, plus the id and kind of each.
#[derive(Debug, Default)]
pub struct CompiledViews {
    pub ops: Vec<Operation>,
    pub views: Vec<(RecordId, ViewKind)>,
}

impl CompiledViews {
    pub fn view_ids(&self) -> Vec<RecordId> {
        self.views.iter().map(|(id, _)| id.clone()).collect()
    }
}

/// Compiles views for one collection.
pub struct ViewCompiler<'a> {
    pub schema: &'a Schema,
    pub collection_id: &'a RecordId,
    /// The collection block the views are attached to.
    pub parent_id: &'a RecordId,
    pub default_width: u32,
}

impl ViewCompiler<'_> {
    /// Compile every spec, drawing one id per view from `next_id`. Stops at the
    /// first spec that references an unknown column.
    pub fn compile_all(
        &self,
        specs: &[ViewSpec],
        mut next_id: impl FnMut() -> RecordId,
    ) -> Result<CompiledViews, CoreError> {
        let mut compiled = CompiledViews::default();
        for spec in specs {
            let id = next_id();
            let op = self.compile(&id, spec)?;
            compiled.ops.push(op);
            compiled.views.push((id, spec.kind()));
        }
        Ok(compiled)
    }

    pub fn compile(&self, id: &RecordId, spec: &ViewSpec) -> Result<Operation, CoreError> {
        let kind = spec.kind();
        let mut format = Map::new();
        let mut query2 = Query2::default();
        query2.filter.operator = spec.filter_operator;

        self.apply_options(&spec.options, &mut format, &mut query2)?;

        let mut properties = Vec::new();
        let mut included = HashSet::new();
        for column in &spec.columns {
            let key = self.resolve(&column.name)?;
            if included.insert(key.clone()) {
                properties.push(PropertyFormat {
                    property: key.clone(),
                    visible: column.display.visible,
                    width: Some(column.display.width.unwrap_or(self.default_width)),
                });
            }

            if let Some(sort) = column.sort {
                let entry = Sort {
                    property: key.clone(),
                    direction: sort.direction,
                };
                splice(&mut query2.sort, sort.position, entry);
            }

            if let Some(aggregator) = &column.aggregation {
                if kind.can_aggregate() {
                    query2.aggregations.push(Aggregation {
                        property: key.clone(),
                        aggregator: aggregator.clone(),
                    });
                } else {
                    warn!(view = %spec.name, kind = kind.as_str(), column = %column.name, "dropping aggregation");
                }
            }

            for filter in &column.filters {
                let entry = PropertyFilter {
                    property: key.clone(),
                    filter: filter.clause(),
                };
                splice(&mut query2.filter.filters, filter.position, entry);
            }
        }

        for key in self.schema.keys() {
            if !included.contains(key) {
                properties.push(PropertyFormat {
                    property: key.to_string(),
                    visible: false,
                    width: None,
                });
            }
        }
        format.insert(kind.properties_field(), to_json(&properties)?);

        debug!(view = %id, kind = kind.as_str(), properties = properties.len(), "compiled view");
        Ok(Table::CollectionView.set(
            id,
            &[],
            json!({
                "id": id,
                "version": 0,
                "type": kind,
                "name": spec.name,
                "page_sort": [],
                "parent_id": self.parent_id,
                "parent_table": "block",
                "alive": true,
                "format": format,
                "query2": to_json(&query2)?,
            }),
        ))
    }

    fn resolve(&self, name: &str) -> Result<String, CoreError> {
        resolve_column(self.schema, self.collection_id, name)
    }

    fn resolve_cover(&self, cover: &Cover) -> Result<Cover, CoreError> {
        Ok(match cover {
            Cover::Property { property } => Cover::Property {
                property: self.resolve(property)?,
            },
            other => other.clone(),
        })
    }

    fn apply_options(
        &self,
        options: &ViewOptions,
        format: &mut Map<String, Value>,
        query2: &mut Query2,
    ) -> Result<(), CoreError> {
        match options {
            ViewOptions::Table { table_wrap } => {
                format.insert("table_wrap".into(), json!(table_wrap));
            }
            ViewOptions::List => {}
            ViewOptions::Board {
                board_cover,
                board_cover_aspect,
                board_cover_size,
                board_groups2,
                group_by,
            } => {
                format.insert("board_cover".into(), to_json(&self.resolve_cover(board_cover)?)?);
                insert_some(format, "board_cover_aspect", board_cover_aspect.as_ref().map(|s| json!(s)));
                insert_some(format, "board_cover_size", board_cover_size.as_ref().map(|s| json!(s)));
                insert_some(format, "board_groups2", board_groups2.clone());
                if let Some(name) = group_by {
                    query2.group_by = Some(self.resolve(name)?);
                }
            }
            ViewOptions::Gallery {
                gallery_cover,
                gallery_cover_aspect,
                gallery_cover_size,
            } => {
                if let Some(cover) = gallery_cover {
                    format.insert("gallery_cover".into(), to_json(&self.resolve_cover(cover)?)?);
                }
                insert_some(format, "gallery_cover_aspect", gallery_cover_aspect.as_ref().map(|s| json!(s)));
                insert_some(format, "gallery_cover_size", gallery_cover_size.as_ref().map(|s| json!(s)));
            }
            ViewOptions::Calendar { calendar_by } => {
                query2.calendar_by = Some(self.resolve(calendar_by)?);
            }
            ViewOptions::Timeline {
                timeline_preference,
                timeline_show_table,
                timeline_by,
            } => {
                format.insert("timeline_preference".into(), to_json(timeline_preference)?);
                format.insert("timeline_show_table".into(), json!(timeline_show_table));
                query2.timeline_by = timeline_by.clone();
            }
        }
        Ok(())
    }
}

fn resolve_column(schema: &Schema, collection_id: &RecordId, name: &str) -> Result<String, CoreError> {
    schema
        .key_for_name(name)
        .map(str::to_string)
        .ok_or_else(|| CoreError::UnknownColumn {
            collection_id: collection_id.to_string(),
            column: name.to_string(),
        })
}

/// Insert at `position` (clamped), or push when absent.
fn splice<T>(list: &mut Vec<T>, position: Option<usize>, item: T) {
    match position {
        Some(at) => list.insert(at.min(list.len()), item),
        None => list.push(item),
    }
}

fn insert_some(format: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        format.insert(key.to_string(), value);
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, CoreError> {
    serde_json::to_value(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

// ============================================================================
// Keeping existing views in step with schema edits
// ============================================================================

/// Op appending a hidden entry for a new schema key, or `None` if the view
/// already lists it.
pub fn add_hidden_property(view: &View, key: &str) -> Result<Option<Operation>, CoreError> {
    let mut properties = view.properties()?;
    if properties.iter().any(|p| p.property == key) {
        return Ok(None);
    }
    properties.push(PropertyFormat {
        property: key.to_string(),
        visible: false,
        width: None,
    });
    let field = view.kind.properties_field();
    Ok(Some(Table::CollectionView.set(&view.id, &["format", &field], to_json(&properties)?)))
}

/// Ops removing every trace of a deleted schema key from a view.
pub fn forget_property(view: &View, key: &str) -> Result<Vec<Operation>, CoreError> {
    let mut ops = Vec::new();
    let mut properties = view.properties()?;
    let before = properties.len();
    properties.retain(|p| p.property != key);
    if properties.len() != before {
        let field = view.kind.properties_field();
        ops.push(Table::CollectionView.set(&view.id, &["format", &field], to_json(&properties)?));
    }
    if view.query2.references(key) {
        let mut query2 = view.query2.clone();
        query2.forget(key);
        ops.push(Table::CollectionView.set(&view.id, &["query2"], to_json(&query2)?));
    }
    Ok(ops)
}

// ============================================================================
// Editing an existing view
// ============================================================================

/// Working copy of one view's query and property list. Columns are named as
/// in the schema; `finish` emits a set for each part that changed.
pub struct ViewEditor<'a> {
    view: &'a View,
    schema: &'a Schema,
    collection_id: &'a RecordId,
    query2: Query2,
    properties: Vec<PropertyFormat>,
}

impl<'a> ViewEditor<'a> {
    pub fn new(view: &'a View, schema: &'a Schema, collection_id: &'a RecordId) -> Result<Self, CoreError> {
        Ok(Self {
            view,
            schema,
            collection_id,
            query2: view.query2.clone(),
            properties: view.properties()?,
        })
    }

    fn resolve(&self, name: &str) -> Result<String, CoreError> {
        resolve_column(self.schema, self.collection_id, name)
    }

    fn missing(&self, what: &str, column: &str) -> CoreError {
        CoreError::InvalidContent(format!("view {} has no {what} on {column}", self.view.id))
    }

    pub fn add_sort(&mut self, column: &str, sort: SortSpec) -> Result<(), CoreError> {
        let property = self.resolve(column)?;
        splice(
            &mut self.query2.sort,
            sort.position,
            Sort {
                property,
                direction: sort.direction,
            },
        );
        Ok(())
    }

    /// Change the direction of the column's sort, moving it when a position
    /// is given.
    pub fn update_sort(&mut self, column: &str, sort: SortSpec) -> Result<(), CoreError> {
        let key = self.resolve(column)?;
        let at = self
            .query2
            .sort
            .iter()
            .position(|s| s.property == key)
            .ok_or_else(|| self.missing("sort", column))?;
        let mut entry = self.query2.sort.remove(at);
        entry.direction = sort.direction;
        splice(&mut self.query2.sort, Some(sort.position.unwrap_or(at)), entry);
        Ok(())
    }

    pub fn remove_sort(&mut self, column: &str) -> Result<(), CoreError> {
        let key = self.resolve(column)?;
        let before = self.query2.sort.len();
        self.query2.sort.retain(|s| s.property != key);
        if self.query2.sort.len() == before {
            return Err(self.missing("sort", column));
        }
        Ok(())
    }

    pub fn add_filter(&mut self, column: &str, filter: &FilterSpec) -> Result<(), CoreError> {
        let property = self.resolve(column)?;
        splice(
            &mut self.query2.filter.filters,
            filter.position,
            PropertyFilter {
                property,
                filter: filter.clause(),
            },
        );
        Ok(())
    }

    /// Replace the column's first filter clause, moving it when a position is
    /// given.
    pub fn update_filter(&mut self, column: &str, filter: &FilterSpec) -> Result<(), CoreError> {
        let key = self.resolve(column)?;
        let at = self
            .query2
            .filter
            .filters
            .iter()
            .position(|f| f.property == key)
            .ok_or_else(|| self.missing("filter", column))?;
        let filters = &mut self.query2.filter.filters;
        let mut entry = filters.remove(at);
        entry.filter = filter.clause();
        splice(filters, Some(filter.position.unwrap_or(at)), entry);
        Ok(())
    }

    /// Drop every filter on the column.
    pub fn remove_filters(&mut self, column: &str) -> Result<(), CoreError> {
        let key = self.resolve(column)?;
        let before = self.query2.filter.filters.len();
        self.query2.filter.filters.retain(|f| f.property != key);
        if self.query2.filter.filters.len() == before {
            return Err(self.missing("filter", column));
        }
        Ok(())
    }

    /// Aggregate a column. A column carries at most one aggregation, and only
    /// table, board and timeline views aggregate at all.
    pub fn add_aggregation(&mut self, column: &str, aggregator: &str) -> Result<(), CoreError> {
        let property = self.resolve(column)?;
        if !self.view.kind.can_aggregate() {
            return Err(CoreError::InvalidContent(format!(
                "{} views do not aggregate",
                self.view.kind.as_str()
            )));
        }
        if self.query2.aggregations.iter().any(|a| a.property == property) {
            return Err(CoreError::InvalidContent(format!(
                "view {} already aggregates {column}",
                self.view.id
            )));
        }
        self.query2.aggregations.push(Aggregation {
            property,
            aggregator: aggregator.to_string(),
        });
        Ok(())
    }

    pub fn update_aggregation(&mut self, column: &str, aggregator: &str) -> Result<(), CoreError> {
        let key = self.resolve(column)?;
        let at = self
            .query2
            .aggregations
            .iter()
            .position(|a| a.property == key)
            .ok_or_else(|| self.missing("aggregation", column))?;
        self.query2.aggregations[at].aggregator = aggregator.to_string();
        Ok(())
    }

    pub fn remove_aggregation(&mut self, column: &str) -> Result<(), CoreError> {
        let key = self.resolve(column)?;
        let before = self.query2.aggregations.len();
        self.query2.aggregations.retain(|a| a.property != key);
        if self.query2.aggregations.len() == before {
            return Err(self.missing("aggregation", column));
        }
        Ok(())
    }

    fn property_index(&self, column: &str) -> Result<usize, CoreError> {
        let key = self.resolve(column)?;
        self.properties
            .iter()
            .position(|p| p.property == key)
            .ok_or_else(|| self.missing("property entry", column))
    }

    pub fn update_property(&mut self, column: &str, update: PropertyUpdate) -> Result<(), CoreError> {
        let at = self.property_index(column)?;
        let mut entry = self.properties.remove(at);
        if let Some(visible) = update.visible {
            entry.visible = visible;
        }
        if update.width.is_some() {
            entry.width = update.width;
        }
        splice(&mut self.properties, Some(update.position.unwrap_or(at)), entry);
        Ok(())
    }

    /// Show or hide a column; `None` flips it. Returns the new visibility.
    pub fn set_visibility(&mut self, column: &str, visible: Option<bool>) -> Result<bool, CoreError> {
        let at = self.property_index(column)?;
        let entry = &mut self.properties[at];
        entry.visible = visible.unwrap_or(!entry.visible);
        Ok(entry.visible)
    }

    pub fn finish(self) -> Result<Vec<Operation>, CoreError> {
        let mut ops = Vec::new();
        if self.properties != self.view.properties()? {
            let field = self.view.kind.properties_field();
            ops.push(Table::CollectionView.set(&self.view.id, &["format", &field], to_json(&self.properties)?));
        }
        if self.query2 != self.view.query2 {
            ops.push(Table::CollectionView.set(&self.view.id, &["query2"], to_json(&self.query2)?));
        }
        debug!(view = %self.view.id, ops = ops.len(), "edited view");
        Ok(ops)
    }
}
