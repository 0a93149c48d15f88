use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Rendering kind of a collection view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    Table,
    List,
    Board,
    Gallery,
    Calendar,
    Timeline,
}

impl ViewKind {
    pub const ALL: [ViewKind; 6] = [
        ViewKind::Table,
        ViewKind::List,
        ViewKind::Board,
        ViewKind::Gallery,
        ViewKind::Calendar,
        ViewKind::Timeline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::List => "list",
            Self::Board => "board",
            Self::Gallery => "gallery",
            Self::Calendar => "calendar",
            Self::Timeline => "timeline",
        }
    }

    /// Only these kinds carry `query2.aggregations`.
    pub fn can_aggregate(&self) -> bool {
        matches!(self, Self::Table | Self::Board | Self::Timeline)
    }

    /// Key of the property list inside the view's `format`.
    pub fn properties_field(&self) -> String {
        format!("{}_properties", self.as_str())
    }
}

// ============================================================================
// Stored view configuration
// ============================================================================

/// Visibility and width of one schema key inside a view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFormat {
    pub property: String,
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub property: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterValue {
    #[serde(rename = "type")]
    pub value_type: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FilterValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    pub property: String,
    pub filter: FilterClause,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterGroup {
    #[serde(default)]
    pub operator: FilterOperator,
    #[serde(default)]
    pub filters: Vec<PropertyFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub property: String,
    pub aggregator: String,
}

/// Query block of a view: sort, filter tree and aggregations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Query2 {
    #[serde(default)]
    pub sort: Vec<Sort>,
    #[serde(default)]
    pub filter: FilterGroup,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregations: Vec<Aggregation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline_by: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Query2 {
    /// True if any sort, filter, aggregation or grouping references `key`.
    pub fn references(&self, key: &str) -> bool {
        self.sort.iter().any(|s| s.property == key)
            || self.filter.filters.iter().any(|f| f.property == key)
            || self.aggregations.iter().any(|a| a.property == key)
            || self.group_by.as_deref() == Some(key)
            || self.calendar_by.as_deref() == Some(key)
    }

    /// Drop every reference to `key`.
    pub fn forget(&mut self, key: &str) {
        self.sort.retain(|s| s.property != key);
        self.filter.filters.retain(|f| f.property != key);
        self.aggregations.retain(|a| a.property != key);
        if self.group_by.as_deref() == Some(key) {
            self.group_by = None;
        }
        if self.calendar_by.as_deref() == Some(key) {
            self.calendar_by = None;
        }
    }
}

// ============================================================================
// Views as callers describe them
// ============================================================================

/// What a card or board shows as its cover. Column names inside
/// `Property` are resolved to schema keys when the view is compiled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Cover {
    PageCover,
    PageContent,
    Property { property: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelinePreference {
    pub center_timestamp: i64,
    pub zoom_level: String,
}

impl Default for TimelinePreference {
    fn default() -> Self {
        Self {
            center_timestamp: 1,
            zoom_level: "month".into(),
        }
    }
}

fn yes() -> bool {
    true
}

fn page_cover() -> Cover {
    Cover::PageCover
}

/// Kind-specific view options with every default resolved at parse time.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewOptions {
    Table {
        #[serde(default = "yes")]
        table_wrap: bool,
    },
    List,
    Board {
        #[serde(default = "page_cover")]
        board_cover: Cover,
        #[serde(default)]
        board_cover_aspect: Option<String>,
        #[serde(default)]
        board_cover_size: Option<String>,
        #[serde(default)]
        board_groups2: Option<Value>,
        /// Column name.
        #[serde(default)]
        group_by: Option<String>,
    },
    Gallery {
        #[serde(default)]
        gallery_cover: Option<Cover>,
        #[serde(default)]
        gallery_cover_aspect: Option<String>,
        #[serde(default)]
        gallery_cover_size: Option<String>,
    },
    Calendar {
        /// Column name.
        calendar_by: String,
    },
    Timeline {
        #[serde(default)]
        timeline_preference: TimelinePreference,
        #[serde(default = "yes")]
        timeline_show_table: bool,
        /// Granularity: hours, day, week, bi_week, month, quarter or year.
        #[serde(default)]
        timeline_by: Option<String>,
    },
}

impl ViewOptions {
    pub fn kind(&self) -> ViewKind {
        match self {
            Self::Table { .. } => ViewKind::Table,
            Self::List => ViewKind::List,
            Self::Board { .. } => ViewKind::Board,
            Self::Gallery { .. } => ViewKind::Gallery,
            Self::Calendar { .. } => ViewKind::Calendar,
            Self::Timeline { .. } => ViewKind::Timeline,
        }
    }

    pub fn table() -> Self {
        Self::Table { table_wrap: true }
    }
}

/// A view to create over a collection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ViewSpec {
    pub name: String,
    #[serde(flatten)]
    pub options: ViewOptions,
    #[serde(default)]
    pub filter_operator: FilterOperator,
    #[serde(default, alias = "view")]
    pub columns: Vec<ColumnSpec>,
}

impl ViewSpec {
    pub fn new(name: impl Into<String>, options: ViewOptions) -> Self {
        Self {
            name: name.into(),
            options,
            filter_operator: FilterOperator::And,
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn kind(&self) -> ViewKind {
        self.options.kind()
    }
}

/// Visibility/width of a referenced column. Accepts `true`, `250` or
/// `[true, 250]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "RawDisplay")]
pub struct ColumnDisplay {
    pub visible: bool,
    pub width: Option<u32>,
}

impl Default for ColumnDisplay {
    fn default() -> Self {
        Self {
            visible: true,
            width: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDisplay {
    Visible(bool),
    Width(u32),
    Both(bool, u32),
}

impl From<RawDisplay> for ColumnDisplay {
    fn from(raw: RawDisplay) -> Self {
        match raw {
            RawDisplay::Visible(visible) => Self { visible, width: None },
            RawDisplay::Width(width) => Self { visible: true, width: Some(width) },
            RawDisplay::Both(visible, width) => Self { visible, width: Some(width) },
        }
    }
}

/// Accepts `"ascending"` or `["ascending", 0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "RawSort")]
pub struct SortSpec {
    pub direction: SortDirection,
    pub position: Option<usize>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSort {
    Direction(SortDirection),
    Positioned(SortDirection, usize),
}

impl From<RawSort> for SortSpec {
    fn from(raw: RawSort) -> Self {
        match raw {
            RawSort::Direction(direction) => Self { direction, position: None },
            RawSort::Positioned(direction, position) => Self {
                direction,
                position: Some(position),
            },
        }
    }
}

/// Accepts `[operator, type, value]`, `[operator, type, value, position]` or
/// an object with those field names.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawFilter")]
pub struct FilterSpec {
    pub operator: String,
    pub value_type: String,
    pub value: Value,
    pub position: Option<usize>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFilter {
    Positioned(String, String, Value, usize),
    Plain(String, String, Value),
    Object {
        operator: String,
        #[serde(rename = "type")]
        value_type: String,
        #[serde(default)]
        value: Value,
        #[serde(default)]
        position: Option<usize>,
    },
}

impl From<RawFilter> for FilterSpec {
    fn from(raw: RawFilter) -> Self {
        match raw {
            RawFilter::Positioned(operator, value_type, value, position) => Self {
                operator,
                value_type,
                value,
                position: Some(position),
            },
            RawFilter::Plain(operator, value_type, value) => Self {
                operator,
                value_type,
                value,
                position: None,
            },
            RawFilter::Object { operator, value_type, value, position } => Self {
                operator,
                value_type,
                value,
                position,
            },
        }
    }
}

impl FilterSpec {
    pub fn clause(&self) -> FilterClause {
        FilterClause {
            operator: self.operator.clone(),
            value: Some(FilterValue {
                value_type: self.value_type.clone(),
                value: self.value.clone(),
            }),
        }
    }
}

/// One column referenced by a view spec, by human name.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(default, rename = "format")]
    pub display: ColumnDisplay,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default)]
    pub aggregation: Option<String>,
    #[serde(default, alias = "filter")]
    pub filters: Vec<FilterSpec>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display: ColumnDisplay::default(),
            sort: None,
            aggregation: None,
            filters: Vec::new(),
        }
    }

    pub fn hidden(mut self) -> Self {
        self.display.visible = false;
        self
    }

    pub fn width(mut self, width: u32) -> Self {
        self.display.width = Some(width);
        self
    }

    pub fn sorted(mut self, direction: SortDirection, position: Option<usize>) -> Self {
        self.sort = Some(SortSpec { direction, position });
        self
    }

    pub fn aggregate(mut self, aggregator: impl Into<String>) -> Self {
        self.aggregation = Some(aggregator.into());
        self
    }

    pub fn filter(mut self, operator: &str, value_type: &str, value: Value) -> Self {
        self.filters.push(FilterSpec {
            operator: operator.into(),
            value_type: value_type.into(),
            value,
            position: None,
        });
        self
    }
}

/// Changes to one column's entry in a view's property list. `None` leaves
/// the current value alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct PropertyUpdate {
    #[serde(default)]
    pub visible: Option<bool>,
    #[serde(default)]
    pub width: Option<u32>,
    /// New index in the property list (clamped).
    #[serde(default)]
    pub position: Option<usize>,
}

/// Default `format` object for a freshly created view of `kind`, before
/// properties are filled in.
pub fn empty_format(kind: ViewKind) -> Map<String, Value> {
    let mut format = Map::new();
    format.insert(kind.properties_field(), json!([]));
    format
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_spec_defaults_are_resolved() {
        let spec: ViewSpec = serde_json::from_value(json!({
            "name": "Default",
            "type": "table",
            "view": [{ "name": "Name" }]
        }))
        .unwrap();
        assert_eq!(spec.options, ViewOptions::Table { table_wrap: true });
        assert_eq!(spec.filter_operator, FilterOperator::And);
        assert_eq!(spec.columns[0].display, ColumnDisplay::default());

        let spec: ViewSpec = serde_json::from_value(json!({
            "name": "Roadmap",
            "type": "timeline"
        }))
        .unwrap();
        match spec.options {
            ViewOptions::Timeline { timeline_preference, timeline_show_table, .. } => {
                assert_eq!(timeline_preference, TimelinePreference::default());
                assert!(timeline_show_table);
            }
            other => panic!("unexpected options {other:?}"),
        }

        let spec: ViewSpec =
            serde_json::from_value(json!({ "name": "B", "type": "board" })).unwrap();
        assert!(matches!(spec.options, ViewOptions::Board { board_cover: Cover::PageCover, .. }));
    }

    #[test]
    fn column_shorthands_parse() {
        let column: ColumnSpec = serde_json::from_value(json!({
            "name": "Score",
            "format": [false, 120],
            "sort": ["descending", 0],
            "aggregation": "sum",
            "filter": [["greater_than", "exact", 3], ["less_than", "exact", 9, 0]]
        }))
        .unwrap();
        assert_eq!(column.display, ColumnDisplay { visible: false, width: Some(120) });
        assert_eq!(column.sort, Some(SortSpec { direction: SortDirection::Descending, position: Some(0) }));
        assert_eq!(column.filters.len(), 2);
        assert_eq!(column.filters[1].position, Some(0));

        let column: ColumnSpec =
            serde_json::from_value(json!({ "name": "Score", "format": 300, "sort": "ascending" })).unwrap();
        assert_eq!(column.display, ColumnDisplay { visible: true, width: Some(300) });
        assert_eq!(column.sort.map(|s| s.position), Some(None));
    }

    #[test]
    fn aggregation_kinds() {
        let aggregating: Vec<_> = ViewKind::ALL.into_iter().filter(ViewKind::can_aggregate).collect();
        assert_eq!(aggregating, vec![ViewKind::Table, ViewKind::Board, ViewKind::Timeline]);
        assert_eq!(ViewKind::Gallery.properties_field(), "gallery_properties");
    }

    #[test]
    fn query2_omits_empty_aggregations() {
        let value = serde_json::to_value(Query2::default()).unwrap();
        assert_eq!(value, json!({ "sort": [], "filter": { "operator": "and", "filters": [] } }));
    }
}
