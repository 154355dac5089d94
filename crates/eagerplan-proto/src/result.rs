//! Materialized rows with attached related rows.

use std::collections::BTreeMap;

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A materialized row.
///
/// `entity` starts as the queried entity and is replaced by the concrete
/// subtype once a polymorphic row's discriminator has been resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Entity (or concrete subtype) name.
    pub entity: String,
    /// Column and annotation values.
    pub fields: BTreeMap<String, Value>,
    /// Related rows by attribute name.
    pub relations: BTreeMap<String, Related>,
}

/// Rows attached to a parent under one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Related {
    /// A to-one relation (absent target is `None`).
    One(Option<Box<Row>>),
    /// A to-many relation.
    Many(Vec<Row>),
    /// A paginated to-many relation.
    Page(Page),
}

impl Related {
    /// All rows under this attribute, in order.
    pub fn rows(&self) -> Vec<&Row> {
        match self {
            Related::One(row) => row.iter().map(|r| &**r).collect(),
            Related::Many(rows) => rows.iter().collect(),
            Related::Page(page) => page.edges.iter().map(|e| &e.node).collect(),
        }
    }

    /// Mutable access to all rows under this attribute.
    pub fn rows_mut(&mut self) -> Vec<&mut Row> {
        match self {
            Related::One(row) => row.iter_mut().map(|r| &mut **r).collect(),
            Related::Many(rows) => rows.iter_mut().collect(),
            Related::Page(page) => page.edges.iter_mut().map(|e| &mut e.node).collect(),
        }
    }
}

/// One slice of an ordered collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Rows with their cursors.
    pub edges: Vec<Edge>,
    /// Position of the slice in the full sequence.
    pub page_info: PageInfo,
    /// Size of the full (unsliced) collection, when requested.
    pub total_count: Option<u64>,
}

impl Page {
    /// The nodes of the page in order.
    pub fn nodes(&self) -> Vec<&Row> {
        self.edges.iter().map(|e| &e.node).collect()
    }
}

/// A row and the cursor identifying its position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Opaque cursor.
    pub cursor: String,
    /// The row.
    pub node: Row,
}

/// Pagination metadata for a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// More rows exist after the page.
    pub has_next_page: bool,
    /// More rows exist before the page.
    pub has_previous_page: bool,
    /// Cursor of the first row.
    pub start_cursor: Option<String>,
    /// Cursor of the last row.
    pub end_cursor: Option<String>,
}

impl Row {
    /// Create an empty row of an entity.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            fields: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    /// Add a field value.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Get a field value, treating an absent field as null.
    pub fn get_or_null(&self, field: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.fields.get(field).unwrap_or(&NULL)
    }

    /// Set a field value.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Related rows stored under `attribute`.
    pub fn related(&self, attribute: &str) -> Option<&Related> {
        self.relations.get(attribute)
    }

    /// Rows stored under `attribute`, empty if absent.
    pub fn related_rows(&self, attribute: &str) -> Vec<&Row> {
        self.relations
            .get(attribute)
            .map(Related::rows)
            .unwrap_or_default()
    }

    /// The single related row under `attribute`, if present.
    pub fn one(&self, attribute: &str) -> Option<&Row> {
        match self.relations.get(attribute) {
            Some(Related::One(row)) => row.as_deref(),
            _ => None,
        }
    }

    /// The page stored under `attribute`, if present.
    pub fn page(&self, attribute: &str) -> Option<&Page> {
        match self.relations.get(attribute) {
            Some(Related::Page(page)) => Some(page),
            _ => None,
        }
    }

    /// Attach related rows under `attribute`, replacing any previous value.
    pub fn attach(&mut self, attribute: impl Into<String>, related: Related) {
        self.relations.insert(attribute.into(), related);
    }

    /// Copy fields and relations from `other` that this row does not have.
    pub fn absorb(&mut self, other: Row) {
        for (name, value) in other.fields {
            self.fields.entry(name).or_insert(value);
        }
        for (name, related) in other.relations {
            self.relations.entry(name).or_insert(related);
        }
    }
}
