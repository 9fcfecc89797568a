//! The hierarchical node tree held by a session.
//!
//! A store is a tree of named nodes addressed by `/`-separated paths:
//! groups hold children, extensible arrays hold `f64` rows of a fixed
//! width, tables hold schema-checked records. The tree is rebuilt from the
//! log on every session open and discarded on close.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StorageError;

/// Absolute path of a node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodePath(String);

impl NodePath {
    /// The root group.
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Parses an absolute path such as `/materials/fuel`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidNodeName` if the path is relative or
    /// contains an empty or invalid segment.
    pub fn parse(path: &str) -> Result<Self, StorageError> {
        if path == "/" {
            return Ok(Self::root());
        }
        let Some(rest) = path.strip_prefix('/') else {
            return Err(StorageError::InvalidNodeName {
                name: path.to_string(),
            });
        };
        let mut out = Self::root();
        for segment in rest.split('/') {
            out = out.join(segment)?;
        }
        Ok(out)
    }

    /// Returns the path of a child node.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidNodeName` if `name` is empty, `.`/`..`,
    /// contains `/`, or has surrounding whitespace.
    pub fn join(&self, name: &str) -> Result<Self, StorageError> {
        validate_name(name)?;
        if self.is_root() {
            Ok(Self(format!("/{name}")))
        } else {
            Ok(Self(format!("{}/{name}", self.0)))
        }
    }

    /// Parent path, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(i) => Some(Self(self.0[..i].to_string())),
            None => None,
        }
    }

    /// Last path segment (empty for the root).
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Returns true for `/`.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_name(name: &str) -> Result<(), StorageError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.trim() != name
        || name.chars().any(char::is_control);
    if bad {
        return Err(StorageError::InvalidNodeName {
            name: name.to_string(),
        });
    }
    Ok(())
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NodePath {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodePath> for String {
    fn from(path: NodePath) -> Self {
        path.0
    }
}

/// Scalar type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Float,
    Int,
    Text,
    Bool,
}

/// One column of a table schema.
///
/// `shape` is empty for scalars and lists the dimensions of array cells,
/// e.g. `[6, 2]` for six delayed-neutron groups of (mean, std).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub shape: Vec<usize>,
}

impl Column {
    /// Scalar text column.
    #[must_use]
    pub fn text(name: &str) -> Self {
        Self { name: name.to_string(), kind: ColumnKind::Text, shape: Vec::new() }
    }

    /// Scalar integer column.
    #[must_use]
    pub fn int(name: &str) -> Self {
        Self { name: name.to_string(), kind: ColumnKind::Int, shape: Vec::new() }
    }

    /// Scalar float column.
    #[must_use]
    pub fn float(name: &str) -> Self {
        Self { name: name.to_string(), kind: ColumnKind::Float, shape: Vec::new() }
    }
}

/// Ordered set of columns. Columns are kept sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    columns: Vec<Column>,
}

impl TableSchema {
    /// Creates a schema from columns in any order.
    #[must_use]
    pub fn new(mut columns: Vec<Column>) -> Self {
        columns.sort_by(|a, b| a.name.cmp(&b.name));
        Self { columns }
    }

    /// Derives the schema of a serializable record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is not a flat struct of scalars and
    /// rectangular numeric arrays.
    pub fn of_record<R: Serialize>(record: &R) -> Result<Self, StorageError> {
        Self::of_value(&serde_json::to_value(record)?)
    }

    fn of_value(value: &Value) -> Result<Self, StorageError> {
        let Value::Object(fields) = value else {
            return Err(StorageError::Serialization(
                "table records must serialize to an object".to_string(),
            ));
        };
        let columns = fields
            .iter()
            .map(|(name, v)| {
                let (kind, shape) = cell_type(name, v)?;
                Ok(Column { name: name.clone(), kind, shape })
            })
            .collect::<Result<Vec<_>, StorageError>>()?;
        Ok(Self::new(columns))
    }

    /// Columns sorted by name.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Describes the first difference against another schema.
    #[must_use]
    pub fn describe_difference(&self, other: &Self) -> Option<String> {
        if self == other {
            return None;
        }
        for col in &self.columns {
            match other.columns.iter().find(|c| c.name == col.name) {
                None => return Some(format!("column '{}' is missing from the record", col.name)),
                Some(c) if c != col => {
                    return Some(format!(
                        "column '{}' is {:?}{:?} in the table but {:?}{:?} in the record",
                        col.name, col.kind, col.shape, c.kind, c.shape
                    ))
                }
                Some(_) => {}
            }
        }
        other
            .columns
            .iter()
            .find(|c| !self.columns.iter().any(|s| s.name == c.name))
            .map(|c| format!("record has unexpected column '{}'", c.name))
    }
}

fn cell_type(name: &str, value: &Value) -> Result<(ColumnKind, Vec<usize>), StorageError> {
    match value {
        Value::Number(n) if n.is_f64() => Ok((ColumnKind::Float, Vec::new())),
        Value::Number(_) => Ok((ColumnKind::Int, Vec::new())),
        Value::String(_) => Ok((ColumnKind::Text, Vec::new())),
        Value::Bool(_) => Ok((ColumnKind::Bool, Vec::new())),
        Value::Array(items) => {
            let Some(first) = items.first() else {
                return Ok((ColumnKind::Float, vec![0]));
            };
            let (kind, inner) = cell_type(name, first)?;
            for item in &items[1..] {
                let (k, s) = cell_type(name, item)?;
                if k != kind || s != inner {
                    return Err(StorageError::Serialization(format!(
                        "column '{name}' holds a ragged or mixed array"
                    )));
                }
            }
            let mut shape = Vec::with_capacity(inner.len() + 1);
            shape.push(items.len());
            shape.extend(inner);
            Ok((kind, shape))
        }
        Value::Null | Value::Object(_) => Err(StorageError::Serialization(format!(
            "column '{name}' must be a scalar or numeric array"
        ))),
    }
}

/// A namespace node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub title: String,
}

/// A 2D `f64` array that can only grow by appending rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensibleArray {
    pub title: String,
    width: usize,
    rows: Vec<Vec<f64>>,
}

impl ExtensibleArray {
    /// Creates an empty array of fixed width.
    #[must_use]
    pub fn new(title: impl Into<String>, width: usize) -> Self {
        Self { title: title.into(), width, rows: Vec::new() }
    }

    /// Creates an array pre-filled with rows.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::RowWidthMismatch` if any row has a different width.
    pub fn with_rows(title: impl Into<String>, width: usize, rows: Vec<Vec<f64>>) -> Result<Self, StorageError> {
        let mut array = Self::new(title, width);
        array.check_rows("", &rows)?;
        array.rows = rows;
        Ok(array)
    }

    /// Number of columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if no rows were appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All rows in append order.
    #[must_use]
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub(crate) fn check_rows(&self, path: &str, rows: &[Vec<f64>]) -> Result<(), StorageError> {
        match rows.iter().find(|r| r.len() != self.width) {
            Some(bad) => Err(StorageError::RowWidthMismatch {
                path: path.to_string(),
                expected: self.width,
                actual: bad.len(),
            }),
            None if rows.iter().flatten().all(|v| v.is_finite()) => Ok(()),
            // The log stores JSON, which has no encoding for NaN or infinity.
            None => Err(StorageError::Serialization(format!(
                "array '{path}' only stores finite values"
            ))),
        }
    }

    pub(crate) fn extend(&mut self, rows: Vec<Vec<f64>>) {
        self.rows.extend(rows);
    }
}

/// A fixed-schema append-only table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub title: String,
    schema: TableSchema,
    records: Vec<Value>,
}

impl Table {
    /// Creates an empty table.
    #[must_use]
    pub fn new(title: impl Into<String>, schema: TableSchema) -> Self {
        Self { title: title.into(), schema, records: Vec::new() }
    }

    /// Creates a table holding the given records.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::SchemaMismatch` if a record does not fit `schema`.
    pub fn with_records<R: Serialize>(
        title: impl Into<String>,
        schema: TableSchema,
        records: &[R],
    ) -> Result<Self, StorageError> {
        let mut table = Self::new(title, schema);
        let values = table.encode_records("", records)?;
        table.records = values;
        Ok(table)
    }

    /// Column layout.
    #[must_use]
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Decodes every row into `R`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if a row does not decode.
    pub fn decode<R: DeserializeOwned>(&self) -> Result<Vec<R>, StorageError> {
        self.records
            .iter()
            .map(|v| R::deserialize(v).map_err(StorageError::from))
            .collect()
    }

    /// Decodes the last row, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the row does not decode.
    pub fn decode_last<R: DeserializeOwned>(&self) -> Result<Option<R>, StorageError> {
        self.records
            .last()
            .map(|v| R::deserialize(v).map_err(StorageError::from))
            .transpose()
    }

    pub(crate) fn encode_records<R: Serialize>(&self, path: &str, records: &[R]) -> Result<Vec<Value>, StorageError> {
        records
            .iter()
            .map(|r| {
                let value = serde_json::to_value(r)?;
                self.check_value(path, &value)?;
                Ok(value)
            })
            .collect()
    }

    pub(crate) fn check_value(&self, path: &str, value: &Value) -> Result<(), StorageError> {
        let schema = TableSchema::of_value(value)?;
        match self.schema.describe_difference(&schema) {
            None => Ok(()),
            Some(reason) => Err(StorageError::SchemaMismatch { path: path.to_string(), reason }),
        }
    }

    pub(crate) fn extend(&mut self, records: Vec<Value>) {
        self.records.extend(records);
    }
}

/// Any node in the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Group(Group),
    Array(ExtensibleArray),
    Table(Table),
}

impl Node {
    /// Human-readable node kind.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Group(_) => "group",
            Self::Array(_) => "array",
            Self::Table(_) => "table",
        }
    }
}

/// The in-memory image of a store file.
#[derive(Debug, Clone)]
pub struct NodeTree {
    nodes: BTreeMap<NodePath, Node>,
}

impl Default for NodeTree {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(NodePath::root(), Node::Group(Group::default()));
        Self { nodes }
    }
}

impl NodeTree {
    /// Tree containing only the root group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a node exists at `path`.
    #[must_use]
    pub fn exists(&self, path: &NodePath) -> bool {
        self.nodes.contains_key(path)
    }

    /// Returns the node at `path`.
    #[must_use]
    pub fn lookup(&self, path: &NodePath) -> Option<&Node> {
        self.nodes.get(path)
    }

    pub(crate) fn lookup_mut(&mut self, path: &NodePath) -> Option<&mut Node> {
        self.nodes.get_mut(path)
    }

    /// Total number of nodes, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the tree has only the root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Direct children of a group, in name order.
    pub fn children<'a>(&'a self, path: &'a NodePath) -> impl Iterator<Item = &'a NodePath> + 'a {
        self.nodes
            .keys()
            .filter(move |p| p.parent().as_ref() == Some(path))
    }

    /// Every node except the root, parents before children.
    pub fn iter(&self) -> impl Iterator<Item = (&NodePath, &Node)> {
        self.nodes.iter().filter(|(p, _)| !p.is_root())
    }

    /// Checks that a node may be created or replaced at `path`.
    pub(crate) fn check_slot(&self, path: &NodePath, replace: bool, node: &Node) -> Result<(), StorageError> {
        self.check_slot_over(&BTreeMap::new(), path, replace, node)
    }

    /// Same as [`NodeTree::check_slot`], as if every node in `pending` had
    /// already been inserted.
    pub(crate) fn check_slot_over(
        &self,
        pending: &BTreeMap<&NodePath, &Node>,
        path: &NodePath,
        replace: bool,
        node: &Node,
    ) -> Result<(), StorageError> {
        let parent = path.parent().ok_or_else(|| StorageError::NodeExists {
            path: path.to_string(),
        })?;
        match self.lookup_over(pending, &parent) {
            Some(Node::Group(_)) => {}
            Some(other) => {
                return Err(StorageError::NodeKindMismatch {
                    path: parent.to_string(),
                    expected: "group",
                    actual: other.kind_name(),
                })
            }
            None => return Err(StorageError::NodeNotFound { path: parent.to_string() }),
        }
        match self.lookup_over(pending, path) {
            None => Ok(()),
            Some(_) if !replace => Err(StorageError::NodeExists { path: path.to_string() }),
            Some(existing) if existing.kind_name() != node.kind_name() && self.has_children(pending, path) => {
                Err(StorageError::NodeKindMismatch {
                    path: path.to_string(),
                    expected: existing.kind_name(),
                    actual: node.kind_name(),
                })
            }
            Some(_) => Ok(()),
        }
    }

    fn lookup_over<'a>(&'a self, pending: &BTreeMap<&NodePath, &'a Node>, path: &NodePath) -> Option<&'a Node> {
        pending.get(path).copied().or_else(|| self.nodes.get(path))
    }

    fn has_children(&self, pending: &BTreeMap<&NodePath, &Node>, path: &NodePath) -> bool {
        self.children(path).next().is_some() || pending.keys().any(|p| p.parent().as_ref() == Some(path))
    }

    /// Inserts or replaces a node. Callers validate first.
    pub(crate) fn insert(&mut self, path: NodePath, node: Node) {
        self.nodes.insert(path, node);
    }
}
