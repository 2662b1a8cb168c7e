//! Column layouts exchanged between input, filter, and output stages.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Value type of a column.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ColumnType {
    /// `true` or `false`.
    Boolean,
    /// Signed 64-bit integer.
    Long,
    /// 64-bit floating point.
    Double,
    /// UTF-8 text.
    String,
    /// Point in time.
    Timestamp,
    /// Arbitrary JSON value.
    Json,
}

/// One column of a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    index: usize,
    name: String,
    #[serde(rename = "type")]
    column_type: ColumnType,
}

impl Column {
    /// Creates a column.
    #[must_use]
    pub fn new(index: usize, name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            index,
            name: name.into(),
            column_type,
        }
    }

    /// Position of the column within its schema.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Column name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column type.
    #[must_use]
    pub const fn column_type(&self) -> ColumnType {
        self.column_type
    }
}

/// Ordered list of columns.
///
/// # Example
///
/// ```
/// use embulk_spi::{ColumnType, Schema};
///
/// let schema = Schema::builder()
///     .add("id", ColumnType::Long)
///     .add("name", ColumnType::String)
///     .build();
/// assert_eq!(schema.lookup("name").map(|c| c.index()), Some(1));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Starts building a schema.
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Returns the columns in order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns the column at `index`.
    #[must_use]
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Finds a column by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` when the schema has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Builder assigning consecutive column indices.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    columns: Vec<Column>,
}

impl SchemaBuilder {
    /// Appends a column.
    #[must_use]
    pub fn add(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        let index = self.columns.len();
        self.columns.push(Column::new(index, name, column_type));
        self
    }

    /// Finishes the schema.
    #[must_use]
    pub fn build(self) -> Schema {
        Schema {
            columns: self.columns,
        }
    }
}
