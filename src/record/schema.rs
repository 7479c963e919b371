//! Table schemas.
//!
//! A schema is an ordered column list; exactly one column is the
//! `INTEGER PRIMARY KEY` and becomes the tree key. Schemas are
//! serde-derived so the catalog can persist them as a JSON blob.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};
use crate::record::value::Value;

/// Column datatypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Integer,
    Real,
    Bool,
    Text,
    Blob,
}

/// One column definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub datatype: DataType,
    pub is_primary: bool,
    pub not_null: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        Self {
            name: name.into(),
            datatype,
            is_primary: false,
            not_null: false,
        }
    }

    /// Mark as the integer primary key (implies not-null).
    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self.not_null = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }
}

/// An ordered, validated column list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
    key_index: usize,
}

impl Schema {
    /// Build a schema, enforcing exactly one `INTEGER PRIMARY KEY`
    /// and unique column names.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if columns.is_empty() {
            return Err(StorageError::invalid_schema("no columns"));
        }
        for (i, a) in columns.iter().enumerate() {
            if columns[..i].iter().any(|b| b.name == a.name) {
                return Err(StorageError::invalid_schema(format!(
                    "duplicate column {:?}",
                    a.name
                )));
            }
        }
        let mut primaries = columns.iter().enumerate().filter(|(_, c)| c.is_primary);
        let key_index = match (primaries.next(), primaries.next()) {
            (Some((i, col)), None) => {
                if col.datatype != DataType::Integer {
                    return Err(StorageError::invalid_schema(format!(
                        "primary key {:?} must be INTEGER",
                        col.name
                    )));
                }
                i
            }
            (None, _) => {
                return Err(StorageError::invalid_schema("no INTEGER PRIMARY KEY column"));
            }
            (Some(_), Some((_, col))) => {
                return Err(StorageError::invalid_schema(format!(
                    "second primary key {:?}",
                    col.name
                )));
            }
        };
        Ok(Self { columns, key_index })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Index of the primary-key column.
    pub fn key_index(&self) -> usize {
        self.key_index
    }

    /// Extract the tree key from a row of values.
    pub fn key_of(&self, values: &[Value]) -> Result<i32> {
        match values.get(self.key_index) {
            Some(Value::Integer(k)) => Ok(*k),
            _ => Err(StorageError::schema_mismatch(format!(
                "primary key column {:?} requires an integer",
                self.columns[self.key_index].name
            ))),
        }
    }

    /// Serialize for the catalog's `schema_blob` column.
    pub fn to_blob(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| StorageError::invalid_schema(format!("encode failed: {}", e)))
    }

    /// Restore from a catalog `schema_blob`.
    pub fn from_blob(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| StorageError::invalid_schema(format!("decode failed: {}", e)))
    }
}
