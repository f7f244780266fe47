use crate::config::FetchOptions;
use crate::protocol::param_value::HostValue;
use crate::protocol::types::SqlType;
use odbc_api::sys::NO_TOTAL;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// `SQL_NULLABLE_UNKNOWN`
pub const NULLABLE_UNKNOWN: i16 = 2;

/// One result column as described by `SQLDescribeColW`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub sql_type: SqlType,
    /// Size as reported by the driver. Zero or `SQL_NO_TOTAL` means unknown.
    pub column_size: usize,
    pub decimal_digits: i16,
    pub nullable: i16,
}

/// cursor.description entry: name, type, display size, internal size,
/// precision, scale, null_ok.
pub type DescriptionTuple = (String, SqlType, usize, usize, usize, i16, bool);

impl ColumnMetadata {
    /// Unbounded, unknown or larger than the threshold.
    pub fn is_lob(&self, options: &FetchOptions) -> bool {
        self.column_size == 0
            || self.column_size as isize == NO_TOTAL
            || self.column_size > options.lob_threshold
    }

    /// Size used to allocate buffers; zero is replaced by the fallback.
    pub fn working_size(&self, options: &FetchOptions) -> usize {
        if self.column_size == 0 || self.column_size as isize == NO_TOTAL {
            options.zero_size_fallback
        } else {
            self.column_size
        }
    }

    pub fn null_ok(&self) -> bool {
        self.nullable != 0
    }

    pub fn description(&self) -> DescriptionTuple {
        (
            self.name.clone(),
            self.sql_type,
            self.column_size,
            self.column_size,
            self.column_size,
            self.decimal_digits,
            self.null_ok(),
        )
    }
}

/// Column name to position lookup, built once per result set and shared by
/// every row fetched from it. A repeated name resolves to its last column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnMap {
    exact: HashMap<String, usize>,
    folded: HashMap<String, usize>,
}

impl ColumnMap {
    pub fn new(columns: &[ColumnMetadata]) -> Self {
        let mut map = Self::default();
        for (i, col) in columns.iter().enumerate() {
            map.exact.insert(col.name.clone(), i);
            map.folded.insert(col.name.to_lowercase(), i);
        }
        map
    }

    /// Exact match first, then a case-insensitive one.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.exact
            .get(name)
            .or_else(|| self.folded.get(&name.to_lowercase()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}

/// One fetched row, values in column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<HostValue>,
    columns: Option<Arc<ColumnMap>>,
}

impl Row {
    pub fn new(values: Vec<HostValue>) -> Self {
        Self { values, columns: None }
    }

    /// Attaches the result set's name lookup.
    pub fn with_columns(mut self, columns: Arc<ColumnMap>) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn get(&self, index: usize) -> Option<&HostValue> {
        self.values.get(index)
    }

    /// Value of the column called `name`. `None` for an unknown name or a
    /// row built without column names.
    pub fn get_by_name(&self, name: &str) -> Option<&HostValue> {
        let position = self.columns.as_ref()?.position(name)?;
        self.values.get(position)
    }

    pub fn column_map(&self) -> Option<&Arc<ColumnMap>> {
        self.columns.as_ref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[HostValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<HostValue> {
        self.values
    }

    /// JSON object keyed by column name.
    pub fn to_json(&self, columns: &[ColumnMetadata]) -> serde_json::Value {
        let map = columns
            .iter()
            .zip(self.values.iter())
            .map(|(col, value)| (col.name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl From<Vec<HostValue>> for Row {
    fn from(values: Vec<HostValue>) -> Self {
        Self::new(values)
    }
}

impl std::ops::Index<usize> for Row {
    type Output = HostValue;

    fn index(&self, index: usize) -> &Self::Output {
        &self.values[index]
    }
}
