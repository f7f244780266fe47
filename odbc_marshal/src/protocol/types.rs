use crate::error::{MarshalError, Result};
use crate::protocol::numeric::NumericStruct;
use crate::protocol::temporal::DateTimeOffsetStruct;
use crate::protocol::guid::SqlGuid;
use odbc_api::sys::{Date, Time, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem::size_of;

/// SQL data type code as reported by `SQLDescribeCol` or passed to `SQLBindParameter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SqlType(pub i16);

impl SqlType {
    pub const UNKNOWN: SqlType = SqlType(0);
    pub const CHAR: SqlType = SqlType(1);
    pub const NUMERIC: SqlType = SqlType(2);
    pub const DECIMAL: SqlType = SqlType(3);
    pub const INTEGER: SqlType = SqlType(4);
    pub const SMALLINT: SqlType = SqlType(5);
    pub const FLOAT: SqlType = SqlType(6);
    pub const REAL: SqlType = SqlType(7);
    pub const DOUBLE: SqlType = SqlType(8);
    pub const DATETIME: SqlType = SqlType(9);
    pub const TIME: SqlType = SqlType(10);
    pub const TIMESTAMP: SqlType = SqlType(11);
    pub const VARCHAR: SqlType = SqlType(12);
    pub const TYPE_DATE: SqlType = SqlType(91);
    pub const TYPE_TIME: SqlType = SqlType(92);
    pub const TYPE_TIMESTAMP: SqlType = SqlType(93);
    pub const LONGVARCHAR: SqlType = SqlType(-1);
    pub const BINARY: SqlType = SqlType(-2);
    pub const VARBINARY: SqlType = SqlType(-3);
    pub const LONGVARBINARY: SqlType = SqlType(-4);
    pub const BIGINT: SqlType = SqlType(-5);
    pub const TINYINT: SqlType = SqlType(-6);
    pub const BIT: SqlType = SqlType(-7);
    pub const WCHAR: SqlType = SqlType(-8);
    pub const WVARCHAR: SqlType = SqlType(-9);
    pub const WLONGVARCHAR: SqlType = SqlType(-10);
    pub const GUID: SqlType = SqlType(-11);
    /// SQL Server `xml`.
    pub const SS_XML: SqlType = SqlType(-152);
    /// SQL Server `time(n)`.
    pub const SS_TIME2: SqlType = SqlType(-154);
    /// SQL Server `datetimeoffset(n)`.
    pub const SS_TIMESTAMPOFFSET: SqlType = SqlType(-155);
    /// Pseudo type selecting metadata decoding (column names).
    pub const WMETADATA: SqlType = SqlType(-99);

    pub fn name(self) -> &'static str {
        match self {
            SqlType::CHAR => "SQL_CHAR",
            SqlType::NUMERIC => "SQL_NUMERIC",
            SqlType::DECIMAL => "SQL_DECIMAL",
            SqlType::INTEGER => "SQL_INTEGER",
            SqlType::SMALLINT => "SQL_SMALLINT",
            SqlType::FLOAT => "SQL_FLOAT",
            SqlType::REAL => "SQL_REAL",
            SqlType::DOUBLE => "SQL_DOUBLE",
            SqlType::DATETIME => "SQL_DATETIME",
            SqlType::TIME => "SQL_TIME",
            SqlType::TIMESTAMP => "SQL_TIMESTAMP",
            SqlType::VARCHAR => "SQL_VARCHAR",
            SqlType::TYPE_DATE => "SQL_TYPE_DATE",
            SqlType::TYPE_TIME => "SQL_TYPE_TIME",
            SqlType::TYPE_TIMESTAMP => "SQL_TYPE_TIMESTAMP",
            SqlType::LONGVARCHAR => "SQL_LONGVARCHAR",
            SqlType::BINARY => "SQL_BINARY",
            SqlType::VARBINARY => "SQL_VARBINARY",
            SqlType::LONGVARBINARY => "SQL_LONGVARBINARY",
            SqlType::BIGINT => "SQL_BIGINT",
            SqlType::TINYINT => "SQL_TINYINT",
            SqlType::BIT => "SQL_BIT",
            SqlType::WCHAR => "SQL_WCHAR",
            SqlType::WVARCHAR => "SQL_WVARCHAR",
            SqlType::WLONGVARCHAR => "SQL_WLONGVARCHAR",
            SqlType::GUID => "SQL_GUID",
            SqlType::SS_XML => "SQL_SS_XML",
            SqlType::SS_TIME2 => "SQL_SS_TIME2",
            SqlType::SS_TIMESTAMPOFFSET => "SQL_SS_TIMESTAMPOFFSET",
            SqlType::WMETADATA => "SQL_WMETADATA",
            _ => "SQL_UNKNOWN_TYPE",
        }
    }

    pub fn is_narrow_char(self) -> bool {
        matches!(
            self,
            SqlType::CHAR | SqlType::VARCHAR | SqlType::LONGVARCHAR
        )
    }

    pub fn is_wide_char(self) -> bool {
        matches!(
            self,
            SqlType::WCHAR | SqlType::WVARCHAR | SqlType::WLONGVARCHAR | SqlType::SS_XML
        )
    }

    pub fn is_binary(self) -> bool {
        matches!(
            self,
            SqlType::BINARY | SqlType::VARBINARY | SqlType::LONGVARBINARY
        )
    }

    /// Character or binary data whose length varies per cell.
    pub fn is_variable_length(self) -> bool {
        self.is_narrow_char() || self.is_wide_char() || self.is_binary()
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

/// Native buffer type tag (`SQL_C_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CType(pub i16);

impl CType {
    pub const CHAR: CType = CType(1);
    pub const NUMERIC: CType = CType(2);
    pub const LONG: CType = CType(4);
    pub const SHORT: CType = CType(5);
    pub const FLOAT: CType = CType(7);
    pub const DOUBLE: CType = CType(8);
    pub const DEFAULT: CType = CType(99);
    pub const TYPE_DATE: CType = CType(91);
    pub const TYPE_TIME: CType = CType(92);
    pub const TYPE_TIMESTAMP: CType = CType(93);
    pub const BINARY: CType = CType(-2);
    pub const BIT: CType = CType(-7);
    pub const TINYINT: CType = CType(-6);
    pub const WCHAR: CType = CType(-8);
    pub const GUID: CType = CType(-11);
    pub const SSHORT: CType = CType(-15);
    pub const SLONG: CType = CType(-16);
    pub const SBIGINT: CType = CType(-25);
    pub const STINYINT: CType = CType(-26);
    pub const UTINYINT: CType = CType(-28);
    /// Take the C type from the application row descriptor (`SQL_ARD_TYPE`).
    pub const ARD_TYPE: CType = CType(-99);
    pub const SS_TIMESTAMPOFFSET: CType = CType(0x4001);

    pub fn name(self) -> &'static str {
        match self {
            CType::CHAR => "SQL_C_CHAR",
            CType::NUMERIC => "SQL_C_NUMERIC",
            CType::LONG => "SQL_C_LONG",
            CType::SHORT => "SQL_C_SHORT",
            CType::FLOAT => "SQL_C_FLOAT",
            CType::DOUBLE => "SQL_C_DOUBLE",
            CType::DEFAULT => "SQL_C_DEFAULT",
            CType::TYPE_DATE => "SQL_C_TYPE_DATE",
            CType::TYPE_TIME => "SQL_C_TYPE_TIME",
            CType::TYPE_TIMESTAMP => "SQL_C_TYPE_TIMESTAMP",
            CType::BINARY => "SQL_C_BINARY",
            CType::BIT => "SQL_C_BIT",
            CType::TINYINT => "SQL_C_TINYINT",
            CType::WCHAR => "SQL_C_WCHAR",
            CType::GUID => "SQL_C_GUID",
            CType::SSHORT => "SQL_C_SSHORT",
            CType::SLONG => "SQL_C_SLONG",
            CType::SBIGINT => "SQL_C_SBIGINT",
            CType::STINYINT => "SQL_C_STINYINT",
            CType::UTINYINT => "SQL_C_UTINYINT",
            CType::ARD_TYPE => "SQL_ARD_TYPE",
            CType::SS_TIMESTAMPOFFSET => "SQL_C_SS_TIMESTAMPOFFSET",
            _ => "SQL_C_UNKNOWN",
        }
    }

    /// Buffer layout the driver expects behind a pointer of this C type.
    pub fn buffer_shape(self) -> Result<BufferShape> {
        let shape = match self {
            CType::CHAR => BufferShape::Variable { unit: 1 },
            CType::BINARY => BufferShape::Variable { unit: 1 },
            CType::WCHAR => BufferShape::Variable { unit: 2 },
            CType::BIT | CType::TINYINT | CType::STINYINT | CType::UTINYINT => {
                BufferShape::Fixed(size_of::<u8>())
            }
            CType::SHORT | CType::SSHORT => BufferShape::Fixed(size_of::<i16>()),
            CType::LONG | CType::SLONG => BufferShape::Fixed(size_of::<i32>()),
            CType::SBIGINT => BufferShape::Fixed(size_of::<i64>()),
            CType::FLOAT => BufferShape::Fixed(size_of::<f32>()),
            CType::DOUBLE => BufferShape::Fixed(size_of::<f64>()),
            CType::NUMERIC => BufferShape::Fixed(size_of::<NumericStruct>()),
            CType::TYPE_DATE => BufferShape::Fixed(size_of::<Date>()),
            CType::TYPE_TIME => BufferShape::Fixed(size_of::<Time>()),
            CType::TYPE_TIMESTAMP => BufferShape::Fixed(size_of::<Timestamp>()),
            CType::SS_TIMESTAMPOFFSET => BufferShape::Fixed(size_of::<DateTimeOffsetStruct>()),
            CType::GUID => BufferShape::Fixed(size_of::<SqlGuid>()),
            other => {
                return Err(MarshalError::UnsupportedType(format!(
                    "{} ({})",
                    other.name(),
                    other.0
                )))
            }
        };
        Ok(shape)
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferShape {
    /// One fixed-layout value per cell, `usize` bytes wide.
    Fixed(usize),
    /// Character or binary data; `unit` bytes per character plus one terminator unit.
    Variable { unit: usize },
}

impl BufferShape {
    /// Bytes one row slot occupies for a column of `column_size` characters or bytes.
    pub fn slot_len(self, column_size: usize) -> usize {
        match self {
            BufferShape::Fixed(size) => size,
            BufferShape::Variable { unit } => (column_size + 1) * unit,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CatalogEntry {
    sql_type: SqlType,
    fetch_c_type: CType,
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry { sql_type: SqlType::CHAR, fetch_c_type: CType::CHAR },
    CatalogEntry { sql_type: SqlType::VARCHAR, fetch_c_type: CType::CHAR },
    CatalogEntry { sql_type: SqlType::LONGVARCHAR, fetch_c_type: CType::CHAR },
    CatalogEntry { sql_type: SqlType::WCHAR, fetch_c_type: CType::WCHAR },
    CatalogEntry { sql_type: SqlType::WVARCHAR, fetch_c_type: CType::WCHAR },
    CatalogEntry { sql_type: SqlType::WLONGVARCHAR, fetch_c_type: CType::WCHAR },
    CatalogEntry { sql_type: SqlType::SS_XML, fetch_c_type: CType::WCHAR },
    CatalogEntry { sql_type: SqlType::INTEGER, fetch_c_type: CType::LONG },
    CatalogEntry { sql_type: SqlType::SMALLINT, fetch_c_type: CType::SHORT },
    CatalogEntry { sql_type: SqlType::TINYINT, fetch_c_type: CType::UTINYINT },
    CatalogEntry { sql_type: SqlType::BIGINT, fetch_c_type: CType::SBIGINT },
    CatalogEntry { sql_type: SqlType::REAL, fetch_c_type: CType::FLOAT },
    CatalogEntry { sql_type: SqlType::FLOAT, fetch_c_type: CType::DOUBLE },
    CatalogEntry { sql_type: SqlType::DOUBLE, fetch_c_type: CType::DOUBLE },
    CatalogEntry { sql_type: SqlType::BIT, fetch_c_type: CType::BIT },
    CatalogEntry { sql_type: SqlType::NUMERIC, fetch_c_type: CType::NUMERIC },
    CatalogEntry { sql_type: SqlType::DECIMAL, fetch_c_type: CType::NUMERIC },
    CatalogEntry { sql_type: SqlType::TYPE_DATE, fetch_c_type: CType::TYPE_DATE },
    CatalogEntry { sql_type: SqlType::TIME, fetch_c_type: CType::TYPE_TIME },
    CatalogEntry { sql_type: SqlType::TYPE_TIME, fetch_c_type: CType::TYPE_TIME },
    CatalogEntry { sql_type: SqlType::SS_TIME2, fetch_c_type: CType::TYPE_TIME },
    CatalogEntry { sql_type: SqlType::DATETIME, fetch_c_type: CType::TYPE_TIMESTAMP },
    CatalogEntry { sql_type: SqlType::TIMESTAMP, fetch_c_type: CType::TYPE_TIMESTAMP },
    CatalogEntry { sql_type: SqlType::TYPE_TIMESTAMP, fetch_c_type: CType::TYPE_TIMESTAMP },
    CatalogEntry { sql_type: SqlType::SS_TIMESTAMPOFFSET, fetch_c_type: CType::SS_TIMESTAMPOFFSET },
    CatalogEntry { sql_type: SqlType::GUID, fetch_c_type: CType::GUID },
    CatalogEntry { sql_type: SqlType::BINARY, fetch_c_type: CType::BINARY },
    CatalogEntry { sql_type: SqlType::VARBINARY, fetch_c_type: CType::BINARY },
    CatalogEntry { sql_type: SqlType::LONGVARBINARY, fetch_c_type: CType::BINARY },
];

/// C type the fetch path requests for a column of `sql_type`.
pub fn fetch_c_type(sql_type: SqlType) -> Result<CType> {
    CATALOG
        .iter()
        .find(|entry| entry.sql_type == sql_type)
        .map(|entry| entry.fetch_c_type)
        .ok_or_else(|| MarshalError::UnsupportedType(sql_type.to_string()))
}

pub fn is_supported(sql_type: SqlType) -> bool {
    CATALOG.iter().any(|entry| entry.sql_type == sql_type)
}

/// Worst-case bytes a single cell of this column occupies in a bound buffer,
/// indicator included.
pub fn bound_cell_len(sql_type: SqlType, c_type: CType, column_size: usize) -> Result<usize> {
    if !is_supported(sql_type) {
        return Err(MarshalError::UnsupportedType(sql_type.to_string()));
    }
    let shape = c_type.buffer_shape()?;
    Ok(shape.slot_len(column_size) + size_of::<odbc_api::sys::Len>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_c_type_character_families() {
        assert_eq!(fetch_c_type(SqlType::VARCHAR).unwrap(), CType::CHAR);
        assert_eq!(fetch_c_type(SqlType::WLONGVARCHAR).unwrap(), CType::WCHAR);
        assert_eq!(fetch_c_type(SqlType::SS_XML).unwrap(), CType::WCHAR);
        assert_eq!(fetch_c_type(SqlType::LONGVARBINARY).unwrap(), CType::BINARY);
    }

    #[test]
    fn test_fetch_c_type_temporal() {
        assert_eq!(fetch_c_type(SqlType::SS_TIME2).unwrap(), CType::TYPE_TIME);
        assert_eq!(fetch_c_type(SqlType::DATETIME).unwrap(), CType::TYPE_TIMESTAMP);
        assert_eq!(
            fetch_c_type(SqlType::SS_TIMESTAMPOFFSET).unwrap(),
            CType::SS_TIMESTAMPOFFSET
        );
    }

    #[test]
    fn test_unknown_sql_type_is_unsupported() {
        let err = fetch_c_type(SqlType(-370)).unwrap_err();
        assert!(matches!(err, MarshalError::UnsupportedType(_)));
    }

    #[test]
    fn test_buffer_shape_sizes() {
        assert_eq!(CType::LONG.buffer_shape().unwrap(), BufferShape::Fixed(4));
        assert_eq!(CType::SBIGINT.buffer_shape().unwrap(), BufferShape::Fixed(8));
        assert_eq!(CType::NUMERIC.buffer_shape().unwrap(), BufferShape::Fixed(19));
        assert_eq!(CType::GUID.buffer_shape().unwrap(), BufferShape::Fixed(16));
        assert_eq!(
            CType::SS_TIMESTAMPOFFSET.buffer_shape().unwrap(),
            BufferShape::Fixed(20)
        );
        assert_eq!(
            CType::WCHAR.buffer_shape().unwrap(),
            BufferShape::Variable { unit: 2 }
        );
        assert!(CType::DEFAULT.buffer_shape().is_err());
    }

    #[test]
    fn test_slot_len_includes_terminator() {
        assert_eq!(BufferShape::Variable { unit: 1 }.slot_len(10), 11);
        assert_eq!(BufferShape::Variable { unit: 2 }.slot_len(10), 22);
        assert_eq!(BufferShape::Fixed(8).slot_len(10), 8);
    }

    #[test]
    fn test_bound_cell_len_adds_indicator() {
        let len = bound_cell_len(SqlType::INTEGER, CType::LONG, 10).unwrap();
        assert_eq!(len, 4 + size_of::<odbc_api::sys::Len>());
    }

    #[test]
    fn test_names() {
        assert_eq!(SqlType::WVARCHAR.name(), "SQL_WVARCHAR");
        assert_eq!(CType::SS_TIMESTAMPOFFSET.name(), "SQL_C_SS_TIMESTAMPOFFSET");
        assert_eq!(SqlType::NUMERIC.to_string(), "SQL_NUMERIC(2)");
    }
}
