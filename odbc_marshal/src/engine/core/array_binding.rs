//! Column-wise parameter arrays: one contiguous buffer and one indicator
//! array per parameter position, bound once with `SQL_PARAM_BIND_BY_COLUMN`.
//!
//! Building is split from binding so every truncation and range problem is
//! found before the driver sees a single buffer.

use crate::config::EncodingSettings;
use crate::driver::{
    set_stmt_usize, DriverApi, Handle, Pointer, ATTR_APP_PARAM_DESC, ATTR_PARAMSET_SIZE,
    ATTR_PARAM_BIND_TYPE, BIND_BY_COLUMN,
};
use crate::engine::descriptor::write_numeric_fields;
use crate::engine::scalar_binding::{bind_raw, check_value_type, pack_decimal, resolve_null_type};
use crate::error::{MarshalError, Result};
use crate::protocol::encoding::{encode_narrow, encode_wide};
use crate::protocol::temporal::{self, DateTimeOffsetStruct};
use crate::protocol::{
    BufferArena, CType, HostValue, InputSize, NumericStruct, ParamInfo, SqlGuid, SqlType,
    MAX_NUMERIC_PRECISION,
};
use odbc_api::sys::{Date, Len, Time, Timestamp, NULL_DATA};
use std::mem::size_of;

/// Checks the column-wise parameter set is rectangular and returns its row count.
pub fn validate_columns(columns: &[Vec<HostValue>]) -> Result<usize> {
    let Some(first) = columns.first() else {
        return Err(MarshalError::Validation(
            "parameter set must have at least one column".to_string(),
        ));
    };
    let n_rows = first.len();
    for (i, col) in columns.iter().enumerate().skip(1) {
        if col.len() != n_rows {
            return Err(MarshalError::Validation(format!(
                "all parameter columns must have the same row count (column 1 has {}, column {} has {})",
                n_rows,
                i + 1,
                col.len()
            )));
        }
    }
    Ok(n_rows)
}

/// Typed storage for one column, `paramset_size` slots long.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Char(Vec<u8>),
    WChar(Vec<u16>),
    Binary(Vec<u8>),
    Bit(Vec<u8>),
    UTinyInt(Vec<u8>),
    TinyInt(Vec<i8>),
    Short(Vec<i16>),
    Long(Vec<i32>),
    BigInt(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Numeric(Vec<NumericStruct>),
    Date(Vec<Date>),
    Time(Vec<Time>),
    Timestamp(Vec<Timestamp>),
    DateTimeOffset(Vec<DateTimeOffsetStruct>),
    Guid(Vec<SqlGuid>),
    /// Every row is NULL; the type comes from the driver or stays VARCHAR(1).
    Untyped(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnArray {
    info: ParamInfo,
    data: ColumnData,
    indicators: Vec<Len>,
}

impl ColumnArray {
    pub fn info(&self) -> &ParamInfo {
        &self.info
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn indicators(&self) -> &[Len] {
        &self.indicators
    }

    /// Bytes between consecutive rows of a variable-length column.
    fn buffer_length(&self) -> Len {
        match self.info.c_type {
            CType::CHAR => (self.info.column_size + 1) as Len,
            CType::WCHAR => ((self.info.column_size + 1) * 2) as Len,
            CType::BINARY => self.info.column_size as Len,
            _ => 0,
        }
    }
}

/// Buffers of a bound parameter array. Must outlive the execute call.
#[derive(Debug)]
pub struct BoundArrays {
    arena: BufferArena,
    paramset_size: usize,
}

impl BoundArrays {
    pub fn paramset_size(&self) -> usize {
        self.paramset_size
    }

    pub fn allocated_bytes(&self) -> usize {
        self.arena.allocated_bytes()
    }
}

fn int_rank(c_type: CType) -> Option<u8> {
    match c_type {
        CType::UTINYINT => Some(0),
        CType::SHORT => Some(1),
        CType::LONG => Some(2),
        CType::SBIGINT => Some(3),
        _ => None,
    }
}

/// Widens `acc` so that `next` also fits.
fn merge_info(index: usize, acc: ParamInfo, next: ParamInfo) -> Result<ParamInfo> {
    if acc.c_type == next.c_type {
        let mut merged = acc.clone();
        if acc.c_type == CType::NUMERIC {
            let int_digits = (acc.column_size - acc.decimal_digits as usize)
                .max(next.column_size - next.decimal_digits as usize);
            let scale = acc.decimal_digits.max(next.decimal_digits);
            merged.column_size = int_digits + scale as usize;
            merged.decimal_digits = scale;
            if merged.column_size > MAX_NUMERIC_PRECISION as usize {
                return Err(MarshalError::Range(format!(
                    "Parameter column {} needs numeric precision {} which exceeds {}",
                    index, merged.column_size, MAX_NUMERIC_PRECISION
                )));
            }
        } else {
            if next.column_size > acc.column_size {
                merged.sql_type = next.sql_type;
            }
            merged.column_size = acc.column_size.max(next.column_size);
            merged.decimal_digits = acc.decimal_digits.max(next.decimal_digits);
        }
        merged.is_deferred |= next.is_deferred;
        return Ok(merged);
    }
    if let (Some(a), Some(b)) = (int_rank(acc.c_type), int_rank(next.c_type)) {
        return Ok(if b > a { next } else { acc });
    }
    let numeric = |c: CType| c == CType::DOUBLE || int_rank(c).is_some();
    if numeric(acc.c_type) && numeric(next.c_type) {
        return Ok(ParamInfo::input(CType::DOUBLE, SqlType::DOUBLE, 15, 0));
    }
    Err(MarshalError::ParameterTypeMismatch {
        index,
        c_type: acc.c_type,
    })
}

pub struct ArrayBinding<'a> {
    settings: &'a EncodingSettings,
    input_sizes: &'a [Option<InputSize>],
}

impl<'a> ArrayBinding<'a> {
    pub fn new(settings: &'a EncodingSettings) -> Self {
        Self {
            settings,
            input_sizes: &[],
        }
    }

    pub fn with_input_sizes(mut self, input_sizes: &'a [Option<InputSize>]) -> Self {
        self.input_sizes = input_sizes;
        self
    }

    /// One description per column, wide enough for every row. NULLs do not
    /// take part; an all-NULL column stays polymorphic.
    pub fn infer_column(&self, index: usize, values: &[HostValue]) -> Result<ParamInfo> {
        let mut merged: Option<ParamInfo> = None;
        for value in values.iter().filter(|v| !v.is_null()) {
            let info = ParamInfo::infer(value, self.settings)?;
            merged = Some(match merged {
                None => info,
                Some(acc) => merge_info(index, acc, info)?,
            });
        }
        let info = match merged {
            Some(info) => info,
            None => ParamInfo::infer(&HostValue::Null, self.settings)?,
        };
        Ok(match self.input_sizes.get(index - 1).copied().flatten() {
            Some(size) => info.with_input_size(&size),
            None => info,
        })
    }

    pub fn plan(&self, columns: &[Vec<HostValue>]) -> Result<Vec<ParamInfo>> {
        validate_columns(columns)?;
        columns
            .iter()
            .enumerate()
            .map(|(i, col)| self.infer_column(i + 1, col))
            .collect()
    }

    /// Encodes every row of every column. No driver call is made.
    pub fn build(&self, columns: &[Vec<HostValue>], infos: Vec<ParamInfo>) -> Result<Vec<ColumnArray>> {
        validate_columns(columns)?;
        if infos.len() != columns.len() {
            return Err(MarshalError::Internal(format!(
                "{} parameter columns but {} descriptions",
                columns.len(),
                infos.len()
            )));
        }
        columns
            .iter()
            .zip(infos)
            .enumerate()
            .map(|(i, (values, info))| self.build_column(i + 1, values, info))
            .collect()
    }

    fn build_column(&self, index: usize, values: &[HostValue], info: ParamInfo) -> Result<ColumnArray> {
        if info.is_deferred {
            return Err(MarshalError::Validation(format!(
                "parameter column {} holds values that must be streamed and cannot be array-bound",
                index
            )));
        }
        let mut indicators = vec![NULL_DATA; values.len()];
        let c_type = info.c_type;
        let size = info.column_size;
        let ind = &mut indicators;
        let data = match c_type {
            CType::CHAR => {
                let encoding = &self.settings.codec().encoding;
                ColumnData::Char(fill_variable(index, values, c_type, ind, size, size + 1, |v| {
                    v.as_str().map(|s| encode_narrow(s, encoding)).unwrap_or_default()
                })?)
            }
            CType::WCHAR => ColumnData::WChar(fill_variable(index, values, c_type, ind, size, size + 1, |v| {
                v.as_str().map(encode_wide).unwrap_or_default()
            })?),
            CType::BINARY => ColumnData::Binary(fill_variable(index, values, c_type, ind, size, size, |v| {
                v.as_bytes().map(<[u8]>::to_vec).unwrap_or_default()
            })?),
            CType::BIT => ColumnData::Bit(fill_fixed(index, values, c_type, ind, |_, v| {
                Ok(matches!(v, HostValue::Bool(true)) as u8)
            })?),
            CType::UTINYINT => ColumnData::UTinyInt(fill_fixed(index, values, c_type, ind, |row, v| {
                bounded(index, row, v, c_type)
            })?),
            CType::TINYINT | CType::STINYINT => {
                ColumnData::TinyInt(fill_fixed(index, values, c_type, ind, |row, v| {
                    bounded(index, row, v, c_type)
                })?)
            }
            CType::SHORT | CType::SSHORT => ColumnData::Short(fill_fixed(index, values, c_type, ind, |row, v| {
                bounded(index, row, v, c_type)
            })?),
            CType::LONG | CType::SLONG => ColumnData::Long(fill_fixed(index, values, c_type, ind, |row, v| {
                bounded(index, row, v, c_type)
            })?),
            CType::SBIGINT => ColumnData::BigInt(fill_fixed(index, values, c_type, ind, |row, v| {
                bounded(index, row, v, c_type)
            })?),
            CType::FLOAT => ColumnData::Float(fill_fixed(index, values, c_type, ind, |_, v| {
                Ok(v.as_f64().unwrap_or_default() as f32)
            })?),
            CType::DOUBLE => ColumnData::Double(fill_fixed(index, values, c_type, ind, |_, v| {
                Ok(v.as_f64().unwrap_or_default())
            })?),
            CType::NUMERIC => ColumnData::Numeric(fill_fixed(index, values, c_type, ind, |_, v| match v {
                HostValue::Decimal(d) => pack_decimal(d, size, info.decimal_digits),
                _ => Err(MarshalError::ParameterTypeMismatch { index, c_type }),
            })?),
            CType::TYPE_DATE => ColumnData::Date(fill_fixed(index, values, c_type, ind, |_, v| match v {
                HostValue::Date(d) => temporal::date_to_sql(d),
                _ => Err(MarshalError::ParameterTypeMismatch { index, c_type }),
            })?),
            CType::TYPE_TIME => ColumnData::Time(fill_fixed(index, values, c_type, ind, |_, v| match v {
                HostValue::Time(t) => Ok(temporal::time_to_sql(t)),
                _ => Err(MarshalError::ParameterTypeMismatch { index, c_type }),
            })?),
            CType::TYPE_TIMESTAMP => {
                ColumnData::Timestamp(fill_fixed(index, values, c_type, ind, |_, v| match v {
                    HostValue::DateTime(dt) => temporal::datetime_to_sql(dt),
                    _ => Err(MarshalError::ParameterTypeMismatch { index, c_type }),
                })?)
            }
            CType::SS_TIMESTAMPOFFSET => {
                ColumnData::DateTimeOffset(fill_fixed(index, values, c_type, ind, |_, v| match v {
                    HostValue::DateTimeOffset(dt) => temporal::datetimeoffset_to_sql(dt),
                    _ => Err(MarshalError::ParameterTypeMismatch { index, c_type }),
                })?)
            }
            CType::GUID => ColumnData::Guid(fill_fixed(index, values, c_type, ind, |_, v| match v {
                HostValue::Uuid(u) => Ok(SqlGuid::from(u)),
                _ => Err(MarshalError::ParameterTypeMismatch { index, c_type }),
            })?),
            CType::DEFAULT => ColumnData::Untyped(values.len()),
            other => {
                return Err(MarshalError::UnsupportedType(format!(
                    "{} cannot be array-bound",
                    other
                )))
            }
        };
        Ok(ColumnArray {
            info,
            data,
            indicators,
        })
    }

    /// Binds prepared arrays by column and sets the parameter set size.
    /// The statement must already be prepared.
    pub fn bind(&self, driver: &dyn DriverApi, stmt: Handle, columns: Vec<ColumnArray>) -> Result<BoundArrays> {
        let paramset_size = columns.first().map(|c| c.indicators.len()).unwrap_or(0);
        set_stmt_usize(driver, stmt, ATTR_PARAM_BIND_TYPE, BIND_BY_COLUMN, "SQLSetStmtAttr(SQL_ATTR_PARAM_BIND_TYPE)")?;
        set_stmt_usize(driver, stmt, ATTR_PARAMSET_SIZE, paramset_size, "SQLSetStmtAttr(SQL_ATTR_PARAMSET_SIZE)")?;

        let mut arena = BufferArena::new();
        for (i, column) in columns.into_iter().enumerate() {
            let position = (i + 1) as u16;
            let buffer_length = column.buffer_length();
            let ColumnArray {
                mut info,
                data,
                indicators,
            } = column;
            if info.c_type == CType::DEFAULT {
                resolve_null_type(driver, stmt, position, &mut info);
            }
            let is_numeric = matches!(data, ColumnData::Numeric(_));
            let ptr = into_arena(&mut arena, data);
            let indicator = arena.alloc_from(indicators);
            bind_raw(driver, stmt, position, &info, ptr, buffer_length, indicator)?;
            if is_numeric {
                write_numeric_fields(
                    driver,
                    stmt,
                    ATTR_APP_PARAM_DESC,
                    position,
                    info.column_size,
                    info.decimal_digits,
                    ptr,
                )?;
            }
        }
        log::debug!(
            "Bound parameter arrays: {} rows, {} bytes",
            paramset_size,
            arena.allocated_bytes()
        );
        Ok(BoundArrays {
            arena,
            paramset_size,
        })
    }
}

fn into_arena(arena: &mut BufferArena, data: ColumnData) -> Pointer {
    match data {
        ColumnData::Char(v) | ColumnData::Binary(v) | ColumnData::Bit(v) | ColumnData::UTinyInt(v) => {
            arena.alloc_from(v) as Pointer
        }
        ColumnData::WChar(v) => arena.alloc_from(v) as Pointer,
        ColumnData::TinyInt(v) => arena.alloc_from(v) as Pointer,
        ColumnData::Short(v) => arena.alloc_from(v) as Pointer,
        ColumnData::Long(v) => arena.alloc_from(v) as Pointer,
        ColumnData::BigInt(v) => arena.alloc_from(v) as Pointer,
        ColumnData::Float(v) => arena.alloc_from(v) as Pointer,
        ColumnData::Double(v) => arena.alloc_from(v) as Pointer,
        ColumnData::Numeric(v) => arena.alloc_from(v) as Pointer,
        ColumnData::Date(v) => arena.alloc_from(v) as Pointer,
        ColumnData::Time(v) => arena.alloc_from(v) as Pointer,
        ColumnData::Timestamp(v) => arena.alloc_from(v) as Pointer,
        ColumnData::DateTimeOffset(v) => arena.alloc_from(v) as Pointer,
        ColumnData::Guid(v) => arena.alloc_from(v) as Pointer,
        ColumnData::Untyped(rows) => arena.alloc_slice(0u8, rows) as Pointer,
    }
}

fn bounded<T: TryFrom<i64>>(index: usize, row: usize, value: &HostValue, c_type: CType) -> Result<T> {
    let n = value
        .as_i64()
        .ok_or(MarshalError::ParameterTypeMismatch { index, c_type })?;
    T::try_from(n).map_err(|_| {
        MarshalError::Range(format!(
            "integer {} out of range for {} (column {}, row {})",
            n, c_type, index, row
        ))
    })
}

fn fill_fixed<T, F>(
    index: usize,
    values: &[HostValue],
    c_type: CType,
    indicators: &mut [Len],
    mut convert: F,
) -> Result<Vec<T>>
where
    T: Default + Clone,
    F: FnMut(usize, &HostValue) -> Result<T>,
{
    let mut out = vec![T::default(); values.len()];
    for (row, value) in values.iter().enumerate() {
        if value.is_null() {
            continue;
        }
        check_value_type(index, value, c_type)?;
        out[row] = convert(row, value)?;
        indicators[row] = size_of::<T>() as Len;
    }
    Ok(out)
}

/// `stride` units per row; data longer than `column_size` units fails the
/// whole column.
#[allow(clippy::too_many_arguments)]
fn fill_variable<U, F>(
    index: usize,
    values: &[HostValue],
    c_type: CType,
    indicators: &mut [Len],
    column_size: usize,
    stride: usize,
    encode: F,
) -> Result<Vec<U>>
where
    U: Default + Copy,
    F: Fn(&HostValue) -> Vec<U>,
{
    let mut out = vec![U::default(); values.len() * stride];
    for (row, value) in values.iter().enumerate() {
        if value.is_null() {
            continue;
        }
        check_value_type(index, value, c_type)?;
        let units = encode(value);
        if units.len() > column_size {
            return Err(MarshalError::DataTruncation {
                column: index,
                row,
                length: units.len(),
                column_size,
            });
        }
        let start = row * stride;
        out[start..start + units.len()].copy_from_slice(&units);
        indicators[row] = (units.len() * size_of::<U>()) as Len;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{Captured, MockDriver};
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn build(columns: &[Vec<HostValue>]) -> Result<Vec<ColumnArray>> {
        let settings = EncodingSettings::default();
        let binding = ArrayBinding::new(&settings);
        let infos = binding.plan(columns)?;
        binding.build(columns, infos)
    }

    #[test]
    fn test_validate_rejects_ragged_columns() {
        let cols = vec![vec![HostValue::Int(1)], vec![]];
        assert!(matches!(validate_columns(&cols), Err(MarshalError::Validation(_))));
        assert!(validate_columns(&[]).is_err());
        assert_eq!(validate_columns(&[vec![HostValue::Null; 3]]).unwrap(), 3);
    }

    #[test]
    fn test_null_at_row_k_marks_only_that_row() {
        let columns = vec![
            vec![HostValue::Int(1), HostValue::Null, HostValue::Int(3)],
            vec!["a".into(), "bb".into(), HostValue::Null],
            vec![HostValue::Null, HostValue::Float(1.5), HostValue::Float(2.5)],
        ];
        let arrays = build(&columns).unwrap();
        for (col, null_row) in [(0usize, 1usize), (1, 2), (2, 0)] {
            let ind = arrays[col].indicators();
            for (row, value) in ind.iter().enumerate() {
                assert_eq!(*value == NULL_DATA, row == null_row, "column {} row {}", col, row);
            }
        }
    }

    #[test]
    fn test_int_column_widens_to_largest() {
        let settings = EncodingSettings::default();
        let binding = ArrayBinding::new(&settings);
        let info = binding
            .infer_column(1, &[HostValue::Int(1), HostValue::Int(70_000), HostValue::Null])
            .unwrap();
        assert_eq!(info.c_type, CType::LONG);
        let mixed = binding
            .infer_column(1, &[HostValue::Int(1), HostValue::Float(0.5)])
            .unwrap();
        assert_eq!(mixed.c_type, CType::DOUBLE);
    }

    #[test]
    fn test_decimal_column_combines_scale_and_integer_digits() {
        let settings = EncodingSettings::default();
        let binding = ArrayBinding::new(&settings);
        let values = vec![
            HostValue::Decimal(BigDecimal::from_str("12345.6").unwrap()),
            HostValue::Decimal(BigDecimal::from_str("1.234").unwrap()),
        ];
        let info = binding.infer_column(1, &values).unwrap();
        assert_eq!((info.column_size, info.decimal_digits), (8, 3));
    }

    #[test]
    fn test_mixed_types_are_rejected() {
        let err = build(&[vec![HostValue::Int(1), "x".into()]]).unwrap_err();
        assert!(matches!(err, MarshalError::ParameterTypeMismatch { index: 1, .. }));
    }

    #[test]
    fn test_truncation_names_column_and_row() {
        let settings = EncodingSettings::default();
        let sizes = vec![
            None,
            Some(InputSize {
                sql_type: SqlType::WVARCHAR,
                column_size: 2,
                decimal_digits: 0,
            }),
        ];
        let binding = ArrayBinding::new(&settings).with_input_sizes(&sizes);
        let columns = vec![
            vec![HostValue::Int(1), HostValue::Int(2), HostValue::Int(3)],
            vec!["a".into(), "bb".into(), "ccc".into()],
        ];
        let infos = binding.plan(&columns).unwrap();
        let err = binding.build(&columns, infos).unwrap_err();
        assert!(matches!(
            err,
            MarshalError::DataTruncation { column: 2, row: 2, length: 3, column_size: 2 }
        ));
    }

    #[test]
    fn test_name_age_set_binds_in_one_pass() {
        let driver = MockDriver::new();
        let settings = EncodingSettings::default();
        let binding = ArrayBinding::new(&settings);
        let columns = vec![
            vec!["a".into(), "bb".into(), "ccc".into()],
            vec![HostValue::Int(1), HostValue::Null, HostValue::Int(3)],
        ];
        let infos = binding.plan(&columns).unwrap();
        let arrays = binding.build(&columns, infos).unwrap();
        let bound = binding.bind(&driver, driver.stmt_handle(), arrays).unwrap();
        assert_eq!(bound.paramset_size(), 3);
        assert_eq!(driver.paramset_size(), 3);

        unsafe { driver.execute(driver.stmt_handle()) };
        let rows = driver.last_execution().unwrap().rows;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][0].text().as_deref(), Some("bb"));
        assert_eq!(rows[1][1], Captured::Null);
        assert_eq!(rows[2][1], Captured::Value(HostValue::Int(3)));
        assert_eq!(driver.call_count("SQLBindParameter"), 2);
    }

    #[test]
    fn test_numeric_array_rescales_rows() {
        let driver = MockDriver::new();
        let settings = EncodingSettings::default();
        let binding = ArrayBinding::new(&settings);
        let columns = vec![vec![
            HostValue::Decimal(BigDecimal::from_str("1.5").unwrap()),
            HostValue::Decimal(BigDecimal::from_str("22.25").unwrap()),
        ]];
        let infos = binding.plan(&columns).unwrap();
        let arrays = binding.build(&columns, infos).unwrap();
        let _bound = binding.bind(&driver, driver.stmt_handle(), arrays).unwrap();
        unsafe { driver.execute(driver.stmt_handle()) };
        let rows = driver.last_execution().unwrap().rows;
        let Captured::Numeric(first) = &rows[0][0] else {
            panic!("expected numeric");
        };
        assert_eq!(first.scale, 2);
        assert_eq!(first.to_decimal(), BigDecimal::from_str("1.50").unwrap());
    }

    #[test]
    fn test_small_int_range_checked_per_row() {
        let settings = EncodingSettings::default();
        let sizes = vec![Some(InputSize {
            sql_type: SqlType::TINYINT,
            column_size: 3,
            decimal_digits: 0,
        })];
        let binding = ArrayBinding::new(&settings).with_input_sizes(&sizes);
        let columns = vec![vec![HostValue::Int(1), HostValue::Int(2)]];
        let infos = binding.plan(&columns).unwrap();
        assert_eq!(infos[0].c_type, CType::UTINYINT);
        let ok = binding.build(&columns, infos.clone());
        assert!(ok.is_ok());

        let columns = vec![vec![HostValue::Int(1), HostValue::Int(256)]];
        let err = binding.build(&columns, infos).unwrap_err();
        match err {
            MarshalError::Range(msg) => assert!(msg.contains("row 1"), "{}", msg),
            other => panic!("unexpected {:?}", other),
        }
    }
}
