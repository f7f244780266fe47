//! Per-column decode plans. A [`ColumnReader`] knows the C type a column is
//! fetched as and turns either a `SQLGetData` result or a bound row slot
//! into a [`HostValue`].

use crate::config::{DecodingSettings, FetchOptions, TextCodec};
use crate::driver::{check_stmt, DriverApi, Handle, Pointer, ATTR_APP_ROW_DESC};
use crate::engine::descriptor::write_numeric_fields;
use crate::engine::lob::{read_lob, LobKind};
use crate::error::{MarshalError, Result};
use crate::protocol::encoding::{decode_narrow, decode_wide_bytes};
use crate::protocol::guid::SqlGuid;
use crate::protocol::temporal::{
    date_from_sql, datetime_from_sql, datetimeoffset_from_sql, time_from_sql,
};
use crate::protocol::types::bound_cell_len;
use crate::protocol::{
    fetch_c_type, BufferShape, ColumnMetadata, CType, DateTimeOffsetStruct, HostValue, Indicator,
    NumericStruct, SqlType, MAX_NUMERIC_PRECISION,
};
use odbc_api::sys::{Date, Len, SqlReturn, Time, Timestamp};
use std::mem::size_of;
use uuid::Uuid;

/// What a bound slot held.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundCell {
    Value(HostValue),
    /// Length unknown or larger than the slot; re-read with `SQLGetData`.
    Stream,
}

#[derive(Debug, Clone)]
pub struct ColumnReader {
    /// 1-based column number.
    pub column: u16,
    pub sql_type: SqlType,
    pub c_type: CType,
    pub codec: TextCodec,
    /// Characters or bytes a bound slot holds.
    pub working_size: usize,
    pub precision: usize,
    pub scale: i16,
    pub lob: bool,
}

impl ColumnReader {
    pub fn new(
        column: u16,
        meta: &ColumnMetadata,
        decoding: &DecodingSettings,
        options: &FetchOptions,
    ) -> Result<Self> {
        let codec = decoding.for_column(meta.sql_type).clone();
        let c_type = if meta.sql_type.is_narrow_char() || meta.sql_type.is_wide_char() {
            codec.c_type
        } else {
            fetch_c_type(meta.sql_type)?
        };
        let precision = meta
            .column_size
            .clamp(1, MAX_NUMERIC_PRECISION as usize);
        Ok(Self {
            column,
            sql_type: meta.sql_type,
            c_type,
            codec,
            working_size: meta.working_size(options),
            precision,
            scale: meta.decimal_digits.max(0),
            lob: meta.sql_type.is_variable_length() && meta.is_lob(options),
        })
    }

    /// One reader per column, numbered from 1.
    pub fn plan(
        columns: &[ColumnMetadata],
        decoding: &DecodingSettings,
        options: &FetchOptions,
    ) -> Result<Vec<Self>> {
        columns
            .iter()
            .enumerate()
            .map(|(i, meta)| Self::new(i as u16 + 1, meta, decoding, options))
            .collect()
    }

    pub fn shape(&self) -> Result<BufferShape> {
        self.c_type.buffer_shape()
    }

    /// Bytes of one row slot in a bound array.
    pub fn slot_len(&self) -> Result<usize> {
        Ok(self.shape()?.slot_len(self.working_size))
    }

    /// Worst-case bound bytes per row, indicator included.
    pub fn bound_len(&self) -> Result<usize> {
        bound_cell_len(self.sql_type, self.c_type, self.working_size)
    }

    /// Reads the cell with `SQLGetData` on the current row.
    pub fn read(&self, driver: &dyn DriverApi, stmt: Handle) -> Result<HostValue> {
        if let Ok(kind) = LobKind::for_c_type(self.c_type) {
            log::trace!("Reading column {} as {:?} stream", self.column, kind);
            return read_lob(driver, stmt, self.column, self.c_type, &self.codec);
        }
        let BufferShape::Fixed(size) = self.shape()? else {
            return Err(MarshalError::Internal(format!(
                "{} has no fixed layout",
                self.c_type
            )));
        };
        let mut buffer = vec![0u8; size];
        let target = if self.c_type == CType::NUMERIC {
            // SQL_ARD_TYPE picks up the precision and scale written here
            write_numeric_fields(
                driver,
                stmt,
                ATTR_APP_ROW_DESC,
                self.column,
                self.precision,
                self.scale,
                std::ptr::null_mut(),
            )?;
            CType::ARD_TYPE
        } else {
            self.c_type
        };
        let mut indicator: Len = 0;
        let rc = unsafe {
            driver.get_data(
                stmt,
                self.column,
                target.0,
                buffer.as_mut_ptr() as Pointer,
                size as Len,
                &mut indicator,
            )
        };
        if rc == SqlReturn::NO_DATA {
            return Ok(HostValue::Null);
        }
        check_stmt(driver, stmt, rc, "SQLGetData")?;
        if Indicator::from_raw(indicator).is_null() {
            return Ok(HostValue::Null);
        }
        decode_fixed(self.c_type, &buffer)
    }

    /// Decodes one bound slot.
    pub fn decode_slot(&self, slot: &[u8], indicator: Len) -> Result<BoundCell> {
        let indicator = Indicator::from_raw(indicator);
        match self.shape()? {
            BufferShape::Fixed(_) => Ok(match indicator {
                Indicator::Null => BoundCell::Value(HostValue::Null),
                Indicator::NoTotal => BoundCell::Stream,
                Indicator::Empty | Indicator::Length(_) => {
                    BoundCell::Value(decode_fixed(self.c_type, slot)?)
                }
            }),
            BufferShape::Variable { unit } => {
                let capacity = if self.c_type == CType::BINARY {
                    slot.len()
                } else {
                    slot.len().saturating_sub(unit)
                };
                let len = match indicator {
                    Indicator::Null => return Ok(BoundCell::Value(HostValue::Null)),
                    Indicator::NoTotal => return Ok(BoundCell::Stream),
                    Indicator::Empty => 0,
                    Indicator::Length(n) if n > capacity => return Ok(BoundCell::Stream),
                    Indicator::Length(n) => n,
                };
                Ok(BoundCell::Value(self.decode_bytes(&slot[..len])))
            }
        }
    }

    fn decode_bytes(&self, bytes: &[u8]) -> HostValue {
        match self.c_type {
            CType::BINARY => HostValue::Bytes(bytes.to_vec()),
            CType::WCHAR => HostValue::Str(decode_wide_bytes(bytes)),
            _ => HostValue::Str(decode_narrow(bytes, &self.codec.encoding)),
        }
    }
}

fn read_as<T: Copy>(bytes: &[u8]) -> Result<T> {
    if bytes.len() < size_of::<T>() {
        return Err(MarshalError::Internal(format!(
            "cell buffer of {} bytes, expected {}",
            bytes.len(),
            size_of::<T>()
        )));
    }
    Ok(unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const T) })
}

/// Fixed-layout cell bytes to a host value.
pub fn decode_fixed(c_type: CType, bytes: &[u8]) -> Result<HostValue> {
    let value = match c_type {
        CType::BIT => HostValue::Bool(read_as::<u8>(bytes)? != 0),
        CType::UTINYINT => HostValue::Int(read_as::<u8>(bytes)? as i64),
        CType::TINYINT | CType::STINYINT => HostValue::Int(read_as::<i8>(bytes)? as i64),
        CType::SHORT | CType::SSHORT => HostValue::Int(read_as::<i16>(bytes)? as i64),
        CType::LONG | CType::SLONG => HostValue::Int(read_as::<i32>(bytes)? as i64),
        CType::SBIGINT => HostValue::Int(read_as::<i64>(bytes)?),
        CType::FLOAT => HostValue::Float(read_as::<f32>(bytes)? as f64),
        CType::DOUBLE => HostValue::Float(read_as::<f64>(bytes)?),
        CType::NUMERIC => HostValue::Decimal(read_as::<NumericStruct>(bytes)?.to_decimal()),
        CType::TYPE_DATE => HostValue::Date(date_from_sql(&read_as::<Date>(bytes)?)?),
        CType::TYPE_TIME => HostValue::Time(time_from_sql(&read_as::<Time>(bytes)?)?),
        CType::TYPE_TIMESTAMP => {
            HostValue::DateTime(datetime_from_sql(&read_as::<Timestamp>(bytes)?)?)
        }
        CType::SS_TIMESTAMPOFFSET => HostValue::DateTimeOffset(datetimeoffset_from_sql(
            &read_as::<DateTimeOffsetStruct>(bytes)?,
        )?),
        CType::GUID => HostValue::Uuid(Uuid::from(&read_as::<SqlGuid>(bytes)?)),
        other => {
            return Err(MarshalError::UnsupportedType(format!(
                "{} ({})",
                other.name(),
                other.0
            )))
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{MockCell, MockColumn, MockDriver, MockResultSet};
    use bigdecimal::BigDecimal;
    use chrono::{NaiveDate, NaiveTime};
    use std::str::FromStr;

    fn meta(sql_type: SqlType, size: usize, digits: i16) -> ColumnMetadata {
        ColumnMetadata {
            name: "c".to_string(),
            sql_type,
            column_size: size,
            decimal_digits: digits,
            nullable: 1,
        }
    }

    fn reader(sql_type: SqlType, size: usize, digits: i16) -> ColumnReader {
        ColumnReader::new(1, &meta(sql_type, size, digits), &DecodingSettings::default(), &FetchOptions::default())
            .unwrap()
    }

    fn positioned(column: MockColumn, cell: MockCell) -> MockDriver {
        let driver = MockDriver::new();
        driver.push_result(MockResultSet::new(vec![column]).row(vec![cell]));
        unsafe {
            driver.exec_direct(driver.stmt_handle(), std::ptr::null(), 0);
            driver.fetch(driver.stmt_handle());
        }
        driver
    }

    #[test]
    fn test_text_columns_follow_decoding_settings() {
        assert_eq!(reader(SqlType::VARCHAR, 20, 0).c_type, CType::CHAR);
        assert_eq!(reader(SqlType::WVARCHAR, 20, 0).c_type, CType::WCHAR);
        let mut decoding = DecodingSettings::default();
        decoding.set_decoding(SqlType::CHAR, Some("utf-16le"), None).unwrap();
        let r = ColumnReader::new(1, &meta(SqlType::VARCHAR, 20, 0), &decoding, &FetchOptions::default()).unwrap();
        assert_eq!(r.c_type, CType::WCHAR);
    }

    #[test]
    fn test_zero_size_text_is_lob_but_integers_are_not() {
        let r = reader(SqlType::VARCHAR, 0, 0);
        assert!(r.lob);
        assert_eq!(r.working_size, 4096);
        assert!(!reader(SqlType::INTEGER, 10, 0).lob);
    }

    #[test]
    fn test_decimal_read_through_ard() {
        let driver = positioned(
            MockColumn::new("amount", SqlType::DECIMAL, 10).digits(2),
            MockCell::value(HostValue::Decimal(BigDecimal::from_str("123.45").unwrap())),
        );
        let value = reader(SqlType::DECIMAL, 10, 2).read(&driver, driver.stmt_handle()).unwrap();
        let HostValue::Decimal(d) = &value else {
            panic!("expected decimal, got {:?}", value);
        };
        assert_eq!(crate::protocol::render_decimal(d), "123.45");
        let writes = driver.desc_writes();
        assert!(writes.iter().all(|w| w.row_descriptor));
        assert_eq!(writes.len(), 3);
    }

    #[test]
    fn test_read_fixed_and_null() {
        let driver = positioned(MockColumn::new("n", SqlType::INTEGER, 10), MockCell::value(HostValue::Int(42)));
        assert_eq!(reader(SqlType::INTEGER, 10, 0).read(&driver, driver.stmt_handle()).unwrap(), HostValue::Int(42));

        let driver = positioned(MockColumn::new("d", SqlType::TYPE_DATE, 10), MockCell::null());
        assert_eq!(reader(SqlType::TYPE_DATE, 10, 0).read(&driver, driver.stmt_handle()).unwrap(), HostValue::Null);
    }

    #[test]
    fn test_temporal_and_guid_decode() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let bytes = unsafe {
            let sql = crate::protocol::temporal::date_to_sql(&date).unwrap();
            std::slice::from_raw_parts(&sql as *const Date as *const u8, size_of::<Date>()).to_vec()
        };
        assert_eq!(decode_fixed(CType::TYPE_DATE, &bytes).unwrap(), HostValue::Date(date));

        let id = Uuid::parse_str("6f9619ff-8b86-d011-b42d-00c04fc964ff").unwrap();
        let guid = SqlGuid::from(&id);
        let bytes = unsafe {
            std::slice::from_raw_parts(&guid as *const SqlGuid as *const u8, size_of::<SqlGuid>()).to_vec()
        };
        assert_eq!(decode_fixed(CType::GUID, &bytes).unwrap(), HostValue::Uuid(id));

        let time = NaiveTime::from_hms_opt(13, 5, 9).unwrap();
        let driver = positioned(MockColumn::new("t", SqlType::SS_TIME2, 16), MockCell::value(HostValue::Time(time)));
        assert_eq!(reader(SqlType::SS_TIME2, 16, 0).read(&driver, driver.stmt_handle()).unwrap(), HostValue::Time(time));
    }

    #[test]
    fn test_decode_slot_states() {
        let r = reader(SqlType::VARCHAR, 4, 0);
        let slot = *b"abc\0\0";
        assert_eq!(r.decode_slot(&slot, 3).unwrap(), BoundCell::Value(HostValue::Str("abc".into())));
        assert_eq!(r.decode_slot(&slot, 0).unwrap(), BoundCell::Value(HostValue::Str(String::new())));
        assert_eq!(r.decode_slot(&slot, odbc_api::sys::NULL_DATA).unwrap(), BoundCell::Value(HostValue::Null));
        assert_eq!(r.decode_slot(&slot, odbc_api::sys::NO_TOTAL).unwrap(), BoundCell::Stream);
        // longer than the slot holds
        assert_eq!(r.decode_slot(&slot, 9).unwrap(), BoundCell::Stream);
    }

    #[test]
    fn test_undecodable_narrow_text_is_replaced() {
        let r = reader(SqlType::VARCHAR, 4, 0);
        let slot = [0x61, 0xFF, 0x62, 0, 0];
        let BoundCell::Value(HostValue::Str(text)) = r.decode_slot(&slot, 3).unwrap() else {
            panic!("expected text");
        };
        assert_eq!(text, "a\u{FFFD}b");
    }

    #[test]
    fn test_unsupported_sql_type() {
        let err = ColumnReader::new(1, &meta(SqlType(-370), 10, 0), &DecodingSettings::default(), &FetchOptions::default())
            .unwrap_err();
        assert!(matches!(err, MarshalError::UnsupportedType(_)));
    }
}
