//! Result column description and application-descriptor writes.

use crate::config::{DecodingSettings, TextCodec};
use crate::driver::{
    app_descriptor, check_stmt, set_desc_value, DriverApi, Handle, Pointer, DESC_DATA_PTR,
    DESC_PRECISION, DESC_SCALE, DESC_TYPE,
};
use crate::error::Result;
use crate::protocol::encoding::{decode_narrow, decode_wide};
use crate::protocol::{ColumnMetadata, CType, SqlType};
use odbc_api::sys::ULen;

/// Initial column-name buffer, in UTF-16 units.
pub const NAME_BUFFER_UNITS: usize = 256;

pub fn num_result_cols(driver: &dyn DriverApi, stmt: Handle) -> Result<u16> {
    let mut count = 0i16;
    let rc = unsafe { driver.num_result_cols(stmt, &mut count) };
    check_stmt(driver, stmt, rc, "SQLNumResultCols")?;
    Ok(count.max(0) as u16)
}

/// Describes every column of the current result set. Empty when the
/// statement produced no result set.
pub fn describe_columns(
    driver: &dyn DriverApi,
    stmt: Handle,
    decoding: &DecodingSettings,
) -> Result<Vec<ColumnMetadata>> {
    let count = num_result_cols(driver, stmt)?;
    let columns = (1..=count)
        .map(|column| describe_column(driver, stmt, column, decoding.metadata()))
        .collect::<Result<Vec<_>>>()?;
    log::debug!("Described {} result columns", columns.len());
    Ok(columns)
}

pub fn describe_column(
    driver: &dyn DriverApi,
    stmt: Handle,
    column: u16,
    metadata: &TextCodec,
) -> Result<ColumnMetadata> {
    let mut name = vec![0u16; NAME_BUFFER_UNITS];
    loop {
        let mut name_len = 0i16;
        let mut data_type = 0i16;
        let mut column_size: ULen = 0;
        let mut decimal_digits = 0i16;
        let mut nullable = 0i16;
        let rc = unsafe {
            driver.describe_col(
                stmt,
                column,
                name.as_mut_ptr(),
                name.len() as i16,
                &mut name_len,
                &mut data_type,
                &mut column_size,
                &mut decimal_digits,
                &mut nullable,
            )
        };
        check_stmt(driver, stmt, rc, "SQLDescribeColW")?;

        let needed = name_len.max(0) as usize;
        if needed >= name.len() && name.len() < i16::MAX as usize {
            name = vec![0u16; (needed + 1).min(i16::MAX as usize)];
            continue;
        }
        let units = &name[..needed.min(name.len())];
        return Ok(ColumnMetadata {
            name: decode_column_name(units, needed, metadata),
            sql_type: SqlType(data_type),
            column_size: column_size as usize,
            decimal_digits,
            nullable,
        });
    }
}

/// Names arrive in a wide buffer. A narrow metadata codec means the driver
/// packed narrow bytes into it and `name_len` counts those bytes.
fn decode_column_name(units: &[u16], name_len: usize, codec: &TextCodec) -> String {
    if codec.is_wide() {
        return decode_wide(&units[..name_len.min(units.len())]);
    }
    let mut bytes: Vec<u8> = units.iter().flat_map(|u| u.to_le_bytes()).collect();
    bytes.truncate(name_len);
    decode_narrow(&bytes, &codec.encoding)
}

/// Points descriptor record `record` at a `SQL_C_NUMERIC` buffer with the
/// given precision and scale. A null `data_ptr` leaves the pointer unset
/// (the `SQLGetData` path).
pub fn write_numeric_fields(
    driver: &dyn DriverApi,
    stmt: Handle,
    descriptor_attribute: i32,
    record: u16,
    precision: usize,
    scale: i16,
    data_ptr: Pointer,
) -> Result<()> {
    let desc = app_descriptor(driver, stmt, descriptor_attribute)?;
    set_desc_value(driver, desc, record, DESC_TYPE, CType::NUMERIC.0 as isize as Pointer)?;
    set_desc_value(driver, desc, record, DESC_PRECISION, precision as Pointer)?;
    set_desc_value(driver, desc, record, DESC_SCALE, scale as isize as Pointer)?;
    // writing TYPE resets DATA_PTR
    if !data_ptr.is_null() {
        set_desc_value(driver, desc, record, DESC_DATA_PTR, data_ptr)?;
    }
    Ok(())
}
