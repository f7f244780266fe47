//! Binds one host value per parameter position.
//!
//! Every buffer handed to the driver lives in the returned
//! [`BoundParameters`] and must outlive execute (and the DAE loop).

use crate::config::EncodingSettings;
use crate::driver::{
    check_stmt, succeeded, DriverApi, Handle, Pointer, ATTR_APP_PARAM_DESC, FREE_RESET_PARAMS,
};
use crate::engine::descriptor::write_numeric_fields;
use crate::error::{MarshalError, Result};
use crate::protocol::encoding::{encode_narrow, encode, encode_wide};
use crate::protocol::indicator::len_data_at_exec;
use crate::protocol::temporal;
use crate::protocol::{
    BufferArena, CType, HostValue, NumericStruct, ParamInfo, SqlGuid, SqlType,
    MAX_NUMERIC_PRECISION,
};
use odbc_api::sys::{Len, ULen, NULL_DATA};
use std::mem::size_of;
use std::ptr::null_mut;

/// A parameter streamed through `SQLPutData` after execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredParam {
    pub position: u16,
    pub c_type: CType,
    /// Encoded bytes, sent in chunks.
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct BoundParameters {
    arena: BufferArena,
    deferred: Vec<DeferredParam>,
}

/// Token the driver returns from `SQLParamData` for side-table slot `slot`.
/// Never null.
pub fn dae_token(slot: usize) -> Pointer {
    (slot + 1) as Pointer
}

impl BoundParameters {
    pub fn deferred(&self) -> &[DeferredParam] {
        &self.deferred
    }

    pub fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }

    pub fn resolve_token(&self, token: Pointer) -> Option<&DeferredParam> {
        (token as usize)
            .checked_sub(1)
            .and_then(|slot| self.deferred.get(slot))
    }

    pub fn allocated_bytes(&self) -> usize {
        self.arena.allocated_bytes()
    }
}

/// Whether `value` may be placed in a buffer of `c_type`. Null fits every type.
pub fn value_fits_c_type(value: &HostValue, c_type: CType) -> bool {
    if value.is_null() {
        return true;
    }
    match c_type {
        CType::CHAR | CType::WCHAR => matches!(value, HostValue::Str(_)),
        CType::BINARY => matches!(value, HostValue::Bytes(_)),
        CType::BIT => matches!(value, HostValue::Bool(_)),
        CType::UTINYINT
        | CType::TINYINT
        | CType::STINYINT
        | CType::SHORT
        | CType::SSHORT
        | CType::LONG
        | CType::SLONG
        | CType::SBIGINT => matches!(value, HostValue::Int(_)),
        CType::FLOAT | CType::DOUBLE => matches!(value, HostValue::Float(_) | HostValue::Int(_)),
        CType::NUMERIC => matches!(value, HostValue::Decimal(_)),
        CType::TYPE_DATE => matches!(value, HostValue::Date(_)),
        CType::TYPE_TIME => matches!(value, HostValue::Time(_)),
        CType::TYPE_TIMESTAMP => matches!(value, HostValue::DateTime(_)),
        CType::SS_TIMESTAMPOFFSET => matches!(value, HostValue::DateTimeOffset(_)),
        CType::GUID => matches!(value, HostValue::Uuid(_)),
        _ => false,
    }
}

pub fn check_value_type(index: usize, value: &HostValue, c_type: CType) -> Result<()> {
    if value_fits_c_type(value, c_type) {
        Ok(())
    } else {
        Err(MarshalError::ParameterTypeMismatch { index, c_type })
    }
}

/// Binds `values[i]` at position `i + 1` according to `infos[i]`. On error
/// the statement's parameters are reset before the buffers are released.
pub fn bind_parameters(
    driver: &dyn DriverApi,
    stmt: Handle,
    values: &[HostValue],
    infos: &mut [ParamInfo],
    settings: &EncodingSettings,
) -> Result<BoundParameters> {
    if values.len() != infos.len() {
        return Err(MarshalError::Internal(format!(
            "{} values but {} parameter descriptions",
            values.len(),
            infos.len()
        )));
    }
    let mut bound = BoundParameters::default();
    for (i, (value, info)) in values.iter().zip(infos.iter_mut()).enumerate() {
        if let Err(e) = bind_one(driver, stmt, i + 1, value, info, settings, &mut bound) {
            if let Err(reset) = reset_parameters(driver, stmt) {
                log::warn!("Failed to reset parameters after bind error: {}", reset);
            }
            return Err(e);
        }
    }
    log::debug!(
        "Bound {} parameters ({} deferred, {} bytes)",
        values.len(),
        bound.deferred.len(),
        bound.allocated_bytes()
    );
    Ok(bound)
}

pub fn reset_parameters(driver: &dyn DriverApi, stmt: Handle) -> Result<()> {
    let rc = unsafe { driver.free_stmt(stmt, FREE_RESET_PARAMS) };
    check_stmt(driver, stmt, rc, "SQLFreeStmt(SQL_RESET_PARAMS)").map(|_| ())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn bind_raw(
    driver: &dyn DriverApi,
    stmt: Handle,
    position: u16,
    info: &ParamInfo,
    value: Pointer,
    buffer_length: Len,
    indicator: *mut Len,
) -> Result<()> {
    log::debug!(
        "Binding parameter {} as {} / {} (size {}, digits {})",
        position,
        info.c_type,
        info.sql_type,
        info.column_size,
        info.decimal_digits
    );
    let rc = unsafe {
        driver.bind_parameter(
            stmt,
            position,
            info.direction.as_raw(),
            info.c_type.0,
            info.sql_type.0,
            info.column_size as ULen,
            info.decimal_digits,
            value,
            buffer_length,
            indicator,
        )
    };
    check_stmt(driver, stmt, rc, "SQLBindParameter").map(|_| ())
}

/// Replaces the polymorphic NULL description with what the driver reports
/// for `position`, keeping VARCHAR(1) when it cannot say.
pub(crate) fn resolve_null_type(driver: &dyn DriverApi, stmt: Handle, position: u16, info: &mut ParamInfo) {
    let mut data_type = 0i16;
    let mut size: ULen = 0;
    let mut digits = 0i16;
    let mut nullable = 0i16;
    let rc = unsafe {
        driver.describe_param(stmt, position, &mut data_type, &mut size, &mut digits, &mut nullable)
    };
    if succeeded(rc) && SqlType(data_type) != SqlType::UNKNOWN {
        info.sql_type = SqlType(data_type);
        info.column_size = (size as usize).max(1);
        info.decimal_digits = digits;
        log::debug!("Parameter {} NULL resolved to {}", position, info.sql_type);
    } else {
        log::debug!(
            "SQLDescribeParam unavailable for parameter {}; binding NULL as {}",
            position,
            info.sql_type
        );
    }
}

fn int_buffer<T>(arena: &mut BufferArena, index: usize, value: &HostValue, c_type: CType) -> Result<(Pointer, Len)>
where
    T: TryFrom<i64> + 'static,
{
    let n = value
        .to_bounded_int::<T>(index)?
        .ok_or(MarshalError::ParameterTypeMismatch { index, c_type })?;
    Ok((arena.alloc_value(n) as Pointer, size_of::<T>() as Len))
}

/// Packs a decimal to the declared precision and scale of `info`.
pub(crate) fn pack_decimal(
    value: &bigdecimal::BigDecimal,
    precision: usize,
    scale: i16,
) -> Result<NumericStruct> {
    if precision > MAX_NUMERIC_PRECISION as usize {
        return Err(MarshalError::Range(format!(
            "Declared numeric precision {} exceeds {}",
            precision, MAX_NUMERIC_PRECISION
        )));
    }
    let scaled = value.with_scale(scale as i64);
    if &scaled != value {
        return Err(MarshalError::Range(format!(
            "Numeric value {} has more fractional digits than the declared scale {}",
            value, scale
        )));
    }
    let mut packed = NumericStruct::from_decimal(&scaled)?;
    if packed.precision as usize > precision {
        return Err(MarshalError::Range(format!(
            "Numeric value {} needs precision {} but the parameter declares {}",
            value, packed.precision, precision
        )));
    }
    packed.precision = precision as u8;
    packed.scale = scale as i8;
    Ok(packed)
}

fn bind_one(
    driver: &dyn DriverApi,
    stmt: Handle,
    index: usize,
    value: &HostValue,
    info: &mut ParamInfo,
    settings: &EncodingSettings,
    bound: &mut BoundParameters,
) -> Result<()> {
    let position = index as u16;
    if value.is_null() {
        if info.c_type == CType::DEFAULT {
            resolve_null_type(driver, stmt, position, info);
        }
        let indicator = bound.arena.alloc_value::<Len>(NULL_DATA);
        return bind_raw(driver, stmt, position, info, null_mut(), 0, indicator);
    }
    check_value_type(index, value, info.c_type)?;

    if info.is_deferred {
        let payload = match value {
            HostValue::Str(s) => encode(s, settings.codec()).to_bytes(),
            HostValue::Bytes(b) => b.clone(),
            other => {
                return Err(MarshalError::UnsupportedDeferredType {
                    index,
                    type_name: other.type_name().to_string(),
                })
            }
        };
        // A declared size of 0 on a long type is unbounded (`MAX`).
        if info.column_size > 0 {
            let units = if info.c_type == CType::WCHAR {
                payload.len() / 2
            } else {
                payload.len()
            };
            check_fits(index, units, info.column_size)?;
        }
        let indicator = bound.arena.alloc_value(len_data_at_exec(payload.len()));
        let token = dae_token(bound.deferred.len());
        bound.deferred.push(DeferredParam {
            position,
            c_type: info.c_type,
            payload,
        });
        return bind_raw(driver, stmt, position, info, token, 0, indicator);
    }

    let arena = &mut bound.arena;
    let mut numeric_ptr: Pointer = null_mut();
    let (ptr, buffer_length, length): (Pointer, Len, Len) = match (value, info.c_type) {
        (HostValue::Str(s), CType::WCHAR) => {
            let mut units = encode_wide(s);
            check_fits(index, units.len(), info.column_size)?;
            let len = units.len();
            units.push(0);
            let ptr = arena.alloc_from(units) as Pointer;
            (ptr, ((len + 1) * 2) as Len, (len * 2) as Len)
        }
        (HostValue::Str(s), _) => {
            let mut bytes = encode_narrow(s, &settings.codec().encoding);
            check_fits(index, bytes.len(), info.column_size)?;
            let len = bytes.len();
            bytes.push(0);
            let ptr = arena.alloc_from(bytes) as Pointer;
            (ptr, (len + 1) as Len, len as Len)
        }
        (HostValue::Bytes(b), _) => {
            check_fits(index, b.len(), info.column_size)?;
            let len = b.len();
            let ptr = arena.alloc_slice(0u8, len);
            unsafe { std::ptr::copy_nonoverlapping(b.as_ptr(), ptr, len) };
            (ptr as Pointer, len as Len, len as Len)
        }
        (HostValue::Bool(b), _) => (arena.alloc_value(*b as u8) as Pointer, 1, 1),
        (_, CType::UTINYINT) => with_len(int_buffer::<u8>(arena, index, value, info.c_type)?),
        (_, CType::TINYINT | CType::STINYINT) => {
            with_len(int_buffer::<i8>(arena, index, value, info.c_type)?)
        }
        (_, CType::SHORT | CType::SSHORT) => {
            with_len(int_buffer::<i16>(arena, index, value, info.c_type)?)
        }
        (_, CType::LONG | CType::SLONG) => with_len(int_buffer::<i32>(arena, index, value, info.c_type)?),
        (_, CType::SBIGINT) => with_len(int_buffer::<i64>(arena, index, value, info.c_type)?),
        (_, CType::DOUBLE | CType::FLOAT) => {
            let f = value
                .as_f64()
                .ok_or(MarshalError::ParameterTypeMismatch { index, c_type: info.c_type })?;
            if info.c_type == CType::FLOAT {
                (arena.alloc_value(f as f32) as Pointer, 4, 4)
            } else {
                (arena.alloc_value(f) as Pointer, 8, 8)
            }
        }
        (HostValue::Decimal(d), _) => {
            let packed = pack_decimal(d, info.column_size, info.decimal_digits)?;
            let ptr = arena.alloc_value(packed) as Pointer;
            numeric_ptr = ptr;
            let size = size_of::<NumericStruct>() as Len;
            (ptr, size, size)
        }
        (HostValue::Date(d), _) => sized(arena, temporal::date_to_sql(d)?),
        (HostValue::Time(t), _) => sized(arena, temporal::time_to_sql(t)),
        (HostValue::DateTime(dt), _) => sized(arena, temporal::datetime_to_sql(dt)?),
        (HostValue::DateTimeOffset(dt), _) => sized(arena, temporal::datetimeoffset_to_sql(dt)?),
        (HostValue::Uuid(u), _) => sized(arena, SqlGuid::from(u)),
        _ => {
            return Err(MarshalError::ParameterTypeMismatch {
                index,
                c_type: info.c_type,
            })
        }
    };
    let indicator = arena.alloc_value(length);
    bind_raw(driver, stmt, position, info, ptr, buffer_length, indicator)?;

    if !numeric_ptr.is_null() {
        write_numeric_fields(
            driver,
            stmt,
            ATTR_APP_PARAM_DESC,
            position,
            info.column_size,
            info.decimal_digits,
            numeric_ptr,
        )?;
    }
    Ok(())
}

fn check_fits(index: usize, length: usize, column_size: usize) -> Result<()> {
    if length > column_size {
        return Err(MarshalError::DataTruncation {
            column: index,
            row: 0,
            length,
            column_size,
        });
    }
    Ok(())
}

fn with_len((ptr, len): (Pointer, Len)) -> (Pointer, Len, Len) {
    (ptr, len, len)
}

fn sized<T: 'static>(arena: &mut BufferArena, value: T) -> (Pointer, Len, Len) {
    let len = size_of::<T>() as Len;
    (arena.alloc_value(value) as Pointer, len, len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{Captured, MockDriver};
    use crate::protocol::InputSize;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn bind(driver: &MockDriver, values: &[HostValue]) -> Result<(BoundParameters, Vec<ParamInfo>)> {
        let settings = EncodingSettings::default();
        let mut infos = ParamInfo::infer_all(values, &settings, &[])?;
        let bound = bind_parameters(driver, driver.stmt_handle(), values, &mut infos, &settings)?;
        Ok((bound, infos))
    }

    fn execute(driver: &MockDriver) -> Vec<Captured> {
        unsafe { driver.execute(driver.stmt_handle()) };
        driver.last_execution().unwrap().rows.remove(0)
    }

    #[test]
    fn test_mismatch_names_position_and_c_type() {
        let driver = MockDriver::new();
        let settings = EncodingSettings::default();
        let mut infos = vec![ParamInfo::input(CType::WCHAR, SqlType::WVARCHAR, 10, 0)];
        let err = bind_parameters(
            &driver,
            driver.stmt_handle(),
            &[HostValue::Int(5)],
            &mut infos,
            &settings,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Parameter's object type does not match parameter's C type. paramIndex - 1, C type - SQL_C_WCHAR"
        );
        assert_eq!(driver.free_stmt_options(), vec![FREE_RESET_PARAMS]);
    }

    #[test]
    fn test_truncation_at_column_size_boundary() {
        let driver = MockDriver::new();
        let settings = EncodingSettings::default();
        let mut fits = vec![ParamInfo::input(CType::WCHAR, SqlType::WVARCHAR, 5, 0)];
        bind_parameters(&driver, driver.stmt_handle(), &["abcde".into()], &mut fits, &settings).unwrap();

        let mut too_small = vec![ParamInfo::input(CType::WCHAR, SqlType::WVARCHAR, 5, 0)];
        let err = bind_parameters(&driver, driver.stmt_handle(), &["abcdef".into()], &mut too_small, &settings)
            .unwrap_err();
        assert!(matches!(
            err,
            MarshalError::DataTruncation { column: 1, row: 0, length: 6, column_size: 5 }
        ));
    }

    #[test]
    fn test_scalars_reach_the_driver() {
        let driver = MockDriver::new();
        let values = vec![
            HostValue::Str("hé".into()),
            HostValue::Int(300),
            HostValue::Int(7),
            HostValue::Bool(true),
            HostValue::Float(2.5),
            HostValue::Bytes(vec![1, 2, 3]),
        ];
        let (_bound, _) = bind(&driver, &values).unwrap();
        let row = execute(&driver);
        assert_eq!(row[0].text().as_deref(), Some("hé"));
        assert_eq!(row[1], Captured::Value(HostValue::Int(300)));
        assert_eq!(row[2], Captured::Value(HostValue::Int(7)));
        assert_eq!(row[3], Captured::Value(HostValue::Bool(true)));
        assert_eq!(row[4], Captured::Value(HostValue::Float(2.5)));
        assert_eq!(row[5], Captured::Binary(vec![1, 2, 3]));
        assert_eq!(driver.bindings()[2].c_type, CType::UTINYINT);
    }

    #[test]
    fn test_decimal_binds_numeric_with_descriptor() {
        let driver = MockDriver::new();
        let (_bound, _) = bind(&driver, &[HostValue::Decimal(BigDecimal::from_str("123.45").unwrap())]).unwrap();
        let binding = &driver.bindings()[0];
        assert_eq!(binding.c_type, CType::NUMERIC);
        assert_eq!((binding.column_size, binding.decimal_digits), (5, 2));

        let row = execute(&driver);
        let Captured::Numeric(packed) = &row[0] else {
            panic!("expected numeric, got {:?}", row[0]);
        };
        assert_eq!((packed.precision, packed.scale, packed.sign), (5, 2, 1));
        assert_eq!(&packed.val[..2], &12345u16.to_le_bytes());
        assert_eq!(driver.desc_writes().len(), 4);
    }

    #[test]
    fn test_null_resolves_through_describe_param() {
        let driver = MockDriver::new();
        driver.describe_param_as(2, SqlType::INTEGER, 10, 0);
        let (_bound, infos) = bind(&driver, &[HostValue::Null, HostValue::Null]).unwrap();
        assert_eq!(infos[0].sql_type, SqlType::VARCHAR);
        assert_eq!(infos[0].column_size, 1);
        assert_eq!(infos[1].sql_type, SqlType::INTEGER);
        assert_eq!(infos[1].column_size, 10);
        assert_eq!(execute(&driver), vec![Captured::Null, Captured::Null]);
    }

    #[test]
    fn test_deferred_string_gets_token_and_length() {
        let driver = MockDriver::new();
        let long = "x".repeat(5000);
        let (bound, infos) = bind(&driver, &[HostValue::Int(1), HostValue::Str(long)]).unwrap();
        assert!(infos[1].is_deferred);
        let param = bound.resolve_token(dae_token(0)).unwrap();
        assert_eq!(param.position, 2);
        assert_eq!(param.payload.len(), 10_000);
        assert!(bound.resolve_token(std::ptr::null_mut()).is_none());
        assert!(bound.resolve_token(dae_token(1)).is_none());
    }

    #[test]
    fn test_deferred_non_streamable_is_rejected() {
        let driver = MockDriver::new();
        let settings = EncodingSettings::default();
        let mut infos = vec![ParamInfo::input(CType::LONG, SqlType::INTEGER, 10, 0).deferred()];
        let err = bind_parameters(&driver, driver.stmt_handle(), &[HostValue::Int(1)], &mut infos, &settings)
            .unwrap_err();
        assert!(matches!(err, MarshalError::UnsupportedDeferredType { index: 1, .. }));
    }

    #[test]
    fn test_int_out_of_declared_range() {
        let driver = MockDriver::new();
        let settings = EncodingSettings::default();
        let mut infos = vec![ParamInfo::input(CType::SHORT, SqlType::SMALLINT, 5, 0)];
        let err = bind_parameters(&driver, driver.stmt_handle(), &[HostValue::Int(70_000)], &mut infos, &settings)
            .unwrap_err();
        assert!(matches!(err, MarshalError::Range(_)));
    }

    fn bind_declared(
        driver: &MockDriver,
        values: &[HostValue],
        sizes: &[Option<InputSize>],
    ) -> Result<BoundParameters> {
        let settings = EncodingSettings::default();
        let mut infos = ParamInfo::infer_all(values, &settings, sizes)?;
        bind_parameters(driver, driver.stmt_handle(), values, &mut infos, &settings)
    }

    fn declared(sql_type: SqlType, column_size: usize, decimal_digits: i16) -> Option<InputSize> {
        Some(InputSize {
            sql_type,
            column_size,
            decimal_digits,
        })
    }

    #[test]
    fn test_deferred_string_longer_than_declared_size() {
        let driver = MockDriver::new();
        let sizes = [declared(SqlType::WVARCHAR, 50, 0)];
        let err = bind_declared(&driver, &[HostValue::Str("x".repeat(5000))], &sizes).unwrap_err();
        assert!(matches!(
            err,
            MarshalError::DataTruncation { column: 1, row: 0, length: 5000, column_size: 50 }
        ));
        assert_eq!(driver.call_count("SQLBindParameter"), 0);
        assert_eq!(driver.free_stmt_options(), vec![FREE_RESET_PARAMS]);

        // counted in UTF-16 units, not payload bytes
        let sizes = [declared(SqlType::WLONGVARCHAR, 5000, 0)];
        let bound = bind_declared(&driver, &[HostValue::Str("x".repeat(5000))], &sizes).unwrap();
        assert_eq!(bound.deferred()[0].payload.len(), 10_000);
    }

    #[test]
    fn test_deferred_bytes_longer_than_declared_size() {
        let driver = MockDriver::new();
        let blob = HostValue::Bytes(vec![7; 9000]);
        let sizes = [None, declared(SqlType::VARBINARY, 8500, 0)];
        let err = bind_declared(&driver, &[HostValue::Int(1), blob.clone()], &sizes).unwrap_err();
        assert!(matches!(
            err,
            MarshalError::DataTruncation { column: 2, row: 0, length: 9000, column_size: 8500 }
        ));

        // 0 declares an unbounded long column
        let sizes = [None, declared(SqlType::LONGVARBINARY, 0, 0)];
        let bound = bind_declared(&driver, &[HostValue::Int(1), blob], &sizes).unwrap();
        assert!(bound.has_deferred());
    }

    #[test]
    fn test_decimal_with_more_digits_than_declared_scale() {
        let driver = MockDriver::new();
        let sizes = [declared(SqlType::DECIMAL, 10, 2)];
        let value = HostValue::Decimal(BigDecimal::from_str("1.234").unwrap());
        let err = bind_declared(&driver, std::slice::from_ref(&value), &sizes).unwrap_err();
        assert!(matches!(err, MarshalError::Range(_)), "{:?}", err);
        assert_eq!(driver.call_count("SQLBindParameter"), 0);
        assert!(driver.executions().is_empty());

        // trailing zeros beyond the scale carry no digits
        let exact = HostValue::Decimal(BigDecimal::from_str("1.230").unwrap());
        let _bound = bind_declared(&driver, &[exact], &sizes).unwrap();
        let row = execute(&driver);
        let Captured::Numeric(packed) = &row[0] else {
            panic!("expected numeric, got {:?}", row[0]);
        };
        assert_eq!((packed.precision, packed.scale), (10, 2));
        assert_eq!(&packed.val[..2], &123u16.to_le_bytes());
    }
}
