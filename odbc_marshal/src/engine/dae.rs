//! Data-at-execution loop: answers each `SQL_NEED_DATA` with the deferred
//! value the driver's token points at, in fixed-size chunks.

use crate::driver::{check_stmt, DriverApi, Handle, Pointer};
use crate::engine::scalar_binding::{BoundParameters, DeferredParam};
use crate::error::{MarshalError, Result};
use odbc_api::sys::{Len, SqlReturn};
use std::ptr::null_mut;

/// Bytes per `SQLPutData` call, for every deferred type.
pub const DAE_CHUNK_SIZE: usize = 8192;

/// Drives `SQLParamData` / `SQLPutData` until the driver stops asking.
/// Returns the final `SQLParamData` code (success, info or no-data).
pub fn transmit(driver: &dyn DriverApi, stmt: Handle, bound: &BoundParameters) -> Result<SqlReturn> {
    loop {
        let mut token: Pointer = null_mut();
        let rc = unsafe { driver.param_data(stmt, &mut token) };
        if rc != SqlReturn::NEED_DATA {
            return check_stmt(driver, stmt, rc, "SQLParamData");
        }
        let param = bound.resolve_token(token).ok_or_else(|| {
            MarshalError::Internal(format!(
                "SQLParamData returned unknown token {:#x}",
                token as usize
            ))
        })?;
        send(driver, stmt, param)?;
    }
}

fn send(driver: &dyn DriverApi, stmt: Handle, param: &DeferredParam) -> Result<()> {
    log::debug!(
        "Streaming {} bytes for parameter {} ({})",
        param.payload.len(),
        param.position,
        param.c_type
    );
    if param.payload.is_empty() {
        let rc = unsafe { driver.put_data(stmt, param.payload.as_ptr() as Pointer, 0) };
        check_stmt(driver, stmt, rc, "SQLPutData")?;
        return Ok(());
    }
    // DAE_CHUNK_SIZE is even, so wide payloads never split a code unit
    for chunk in param.payload.chunks(DAE_CHUNK_SIZE) {
        let rc = unsafe { driver.put_data(stmt, chunk.as_ptr() as Pointer, chunk.len() as Len) };
        check_stmt(driver, stmt, rc, "SQLPutData")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncodingSettings;
    use crate::driver::mock::{Captured, MockDriver};
    use crate::engine::scalar_binding::bind_parameters;
    use crate::protocol::{CType, HostValue, ParamInfo, SqlType};

    fn stream_bytes(driver: &MockDriver, payload: Vec<u8>) -> Vec<u8> {
        let settings = EncodingSettings::default();
        let len = payload.len();
        let values = vec![HostValue::Bytes(payload)];
        let mut infos = vec![ParamInfo::input(CType::BINARY, SqlType::VARBINARY, len.max(1), 0).deferred()];
        let bound = bind_parameters(driver, driver.stmt_handle(), &values, &mut infos, &settings).unwrap();
        let rc = unsafe { driver.execute(driver.stmt_handle()) };
        assert_eq!(rc, SqlReturn::NEED_DATA);
        transmit(driver, driver.stmt_handle(), &bound).unwrap();
        match driver.last_execution().unwrap().rows.remove(0).remove(0) {
            Captured::Streamed(bytes) => bytes,
            other => panic!("expected streamed value, got {:?}", other),
        }
    }

    #[test]
    fn test_chunk_boundaries_reassemble_identically() {
        for len in [DAE_CHUNK_SIZE - 1, DAE_CHUNK_SIZE, DAE_CHUNK_SIZE + 1] {
            let driver = MockDriver::new();
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            assert_eq!(stream_bytes(&driver, payload.clone()), payload);
            let expected_calls = len.div_ceil(DAE_CHUNK_SIZE);
            assert_eq!(driver.put_data_calls().len(), expected_calls, "len {}", len);
        }
    }

    #[test]
    fn test_empty_value_sends_one_zero_length_chunk() {
        let driver = MockDriver::new();
        assert!(stream_bytes(&driver, Vec::new()).is_empty());
        assert_eq!(driver.put_data_calls(), vec![(1, 0)]);
    }

    #[test]
    fn test_put_data_failure_aborts() {
        let driver = MockDriver::new();
        let settings = EncodingSettings::default();
        let values = vec![HostValue::Bytes(vec![7u8; 20_000])];
        let mut infos = ParamInfo::infer_all(&values, &settings, &[]).unwrap();
        let bound = bind_parameters(&driver, driver.stmt_handle(), &values, &mut infos, &settings).unwrap();
        unsafe { driver.execute(driver.stmt_handle()) };
        driver.fail_next("SQLPutData", SqlReturn::ERROR);
        let err = transmit(&driver, driver.stmt_handle(), &bound).unwrap_err();
        assert_eq!(err.return_code(), Some(SqlReturn::ERROR));
        assert!(driver.executions().is_empty());
    }
}
