use super::{DriverApi, Handle};
use odbc_api::sys::SqlReturn;
use serde::{Deserialize, Serialize};
use std::fmt;

const SQLSTATE_LEN: usize = 5;
const INITIAL_MESSAGE_LEN: usize = 1024;

/// One record from `SQLGetDiagRecW`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub sqlstate: String,
    pub native_error: i32,
    pub message: String,
}

impl fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (native error {})",
            self.sqlstate, self.message, self.native_error
        )
    }
}

/// Reads record `record` (1-based). Returns `None` when the driver has no
/// such record or the call itself fails.
pub fn get_diagnostic(
    driver: &dyn DriverApi,
    handle_type: i16,
    handle: Handle,
    record: i16,
) -> Option<DiagnosticRecord> {
    let mut state = [0u16; SQLSTATE_LEN + 1];
    let mut native_error = 0i32;
    let mut message = vec![0u16; INITIAL_MESSAGE_LEN];

    loop {
        let mut text_length = 0i16;
        let rc = unsafe {
            driver.get_diag_rec(
                handle_type,
                handle,
                record,
                state.as_mut_ptr(),
                &mut native_error,
                message.as_mut_ptr(),
                message.len() as i16,
                &mut text_length,
            )
        };
        if rc != SqlReturn::SUCCESS && rc != SqlReturn::SUCCESS_WITH_INFO {
            return None;
        }
        let needed = text_length.max(0) as usize;
        // message truncated; retry with room for the terminator
        if needed >= message.len() && message.len() < i16::MAX as usize {
            message = vec![0u16; (needed + 1).min(i16::MAX as usize)];
            continue;
        }
        let state_len = state.iter().position(|u| *u == 0).unwrap_or(SQLSTATE_LEN);
        let text_len = needed.min(message.len());
        return Some(DiagnosticRecord {
            sqlstate: String::from_utf16_lossy(&state[..state_len]),
            native_error,
            message: String::from_utf16_lossy(&message[..text_len]),
        });
    }
}

/// All records attached to `handle`, in driver order.
pub fn get_diagnostics(
    driver: &dyn DriverApi,
    handle_type: i16,
    handle: Handle,
) -> Vec<DiagnosticRecord> {
    let mut records = Vec::new();
    let mut record = 1i16;
    while let Some(diag) = get_diagnostic(driver, handle_type, handle, record) {
        records.push(diag);
        if record == i16::MAX {
            break;
        }
        record += 1;
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use crate::driver::HANDLE_STMT;

    #[test]
    fn test_display_carries_sqlstate() {
        let record = DiagnosticRecord {
            sqlstate: "23000".to_string(),
            native_error: 2627,
            message: "Violation of PRIMARY KEY constraint".to_string(),
        };
        let text = record.to_string();
        assert!(text.starts_with("[23000]"));
        assert!(text.contains("2627"));
    }

    #[test]
    fn test_reads_every_record() {
        let driver = MockDriver::new();
        driver.push_diagnostic("01000", 0, "first");
        driver.push_diagnostic("42S02", 208, "Invalid object name 'missing'.");
        let records = get_diagnostics(&driver, HANDLE_STMT, driver.stmt_handle());
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].sqlstate, "42S02");
        assert_eq!(records[1].native_error, 208);
        assert_eq!(records[1].message, "Invalid object name 'missing'.");
    }

    #[test]
    fn test_long_message_is_not_truncated() {
        let driver = MockDriver::new();
        let long = "x".repeat(3000);
        driver.push_diagnostic("HY000", 1, &long);
        let record = get_diagnostic(&driver, HANDLE_STMT, driver.stmt_handle(), 1).unwrap();
        assert_eq!(record.message.len(), 3000);
    }

    #[test]
    fn test_missing_record_is_none() {
        let driver = MockDriver::new();
        assert!(get_diagnostic(&driver, HANDLE_STMT, driver.stmt_handle(), 1).is_none());
    }
}
