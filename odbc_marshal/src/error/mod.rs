use crate::driver::DiagnosticRecord;
use crate::protocol::CType;
use odbc_api::sys::SqlReturn;
use thiserror::Error;

/// Error category for decision-making (retry, abort, fix input)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller supplied a value or setting the engine cannot marshal
    Validation,
    /// The driver returned a non-success code
    Driver,
    /// Programming or environment error; retrying will not help
    Fatal,
}

#[derive(Error, Debug, Clone)]
pub enum MarshalError {
    #[error(
        "Parameter's object type does not match parameter's C type. paramIndex - {index}, C type - {}",
        .c_type.name()
    )]
    ParameterTypeMismatch { index: usize, c_type: CType },

    #[error(
        "Data truncation: value of length {length} exceeds column size {column_size} (column {column}, row {row})"
    )]
    DataTruncation {
        column: usize,
        row: usize,
        length: usize,
        column_size: usize,
    },

    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Parameter {index} of type {type_name} cannot be streamed at execution time")]
    UnsupportedDeferredType { index: usize, type_name: String },

    #[error("{function} failed with return code {}{}", .code.0, diagnostic_suffix(.diagnostic))]
    DriverCallFailure {
        function: &'static str,
        code: SqlReturn,
        diagnostic: Option<DiagnosticRecord>,
    },

    #[error("Range error: {0}")]
    Range(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Driver manager could not be loaded: {0}")]
    DriverLoad(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn diagnostic_suffix(diagnostic: &Option<DiagnosticRecord>) -> String {
    match diagnostic {
        Some(record) => format!(": {}", record),
        None => String::new(),
    }
}

impl MarshalError {
    pub fn driver(function: &'static str, code: SqlReturn) -> Self {
        MarshalError::DriverCallFailure {
            function,
            code,
            diagnostic: None,
        }
    }

    /// SQLSTATE of the attached diagnostic, or `"00000"` when there is none.
    pub fn sqlstate(&self) -> String {
        match self {
            MarshalError::DriverCallFailure {
                diagnostic: Some(record),
                ..
            } => record.sqlstate.clone(),
            _ => "00000".to_string(),
        }
    }

    pub fn native_code(&self) -> i32 {
        match self {
            MarshalError::DriverCallFailure {
                diagnostic: Some(record),
                ..
            } => record.native_error,
            _ => 0,
        }
    }

    pub fn message(&self) -> String {
        match self {
            MarshalError::DriverCallFailure {
                diagnostic: Some(record),
                ..
            } => record.message.clone(),
            _ => self.to_string(),
        }
    }

    /// Raw driver return code preserved from the failing call.
    pub fn return_code(&self) -> Option<SqlReturn> {
        match self {
            MarshalError::DriverCallFailure { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if the error is transient and may be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            MarshalError::DriverCallFailure {
                diagnostic: Some(record),
                ..
            } => {
                // Connection (08xxx) and timeout (HYT00/HYT01) classes.
                record.sqlstate.starts_with("08") || record.sqlstate.starts_with("HYT")
            }
            _ => false,
        }
    }

    pub fn error_category(&self) -> ErrorCategory {
        match self {
            MarshalError::ParameterTypeMismatch { .. }
            | MarshalError::DataTruncation { .. }
            | MarshalError::Range(_)
            | MarshalError::Validation(_) => ErrorCategory::Validation,
            MarshalError::DriverCallFailure { .. } => ErrorCategory::Driver,
            MarshalError::UnsupportedType(_)
            | MarshalError::UnsupportedDeferredType { .. }
            | MarshalError::DriverLoad(_)
            | MarshalError::Internal(_) => ErrorCategory::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, MarshalError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn record(state: &str) -> DiagnosticRecord {
        DiagnosticRecord {
            sqlstate: state.to_string(),
            native_error: 2627,
            message: "Violation of PRIMARY KEY constraint".to_string(),
        }
    }

    #[test]
    fn test_type_mismatch_message_names_index_and_c_type() {
        let err = MarshalError::ParameterTypeMismatch {
            index: 2,
            c_type: CType::WCHAR,
        };
        assert_eq!(
            err.to_string(),
            "Parameter's object type does not match parameter's C type. paramIndex - 2, C type - SQL_C_WCHAR"
        );
        assert_eq!(err.error_category(), ErrorCategory::Validation);
    }

    #[test]
    fn test_truncation_message_names_column_and_row() {
        let err = MarshalError::DataTruncation {
            column: 1,
            row: 4,
            length: 12,
            column_size: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("column 1"));
        assert!(msg.contains("row 4"));
        assert!(msg.contains("12"));
    }

    #[test]
    fn test_driver_failure_without_diagnostic() {
        let err = MarshalError::driver("SQLExecute", SqlReturn::ERROR);
        assert_eq!(err.sqlstate(), "00000");
        assert_eq!(err.native_code(), 0);
        assert_eq!(err.return_code(), Some(SqlReturn::ERROR));
        assert_eq!(err.to_string(), "SQLExecute failed with return code -1");
        assert!(!err.is_retryable());
        assert_eq!(err.error_category(), ErrorCategory::Driver);
    }

    #[test]
    fn test_driver_failure_with_diagnostic() {
        let err = MarshalError::DriverCallFailure {
            function: "SQLExecute",
            code: SqlReturn::ERROR,
            diagnostic: Some(record("23000")),
        };
        assert_eq!(err.sqlstate(), "23000");
        assert_eq!(err.native_code(), 2627);
        assert_eq!(err.message(), "Violation of PRIMARY KEY constraint");
        assert!(err.to_string().contains("[23000]"));
    }

    #[test]
    fn test_is_retryable_connection_and_timeout() {
        for state in ["08S01", "08001", "HYT00"] {
            let err = MarshalError::DriverCallFailure {
                function: "SQLExecDirectW",
                code: SqlReturn::ERROR,
                diagnostic: Some(record(state)),
            };
            assert!(err.is_retryable(), "{} should be retryable", state);
        }
    }

    #[test]
    fn test_fatal_categories() {
        assert_eq!(
            MarshalError::UnsupportedType("SQL_INTERVAL".into()).error_category(),
            ErrorCategory::Fatal
        );
        assert_eq!(
            MarshalError::DriverLoad("libodbc.so.2".into()).error_category(),
            ErrorCategory::Fatal
        );
        assert_eq!(
            MarshalError::UnsupportedDeferredType {
                index: 1,
                type_name: "int".into()
            }
            .error_category(),
            ErrorCategory::Fatal
        );
    }
}
