use odbc_api::sys::{Len, NO_TOTAL, NULL_DATA};

/// `SQL_DATA_AT_EXEC`: the value is supplied through `SQLPutData` after execute.
pub const DATA_AT_EXEC: Len = -2;
/// `SQL_NTS`: the buffer is null-terminated.
pub const NTS: Len = -3;

/// Driver-side length for a value of `len` bytes streamed at execution
/// (`SQL_LEN_DATA_AT_EXEC(len)`).
pub fn len_data_at_exec(len: usize) -> Len {
    const SQL_LEN_DATA_AT_EXEC_OFFSET: Len = -100;
    SQL_LEN_DATA_AT_EXEC_OFFSET - len as Len
}

/// Decoded meaning of one `SQLLEN` indicator cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    Null,
    /// Present with zero length (empty string / empty binary).
    Empty,
    /// Byte length the driver wrote or would have written.
    Length(usize),
    /// The driver cannot report the length; the value must be streamed.
    NoTotal,
}

impl Indicator {
    /// Every read site goes through this; negative values other than the two
    /// sentinels are treated as null.
    pub fn from_raw(raw: Len) -> Self {
        match raw {
            NULL_DATA => Indicator::Null,
            NO_TOTAL => Indicator::NoTotal,
            0 => Indicator::Empty,
            n if n > 0 => Indicator::Length(n as usize),
            other => {
                log::warn!("Unexpected indicator value {}; treating cell as NULL", other);
                Indicator::Null
            }
        }
    }

    pub fn to_raw(self) -> Len {
        match self {
            Indicator::Null => NULL_DATA,
            Indicator::NoTotal => NO_TOTAL,
            Indicator::Empty => 0,
            Indicator::Length(n) => n as Len,
        }
    }

    pub fn is_null(self) -> bool {
        matches!(self, Indicator::Null)
    }
}
