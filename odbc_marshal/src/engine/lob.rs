//! Chunked `SQLGetData` reads for columns too large, or too vaguely sized,
//! to bind.

use crate::config::TextCodec;
use crate::driver::{check_stmt, DriverApi, Handle, Pointer};
use crate::error::{MarshalError, Result};
use crate::protocol::encoding::{decode_narrow, decode_wide_bytes};
use crate::protocol::{CType, HostValue, Indicator};
use odbc_api::sys::{Len, SqlReturn};

/// Bytes requested per `SQLGetData` call.
pub const LOB_CHUNK_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobKind {
    Narrow,
    Wide,
    Binary,
}

impl LobKind {
    pub fn for_c_type(c_type: CType) -> Result<Self> {
        match c_type {
            CType::CHAR => Ok(LobKind::Narrow),
            CType::WCHAR => Ok(LobKind::Wide),
            CType::BINARY => Ok(LobKind::Binary),
            other => Err(MarshalError::UnsupportedType(format!(
                "{} cannot be streamed",
                other
            ))),
        }
    }

    /// Bytes the driver reserves for a terminator in every chunk.
    fn terminator(self) -> usize {
        match self {
            LobKind::Narrow => 1,
            LobKind::Wide => 2,
            LobKind::Binary => 0,
        }
    }
}

/// Reads the whole value of `column` on the current row. `None` when it is
/// NULL.
pub fn read_lob_bytes(
    driver: &dyn DriverApi,
    stmt: Handle,
    column: u16,
    c_type: CType,
) -> Result<Option<Vec<u8>>> {
    let kind = LobKind::for_c_type(c_type)?;
    let mut buffer = vec![0u8; LOB_CHUNK_SIZE];
    let capacity = LOB_CHUNK_SIZE - kind.terminator();
    let mut value = Vec::new();
    let mut chunks = 0usize;

    loop {
        let mut indicator: Len = 0;
        let rc = unsafe {
            driver.get_data(
                stmt,
                column,
                c_type.0,
                buffer.as_mut_ptr() as Pointer,
                buffer.len() as Len,
                &mut indicator,
            )
        };
        if rc == SqlReturn::NO_DATA {
            break;
        }
        let rc = check_stmt(driver, stmt, rc, "SQLGetData")?;
        let more = rc == SqlReturn::SUCCESS_WITH_INFO;
        let taken = match Indicator::from_raw(indicator) {
            Indicator::Null if chunks == 0 => return Ok(None),
            Indicator::Null | Indicator::Empty => break,
            Indicator::NoTotal => capacity,
            Indicator::Length(n) if more || n > capacity => capacity,
            Indicator::Length(n) => n,
        };
        chunks += 1;

        // the indicator is authoritative; embedded NULs are data
        let mut chunk = &buffer[..taken];
        if kind == LobKind::Wide && chunk.len() % 2 != 0 {
            log::warn!(
                "Column {} chunk has odd byte length {}; dropping trailing byte",
                column,
                chunk.len()
            );
            chunk = &chunk[..chunk.len() - 1];
        }
        value.extend_from_slice(chunk);
        if !more {
            break;
        }
    }

    if kind == LobKind::Wide {
        drop_unpaired_high_surrogate(&mut value, column);
    }
    log::trace!("Streamed {} bytes from column {} in {} chunks", value.len(), column, chunks);
    Ok(Some(value))
}

fn drop_unpaired_high_surrogate(bytes: &mut Vec<u8>, column: u16) {
    let len = bytes.len();
    if len < 2 {
        return;
    }
    let last = u16::from_le_bytes([bytes[len - 2], bytes[len - 1]]);
    if (0xD800..=0xDBFF).contains(&last) {
        log::warn!(
            "Column {} ends in unpaired high surrogate {:#06x}; dropping it",
            column,
            last
        );
        bytes.truncate(len - 2);
    }
}

/// Streams `column` and decodes it: bytes for binary data, text through
/// `codec` otherwise.
pub fn read_lob(
    driver: &dyn DriverApi,
    stmt: Handle,
    column: u16,
    c_type: CType,
    codec: &TextCodec,
) -> Result<HostValue> {
    let Some(bytes) = read_lob_bytes(driver, stmt, column, c_type)? else {
        return Ok(HostValue::Null);
    };
    Ok(match LobKind::for_c_type(c_type)? {
        LobKind::Binary => HostValue::Bytes(bytes),
        LobKind::Wide => HostValue::Str(decode_wide_bytes(&bytes)),
        LobKind::Narrow => HostValue::Str(decode_narrow(&bytes, &codec.encoding)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecodingSettings;
    use crate::driver::mock::{MockCell, MockColumn, MockDriver, MockResultSet};
    use crate::protocol::SqlType;

    fn positioned(cell: MockCell, sql_type: SqlType) -> MockDriver {
        let driver = MockDriver::new();
        driver.push_result(MockResultSet::new(vec![MockColumn::new("body", sql_type, 0)]).row(vec![cell]));
        let stmt = driver.stmt_handle();
        unsafe {
            driver.exec_direct(stmt, std::ptr::null(), 0);
            assert_eq!(driver.fetch(stmt), SqlReturn::SUCCESS);
        }
        driver
    }

    fn read(driver: &MockDriver, c_type: CType) -> HostValue {
        let decoding = DecodingSettings::default();
        let codec = if c_type == CType::WCHAR {
            decoding.for_column(SqlType::WVARCHAR)
        } else {
            decoding.for_column(SqlType::VARCHAR)
        };
        read_lob(driver, driver.stmt_handle(), 1, c_type, codec).unwrap()
    }

    #[test]
    fn test_narrow_text_reassembled_across_chunks() {
        let text: String = (0..20_000).map(|i| (b'a' + (i % 26) as u8) as char).collect();
        let driver = positioned(MockCell::value(text.as_str()), SqlType::VARCHAR);
        assert_eq!(read(&driver, CType::CHAR), HostValue::Str(text));
        // 8191 bytes per chunk
        assert_eq!(driver.get_data_calls(), 3);
    }

    #[test]
    fn test_surrogate_pair_split_between_chunks() {
        let mut text = "x".repeat(4094);
        text.push('😀');
        text.push_str(&"y".repeat(100));
        let driver = positioned(MockCell::value(text.as_str()), SqlType::WLONGVARCHAR);
        assert_eq!(read(&driver, CType::WCHAR), HostValue::Str(text));
    }

    #[test]
    fn test_trailing_unpaired_high_surrogate_dropped() {
        let mut units: Vec<u16> = "abc".encode_utf16().collect();
        units.push(0xD83D);
        let driver = positioned(MockCell::Wide(units), SqlType::WVARCHAR);
        assert_eq!(read(&driver, CType::WCHAR), HostValue::Str("abc".to_string()));
    }

    #[test]
    fn test_null_short_circuits() {
        let driver = positioned(MockCell::null(), SqlType::VARCHAR);
        assert_eq!(read(&driver, CType::CHAR), HostValue::Null);
        assert_eq!(driver.get_data_calls(), 1);
    }

    #[test]
    fn test_empty_text_is_present() {
        let driver = positioned(MockCell::value(""), SqlType::VARCHAR);
        assert_eq!(read(&driver, CType::CHAR), HostValue::Str(String::new()));
    }

    #[test]
    fn test_no_total_indicator_streams_until_final_chunk() {
        let text = "é".repeat(9000);
        let driver = positioned(MockCell::NoTotal(HostValue::Str(text.clone())), SqlType::WLONGVARCHAR);
        assert_eq!(read(&driver, CType::WCHAR), HostValue::Str(text));
    }

    #[test]
    fn test_binary_keeps_trailing_zeros() {
        let mut bytes = vec![0xABu8; LOB_CHUNK_SIZE + 10];
        bytes.extend_from_slice(&[0, 0, 0]);
        let driver = positioned(MockCell::value(HostValue::Bytes(bytes.clone())), SqlType::LONGVARBINARY);
        assert_eq!(read(&driver, CType::BINARY), HostValue::Bytes(bytes));
    }

    #[test]
    fn test_trailing_nuls_in_text_are_kept() {
        let driver = positioned(MockCell::value("ab\0\0"), SqlType::VARCHAR);
        assert_eq!(read(&driver, CType::CHAR), HostValue::Str("ab\0\0".to_string()));

        let driver = positioned(MockCell::value("ab\0\0"), SqlType::WVARCHAR);
        assert_eq!(read(&driver, CType::WCHAR), HostValue::Str("ab\0\0".to_string()));
    }

    #[test]
    fn test_nuls_at_chunk_boundary_are_kept() {
        let capacity = LOB_CHUNK_SIZE - 1;
        let mut text = "a".repeat(capacity - 2);
        text.push_str("\0\0");
        text.push_str(&"b".repeat(10));
        let driver = positioned(MockCell::value(text.as_str()), SqlType::LONGVARCHAR);
        assert_eq!(read(&driver, CType::CHAR), HostValue::Str(text));
        assert_eq!(driver.get_data_calls(), 2);

        let mut wide = "c".repeat(LOB_CHUNK_SIZE / 2 - 2);
        wide.push('\0');
        wide.push_str("dd");
        let driver = positioned(MockCell::value(wide.as_str()), SqlType::WLONGVARCHAR);
        assert_eq!(read(&driver, CType::WCHAR), HostValue::Str(wide));
    }

    #[test]
    fn test_fixed_types_cannot_stream() {
        assert!(matches!(
            LobKind::for_c_type(CType::LONG),
            Err(MarshalError::UnsupportedType(_))
        ));
    }
}
