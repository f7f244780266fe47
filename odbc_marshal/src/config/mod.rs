//! Per-cursor encoding settings, fetch tuning and the process-wide decimal
//! separator.

use crate::error::{MarshalError, Result};
use crate::protocol::{CType, SqlType};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

pub const DEFAULT_WIDE_ENCODING: &str = "utf-16le";
pub const DEFAULT_NARROW_ENCODING: &str = "utf-8";

/// Default ceiling on memory requested by one fetch-all batch (1 GiB).
pub const DEFAULT_FETCH_MEMORY_CEILING: usize = 1 << 30;
/// Columns declared larger than this are streamed cell by cell.
pub const DEFAULT_LOB_THRESHOLD: usize = 8000;
/// Working size substituted when a driver reports a column size of zero.
pub const DEFAULT_ZERO_SIZE_FALLBACK: usize = 4096;

static DECIMAL_SEPARATOR: AtomicU32 = AtomicU32::new('.' as u32);
static DECIMAL_SEPARATOR_WRITE: Mutex<()> = Mutex::new(());

/// Sets the separator used when rendering decimal text. Must be a single
/// printable, non-whitespace character.
pub fn set_decimal_separator(separator: &str) -> Result<()> {
    let mut chars = separator.chars();
    let (Some(ch), None) = (chars.next(), chars.next()) else {
        return Err(MarshalError::Validation(
            "Decimal separator must be a single character".to_string(),
        ));
    };
    if ch.is_whitespace() || ch.is_control() {
        return Err(MarshalError::Validation(format!(
            "Invalid decimal separator {:?}: whitespace and control characters are not allowed",
            ch
        )));
    }
    let _guard = DECIMAL_SEPARATOR_WRITE
        .lock()
        .map_err(|_| MarshalError::Internal("decimal separator lock poisoned".to_string()))?;
    DECIMAL_SEPARATOR.store(ch as u32, Ordering::Release);
    log::debug!("Decimal separator set to {:?}", ch);
    Ok(())
}

pub fn decimal_separator() -> char {
    char::from_u32(DECIMAL_SEPARATOR.load(Ordering::Acquire)).unwrap_or('.')
}

fn is_utf16_label(label: &str) -> bool {
    matches!(
        label.to_ascii_lowercase().replace('_', "-").as_str(),
        "utf-16le" | "utf-16be" | "utf-16" | "utf16" | "utf16le" | "utf16be"
    )
}

/// Canonical lower-case label, or `Unsupported encoding` for labels the
/// transcoder cannot resolve.
fn normalize_label(label: &str) -> Result<String> {
    let trimmed = label.trim();
    if is_utf16_label(trimmed) {
        let lower = trimmed.to_ascii_lowercase().replace('_', "-");
        return Ok(if lower.ends_with("be") {
            "utf-16be".to_string()
        } else {
            "utf-16le".to_string()
        });
    }
    Encoding::for_label(trimmed.as_bytes())
        .map(|enc| enc.name().to_ascii_lowercase())
        .ok_or_else(|| MarshalError::Validation(format!("Unsupported encoding: {}", label)))
}

fn validate_c_type(c_type: CType) -> Result<()> {
    if c_type != CType::CHAR && c_type != CType::WCHAR {
        return Err(MarshalError::Validation(format!(
            "Invalid ctype: {}. Must be SQL_CHAR (1) or SQL_WCHAR (-8)",
            c_type.0
        )));
    }
    Ok(())
}

fn default_c_type_for(label: &str) -> CType {
    if is_utf16_label(label) {
        CType::WCHAR
    } else {
        CType::CHAR
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextCodec {
    pub encoding: String,
    pub c_type: CType,
}

impl TextCodec {
    pub fn is_wide(&self) -> bool {
        self.c_type == CType::WCHAR
    }
}

/// How string parameters are encoded before binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingSettings {
    codec: TextCodec,
}

impl Default for EncodingSettings {
    fn default() -> Self {
        Self {
            codec: TextCodec {
                encoding: DEFAULT_WIDE_ENCODING.to_string(),
                c_type: CType::WCHAR,
            },
        }
    }
}

impl EncodingSettings {
    pub fn codec(&self) -> &TextCodec {
        &self.codec
    }

    pub fn set_encoding(&mut self, encoding: Option<&str>, c_type: Option<CType>) -> Result<()> {
        let label = normalize_label(encoding.unwrap_or(DEFAULT_WIDE_ENCODING))?;
        let c_type = c_type.unwrap_or_else(|| default_c_type_for(&label));
        validate_c_type(c_type)?;
        if c_type == CType::WCHAR && !is_utf16_label(&label) {
            return Err(MarshalError::Validation(
                "SQL_WCHAR only supports UTF-16 encodings".to_string(),
            ));
        }
        self.codec = TextCodec {
            encoding: label,
            c_type,
        };
        Ok(())
    }
}

/// How fetched text is decoded, keyed by the SQL type family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodingSettings {
    char: TextCodec,
    wchar: TextCodec,
    metadata: TextCodec,
}

impl Default for DecodingSettings {
    fn default() -> Self {
        Self {
            char: TextCodec {
                encoding: DEFAULT_NARROW_ENCODING.to_string(),
                c_type: CType::CHAR,
            },
            wchar: TextCodec {
                encoding: DEFAULT_WIDE_ENCODING.to_string(),
                c_type: CType::WCHAR,
            },
            metadata: TextCodec {
                encoding: DEFAULT_WIDE_ENCODING.to_string(),
                c_type: CType::WCHAR,
            },
        }
    }
}

impl DecodingSettings {
    /// Settings for `SQL_CHAR`, `SQL_WCHAR` or `SQL_WMETADATA`.
    pub fn get(&self, sql_type: SqlType) -> Result<&TextCodec> {
        match sql_type {
            SqlType::CHAR => Ok(&self.char),
            SqlType::WCHAR => Ok(&self.wchar),
            SqlType::WMETADATA => Ok(&self.metadata),
            other => Err(MarshalError::Validation(format!(
                "Invalid sqltype: {}. Must be SQL_CHAR, SQL_WCHAR or SQL_WMETADATA",
                other.0
            ))),
        }
    }

    /// Codec for a fetched column of `sql_type`.
    pub fn for_column(&self, sql_type: SqlType) -> &TextCodec {
        if sql_type.is_wide_char() {
            &self.wchar
        } else {
            &self.char
        }
    }

    pub fn metadata(&self) -> &TextCodec {
        &self.metadata
    }

    pub fn set_decoding(
        &mut self,
        sql_type: SqlType,
        encoding: Option<&str>,
        c_type: Option<CType>,
    ) -> Result<()> {
        let default = if sql_type == SqlType::CHAR {
            DEFAULT_NARROW_ENCODING
        } else {
            DEFAULT_WIDE_ENCODING
        };
        let label = normalize_label(encoding.unwrap_or(default))?;
        if sql_type == SqlType::WCHAR && !is_utf16_label(&label) {
            return Err(MarshalError::Validation(
                "SQL_WCHAR only supports UTF-16 encodings".to_string(),
            ));
        }
        let c_type = c_type.unwrap_or_else(|| default_c_type_for(&label));
        validate_c_type(c_type)?;
        if c_type == CType::WCHAR && !is_utf16_label(&label) {
            return Err(MarshalError::Validation(
                "SQL_WCHAR ctype only supports UTF-16 encodings".to_string(),
            ));
        }
        let codec = TextCodec {
            encoding: label,
            c_type,
        };
        match sql_type {
            SqlType::CHAR => self.char = codec,
            SqlType::WCHAR => self.wchar = codec,
            SqlType::WMETADATA => self.metadata = codec,
            other => {
                return Err(MarshalError::Validation(format!(
                    "Invalid sqltype: {}. Must be SQL_CHAR, SQL_WCHAR or SQL_WMETADATA",
                    other.0
                )))
            }
        }
        Ok(())
    }
}

/// Fetch engine tuning. Defaults follow the documented constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOptions {
    pub memory_ceiling: usize,
    pub lob_threshold: usize,
    pub zero_size_fallback: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            memory_ceiling: DEFAULT_FETCH_MEMORY_CEILING,
            lob_threshold: DEFAULT_LOB_THRESHOLD,
            zero_size_fallback: DEFAULT_ZERO_SIZE_FALLBACK,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_decimal_separator_set_and_reset() {
        set_decimal_separator(",").unwrap();
        assert_eq!(decimal_separator(), ',');
        set_decimal_separator(".").unwrap();
        assert_eq!(decimal_separator(), '.');
    }

    #[test]
    #[serial]
    fn test_decimal_separator_rejects_invalid() {
        for bad in ["", "..", " ", "\t", "\u{7}"] {
            assert!(set_decimal_separator(bad).is_err(), "{:?} accepted", bad);
        }
        assert_eq!(decimal_separator(), '.');
    }

    #[test]
    fn test_encoding_defaults() {
        let settings = EncodingSettings::default();
        assert_eq!(settings.codec().encoding, "utf-16le");
        assert_eq!(settings.codec().c_type, CType::WCHAR);
    }

    #[test]
    fn test_encoding_c_type_follows_label() {
        let mut settings = EncodingSettings::default();
        settings.set_encoding(Some("utf-8"), None).unwrap();
        assert_eq!(settings.codec().c_type, CType::CHAR);
        settings.set_encoding(Some("latin1"), None).unwrap();
        assert_eq!(settings.codec().encoding, "windows-1252");
        settings.set_encoding(Some("utf-16be"), None).unwrap();
        assert_eq!(settings.codec().c_type, CType::WCHAR);
        settings.set_encoding(None, None).unwrap();
        assert_eq!(settings.codec(), EncodingSettings::default().codec());
    }

    #[test]
    fn test_encoding_invalid_combinations() {
        let mut settings = EncodingSettings::default();
        let err = settings
            .set_encoding(Some("utf-8"), Some(CType::WCHAR))
            .unwrap_err();
        assert!(err.to_string().contains("SQL_WCHAR only supports UTF-16 encodings"));
        let err = settings
            .set_encoding(Some("invalid-encoding-name"), None)
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported encoding: invalid-encoding-name"));
        let err = settings
            .set_encoding(Some("utf-8"), Some(CType(999)))
            .unwrap_err();
        assert!(err.to_string().contains("Invalid ctype: 999"));
    }

    #[test]
    fn test_utf16_with_char_override_allowed() {
        let mut settings = EncodingSettings::default();
        settings
            .set_encoding(Some("utf-16le"), Some(CType::CHAR))
            .unwrap();
        assert_eq!(settings.codec().c_type, CType::CHAR);
    }

    #[test]
    fn test_decoding_rules() {
        let mut settings = DecodingSettings::default();
        assert!(settings
            .set_decoding(SqlType::WCHAR, Some("utf-8"), None)
            .is_err());
        settings
            .set_decoding(SqlType::WMETADATA, Some("utf-8"), None)
            .unwrap();
        assert_eq!(settings.metadata().encoding, "utf-8");
        let err = settings
            .set_decoding(SqlType::CHAR, Some("utf-8"), Some(CType::WCHAR))
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("SQL_WCHAR ctype only supports UTF-16 encodings"));
        assert!(settings.get(SqlType::INTEGER).is_err());
    }

    #[test]
    fn test_for_column_picks_family() {
        let settings = DecodingSettings::default();
        assert_eq!(settings.for_column(SqlType::WVARCHAR).c_type, CType::WCHAR);
        assert_eq!(settings.for_column(SqlType::VARCHAR).encoding, "utf-8");
    }
}
