use crate::config::EncodingSettings;
use crate::error::Result;
use crate::protocol::encoding::encode;
use crate::protocol::numeric::NumericStruct;
use crate::protocol::param_value::HostValue;
use crate::protocol::types::{CType, SqlType};
use serde::{Deserialize, Serialize};

/// Strings longer than this are bound as LONG types and streamed.
pub const MAX_INLINE_STRING_LEN: usize = 4000;
/// Byte values longer than this are bound as VARBINARY and streamed.
pub const MAX_INLINE_BINARY_LEN: usize = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamDirection {
    Input,
    Output,
    InputOutput,
}

impl ParamDirection {
    /// `SQL_PARAM_INPUT` / `SQL_PARAM_OUTPUT` / `SQL_PARAM_INPUT_OUTPUT`
    pub fn as_raw(self) -> i16 {
        match self {
            ParamDirection::Input => 1,
            ParamDirection::InputOutput => 2,
            ParamDirection::Output => 4,
        }
    }
}

/// Bind description for one parameter position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamInfo {
    pub direction: ParamDirection,
    pub c_type: CType,
    pub sql_type: SqlType,
    pub column_size: usize,
    pub decimal_digits: i16,
    /// Value goes through `SQLPutData` instead of an inline buffer.
    pub is_deferred: bool,
}

/// Caller override for one position (`setinputsizes`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSize {
    pub sql_type: SqlType,
    pub column_size: usize,
    pub decimal_digits: i16,
}

impl ParamInfo {
    pub fn input(c_type: CType, sql_type: SqlType, column_size: usize, decimal_digits: i16) -> Self {
        Self {
            direction: ParamDirection::Input,
            c_type,
            sql_type,
            column_size,
            decimal_digits,
            is_deferred: false,
        }
    }

    pub fn deferred(mut self) -> Self {
        self.is_deferred = true;
        self
    }

    /// Derives the bind description for a host value.
    pub fn infer(value: &HostValue, settings: &EncodingSettings) -> Result<Self> {
        let info = match value {
            HostValue::Null => ParamInfo::input(CType::DEFAULT, SqlType::VARCHAR, 1, 0),
            HostValue::Bool(_) => ParamInfo::input(CType::BIT, SqlType::BIT, 1, 0),
            HostValue::Int(n) => infer_int(*n),
            HostValue::Float(_) => ParamInfo::input(CType::DOUBLE, SqlType::DOUBLE, 15, 0),
            HostValue::Decimal(d) => {
                let packed = NumericStruct::from_decimal(d)?;
                ParamInfo::input(
                    CType::NUMERIC,
                    SqlType::NUMERIC,
                    packed.precision as usize,
                    packed.scale as i16,
                )
            }
            HostValue::Str(s) => {
                let codec = settings.codec();
                let len = encode(s, codec).unit_len();
                let wide = codec.is_wide();
                let (sql_type, long_type) = if wide {
                    (SqlType::WVARCHAR, SqlType::WLONGVARCHAR)
                } else {
                    (SqlType::VARCHAR, SqlType::LONGVARCHAR)
                };
                if len > MAX_INLINE_STRING_LEN {
                    ParamInfo::input(codec.c_type, long_type, len, 0).deferred()
                } else {
                    ParamInfo::input(codec.c_type, sql_type, len.max(1), 0)
                }
            }
            HostValue::Bytes(b) => {
                if b.len() > MAX_INLINE_BINARY_LEN {
                    ParamInfo::input(CType::BINARY, SqlType::VARBINARY, b.len(), 0).deferred()
                } else {
                    ParamInfo::input(CType::BINARY, SqlType::BINARY, b.len().max(1), 0)
                }
            }
            HostValue::Date(_) => ParamInfo::input(CType::TYPE_DATE, SqlType::TYPE_DATE, 10, 0),
            HostValue::Time(_) => ParamInfo::input(CType::TYPE_TIME, SqlType::TYPE_TIME, 8, 0),
            HostValue::DateTime(_) => {
                ParamInfo::input(CType::TYPE_TIMESTAMP, SqlType::TYPE_TIMESTAMP, 26, 6)
            }
            HostValue::DateTimeOffset(_) => ParamInfo::input(
                CType::SS_TIMESTAMPOFFSET,
                SqlType::SS_TIMESTAMPOFFSET,
                34,
                7,
            ),
            HostValue::Uuid(_) => ParamInfo::input(CType::GUID, SqlType::GUID, 16, 0),
        };
        Ok(info)
    }

    pub fn with_input_size(mut self, size: &InputSize) -> Self {
        self.sql_type = size.sql_type;
        self.column_size = size.column_size;
        self.decimal_digits = size.decimal_digits;
        self
    }

    /// Infers one description per value and applies any overrides.
    pub fn infer_all(
        values: &[HostValue],
        settings: &EncodingSettings,
        input_sizes: &[Option<InputSize>],
    ) -> Result<Vec<ParamInfo>> {
        values
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let info = ParamInfo::infer(value, settings)?;
                Ok(match input_sizes.get(i).copied().flatten() {
                    Some(size) => info.with_input_size(&size),
                    None => info,
                })
            })
            .collect()
    }
}

fn infer_int(n: i64) -> ParamInfo {
    if (0..=255).contains(&n) {
        ParamInfo::input(CType::UTINYINT, SqlType::TINYINT, 3, 0)
    } else if i16::try_from(n).is_ok() {
        ParamInfo::input(CType::SHORT, SqlType::SMALLINT, 5, 0)
    } else if i32::try_from(n).is_ok() {
        ParamInfo::input(CType::LONG, SqlType::INTEGER, 10, 0)
    } else {
        ParamInfo::input(CType::SBIGINT, SqlType::BIGINT, 19, 0)
    }
}
