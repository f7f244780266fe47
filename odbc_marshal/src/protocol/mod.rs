pub mod arena;
pub mod encoding;
pub mod guid;
pub mod indicator;
pub mod numeric;
pub mod param_info;
pub mod param_value;
pub mod row_buffer;
pub mod temporal;
pub mod types;

pub use arena::BufferArena;
pub use encoding::EncodedText;
pub use guid::SqlGuid;
pub use indicator::Indicator;
pub use numeric::{render_decimal, NumericStruct, MAX_NUMERIC_PRECISION};
pub use param_info::{InputSize, ParamDirection, ParamInfo};
pub use param_value::HostValue;
pub use row_buffer::{ColumnMap, ColumnMetadata, DescriptionTuple, Row};
pub use temporal::DateTimeOffsetStruct;
pub use types::{fetch_c_type, BufferShape, CType, SqlType};
