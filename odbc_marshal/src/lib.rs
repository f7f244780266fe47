//! Parameter binding and bound-column fetch over the ODBC C ABI.
//!
//! Host values ([`HostValue`]) are marshaled into driver buffers for
//! execution, singly, as column-wise arrays, or streamed at execution time,
//! and result sets are decoded back without per-row allocation of bound
//! storage. Every driver call goes through a [`driver::DriverApi`] table.

pub mod config;
pub mod driver;
pub mod engine;
mod error;
pub mod handles;
pub mod observability;
pub mod pool;
pub mod protocol;

pub use config::{set_decimal_separator, DecodingSettings, EncodingSettings, FetchOptions, TextCodec};
pub use driver::{default_driver, DiagnosticRecord, DriverApi, FetchOrientation};
pub use engine::Cursor;
pub use error::{ErrorCategory, MarshalError, Result};
pub use handles::{Connection, Environment, StatementHandle};
pub use pool::{disable_pooling, enable_pooling, PoolingConfig};
pub use protocol::{ColumnMap, ColumnMetadata, CType, HostValue, InputSize, Row, SqlType};

/// Diagnostic records queued on `handle`, most relevant first.
pub fn get_diagnostics(driver: &dyn DriverApi, handle_type: i16, handle: driver::Handle) -> Vec<DiagnosticRecord> {
    driver::get_diagnostics(driver, handle_type, handle)
}

#[cfg(feature = "test-helpers")]
pub mod test_helpers {
    /// Loads `.env` from the working directory or a parent, if present.
    pub fn load_dotenv() {
        if let Err(e) = dotenvy::dotenv() {
            log::debug!("No .env loaded: {}", e);
        }
    }
}
