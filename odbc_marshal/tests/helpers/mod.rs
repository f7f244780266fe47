#![allow(dead_code)]

pub mod e2e;
pub mod env;

#[allow(unused_imports)]
pub use e2e::{connect_or_skip, cursor_or_skip};
#[allow(unused_imports)]
pub use env::get_test_dsn;

use odbc_marshal::driver::mock::MockDriver;
use odbc_marshal::{Cursor, StatementHandle};
use std::sync::Arc;

/// A cursor over a fresh mock driver.
#[allow(dead_code)]
pub fn mock_cursor() -> (Arc<MockDriver>, Cursor) {
    let mock = Arc::new(MockDriver::new());
    let stmt = StatementHandle::from_raw(mock.clone(), mock.stmt_handle());
    (mock, Cursor::new(stmt))
}
