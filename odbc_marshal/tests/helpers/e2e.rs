//! Connectivity probe for E2E tests.

use super::env::get_test_dsn;
use odbc_marshal::{default_driver, Connection, Cursor, Environment};
use std::sync::Arc;

/// Connects to `ODBC_TEST_DSN`. Prints a skip note and returns `None` when no
/// DSN is configured or the driver manager cannot be loaded.
pub fn connect_or_skip(test: &str) -> Option<Arc<Connection>> {
    let Some(dsn) = get_test_dsn() else {
        eprintln!("[SKIP] {}: ODBC_TEST_DSN not set", test);
        return None;
    };
    let driver = match default_driver() {
        Ok(driver) => driver,
        Err(e) => {
            eprintln!("[SKIP] {}: {}", test, e);
            return None;
        }
    };
    let env = match Environment::new(driver) {
        Ok(env) => Arc::new(env),
        Err(e) => {
            eprintln!("[SKIP] {}: environment allocation failed: {}", test, e);
            return None;
        }
    };
    match Connection::connect(env, &dsn, &[]) {
        Ok(conn) => Some(Arc::new(conn)),
        Err(e) => {
            eprintln!("[SKIP] {}: connection failed: {}", test, e);
            None
        }
    }
}

#[allow(dead_code)]
pub fn cursor_or_skip(test: &str) -> Option<Cursor> {
    let conn = connect_or_skip(test)?;
    match Cursor::open(&conn) {
        Ok(cursor) => Some(cursor),
        Err(e) => {
            eprintln!("[SKIP] {}: statement allocation failed: {}", test, e);
            None
        }
    }
}
