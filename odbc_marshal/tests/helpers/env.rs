//! Environment lookups for tests that need a live data source.

use odbc_marshal::test_helpers::load_dotenv;

/// `ODBC_TEST_DSN`, read after loading `.env`. `None` when unset or empty.
pub fn get_test_dsn() -> Option<String> {
    load_dotenv();
    std::env::var("ODBC_TEST_DSN")
        .ok()
        .filter(|s| !s.trim().is_empty())
}
