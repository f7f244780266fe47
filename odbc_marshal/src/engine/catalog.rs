//! Catalog function pass-throughs. Each one leaves a result set open on the
//! statement, fetched like any query.
//!
//! `None` arguments are passed as null pointers, which drivers read as "no
//! filter"; `Some("")` matches the empty string.

use crate::driver::{check_stmt, DriverApi, Handle, WideArg};
use crate::error::{MarshalError, Result};
use odbc_api::sys::SqlReturn;

/// `SQLStatistics` `Unique`
pub const INDEX_UNIQUE: u16 = 0;
pub const INDEX_ALL: u16 = 1;
/// `SQLStatistics` `Reserved`
pub const QUICK: u16 = 0;
pub const ENSURE: u16 = 1;

/// `SQLSpecialColumns` `IdentifierType`
pub const BEST_ROWID: u16 = 1;
pub const ROWVER: u16 = 2;
pub const SCOPE_CURROW: u16 = 0;
pub const SCOPE_TRANSACTION: u16 = 1;
pub const SCOPE_SESSION: u16 = 2;
pub const NO_NULLS: u16 = 0;
pub const NULLABLE: u16 = 1;

/// `SQL_ALL_TYPES` for `SQLGetTypeInfo`.
pub const ALL_TYPES: i16 = 0;

/// Catalog arguments as UTF-16, owned for the duration of one call.
struct WideArgs<const N: usize> {
    units: [Option<Vec<u16>>; N],
}

impl<const N: usize> WideArgs<N> {
    fn encode(args: [Option<&str>; N]) -> Result<Self> {
        let mut units: [Option<Vec<u16>>; N] = std::array::from_fn(|_| None);
        for (slot, arg) in units.iter_mut().zip(args) {
            if let Some(text) = arg {
                let encoded: Vec<u16> = text.encode_utf16().collect();
                if encoded.len() > i16::MAX as usize {
                    return Err(MarshalError::Validation(format!(
                        "catalog argument of {} characters is too long",
                        encoded.len()
                    )));
                }
                *slot = Some(encoded);
            }
        }
        Ok(Self { units })
    }

    fn args(&self) -> [WideArg; N] {
        std::array::from_fn(|i| WideArg::from_units(self.units[i].as_deref()))
    }
}

fn finish(driver: &dyn DriverApi, stmt: Handle, rc: SqlReturn, function: &'static str) -> Result<()> {
    check_stmt(driver, stmt, rc, function)?;
    log::debug!("{} opened a catalog result set", function);
    Ok(())
}

pub fn tables(
    driver: &dyn DriverApi,
    stmt: Handle,
    catalog: Option<&str>,
    schema: Option<&str>,
    table: Option<&str>,
    table_type: Option<&str>,
) -> Result<()> {
    let wide = WideArgs::encode([catalog, schema, table, table_type])?;
    let rc = unsafe { driver.tables(stmt, wide.args()) };
    finish(driver, stmt, rc, "SQLTablesW")
}

pub fn columns(
    driver: &dyn DriverApi,
    stmt: Handle,
    catalog: Option<&str>,
    schema: Option<&str>,
    table: Option<&str>,
    column: Option<&str>,
) -> Result<()> {
    let wide = WideArgs::encode([catalog, schema, table, column])?;
    let rc = unsafe { driver.columns(stmt, wide.args()) };
    finish(driver, stmt, rc, "SQLColumnsW")
}

pub fn primary_keys(
    driver: &dyn DriverApi,
    stmt: Handle,
    catalog: Option<&str>,
    schema: Option<&str>,
    table: &str,
) -> Result<()> {
    let wide = WideArgs::encode([catalog, schema, Some(table)])?;
    let rc = unsafe { driver.primary_keys(stmt, wide.args()) };
    finish(driver, stmt, rc, "SQLPrimaryKeysW")
}

/// Keys between a primary-key table and the tables referencing it. Either
/// side may be left `None`.
#[allow(clippy::too_many_arguments)]
pub fn foreign_keys(
    driver: &dyn DriverApi,
    stmt: Handle,
    pk_catalog: Option<&str>,
    pk_schema: Option<&str>,
    pk_table: Option<&str>,
    fk_catalog: Option<&str>,
    fk_schema: Option<&str>,
    fk_table: Option<&str>,
) -> Result<()> {
    if pk_table.is_none() && fk_table.is_none() {
        return Err(MarshalError::Validation(
            "foreign_keys needs a primary-key table, a foreign-key table, or both".to_string(),
        ));
    }
    let wide = WideArgs::encode([pk_catalog, pk_schema, pk_table, fk_catalog, fk_schema, fk_table])?;
    let rc = unsafe { driver.foreign_keys(stmt, wide.args()) };
    finish(driver, stmt, rc, "SQLForeignKeysW")
}

pub fn statistics(
    driver: &dyn DriverApi,
    stmt: Handle,
    catalog: Option<&str>,
    schema: Option<&str>,
    table: &str,
    unique_only: bool,
    quick: bool,
) -> Result<()> {
    let wide = WideArgs::encode([catalog, schema, Some(table)])?;
    let unique = if unique_only { INDEX_UNIQUE } else { INDEX_ALL };
    let reserved = if quick { QUICK } else { ENSURE };
    let rc = unsafe { driver.statistics(stmt, wide.args(), unique, reserved) };
    finish(driver, stmt, rc, "SQLStatisticsW")
}

pub fn procedures(
    driver: &dyn DriverApi,
    stmt: Handle,
    catalog: Option<&str>,
    schema: Option<&str>,
    procedure: Option<&str>,
) -> Result<()> {
    let wide = WideArgs::encode([catalog, schema, procedure])?;
    let rc = unsafe { driver.procedures(stmt, wide.args()) };
    finish(driver, stmt, rc, "SQLProceduresW")
}

#[allow(clippy::too_many_arguments)]
pub fn special_columns(
    driver: &dyn DriverApi,
    stmt: Handle,
    identifier_type: u16,
    catalog: Option<&str>,
    schema: Option<&str>,
    table: &str,
    scope: u16,
    nullable: u16,
) -> Result<()> {
    let wide = WideArgs::encode([catalog, schema, Some(table)])?;
    let rc = unsafe { driver.special_columns(stmt, identifier_type, wide.args(), scope, nullable) };
    finish(driver, stmt, rc, "SQLSpecialColumnsW")
}

/// `sql_type` of [`ALL_TYPES`] lists every type the data source supports.
pub fn type_info(driver: &dyn DriverApi, stmt: Handle, sql_type: i16) -> Result<()> {
    let rc = unsafe { driver.get_type_info(stmt, sql_type) };
    finish(driver, stmt, rc, "SQLGetTypeInfoW")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;

    #[test]
    fn test_tables_passes_null_for_missing_filters() {
        let driver = MockDriver::new();
        tables(&driver, driver.stmt_handle(), None, Some("dbo"), Some("orders%"), None).unwrap();
        let calls = driver.catalog_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "SQLTablesW");
        assert_eq!(
            calls[0].1,
            vec![None, Some("dbo".to_string()), Some("orders%".to_string()), None]
        );
    }

    #[test]
    fn test_statistics_flags() {
        let driver = MockDriver::new();
        statistics(&driver, driver.stmt_handle(), None, None, "orders", true, false).unwrap();
        let calls = driver.catalog_calls();
        assert_eq!(calls[0].1.last(), Some(&Some(INDEX_UNIQUE.to_string())));
    }

    #[test]
    fn test_foreign_keys_requires_a_table() {
        let driver = MockDriver::new();
        let err = foreign_keys(&driver, driver.stmt_handle(), None, None, None, None, None, None).unwrap_err();
        assert!(matches!(err, MarshalError::Validation(_)));
        assert!(driver.catalog_calls().is_empty());

        foreign_keys(&driver, driver.stmt_handle(), None, None, Some("customers"), None, None, None).unwrap();
        assert_eq!(driver.catalog_calls()[0].1.len(), 6);
    }

    #[test]
    fn test_non_ascii_names_round_trip() {
        let driver = MockDriver::new();
        columns(&driver, driver.stmt_handle(), None, None, Some("Bestellübersicht"), None).unwrap();
        assert_eq!(driver.catalog_calls()[0].1[2].as_deref(), Some("Bestellübersicht"));
    }

    #[test]
    fn test_type_info_and_failure() {
        let driver = MockDriver::new();
        type_info(&driver, driver.stmt_handle(), ALL_TYPES).unwrap();
        assert_eq!(driver.catalog_calls()[0].1, vec![Some("0".to_string())]);

        driver.fail_next("SQLProceduresW", SqlReturn::ERROR);
        driver.push_diagnostic("HYC00", 0, "Optional feature not implemented");
        let err = procedures(&driver, driver.stmt_handle(), None, None, None).unwrap_err();
        assert_eq!(err.sqlstate(), "HYC00");
    }
}
