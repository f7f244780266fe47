//! [`Cursor`]: one statement handle plus the settings and result-set state
//! the execute and fetch paths need.

use crate::config::{DecodingSettings, EncodingSettings, FetchOptions};
use crate::driver::{
    check_stmt, get_diagnostics, DiagnosticRecord, DriverApi, FetchOrientation, Handle, Pointer,
    FREE_CLOSE, FREE_UNBIND, HANDLE_STMT, IS_UINTEGER,
};
use crate::engine::cell_reader::ColumnReader;
use crate::engine::{catalog, descriptor, execute, fetch};
use crate::error::{MarshalError, Result};
use crate::handles::{Connection, StatementHandle};
use crate::observability::StructuredLogger;
use crate::protocol::{ColumnMap, ColumnMetadata, DescriptionTuple, HostValue, InputSize, Row};
use odbc_api::sys::{Len, SqlReturn};
use std::collections::BTreeMap;
use std::sync::Arc;

fn log_failure(operation: &str, error: &MarshalError) {
    let mut metadata = BTreeMap::new();
    metadata.insert("operation", operation.to_string());
    metadata.insert("sqlstate", error.sqlstate());
    StructuredLogger::default().log_error(error, &metadata);
}

pub struct Cursor {
    stmt: StatementHandle,
    encoding: EncodingSettings,
    decoding: DecodingSettings,
    options: FetchOptions,
    input_sizes: Vec<Option<InputSize>>,
    columns: Vec<ColumnMetadata>,
    column_map: Arc<ColumnMap>,
    readers: Option<Vec<ColumnReader>>,
    row_count: Len,
}

impl Cursor {
    pub fn new(stmt: StatementHandle) -> Self {
        Self {
            stmt,
            encoding: EncodingSettings::default(),
            decoding: DecodingSettings::default(),
            options: FetchOptions::default(),
            input_sizes: Vec::new(),
            columns: Vec::new(),
            column_map: Arc::default(),
            readers: None,
            row_count: -1,
        }
    }

    /// Allocates a statement on `conn`.
    pub fn open(conn: &Arc<Connection>) -> Result<Self> {
        Ok(Self::new(StatementHandle::allocate(conn)?))
    }

    pub fn with_encoding(mut self, encoding: EncodingSettings) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_decoding(mut self, decoding: DecodingSettings) -> Self {
        self.decoding = decoding;
        self
    }

    pub fn with_fetch_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn encoding_mut(&mut self) -> &mut EncodingSettings {
        &mut self.encoding
    }

    pub fn decoding_mut(&mut self) -> &mut DecodingSettings {
        self.readers = None;
        &mut self.decoding
    }

    /// Declared SQL types and sizes for the next executes, by position.
    /// `None` entries keep inference.
    pub fn set_input_sizes(&mut self, sizes: Vec<Option<InputSize>>) {
        self.input_sizes = sizes;
    }

    pub fn handle(&self) -> Handle {
        self.stmt.handle()
    }

    fn driver(&self) -> &dyn DriverApi {
        self.stmt.driver().as_ref()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.stmt.is_freed() {
            return Err(MarshalError::Validation("statement handle has been freed".to_string()));
        }
        Ok(())
    }

    // --- execution ---

    pub fn execute(&mut self, sql: &str, params: &[HostValue]) -> Result<()> {
        self.ensure_open()?;
        self.close_cursor()?;
        execute::execute(
            self.driver(),
            self.handle(),
            sql,
            params,
            &self.encoding,
            &self.input_sizes,
        )
        .inspect_err(|e| log_failure("execute", e))?;
        self.row_count = execute::row_count(self.driver(), self.handle())?;
        self.refresh_description()
    }

    /// Runs `sql` for every row of a column-wise parameter set; see
    /// [`execute::transpose_rows`] for row-wise input.
    pub fn execute_many(&mut self, sql: &str, columns: &[Vec<HostValue>]) -> Result<Len> {
        self.ensure_open()?;
        self.close_cursor()?;
        let affected = execute::execute_many(
            self.driver(),
            self.handle(),
            sql,
            columns,
            &self.encoding,
            &self.input_sizes,
        )
        .inspect_err(|e| log_failure("execute_many", e))?;
        self.row_count = affected;
        self.columns.clear();
        self.readers = None;
        Ok(affected)
    }

    // --- fetch ---

    fn readers(&mut self) -> Result<&[ColumnReader]> {
        if self.columns.is_empty() {
            return Err(MarshalError::Validation("no result set is open".to_string()));
        }
        if self.readers.is_none() {
            self.readers = Some(ColumnReader::plan(&self.columns, &self.decoding, &self.options)?);
        }
        Ok(self.readers.as_deref().unwrap_or_default())
    }

    pub fn fetch_one(&mut self) -> Result<Option<Row>> {
        self.ensure_open()?;
        let (driver, stmt) = (self.stmt.driver().clone(), self.handle());
        let readers = self.readers()?;
        let row = fetch::fetch_one(driver.as_ref(), stmt, readers)?;
        Ok(row.map(|r| self.named(r)))
    }

    fn named(&self, row: Row) -> Row {
        row.with_columns(Arc::clone(&self.column_map))
    }

    fn named_all(&self, rows: Vec<Row>) -> Vec<Row> {
        rows.into_iter().map(|r| self.named(r)).collect()
    }

    pub fn fetch_many(&mut self, count: usize) -> Result<Vec<Row>> {
        self.ensure_open()?;
        let (driver, stmt, options) = (self.stmt.driver().clone(), self.handle(), self.options);
        let readers = self.readers()?;
        let rows = fetch::fetch_many(driver.as_ref(), stmt, readers, count, &options)?;
        Ok(self.named_all(rows))
    }

    pub fn fetch_all(&mut self) -> Result<Vec<Row>> {
        self.ensure_open()?;
        let (driver, stmt, options) = (self.stmt.driver().clone(), self.handle(), self.options);
        let readers = self.readers()?;
        let rows = fetch::fetch_all(driver.as_ref(), stmt, readers, &options)?;
        Ok(self.named_all(rows))
    }

    /// Needs a scrollable cursor for anything but `Next`.
    pub fn fetch_scroll(&mut self, orientation: FetchOrientation, offset: Len) -> Result<Option<Row>> {
        self.ensure_open()?;
        let (driver, stmt) = (self.stmt.driver().clone(), self.handle());
        let readers = self.readers()?;
        let row = fetch::fetch_scroll(driver.as_ref(), stmt, readers, orientation, offset)?;
        Ok(row.map(|r| self.named(r)))
    }

    // --- result sets and statement state ---

    pub fn describe(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    pub fn description(&self) -> Vec<DescriptionTuple> {
        self.columns.iter().map(ColumnMetadata::description).collect()
    }

    /// Rows affected by the last execute, `-1` when unknown.
    pub fn row_count(&self) -> Len {
        self.row_count
    }

    /// Moves to the next result set. `false` when there is none.
    pub fn next_set(&mut self) -> Result<bool> {
        self.ensure_open()?;
        let rc = unsafe { self.driver().more_results(self.handle()) };
        if rc == SqlReturn::NO_DATA {
            self.columns.clear();
            self.readers = None;
            return Ok(false);
        }
        check_stmt(self.driver(), self.handle(), rc, "SQLMoreResults")?;
        self.row_count = execute::row_count(self.driver(), self.handle())?;
        self.refresh_description()?;
        Ok(true)
    }

    pub fn set_stmt_attr(&self, attribute: i32, value: usize) -> Result<()> {
        self.ensure_open()?;
        let rc = unsafe {
            self.driver()
                .set_stmt_attr(self.handle(), attribute, value as Pointer, IS_UINTEGER)
        };
        check_stmt(self.driver(), self.handle(), rc, "SQLSetStmtAttrW").map(|_| ())
    }

    /// Closes the open cursor, if any, and unbinds columns.
    pub fn close(&mut self) -> Result<()> {
        if self.stmt.is_freed() {
            return Ok(());
        }
        self.close_cursor()?;
        let rc = unsafe { self.driver().free_stmt(self.handle(), FREE_UNBIND) };
        check_stmt(self.driver(), self.handle(), rc, "SQLFreeStmt(SQL_UNBIND)").map(|_| ())
    }

    fn close_cursor(&mut self) -> Result<()> {
        self.columns.clear();
        self.column_map = Arc::default();
        self.readers = None;
        let rc = unsafe { self.driver().free_stmt(self.handle(), FREE_CLOSE) };
        check_stmt(self.driver(), self.handle(), rc, "SQLFreeStmt(SQL_CLOSE)").map(|_| ())
    }

    /// Frees the statement handle. Later calls return an error.
    pub fn free(&mut self) -> Result<()> {
        self.columns.clear();
        self.readers = None;
        self.stmt.free()
    }

    /// Diagnostic records on the statement handle, e.g. after a failure.
    pub fn diagnostics(&self) -> Vec<DiagnosticRecord> {
        get_diagnostics(self.driver(), HANDLE_STMT, self.handle())
    }

    fn refresh_description(&mut self) -> Result<()> {
        self.columns = descriptor::describe_columns(self.driver(), self.handle(), &self.decoding)?;
        self.column_map = Arc::new(ColumnMap::new(&self.columns));
        self.readers = None;
        Ok(())
    }

    // --- catalog ---

    fn catalog_call<F>(&mut self, call: F) -> Result<()>
    where
        F: FnOnce(&dyn DriverApi, Handle) -> Result<()>,
    {
        self.ensure_open()?;
        self.close_cursor()?;
        call(self.driver(), self.handle())?;
        self.row_count = -1;
        self.refresh_description()
    }

    pub fn tables(
        &mut self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        table_type: Option<&str>,
    ) -> Result<()> {
        self.catalog_call(|d, s| catalog::tables(d, s, catalog, schema, table, table_type))
    }

    pub fn columns(
        &mut self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        column: Option<&str>,
    ) -> Result<()> {
        self.catalog_call(|d, s| catalog::columns(d, s, catalog, schema, table, column))
    }

    pub fn primary_keys(&mut self, catalog: Option<&str>, schema: Option<&str>, table: &str) -> Result<()> {
        self.catalog_call(|d, s| catalog::primary_keys(d, s, catalog, schema, table))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn foreign_keys(
        &mut self,
        pk_catalog: Option<&str>,
        pk_schema: Option<&str>,
        pk_table: Option<&str>,
        fk_catalog: Option<&str>,
        fk_schema: Option<&str>,
        fk_table: Option<&str>,
    ) -> Result<()> {
        self.catalog_call(|d, s| {
            catalog::foreign_keys(d, s, pk_catalog, pk_schema, pk_table, fk_catalog, fk_schema, fk_table)
        })
    }

    pub fn statistics(
        &mut self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
        unique: bool,
        quick: bool,
    ) -> Result<()> {
        self.catalog_call(|d, s| catalog::statistics(d, s, catalog, schema, table, unique, quick))
    }

    pub fn procedures(
        &mut self,
        catalog: Option<&str>,
        schema: Option<&str>,
        procedure: Option<&str>,
    ) -> Result<()> {
        self.catalog_call(|d, s| catalog::procedures(d, s, catalog, schema, procedure))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn special_columns(
        &mut self,
        identifier_type: u16,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
        scope: u16,
        nullable: u16,
    ) -> Result<()> {
        self.catalog_call(|d, s| {
            catalog::special_columns(d, s, identifier_type, catalog, schema, table, scope, nullable)
        })
    }

    pub fn type_info(&mut self, sql_type: i16) -> Result<()> {
        self.catalog_call(|d, s| catalog::type_info(d, s, sql_type))
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("handle", &self.stmt.handle())
            .field("columns", &self.columns.len())
            .field("row_count", &self.row_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{Captured, MockCell, MockColumn, MockDriver, MockResultSet};
    use crate::protocol::SqlType;

    fn cursor(mock: &Arc<MockDriver>) -> Cursor {
        Cursor::new(StatementHandle::from_raw(mock.clone(), mock.stmt_handle()))
    }

    fn numbers(n: i64) -> MockResultSet {
        MockResultSet::new(vec![MockColumn::new("n", SqlType::INTEGER, 10)])
            .rows((1..=n).map(|i| vec![MockCell::value(HostValue::Int(i))]))
    }

    #[test]
    fn test_execute_describe_and_fetch() {
        let mock = Arc::new(MockDriver::new());
        mock.push_result(numbers(3));
        let mut cur = cursor(&mock);
        cur.execute("SELECT n FROM t", &[]).unwrap();
        assert_eq!(cur.describe()[0].name, "n");
        assert_eq!(cur.row_count(), -1);
        assert_eq!(cur.fetch_one().unwrap().unwrap()[0], HostValue::Int(1));
        let rest = cur.fetch_all().unwrap();
        assert_eq!(rest.len(), 2);
        assert!(cur.fetch_one().unwrap().is_none());
    }

    #[test]
    fn test_dml_reports_row_count_without_result_set() {
        let mock = Arc::new(MockDriver::new());
        mock.push_result(MockResultSet::affected(7));
        let mut cur = cursor(&mock);
        cur.execute("UPDATE t SET x = 1", &[]).unwrap();
        assert_eq!(cur.row_count(), 7);
        assert!(cur.describe().is_empty());
        assert!(matches!(cur.fetch_all(), Err(MarshalError::Validation(_))));
    }

    #[test]
    fn test_next_set_rebuilds_description() {
        let mock = Arc::new(MockDriver::new());
        mock.push_results(vec![
            numbers(1),
            MockResultSet::new(vec![
                MockColumn::new("a", SqlType::VARCHAR, 5),
                MockColumn::new("b", SqlType::BIT, 1),
            ])
            .row(vec![MockCell::value("x"), MockCell::value(HostValue::Bool(true))]),
        ]);
        let mut cur = cursor(&mock);
        cur.execute("EXEC two_sets", &[]).unwrap();
        assert_eq!(cur.describe().len(), 1);
        assert!(cur.next_set().unwrap());
        assert_eq!(cur.describe().len(), 2);
        let rows = cur.fetch_all().unwrap();
        assert_eq!(rows[0].values(), &[HostValue::Str("x".into()), HostValue::Bool(true)]);
        assert!(!cur.next_set().unwrap());
        assert!(cur.describe().is_empty());
    }

    #[test]
    fn test_rows_share_one_column_map_per_result_set() {
        let mock = Arc::new(MockDriver::new());
        mock.push_results(vec![
            MockResultSet::new(vec![
                MockColumn::new("OrderId", SqlType::INTEGER, 10),
                MockColumn::new("note", SqlType::VARCHAR, 20),
            ])
            .row(vec![MockCell::value(HostValue::Int(1)), MockCell::value("first")])
            .row(vec![MockCell::value(HostValue::Int(2)), MockCell::value("second")]),
            MockResultSet::new(vec![MockColumn::new("total", SqlType::INTEGER, 10)])
                .row(vec![MockCell::value(HostValue::Int(3))]),
        ]);
        let mut cur = cursor(&mock);
        cur.execute("EXEC order_report", &[]).unwrap();
        let first = cur.fetch_one().unwrap().unwrap();
        let rest = cur.fetch_all().unwrap();
        assert_eq!(first.get_by_name("orderid"), Some(&HostValue::Int(1)));
        assert_eq!(rest[0].get_by_name("NOTE"), Some(&HostValue::Str("second".into())));
        assert!(Arc::ptr_eq(
            first.column_map().unwrap(),
            rest[0].column_map().unwrap()
        ));

        assert!(cur.next_set().unwrap());
        let total = cur.fetch_one().unwrap().unwrap();
        assert_eq!(total.get_by_name("total"), Some(&HostValue::Int(3)));
        assert_eq!(total.get_by_name("OrderId"), None);
        assert!(!Arc::ptr_eq(first.column_map().unwrap(), total.column_map().unwrap()));
    }

    #[test]
    fn test_execute_many_through_cursor() {
        let mock = Arc::new(MockDriver::new());
        let mut cur = cursor(&mock);
        let rows = vec![
            vec![HostValue::from("a"), HostValue::Int(1)],
            vec![HostValue::from("bb"), HostValue::Null],
        ];
        let columns = execute::transpose_rows(&rows).unwrap();
        assert_eq!(cur.execute_many("INSERT INTO p VALUES (?, ?)", &columns).unwrap(), 2);
        assert_eq!(cur.row_count(), 2);
        let exec = mock.last_execution().unwrap();
        assert_eq!(exec.rows[1][1], Captured::Null);
    }

    #[test]
    fn test_catalog_result_set_is_fetchable() {
        let mock = Arc::new(MockDriver::new());
        mock.push_result(
            MockResultSet::new(vec![
                MockColumn::new("TABLE_CAT", SqlType::WVARCHAR, 128),
                MockColumn::new("TABLE_NAME", SqlType::WVARCHAR, 128),
            ])
            .row(vec![MockCell::null(), MockCell::value("orders")]),
        );
        let mut cur = cursor(&mock);
        cur.tables(None, None, Some("orders"), Some("TABLE")).unwrap();
        assert_eq!(cur.describe()[1].name, "TABLE_NAME");
        let rows = cur.fetch_all().unwrap();
        assert_eq!(rows[0].values(), &[HostValue::Null, HostValue::Str("orders".into())]);
    }

    #[test]
    fn test_close_and_free() {
        let mock = Arc::new(MockDriver::new());
        mock.push_result(numbers(2));
        let mut cur = cursor(&mock);
        cur.execute("SELECT n FROM t", &[]).unwrap();
        cur.close().unwrap();
        assert!(cur.describe().is_empty());
        assert!(mock.free_stmt_options().ends_with(&[FREE_CLOSE, FREE_UNBIND]));
        cur.free().unwrap();
        assert!(matches!(cur.execute("SELECT 1", &[]), Err(MarshalError::Validation(_))));
        // close after free is a no-op
        cur.close().unwrap();
        drop(cur);
        assert_eq!(mock.call_count("SQLFreeHandle"), 1);
    }

    #[test]
    fn test_failure_diagnostics_are_readable() {
        let mock = Arc::new(MockDriver::new());
        mock.fail_next("SQLExecDirectW", SqlReturn::ERROR);
        mock.push_diagnostic("42S02", 208, "Invalid object name 'missing'.");
        let mut cur = cursor(&mock);
        let err = cur.execute("SELECT * FROM missing", &[]).unwrap_err();
        assert_eq!(err.native_code(), 208);
        assert!(err.to_string().contains("SQLExecDirectW"));
        assert!(cur.describe().is_empty());
    }

    #[test]
    fn test_description_tuples() {
        let mock = Arc::new(MockDriver::new());
        mock.push_result(MockResultSet::new(vec![MockColumn::new("price", SqlType::DECIMAL, 10).digits(2)]));
        let mut cur = cursor(&mock);
        cur.execute("SELECT price FROM p", &[]).unwrap();
        let d = cur.description();
        assert_eq!(d[0].0, "price");
        assert_eq!(d[0].1, SqlType::DECIMAL);
        assert_eq!(d[0].5, 2);
    }
}
