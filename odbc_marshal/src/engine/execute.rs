//! Statement execution: direct, prepared with scalar parameters (plus the
//! DAE loop), and parameter sets bound as arrays.
//!
//! Whatever the outcome, parameters are reset before their buffers are
//! released, so no later execute can read a stale binding.

use crate::config::EncodingSettings;
use crate::driver::{check_stmt, set_stmt_usize, DriverApi, Handle, ATTR_PARAMSET_SIZE};
use crate::engine::core::{validate_columns, ArrayBinding, BoundArrays};
use crate::engine::dae;
use crate::engine::scalar_binding::{bind_parameters, reset_parameters, BoundParameters};
use crate::error::{MarshalError, Result};
use crate::observability::StructuredLogger;
use crate::protocol::{HostValue, InputSize, ParamInfo};
use log::Level;
use odbc_api::sys::{Len, SqlReturn};
use std::collections::BTreeMap;

fn wide_sql(sql: &str) -> Result<Vec<u16>> {
    let units: Vec<u16> = sql.encode_utf16().collect();
    if units.len() > i32::MAX as usize {
        return Err(MarshalError::Validation("SQL text too long".to_string()));
    }
    Ok(units)
}

fn log_statement(sql: &str, kind: &str, params: usize, rows: Option<usize>) {
    let mut metadata = BTreeMap::new();
    metadata.insert("kind", kind.to_string());
    metadata.insert("params", params.to_string());
    if let Some(rows) = rows {
        metadata.insert("rows", rows.to_string());
    }
    StructuredLogger::default().log_statement(Level::Debug, sql, &metadata);
}

pub fn exec_direct(driver: &dyn DriverApi, stmt: Handle, sql: &str) -> Result<SqlReturn> {
    let units = wide_sql(sql)?;
    let rc = unsafe { driver.exec_direct(stmt, units.as_ptr(), units.len() as i32) };
    check_stmt(driver, stmt, rc, "SQLExecDirectW")
}

pub fn prepare(driver: &dyn DriverApi, stmt: Handle, sql: &str) -> Result<()> {
    let units = wide_sql(sql)?;
    let rc = unsafe { driver.prepare(stmt, units.as_ptr(), units.len() as i32) };
    check_stmt(driver, stmt, rc, "SQLPrepareW").map(|_| ())
}

/// `SQLRowCount`; `-1` when the driver cannot tell.
pub fn row_count(driver: &dyn DriverApi, stmt: Handle) -> Result<Len> {
    let mut count: Len = -1;
    let rc = unsafe { driver.row_count(stmt, &mut count) };
    check_stmt(driver, stmt, rc, "SQLRowCount")?;
    Ok(count)
}

/// Runs `sql` once. Without parameters it goes through `SQLExecDirectW`;
/// otherwise it is prepared, bound and executed, streaming deferred values
/// when the driver asks. `NO_DATA` (nothing affected) is a success.
pub fn execute(
    driver: &dyn DriverApi,
    stmt: Handle,
    sql: &str,
    params: &[HostValue],
    encoding: &EncodingSettings,
    input_sizes: &[Option<InputSize>],
) -> Result<SqlReturn> {
    log_statement(sql, "execute", params.len(), None);
    if params.is_empty() {
        return exec_direct(driver, stmt, sql);
    }
    prepare(driver, stmt, sql)?;
    execute_prepared(driver, stmt, params, encoding, input_sizes)
}

fn execute_prepared(
    driver: &dyn DriverApi,
    stmt: Handle,
    params: &[HostValue],
    encoding: &EncodingSettings,
    input_sizes: &[Option<InputSize>],
) -> Result<SqlReturn> {
    let mut infos = ParamInfo::infer_all(params, encoding, input_sizes)?;
    let bound = bind_parameters(driver, stmt, params, &mut infos, encoding)?;
    let outcome = run_bound(driver, stmt, &bound);
    let reset = reset_parameters(driver, stmt);
    drop(bound);
    let rc = outcome?;
    reset?;
    Ok(rc)
}

fn run_bound(driver: &dyn DriverApi, stmt: Handle, bound: &BoundParameters) -> Result<SqlReturn> {
    let rc = unsafe { driver.execute(stmt) };
    let rc = check_stmt(driver, stmt, rc, "SQLExecute")?;
    if rc == SqlReturn::NEED_DATA {
        return dae::transmit(driver, stmt, bound);
    }
    Ok(rc)
}

/// Executes `sql` once per row of a column-wise parameter set and returns
/// the summed row count (`-1` when the driver reported none).
///
/// Without deferred values the whole set is bound as arrays and runs in
/// one `SQLExecute`. A set holding any value that must be streamed runs
/// row by row instead.
pub fn execute_many(
    driver: &dyn DriverApi,
    stmt: Handle,
    sql: &str,
    columns: &[Vec<HostValue>],
    encoding: &EncodingSettings,
    input_sizes: &[Option<InputSize>],
) -> Result<Len> {
    let n_rows = validate_columns(columns)?;
    log_statement(sql, "execute_many", columns.len(), Some(n_rows));
    if n_rows == 0 {
        return Ok(0);
    }
    prepare(driver, stmt, sql)?;

    let binding = ArrayBinding::new(encoding).with_input_sizes(input_sizes);
    let infos = binding.plan(columns)?;
    if infos.iter().any(|info| info.is_deferred) {
        log::debug!("Parameter set holds streamed values; executing {} rows one by one", n_rows);
        return execute_rows(driver, stmt, columns, n_rows, encoding, input_sizes);
    }
    let arrays = binding.build(columns, infos)?;

    let mut holder: Option<BoundArrays> = None;
    let outcome = run_array(driver, stmt, &binding, arrays, &mut holder);
    let cleanup = restore_single_row(driver, stmt);
    drop(holder);
    let affected = outcome?;
    cleanup?;
    log::debug!("Parameter array of {} rows affected {} rows", n_rows, affected);
    Ok(affected)
}

fn run_array(
    driver: &dyn DriverApi,
    stmt: Handle,
    binding: &ArrayBinding<'_>,
    arrays: Vec<crate::engine::core::ColumnArray>,
    holder: &mut Option<BoundArrays>,
) -> Result<Len> {
    holder.replace(binding.bind(driver, stmt, arrays)?);
    let rc = unsafe { driver.execute(stmt) };
    check_stmt(driver, stmt, rc, "SQLExecute")?;
    row_count(driver, stmt)
}

/// Back to one parameter set with nothing bound.
fn restore_single_row(driver: &dyn DriverApi, stmt: Handle) -> Result<()> {
    let reset = reset_parameters(driver, stmt);
    set_stmt_usize(driver, stmt, ATTR_PARAMSET_SIZE, 1, "SQLSetStmtAttr(SQL_ATTR_PARAMSET_SIZE)")?;
    reset
}

fn execute_rows(
    driver: &dyn DriverApi,
    stmt: Handle,
    columns: &[Vec<HostValue>],
    n_rows: usize,
    encoding: &EncodingSettings,
    input_sizes: &[Option<InputSize>],
) -> Result<Len> {
    let mut total: Option<Len> = None;
    for row in 0..n_rows {
        let values: Vec<HostValue> = columns.iter().map(|col| col[row].clone()).collect();
        let mut infos = ParamInfo::infer_all(&values, encoding, input_sizes)?;
        let bound = bind_parameters(driver, stmt, &values, &mut infos, encoding).map_err(|e| match e {
            MarshalError::DataTruncation {
                column,
                length,
                column_size,
                ..
            } => MarshalError::DataTruncation {
                column,
                row,
                length,
                column_size,
            },
            other => other,
        })?;
        let outcome = run_bound(driver, stmt, &bound).and_then(|_| row_count(driver, stmt));
        let reset = reset_parameters(driver, stmt);
        drop(bound);
        let count = outcome?;
        reset?;
        if count >= 0 {
            total = Some(total.unwrap_or(0) + count);
        }
    }
    Ok(total.unwrap_or(-1))
}

/// Turns row-wise parameter sets into the column-wise layout `execute_many`
/// takes. Every row must have the same length.
pub fn transpose_rows(rows: &[Vec<HostValue>]) -> Result<Vec<Vec<HostValue>>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let width = first.len();
    let mut columns: Vec<Vec<HostValue>> = (0..width).map(|_| Vec::with_capacity(rows.len())).collect();
    for (i, row) in rows.iter().enumerate() {
        if row.len() != width {
            return Err(MarshalError::Validation(format!(
                "row {} has {} parameters, expected {}",
                i,
                row.len(),
                width
            )));
        }
        for (col, value) in columns.iter_mut().zip(row) {
            col.push(value.clone());
        }
    }
    Ok(columns)
}
