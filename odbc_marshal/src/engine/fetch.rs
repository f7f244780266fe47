//! Row retrieval: single rows through `SQLGetData`, batches through
//! column-wise bound arrays.
//!
//! A result set with any LOB column is read row by row in full; bound and
//! unbound columns are never mixed in one batch. Batch state (array size,
//! rows-fetched pointer, column bindings) is cleared before the buffers it
//! points at are released.

use crate::config::FetchOptions;
use crate::driver::{
    check_stmt, set_stmt_usize, DriverApi, FetchOrientation, Handle, Pointer, ATTR_APP_ROW_DESC,
    ATTR_ROWS_FETCHED_PTR, ATTR_ROW_ARRAY_SIZE, ATTR_ROW_BIND_TYPE, BIND_BY_COLUMN, FREE_UNBIND,
    IS_POINTER, LOCK_NO_CHANGE, POSITION,
};
use crate::engine::cell_reader::{BoundCell, ColumnReader};
use crate::engine::descriptor::write_numeric_fields;
use crate::error::Result;
use crate::observability::StructuredLogger;
use crate::protocol::{CType, HostValue, Row};
use log::Level;
use odbc_api::sys::{Len, SqlReturn, ULen};

/// Batch sizes `fetch_all` picks from, largest first.
pub const BATCH_LADDER: [usize; 4] = [1000, 100, 10, 1];

/// Largest ladder step whose buffers fit under `ceiling`. A single row
/// wider than the ceiling still fetches one row at a time.
pub fn choose_batch_size(row_bytes: usize, ceiling: usize) -> usize {
    let fits = ceiling.checked_div(row_bytes).unwrap_or(usize::MAX);
    BATCH_LADDER
        .iter()
        .copied()
        .find(|&rows| rows <= fits)
        .unwrap_or(1)
}

/// Worst-case bound bytes for one row of `readers`.
pub fn row_bytes(readers: &[ColumnReader]) -> Result<usize> {
    readers.iter().map(ColumnReader::bound_len).sum()
}

pub fn has_lob(readers: &[ColumnReader]) -> bool {
    readers.iter().any(|r| r.lob)
}

fn read_current_row(driver: &dyn DriverApi, stmt: Handle, readers: &[ColumnReader]) -> Result<Row> {
    readers
        .iter()
        .map(|reader| reader.read(driver, stmt))
        .collect::<Result<Vec<HostValue>>>()
        .map(Row::new)
}

/// Advances one row and reads it with `SQLGetData`. `None` once the result
/// set is exhausted.
pub fn fetch_one(driver: &dyn DriverApi, stmt: Handle, readers: &[ColumnReader]) -> Result<Option<Row>> {
    fetch_scroll(driver, stmt, readers, FetchOrientation::Next, 0)
}

/// Scrolls the cursor and reads the row it lands on.
pub fn fetch_scroll(
    driver: &dyn DriverApi,
    stmt: Handle,
    readers: &[ColumnReader],
    orientation: FetchOrientation,
    offset: Len,
) -> Result<Option<Row>> {
    let rc = unsafe { driver.fetch_scroll(stmt, orientation.as_raw(), offset) };
    if rc == SqlReturn::NO_DATA {
        return Ok(None);
    }
    check_stmt(driver, stmt, rc, "SQLFetchScroll")?;
    read_current_row(driver, stmt, readers).map(Some)
}

/// Up to `count` rows.
pub fn fetch_many(
    driver: &dyn DriverApi,
    stmt: Handle,
    readers: &[ColumnReader],
    count: usize,
    options: &FetchOptions,
) -> Result<Vec<Row>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    if readers.is_empty() || has_lob(readers) {
        return fetch_rows_unbound(driver, stmt, readers, Some(count));
    }
    let fits = options
        .memory_ceiling
        .checked_div(row_bytes(readers)?)
        .unwrap_or(usize::MAX)
        .max(1);
    fetch_bound(driver, stmt, readers, count.min(fits), Some(count))
}

/// Every remaining row, in batches sized from the memory ceiling.
pub fn fetch_all(
    driver: &dyn DriverApi,
    stmt: Handle,
    readers: &[ColumnReader],
    options: &FetchOptions,
) -> Result<Vec<Row>> {
    if readers.is_empty() || has_lob(readers) {
        return fetch_rows_unbound(driver, stmt, readers, None);
    }
    let per_row = row_bytes(readers)?;
    let batch = choose_batch_size(per_row, options.memory_ceiling);
    log::debug!(
        "fetch_all: {} bytes per row, {} byte ceiling, batch of {}",
        per_row,
        options.memory_ceiling,
        batch
    );
    fetch_bound(driver, stmt, readers, batch, None)
}

fn fetch_rows_unbound(
    driver: &dyn DriverApi,
    stmt: Handle,
    readers: &[ColumnReader],
    limit: Option<usize>,
) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    while limit.map_or(true, |n| rows.len() < n) {
        match fetch_one(driver, stmt, readers)? {
            Some(row) => rows.push(row),
            None => break,
        }
    }
    StructuredLogger::default().log_fetch(Level::Debug, rows.len(), 1);
    Ok(rows)
}

/// One bound column. Backed by `u64` words so the driver writes fixed-size
/// C structs to an 8-byte aligned base.
struct ColumnSlots {
    slot_len: usize,
    words: Vec<u64>,
    indicators: Vec<Len>,
}

impl ColumnSlots {
    fn new(slot_len: usize, capacity: usize) -> Self {
        let bytes = slot_len * capacity;
        Self {
            slot_len,
            words: vec![0u64; bytes.div_ceil(8)],
            indicators: vec![0; capacity],
        }
    }

    fn byte_len(&self) -> usize {
        self.words.len() * 8
    }

    fn as_mut_ptr(&mut self) -> Pointer {
        self.words.as_mut_ptr() as Pointer
    }

    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.words.as_ptr() as *const u8, self.byte_len()) }
    }

    fn slot(&self, row: usize) -> &[u8] {
        let start = row * self.slot_len;
        &self.bytes()[start..start + self.slot_len]
    }
}

/// Buffers of one bound batch. Allocated once at full capacity; never
/// resized while bound.
struct BoundBatch {
    capacity: usize,
    columns: Vec<ColumnSlots>,
    rows_fetched: Box<ULen>,
}

impl BoundBatch {
    fn allocate(readers: &[ColumnReader], capacity: usize) -> Result<Self> {
        let columns = readers
            .iter()
            .map(|reader| {
                Ok(ColumnSlots::new(reader.slot_len()?, capacity))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            capacity,
            columns,
            rows_fetched: Box::new(0),
        })
    }

    fn allocated_bytes(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.byte_len() + c.indicators.len() * std::mem::size_of::<Len>())
            .sum()
    }

    fn bind(&mut self, driver: &dyn DriverApi, stmt: Handle, readers: &[ColumnReader]) -> Result<()> {
        set_stmt_usize(driver, stmt, ATTR_ROW_BIND_TYPE, BIND_BY_COLUMN, "SQLSetStmtAttr(SQL_ATTR_ROW_BIND_TYPE)")?;
        set_stmt_usize(driver, stmt, ATTR_ROW_ARRAY_SIZE, self.capacity, "SQLSetStmtAttr(SQL_ATTR_ROW_ARRAY_SIZE)")?;
        let fetched: *mut ULen = &mut *self.rows_fetched;
        let rc = unsafe { driver.set_stmt_attr(stmt, ATTR_ROWS_FETCHED_PTR, fetched as Pointer, IS_POINTER) };
        check_stmt(driver, stmt, rc, "SQLSetStmtAttr(SQL_ATTR_ROWS_FETCHED_PTR)")?;

        for (reader, slots) in readers.iter().zip(self.columns.iter_mut()) {
            let data = slots.as_mut_ptr();
            let rc = unsafe {
                driver.bind_col(
                    stmt,
                    reader.column,
                    reader.c_type.0,
                    data,
                    slots.slot_len as Len,
                    slots.indicators.as_mut_ptr(),
                )
            };
            check_stmt(driver, stmt, rc, "SQLBindCol")?;
            if reader.c_type == CType::NUMERIC {
                write_numeric_fields(
                    driver,
                    stmt,
                    ATTR_APP_ROW_DESC,
                    reader.column,
                    reader.precision,
                    reader.scale,
                    data,
                )?;
            }
        }
        log::debug!(
            "Bound {} columns x {} rows ({} bytes)",
            readers.len(),
            self.capacity,
            self.allocated_bytes()
        );
        Ok(())
    }

    /// Decodes the rows the last fetch wrote. Cells the slot cannot hold
    /// are re-read after positioning on their row.
    fn decode_rows(
        &self,
        driver: &dyn DriverApi,
        stmt: Handle,
        readers: &[ColumnReader],
        out: &mut Vec<Row>,
    ) -> Result<usize> {
        let fetched = (*self.rows_fetched as usize).min(self.capacity);
        for row in 0..fetched {
            let mut values = Vec::with_capacity(readers.len());
            let mut positioned = false;
            for (reader, slots) in readers.iter().zip(&self.columns) {
                match reader.decode_slot(slots.slot(row), slots.indicators[row])? {
                    BoundCell::Value(value) => values.push(value),
                    BoundCell::Stream => {
                        if !positioned {
                            let rc = unsafe { driver.set_pos(stmt, (row + 1) as ULen, POSITION, LOCK_NO_CHANGE) };
                            check_stmt(driver, stmt, rc, "SQLSetPos")?;
                            positioned = true;
                        }
                        log::debug!("Streaming column {} of batch row {}", reader.column, row);
                        values.push(reader.read(driver, stmt)?);
                    }
                }
            }
            out.push(Row::new(values));
        }
        Ok(fetched)
    }
}

fn fetch_bound(
    driver: &dyn DriverApi,
    stmt: Handle,
    readers: &[ColumnReader],
    capacity: usize,
    limit: Option<usize>,
) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    let mut holder: Option<BoundBatch> = None;
    let outcome = run_batches(driver, stmt, readers, capacity, limit, &mut holder, &mut rows);
    let reset = release(driver, stmt);
    drop(holder);
    outcome?;
    reset?;
    StructuredLogger::default().log_fetch(Level::Debug, rows.len(), capacity);
    Ok(rows)
}

fn run_batches(
    driver: &dyn DriverApi,
    stmt: Handle,
    readers: &[ColumnReader],
    capacity: usize,
    limit: Option<usize>,
    holder: &mut Option<BoundBatch>,
    rows: &mut Vec<Row>,
) -> Result<()> {
    let batch = holder.insert(BoundBatch::allocate(readers, capacity)?);
    batch.bind(driver, stmt, readers)?;
    let mut array_size = capacity;
    loop {
        if let Some(limit) = limit {
            let remaining = limit - rows.len();
            if remaining == 0 {
                break;
            }
            // never fetch past the requested count
            if remaining < array_size {
                array_size = remaining;
                set_stmt_usize(driver, stmt, ATTR_ROW_ARRAY_SIZE, array_size, "SQLSetStmtAttr(SQL_ATTR_ROW_ARRAY_SIZE)")?;
            }
        }
        *batch.rows_fetched = 0;
        let rc = unsafe { driver.fetch_scroll(stmt, FetchOrientation::Next.as_raw(), 0) };
        if rc == SqlReturn::NO_DATA {
            break;
        }
        check_stmt(driver, stmt, rc, "SQLFetchScroll")?;
        if batch.decode_rows(driver, stmt, readers, rows)? == 0 {
            break;
        }
    }
    Ok(())
}

/// Single-row defaults, nothing bound.
fn release(driver: &dyn DriverApi, stmt: Handle) -> Result<()> {
    let size = set_stmt_usize(driver, stmt, ATTR_ROW_ARRAY_SIZE, 1, "SQLSetStmtAttr(SQL_ATTR_ROW_ARRAY_SIZE)");
    let rc = unsafe { driver.set_stmt_attr(stmt, ATTR_ROWS_FETCHED_PTR, std::ptr::null_mut(), IS_POINTER) };
    let pointer = check_stmt(driver, stmt, rc, "SQLSetStmtAttr(SQL_ATTR_ROWS_FETCHED_PTR)");
    let rc = unsafe { driver.free_stmt(stmt, FREE_UNBIND) };
    let unbind = check_stmt(driver, stmt, rc, "SQLFreeStmt(SQL_UNBIND)");
    size?;
    pointer?;
    unbind?;
    Ok(())
}
