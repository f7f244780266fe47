//! Scriptable in-memory driver for tests.
//!
//! Models a single statement. Bound parameter buffers are read back at
//! execute time and recorded as [`Execution`]s; scripted [`MockResultSet`]s
//! are served through bound row arrays or chunked `SQLGetData` calls.

use super::{
    DiagnosticRecord, DriverApi, Handle, Pointer, WideArg, ATTR_APP_PARAM_DESC, ATTR_APP_ROW_DESC,
    ATTR_PARAMSET_SIZE, ATTR_ROWS_FETCHED_PTR, ATTR_ROW_ARRAY_SIZE, DESC_DATA_PTR,
    DESC_PRECISION, DESC_SCALE, DESC_TYPE, FREE_CLOSE, FREE_RESET_PARAMS, FREE_UNBIND,
};
use crate::protocol::guid::SqlGuid;
use crate::protocol::indicator::{DATA_AT_EXEC, NTS};
use crate::protocol::numeric::NumericStruct;
use crate::protocol::temporal;
use crate::protocol::{CType, HostValue, SqlType};
use odbc_api::sys::{Date, Len, SqlReturn, Time, Timestamp, ULen, NO_TOTAL, NULL_DATA};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::mem::size_of;
use std::sync::{Mutex, MutexGuard, PoisonError};

const STMT_HANDLE: usize = 0x5000;
const APD_HANDLE: usize = 0xA000;
const ARD_HANDLE: usize = 0xA001;

/// One scripted result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCell {
    Value(HostValue),
    /// Raw UTF-16 units, for data a host string cannot hold (lone surrogates).
    Wide(Vec<u16>),
    /// Served like `Value`, but indicators report `SQL_NO_TOTAL` until the final chunk.
    NoTotal(HostValue),
}

impl MockCell {
    pub fn value(value: impl Into<HostValue>) -> Self {
        MockCell::Value(value.into())
    }

    pub fn null() -> Self {
        MockCell::Value(HostValue::Null)
    }

    fn host(&self) -> Option<&HostValue> {
        match self {
            MockCell::Value(v) | MockCell::NoTotal(v) => Some(v),
            MockCell::Wide(_) => None,
        }
    }
}

impl From<HostValue> for MockCell {
    fn from(value: HostValue) -> Self {
        MockCell::Value(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockColumn {
    pub name: String,
    pub sql_type: SqlType,
    pub column_size: usize,
    pub decimal_digits: i16,
    pub nullable: i16,
}

impl MockColumn {
    pub fn new(name: &str, sql_type: SqlType, column_size: usize) -> Self {
        Self {
            name: name.to_string(),
            sql_type,
            column_size,
            decimal_digits: 0,
            nullable: 1,
        }
    }

    pub fn digits(mut self, decimal_digits: i16) -> Self {
        self.decimal_digits = decimal_digits;
        self
    }
}

/// A result set, or with no columns the outcome of a DML statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockResultSet {
    pub columns: Vec<MockColumn>,
    pub rows: Vec<Vec<MockCell>>,
    pub affected_rows: Len,
}

impl MockResultSet {
    pub fn new(columns: Vec<MockColumn>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            affected_rows: -1,
        }
    }

    pub fn affected(rows: Len) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            affected_rows: rows,
        }
    }

    pub fn row(mut self, cells: Vec<MockCell>) -> Self {
        self.rows.push(cells);
        self
    }

    pub fn rows<I>(mut self, rows: I) -> Self
    where
        I: IntoIterator<Item = Vec<MockCell>>,
    {
        self.rows.extend(rows);
        self
    }
}

/// A parameter value as the driver saw it in the bound buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Captured {
    Null,
    Default,
    Char(Vec<u8>),
    WChar(Vec<u16>),
    Binary(Vec<u8>),
    Numeric(NumericStruct),
    Value(HostValue),
    /// Bytes received through `SQLPutData`.
    Streamed(Vec<u8>),
}

impl Captured {
    pub fn text(&self) -> Option<String> {
        match self {
            Captured::Char(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            Captured::WChar(units) => Some(String::from_utf16_lossy(units)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub sql: Option<String>,
    pub direct: bool,
    /// One entry per parameter set, values in parameter order.
    pub rows: Vec<Vec<Captured>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamBinding {
    pub number: u16,
    pub io_type: i16,
    pub c_type: CType,
    pub sql_type: SqlType,
    pub column_size: usize,
    pub decimal_digits: i16,
    pub buffer_length: Len,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescWrite {
    pub row_descriptor: bool,
    pub record: i16,
    pub field: i16,
    pub value: usize,
}

#[derive(Debug, Clone, Copy)]
struct BoundParam {
    binding: Option<(u16, i16, CType, SqlType)>,
    value: usize,
    buffer_length: Len,
    indicator: usize,
}

#[derive(Debug, Clone, Copy)]
struct BoundCol {
    c_type: CType,
    value: usize,
    buffer_length: Len,
    indicator: usize,
}

#[derive(Debug, Default)]
struct MockState {
    next_handle: usize,
    allocated: Vec<(i16, usize)>,
    freed: Vec<(i16, usize)>,
    env_attrs: Vec<(i32, usize)>,
    connect_attrs: Vec<(i32, usize)>,
    connection_string: Option<String>,
    connected: bool,
    calls: Vec<&'static str>,

    stmt_attrs: Vec<(i32, usize)>,
    paramset_size: usize,
    row_array_size: usize,
    rows_fetched_ptr: usize,
    free_stmt_options: Vec<u16>,

    prepared: Option<String>,
    params: BTreeMap<u16, BoundParam>,
    bind_history: Vec<ParamBinding>,
    desc_writes: Vec<DescWrite>,
    ard_fields: HashMap<u16, (CType, i16, i16)>,
    described_params: HashMap<u16, (SqlType, usize, i16)>,
    executions: Vec<Execution>,

    pending_dae: VecDeque<u16>,
    current_dae: Option<u16>,
    dae_data: BTreeMap<u16, Vec<u8>>,
    put_data_calls: Vec<(u16, Len)>,

    script: VecDeque<Vec<MockResultSet>>,
    remaining_sets: VecDeque<MockResultSet>,
    current: Option<MockResultSet>,
    rowset_start: Option<usize>,
    next_row: usize,
    current_row: Option<usize>,
    get_data_offsets: HashMap<u16, usize>,
    consumed: HashSet<u16>,
    cols: BTreeMap<u16, BoundCol>,
    row_count: Len,
    get_data_calls: usize,

    diagnostics: Vec<DiagnosticRecord>,
    failures: HashMap<&'static str, VecDeque<SqlReturn>>,
    catalog_calls: Vec<(&'static str, Vec<Option<String>>)>,
}

#[derive(Debug, Default)]
pub struct MockDriver {
    state: Mutex<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        let driver = Self::default();
        {
            let mut st = driver.lock();
            st.next_handle = 0x1000;
            st.paramset_size = 1;
            st.row_array_size = 1;
            st.row_count = -1;
        }
        driver
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle accepted by every statement-level call.
    pub fn stmt_handle(&self) -> Handle {
        STMT_HANDLE as Handle
    }

    /// Queues the result sets produced by the next execute or catalog call.
    pub fn push_results(&self, sets: Vec<MockResultSet>) {
        self.lock().script.push_back(sets);
    }

    pub fn push_result(&self, set: MockResultSet) {
        self.push_results(vec![set]);
    }

    pub fn push_diagnostic(&self, sqlstate: &str, native_error: i32, message: &str) {
        self.lock().diagnostics.push(DiagnosticRecord {
            sqlstate: sqlstate.to_string(),
            native_error,
            message: message.to_string(),
        });
    }

    /// The next call to `function` (e.g. `"SQLExecute"`) returns `rc`.
    pub fn fail_next(&self, function: &'static str, rc: SqlReturn) {
        self.lock()
            .failures
            .entry(function)
            .or_default()
            .push_back(rc);
    }

    /// Answer for `SQLDescribeParam` on `number`; unset positions fail.
    pub fn describe_param_as(&self, number: u16, sql_type: SqlType, size: usize, digits: i16) {
        self.lock()
            .described_params
            .insert(number, (sql_type, size, digits));
    }

    pub fn executions(&self) -> Vec<Execution> {
        self.lock().executions.clone()
    }

    pub fn last_execution(&self) -> Option<Execution> {
        self.lock().executions.last().cloned()
    }

    pub fn bindings(&self) -> Vec<ParamBinding> {
        self.lock().bind_history.clone()
    }

    pub fn desc_writes(&self) -> Vec<DescWrite> {
        self.lock().desc_writes.clone()
    }

    pub fn stmt_attrs(&self) -> Vec<(i32, usize)> {
        self.lock().stmt_attrs.clone()
    }

    pub fn row_array_size(&self) -> usize {
        self.lock().row_array_size
    }

    pub fn paramset_size(&self) -> usize {
        self.lock().paramset_size
    }

    pub fn rows_fetched_ptr_is_null(&self) -> bool {
        self.lock().rows_fetched_ptr == 0
    }

    pub fn put_data_calls(&self) -> Vec<(u16, Len)> {
        self.lock().put_data_calls.clone()
    }

    pub fn free_stmt_options(&self) -> Vec<u16> {
        self.lock().free_stmt_options.clone()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, function: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == function).count()
    }

    pub fn get_data_calls(&self) -> usize {
        self.lock().get_data_calls
    }

    pub fn catalog_calls(&self) -> Vec<(&'static str, Vec<Option<String>>)> {
        self.lock().catalog_calls.clone()
    }

    pub fn connection_string(&self) -> Option<String> {
        self.lock().connection_string.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn env_attrs(&self) -> Vec<(i32, usize)> {
        self.lock().env_attrs.clone()
    }

    pub fn connect_attrs(&self) -> Vec<(i32, usize)> {
        self.lock().connect_attrs.clone()
    }

    pub fn allocated_handles(&self) -> Vec<(i16, usize)> {
        self.lock().allocated.clone()
    }

    pub fn freed_handles(&self) -> Vec<(i16, usize)> {
        self.lock().freed.clone()
    }

    pub fn bound_column_count(&self) -> usize {
        self.lock().cols.len()
    }

    fn enter(&self, function: &'static str) -> (MutexGuard<'_, MockState>, Option<SqlReturn>) {
        let mut st = self.lock();
        st.calls.push(function);
        let injected = st.failures.get_mut(function).and_then(|q| q.pop_front());
        (st, injected)
    }
}

fn decode_wide_arg(ptr: *const u16, len: i32) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let units = unsafe {
        if len as Len == NTS {
            let mut n = 0;
            while *ptr.add(n) != 0 {
                n += 1;
            }
            std::slice::from_raw_parts(ptr, n)
        } else {
            std::slice::from_raw_parts(ptr, len.max(0) as usize)
        }
    };
    Some(String::from_utf16_lossy(units))
}

fn struct_bytes<T: Copy>(value: &T) -> Vec<u8> {
    unsafe { std::slice::from_raw_parts(value as *const T as *const u8, size_of::<T>()) }.to_vec()
}

unsafe fn read_struct<T: Copy>(base: usize, index: usize) -> T {
    std::ptr::read_unaligned((base as *const T).add(index))
}

fn is_deferred(indicator: Len) -> bool {
    indicator == DATA_AT_EXEC || indicator <= -100
}

impl MockState {
    fn desc_of(&self, number: u16) -> Option<(CType, i16, i16)> {
        self.ard_fields.get(&number).copied()
    }

    fn capture_rows(&self) -> Vec<Vec<Captured>> {
        let sets = self.paramset_size.max(1);
        (0..sets)
            .map(|row| {
                self.params
                    .iter()
                    .map(|(number, param)| self.capture(*number, param, row))
                    .collect()
            })
            .collect()
    }

    fn capture(&self, number: u16, param: &BoundParam, row: usize) -> Captured {
        let Some((_, _, c_type, _)) = param.binding else {
            return Captured::Null;
        };
        let indicator = if param.indicator == 0 {
            None
        } else {
            Some(unsafe { read_struct::<Len>(param.indicator, row) })
        };
        match indicator {
            Some(NULL_DATA) => return Captured::Null,
            Some(ind) if is_deferred(ind) => {
                return Captured::Streamed(self.dae_data.get(&number).cloned().unwrap_or_default())
            }
            _ => {}
        }
        let variable_len = |unit: usize| -> usize {
            match indicator {
                Some(NTS) | None => unsafe {
                    let base = (param.value + row * param.buffer_length as usize) as *const u8;
                    let mut n = 0;
                    while (0..unit).any(|k| *base.add(n + k) != 0) {
                        n += unit;
                    }
                    n
                },
                Some(len) => len.max(0) as usize,
            }
        };
        let slot = param.value + row * param.buffer_length.max(0) as usize;
        unsafe {
            match c_type {
                CType::CHAR => {
                    let len = variable_len(1);
                    Captured::Char(std::slice::from_raw_parts(slot as *const u8, len).to_vec())
                }
                CType::BINARY => {
                    let len = variable_len(1);
                    Captured::Binary(std::slice::from_raw_parts(slot as *const u8, len).to_vec())
                }
                CType::WCHAR => {
                    let len = variable_len(2) / 2;
                    let units = (0..len)
                        .map(|i| read_struct::<u16>(slot, i))
                        .collect();
                    Captured::WChar(units)
                }
                CType::BIT => Captured::Value(HostValue::Bool(read_struct::<u8>(param.value, row) != 0)),
                CType::UTINYINT => Captured::Value(HostValue::Int(read_struct::<u8>(param.value, row) as i64)),
                CType::TINYINT | CType::STINYINT => {
                    Captured::Value(HostValue::Int(read_struct::<i8>(param.value, row) as i64))
                }
                CType::SHORT | CType::SSHORT => {
                    Captured::Value(HostValue::Int(read_struct::<i16>(param.value, row) as i64))
                }
                CType::LONG | CType::SLONG => {
                    Captured::Value(HostValue::Int(read_struct::<i32>(param.value, row) as i64))
                }
                CType::SBIGINT => Captured::Value(HostValue::Int(read_struct::<i64>(param.value, row))),
                CType::FLOAT => {
                    Captured::Value(HostValue::Float(read_struct::<f32>(param.value, row) as f64))
                }
                CType::DOUBLE => Captured::Value(HostValue::Float(read_struct::<f64>(param.value, row))),
                CType::NUMERIC => Captured::Numeric(read_struct::<NumericStruct>(param.value, row)),
                CType::TYPE_DATE => Captured::Value(
                    temporal::date_from_sql(&read_struct::<Date>(param.value, row))
                        .map(HostValue::Date)
                        .unwrap_or(HostValue::Null),
                ),
                CType::TYPE_TIME => Captured::Value(
                    temporal::time_from_sql(&read_struct::<Time>(param.value, row))
                        .map(HostValue::Time)
                        .unwrap_or(HostValue::Null),
                ),
                CType::TYPE_TIMESTAMP => Captured::Value(
                    temporal::datetime_from_sql(&read_struct::<Timestamp>(param.value, row))
                        .map(HostValue::DateTime)
                        .unwrap_or(HostValue::Null),
                ),
                CType::SS_TIMESTAMPOFFSET => Captured::Value(
                    temporal::datetimeoffset_from_sql(&read_struct(param.value, row))
                        .map(HostValue::DateTimeOffset)
                        .unwrap_or(HostValue::Null),
                ),
                CType::GUID => {
                    let guid = read_struct::<SqlGuid>(param.value, row);
                    Captured::Value(HostValue::Uuid((&guid).into()))
                }
                _ => Captured::Default,
            }
        }
    }

    fn finish_execution(&mut self, sql: Option<String>, direct: bool, rows: Vec<Vec<Captured>>) {
        let sets = rows.len();
        self.executions.push(Execution { sql, direct, rows });
        self.remaining_sets = self.script.pop_front().unwrap_or_default().into();
        self.current = None;
        self.row_count = if self.params.is_empty() { -1 } else { sets as Len };
        self.advance_result();
    }

    fn open_catalog(&mut self, function: &'static str, args: Vec<Option<String>>) {
        self.catalog_calls.push((function, args));
        self.params.clear();
        self.finish_execution(None, true, Vec::new());
    }

    /// Makes the next scripted set current. Returns false when none is left.
    fn advance_result(&mut self) -> bool {
        self.rowset_start = None;
        self.next_row = 0;
        self.current_row = None;
        self.get_data_offsets.clear();
        self.consumed.clear();
        match self.remaining_sets.pop_front() {
            Some(set) => {
                if set.columns.is_empty() {
                    self.row_count = set.affected_rows;
                } else {
                    self.row_count = -1;
                }
                self.current = Some(set);
                true
            }
            None => {
                self.current = None;
                false
            }
        }
    }

    fn payload(&self, cell: &MockCell, c_type: CType, column: u16) -> Option<Payload> {
        if let MockCell::Wide(units) = cell {
            return match c_type {
                CType::WCHAR => Some(Payload::Variable {
                    bytes: units.iter().flat_map(|u| u.to_le_bytes()).collect(),
                    unit: 2,
                }),
                _ => None,
            };
        }
        let value = cell.host()?;
        let fixed = |bytes: Vec<u8>| Some(Payload::Fixed(bytes));
        match (value, c_type) {
            (HostValue::Str(s), CType::CHAR) => Some(Payload::Variable {
                bytes: s.as_bytes().to_vec(),
                unit: 1,
            }),
            (HostValue::Str(s), CType::WCHAR) => Some(Payload::Variable {
                bytes: s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect(),
                unit: 2,
            }),
            (HostValue::Bytes(b), CType::BINARY) => Some(Payload::Binary(b.clone())),
            (HostValue::Bytes(b), CType::CHAR) => Some(Payload::Variable {
                bytes: b.clone(),
                unit: 1,
            }),
            (HostValue::Bool(b), CType::BIT) => fixed(vec![*b as u8]),
            (HostValue::Int(n), CType::BIT | CType::UTINYINT) => fixed(vec![*n as u8]),
            (HostValue::Int(n), CType::STINYINT | CType::TINYINT) => fixed(vec![*n as i8 as u8]),
            (HostValue::Int(n), CType::SHORT | CType::SSHORT) => fixed((*n as i16).to_le_bytes().to_vec()),
            (HostValue::Int(n), CType::LONG | CType::SLONG) => fixed((*n as i32).to_le_bytes().to_vec()),
            (HostValue::Int(n), CType::SBIGINT) => fixed(n.to_le_bytes().to_vec()),
            (HostValue::Int(n), CType::DOUBLE) => fixed((*n as f64).to_le_bytes().to_vec()),
            (HostValue::Float(f), CType::DOUBLE) => fixed(f.to_le_bytes().to_vec()),
            (HostValue::Float(f), CType::FLOAT) => fixed((*f as f32).to_le_bytes().to_vec()),
            (HostValue::Decimal(d), CType::NUMERIC | CType::ARD_TYPE) => {
                let (precision, scale) = match self.desc_of(column) {
                    Some((_, p, s)) => (p, s),
                    None => (38, 0),
                };
                let rescaled = d.with_scale(scale as i64);
                let mut packed = NumericStruct::from_decimal(&rescaled).ok()?;
                packed.precision = precision as u8;
                packed.scale = scale as i8;
                fixed(struct_bytes(&packed))
            }
            (HostValue::Date(d), CType::TYPE_DATE) => fixed(struct_bytes(&temporal::date_to_sql(d).ok()?)),
            (HostValue::Time(t), CType::TYPE_TIME) => fixed(struct_bytes(&temporal::time_to_sql(t))),
            (HostValue::DateTime(dt), CType::TYPE_TIMESTAMP) => {
                fixed(struct_bytes(&temporal::datetime_to_sql(dt).ok()?))
            }
            (HostValue::DateTimeOffset(dt), CType::SS_TIMESTAMPOFFSET) => {
                fixed(struct_bytes(&temporal::datetimeoffset_to_sql(dt).ok()?))
            }
            (HostValue::Uuid(u), CType::GUID) => fixed(struct_bytes(&SqlGuid::from(u))),
            _ => None,
        }
    }

    fn resolve_c_type(&self, c_type: CType, column: u16) -> CType {
        if c_type == CType::ARD_TYPE {
            self.desc_of(column).map(|(t, _, _)| t).unwrap_or(CType::DEFAULT)
        } else {
            c_type
        }
    }

    fn cell(&self, row: usize, column: u16) -> Option<MockCell> {
        self.current
            .as_ref()?
            .rows
            .get(row)?
            .get(column as usize - 1)
            .cloned()
    }

    fn push_state_error(&mut self, sqlstate: &str, message: &str) -> SqlReturn {
        self.diagnostics.push(DiagnosticRecord {
            sqlstate: sqlstate.to_string(),
            native_error: 0,
            message: message.to_string(),
        });
        SqlReturn::ERROR
    }
}

enum Payload {
    Fixed(Vec<u8>),
    Variable { bytes: Vec<u8>, unit: usize },
    Binary(Vec<u8>),
}

/// Writes up to the buffer's capacity (less one terminator unit) and
/// returns the bytes written along with the total available.
unsafe fn write_variable(
    target: *mut u8,
    buffer_length: Len,
    data: &[u8],
    unit: usize,
    terminated: bool,
) -> usize {
    let buffer_length = buffer_length.max(0) as usize;
    let terminator = if terminated { unit } else { 0 };
    let capacity = buffer_length.saturating_sub(terminator) / unit * unit;
    let copied = data.len().min(capacity) / unit * unit;
    std::ptr::copy_nonoverlapping(data.as_ptr(), target, copied);
    if terminated && buffer_length >= copied + terminator {
        std::ptr::write_bytes(target.add(copied), 0, terminator);
    }
    copied
}

unsafe fn write_indicator(indicator: usize, index: usize, value: Len) {
    if indicator != 0 {
        std::ptr::write_unaligned((indicator as *mut Len).add(index), value);
    }
}

impl DriverApi for MockDriver {
    unsafe fn alloc_handle(&self, handle_type: i16, _input: Handle, output: *mut Handle) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLAllocHandle");
        if let Some(rc) = injected {
            return rc;
        }
        let id = if handle_type == super::HANDLE_STMT {
            STMT_HANDLE
        } else {
            st.next_handle += 1;
            st.next_handle
        };
        st.allocated.push((handle_type, id));
        *output = id as Handle;
        SqlReturn::SUCCESS
    }

    unsafe fn free_handle(&self, handle_type: i16, handle: Handle) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLFreeHandle");
        st.freed.push((handle_type, handle as usize));
        injected.unwrap_or(SqlReturn::SUCCESS)
    }

    unsafe fn set_env_attr(&self, _env: Handle, attribute: i32, value: Pointer, _len: i32) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLSetEnvAttr");
        if let Some(rc) = injected {
            return rc;
        }
        st.env_attrs.push((attribute, value as usize));
        SqlReturn::SUCCESS
    }

    unsafe fn set_connect_attr(&self, _dbc: Handle, attribute: i32, value: Pointer, _len: i32) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLSetConnectAttrW");
        if let Some(rc) = injected {
            return rc;
        }
        st.connect_attrs.push((attribute, value as usize));
        SqlReturn::SUCCESS
    }

    unsafe fn driver_connect(
        &self,
        _dbc: Handle,
        _window: Handle,
        in_connection_string: *const u16,
        in_length: i16,
        _out_connection_string: *mut u16,
        _out_buffer_length: i16,
        out_length: *mut i16,
        _completion: u16,
    ) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLDriverConnectW");
        if let Some(rc) = injected {
            return rc;
        }
        st.connection_string = decode_wide_arg(in_connection_string, in_length as i32);
        st.connected = true;
        if !out_length.is_null() {
            *out_length = 0;
        }
        SqlReturn::SUCCESS
    }

    unsafe fn disconnect(&self, _dbc: Handle) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLDisconnect");
        if let Some(rc) = injected {
            return rc;
        }
        st.connected = false;
        SqlReturn::SUCCESS
    }

    unsafe fn set_stmt_attr(&self, _stmt: Handle, attribute: i32, value: Pointer, _len: i32) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLSetStmtAttrW");
        if let Some(rc) = injected {
            return rc;
        }
        let raw = value as usize;
        st.stmt_attrs.push((attribute, raw));
        match attribute {
            ATTR_PARAMSET_SIZE => st.paramset_size = raw,
            ATTR_ROW_ARRAY_SIZE => st.row_array_size = raw,
            ATTR_ROWS_FETCHED_PTR => st.rows_fetched_ptr = raw,
            _ => {}
        }
        SqlReturn::SUCCESS
    }

    unsafe fn get_stmt_attr(
        &self,
        _stmt: Handle,
        attribute: i32,
        value: Pointer,
        _buffer_length: i32,
        _string_length: *mut i32,
    ) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLGetStmtAttrW");
        if let Some(rc) = injected {
            return rc;
        }
        let out = value as *mut Handle;
        match attribute {
            ATTR_APP_PARAM_DESC => *out = APD_HANDLE as Handle,
            ATTR_APP_ROW_DESC => *out = ARD_HANDLE as Handle,
            ATTR_PARAMSET_SIZE => *(value as *mut usize) = st.paramset_size,
            ATTR_ROW_ARRAY_SIZE => *(value as *mut usize) = st.row_array_size,
            _ => return st.push_state_error("HY092", "Invalid attribute identifier"),
        }
        SqlReturn::SUCCESS
    }

    unsafe fn set_desc_field(
        &self,
        desc: Handle,
        record: i16,
        field: i16,
        value: Pointer,
        _buffer_length: i32,
    ) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLSetDescFieldW");
        if let Some(rc) = injected {
            return rc;
        }
        let row_descriptor = desc as usize == ARD_HANDLE;
        let raw = value as usize;
        st.desc_writes.push(DescWrite {
            row_descriptor,
            record,
            field,
            value: raw,
        });
        let number = record as u16;
        if row_descriptor {
            let entry = st
                .ard_fields
                .entry(number)
                .or_insert((CType::DEFAULT, 0, 0));
            match field {
                DESC_TYPE => entry.0 = CType(raw as i16),
                DESC_PRECISION => entry.1 = raw as i16,
                DESC_SCALE => entry.2 = raw as i16,
                DESC_DATA_PTR => {
                    if let Some(col) = st.cols.get_mut(&number) {
                        col.value = raw;
                    }
                }
                _ => {}
            }
        } else if field == DESC_DATA_PTR {
            if let Some(param) = st.params.get_mut(&number) {
                param.value = raw;
            }
        }
        SqlReturn::SUCCESS
    }

    unsafe fn exec_direct(&self, _stmt: Handle, text: *const u16, text_length: i32) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLExecDirectW");
        if let Some(rc) = injected {
            return rc;
        }
        let sql = decode_wide_arg(text, text_length);
        st.finish_execution(sql, true, Vec::new());
        SqlReturn::SUCCESS
    }

    unsafe fn prepare(&self, _stmt: Handle, text: *const u16, text_length: i32) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLPrepareW");
        if let Some(rc) = injected {
            return rc;
        }
        st.prepared = decode_wide_arg(text, text_length);
        SqlReturn::SUCCESS
    }

    unsafe fn execute(&self, _stmt: Handle) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLExecute");
        if let Some(rc) = injected {
            return rc;
        }
        let deferred: VecDeque<u16> = st
            .params
            .iter()
            .filter(|(_, p)| p.indicator != 0 && is_deferred(read_struct::<Len>(p.indicator, 0)))
            .map(|(n, _)| *n)
            .collect();
        st.dae_data.clear();
        if !deferred.is_empty() {
            st.pending_dae = deferred;
            st.current_dae = None;
            return SqlReturn::NEED_DATA;
        }
        let rows = st.capture_rows();
        let sql = st.prepared.clone();
        st.finish_execution(sql, false, rows);
        SqlReturn::SUCCESS
    }

    unsafe fn bind_parameter(
        &self,
        _stmt: Handle,
        parameter_number: u16,
        io_type: i16,
        value_type: i16,
        parameter_type: i16,
        column_size: ULen,
        decimal_digits: i16,
        value: Pointer,
        buffer_length: Len,
        str_len_or_ind: *mut Len,
    ) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLBindParameter");
        if let Some(rc) = injected {
            return rc;
        }
        let c_type = CType(value_type);
        let sql_type = SqlType(parameter_type);
        st.bind_history.push(ParamBinding {
            number: parameter_number,
            io_type,
            c_type,
            sql_type,
            column_size: column_size as usize,
            decimal_digits,
            buffer_length,
        });
        st.params.insert(
            parameter_number,
            BoundParam {
                binding: Some((parameter_number, io_type, c_type, sql_type)),
                value: value as usize,
                buffer_length,
                indicator: str_len_or_ind as usize,
            },
        );
        SqlReturn::SUCCESS
    }

    unsafe fn describe_param(
        &self,
        _stmt: Handle,
        parameter_number: u16,
        data_type: *mut i16,
        parameter_size: *mut ULen,
        decimal_digits: *mut i16,
        nullable: *mut i16,
    ) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLDescribeParam");
        if let Some(rc) = injected {
            return rc;
        }
        let Some((sql_type, size, digits)) = st.described_params.get(&parameter_number).copied()
        else {
            return st.push_state_error("HYC00", "Optional feature not implemented");
        };
        *data_type = sql_type.0;
        *parameter_size = size as ULen;
        *decimal_digits = digits;
        if !nullable.is_null() {
            *nullable = 1;
        }
        SqlReturn::SUCCESS
    }

    unsafe fn param_data(&self, _stmt: Handle, value: *mut Pointer) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLParamData");
        if let Some(rc) = injected {
            return rc;
        }
        if let Some(next) = st.pending_dae.pop_front() {
            st.current_dae = Some(next);
            st.dae_data.entry(next).or_default();
            let token = st.params.get(&next).map(|p| p.value).unwrap_or(0);
            *value = token as Pointer;
            return SqlReturn::NEED_DATA;
        }
        if st.current_dae.take().is_none() {
            return st.push_state_error("HY010", "Function sequence error");
        }
        let rows = st.capture_rows();
        let sql = st.prepared.clone();
        st.finish_execution(sql, false, rows);
        SqlReturn::SUCCESS
    }

    unsafe fn put_data(&self, _stmt: Handle, data: Pointer, str_len_or_ind: Len) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLPutData");
        if let Some(rc) = injected {
            return rc;
        }
        let Some(current) = st.current_dae else {
            return st.push_state_error("HY010", "Function sequence error");
        };
        st.put_data_calls.push((current, str_len_or_ind));
        if str_len_or_ind > 0 {
            let bytes = std::slice::from_raw_parts(data as *const u8, str_len_or_ind as usize);
            st.dae_data.entry(current).or_default().extend_from_slice(bytes);
        }
        SqlReturn::SUCCESS
    }

    unsafe fn num_result_cols(&self, _stmt: Handle, column_count: *mut i16) -> SqlReturn {
        let (st, injected) = self.enter("SQLNumResultCols");
        if let Some(rc) = injected {
            return rc;
        }
        *column_count = st.current.as_ref().map(|s| s.columns.len()).unwrap_or(0) as i16;
        SqlReturn::SUCCESS
    }

    unsafe fn describe_col(
        &self,
        _stmt: Handle,
        column_number: u16,
        column_name: *mut u16,
        buffer_length: i16,
        name_length: *mut i16,
        data_type: *mut i16,
        column_size: *mut ULen,
        decimal_digits: *mut i16,
        nullable: *mut i16,
    ) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLDescribeColW");
        if let Some(rc) = injected {
            return rc;
        }
        let column = st
            .current
            .as_ref()
            .and_then(|s| s.columns.get((column_number as usize).wrapping_sub(1)))
            .cloned();
        let Some(column) = column else {
            return st.push_state_error("07009", "Invalid descriptor index");
        };
        let units: Vec<u16> = column.name.encode_utf16().collect();
        let capacity = (buffer_length.max(1) as usize) - 1;
        let copied = units.len().min(capacity);
        std::ptr::copy_nonoverlapping(units.as_ptr(), column_name, copied);
        *column_name.add(copied) = 0;
        *name_length = units.len() as i16;
        *data_type = column.sql_type.0;
        *column_size = column.column_size as ULen;
        *decimal_digits = column.decimal_digits;
        *nullable = column.nullable;
        if copied < units.len() {
            SqlReturn::SUCCESS_WITH_INFO
        } else {
            SqlReturn::SUCCESS
        }
    }

    unsafe fn bind_col(
        &self,
        _stmt: Handle,
        column_number: u16,
        target_type: i16,
        target_value: Pointer,
        buffer_length: Len,
        str_len_or_ind: *mut Len,
    ) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLBindCol");
        if let Some(rc) = injected {
            return rc;
        }
        if target_value.is_null() {
            st.cols.remove(&column_number);
        } else {
            st.cols.insert(
                column_number,
                BoundCol {
                    c_type: CType(target_type),
                    value: target_value as usize,
                    buffer_length,
                    indicator: str_len_or_ind as usize,
                },
            );
        }
        SqlReturn::SUCCESS
    }

    unsafe fn fetch(&self, stmt: Handle) -> SqlReturn {
        self.fetch_scroll(stmt, super::FetchOrientation::Next.as_raw(), 0)
    }

    unsafe fn fetch_scroll(&self, _stmt: Handle, orientation: i16, offset: Len) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLFetchScroll");
        if let Some(rc) = injected {
            return rc;
        }
        let Some(total) = st.current.as_ref().map(|s| s.rows.len()) else {
            return st.push_state_error("24000", "Invalid cursor state");
        };
        let array = st.row_array_size.max(1) as Len;
        let previous = st.rowset_start.map(|s| s as Len);
        let start: Len = match orientation {
            1 => st.next_row as Len,
            2 => 0,
            3 => (total as Len - array).max(0),
            4 => previous.map(|p| p - array).unwrap_or(-1),
            5 if offset > 0 => offset - 1,
            5 if offset < 0 => total as Len + offset,
            5 => -1,
            6 => previous.map(|p| p + offset).unwrap_or(offset),
            _ => return st.push_state_error("HY106", "Fetch type out of range"),
        };
        if st.rows_fetched_ptr != 0 {
            *(st.rows_fetched_ptr as *mut ULen) = 0;
        }
        if start < 0 || start as usize >= total {
            st.rowset_start = None;
            st.current_row = None;
            st.next_row = if start < 0 { 0 } else { total };
            return SqlReturn::NO_DATA;
        }
        let start = start as usize;
        let count = (array as usize).min(total - start);
        st.rowset_start = Some(start);
        st.current_row = Some(start);
        st.next_row = start + count;
        st.get_data_offsets.clear();
        st.consumed.clear();

        let mut truncated = false;
        let cols: Vec<(u16, BoundCol)> = st.cols.iter().map(|(n, c)| (*n, *c)).collect();
        for slot in 0..count {
            for (number, col) in &cols {
                let Some(cell) = st.cell(start + slot, *number) else {
                    continue;
                };
                if cell.host().map(HostValue::is_null).unwrap_or(false) {
                    write_indicator(col.indicator, slot, NULL_DATA);
                    continue;
                }
                let c_type = st.resolve_c_type(col.c_type, *number);
                let Some(payload) = st.payload(&cell, c_type, *number) else {
                    return st.push_state_error("07006", "Restricted data type attribute violation");
                };
                let no_total = matches!(cell, MockCell::NoTotal(_));
                match payload {
                    Payload::Fixed(bytes) => {
                        let target = (col.value + slot * bytes.len()) as *mut u8;
                        std::ptr::copy_nonoverlapping(bytes.as_ptr(), target, bytes.len());
                        write_indicator(col.indicator, slot, bytes.len() as Len);
                    }
                    Payload::Variable { bytes, unit } => {
                        let target = (col.value + slot * col.buffer_length as usize) as *mut u8;
                        let copied = write_variable(target, col.buffer_length, &bytes, unit, true);
                        truncated |= copied < bytes.len();
                        let ind = if no_total { NO_TOTAL } else { bytes.len() as Len };
                        write_indicator(col.indicator, slot, ind);
                    }
                    Payload::Binary(bytes) => {
                        let target = (col.value + slot * col.buffer_length as usize) as *mut u8;
                        let copied = write_variable(target, col.buffer_length, &bytes, 1, false);
                        truncated |= copied < bytes.len();
                        let ind = if no_total { NO_TOTAL } else { bytes.len() as Len };
                        write_indicator(col.indicator, slot, ind);
                    }
                }
            }
        }
        if st.rows_fetched_ptr != 0 {
            *(st.rows_fetched_ptr as *mut ULen) = count as ULen;
        }
        if truncated {
            SqlReturn::SUCCESS_WITH_INFO
        } else {
            SqlReturn::SUCCESS
        }
    }

    unsafe fn set_pos(&self, _stmt: Handle, row: ULen, _operation: u16, _lock_type: u16) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLSetPos");
        if let Some(rc) = injected {
            return rc;
        }
        let Some(start) = st.rowset_start else {
            return st.push_state_error("24000", "Invalid cursor state");
        };
        st.current_row = Some(start + (row as usize).max(1) - 1);
        st.get_data_offsets.clear();
        st.consumed.clear();
        SqlReturn::SUCCESS
    }

    unsafe fn get_data(
        &self,
        _stmt: Handle,
        column_number: u16,
        target_type: i16,
        target_value: Pointer,
        buffer_length: Len,
        str_len_or_ind: *mut Len,
    ) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLGetData");
        st.get_data_calls += 1;
        if let Some(rc) = injected {
            return rc;
        }
        let Some(row) = st.current_row else {
            return st.push_state_error("24000", "Invalid cursor state");
        };
        let Some(cell) = st.cell(row, column_number) else {
            return st.push_state_error("07009", "Invalid descriptor index");
        };
        let indicator = str_len_or_ind as usize;
        if st.consumed.contains(&column_number) {
            return SqlReturn::NO_DATA;
        }
        if cell.host().map(HostValue::is_null).unwrap_or(false) {
            st.consumed.insert(column_number);
            write_indicator(indicator, 0, NULL_DATA);
            return SqlReturn::SUCCESS;
        }
        let c_type = st.resolve_c_type(CType(target_type), column_number);
        let Some(payload) = st.payload(&cell, c_type, column_number) else {
            return st.push_state_error("07006", "Restricted data type attribute violation");
        };
        let no_total = matches!(cell, MockCell::NoTotal(_));
        let (bytes, unit, terminated) = match payload {
            Payload::Fixed(bytes) => {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), target_value as *mut u8, bytes.len());
                write_indicator(indicator, 0, bytes.len() as Len);
                st.consumed.insert(column_number);
                return SqlReturn::SUCCESS;
            }
            Payload::Variable { bytes, unit } => (bytes, unit, true),
            Payload::Binary(bytes) => (bytes, 1, false),
        };
        let offset = st.get_data_offsets.get(&column_number).copied().unwrap_or(0);
        let remaining = &bytes[offset.min(bytes.len())..];
        let copied = write_variable(target_value as *mut u8, buffer_length, remaining, unit, terminated);
        // the last chunk always reports its real length
        let ind = if no_total && copied < remaining.len() {
            NO_TOTAL
        } else {
            remaining.len() as Len
        };
        write_indicator(indicator, 0, ind);
        st.get_data_offsets.insert(column_number, offset + copied);
        if copied < remaining.len() {
            SqlReturn::SUCCESS_WITH_INFO
        } else {
            st.consumed.insert(column_number);
            SqlReturn::SUCCESS
        }
    }

    unsafe fn more_results(&self, _stmt: Handle) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLMoreResults");
        if let Some(rc) = injected {
            return rc;
        }
        if st.advance_result() {
            SqlReturn::SUCCESS
        } else {
            SqlReturn::NO_DATA
        }
    }

    unsafe fn row_count(&self, _stmt: Handle, row_count: *mut Len) -> SqlReturn {
        let (st, injected) = self.enter("SQLRowCount");
        if let Some(rc) = injected {
            return rc;
        }
        *row_count = st.row_count;
        SqlReturn::SUCCESS
    }

    unsafe fn free_stmt(&self, _stmt: Handle, option: u16) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLFreeStmt");
        if let Some(rc) = injected {
            return rc;
        }
        st.free_stmt_options.push(option);
        match option {
            FREE_CLOSE => {
                st.current = None;
                st.remaining_sets.clear();
                st.rowset_start = None;
                st.current_row = None;
            }
            FREE_UNBIND => st.cols.clear(),
            FREE_RESET_PARAMS => st.params.clear(),
            _ => {}
        }
        SqlReturn::SUCCESS
    }

    unsafe fn get_diag_rec(
        &self,
        _handle_type: i16,
        _handle: Handle,
        record: i16,
        state: *mut u16,
        native_error: *mut i32,
        message: *mut u16,
        buffer_length: i16,
        text_length: *mut i16,
    ) -> SqlReturn {
        let st = self.lock();
        let Some(diag) = st.diagnostics.get((record as usize).wrapping_sub(1)) else {
            return SqlReturn::NO_DATA;
        };
        let sqlstate: Vec<u16> = diag.sqlstate.encode_utf16().take(5).collect();
        std::ptr::copy_nonoverlapping(sqlstate.as_ptr(), state, sqlstate.len());
        *state.add(sqlstate.len()) = 0;
        *native_error = diag.native_error;
        let units: Vec<u16> = diag.message.encode_utf16().collect();
        let capacity = (buffer_length.max(1) as usize) - 1;
        let copied = units.len().min(capacity);
        std::ptr::copy_nonoverlapping(units.as_ptr(), message, copied);
        *message.add(copied) = 0;
        *text_length = units.len() as i16;
        if copied < units.len() {
            SqlReturn::SUCCESS_WITH_INFO
        } else {
            SqlReturn::SUCCESS
        }
    }

    unsafe fn tables(&self, _stmt: Handle, args: [WideArg; 4]) -> SqlReturn {
        self.catalog("SQLTablesW", &args)
    }

    unsafe fn columns(&self, _stmt: Handle, args: [WideArg; 4]) -> SqlReturn {
        self.catalog("SQLColumnsW", &args)
    }

    unsafe fn primary_keys(&self, _stmt: Handle, args: [WideArg; 3]) -> SqlReturn {
        self.catalog("SQLPrimaryKeysW", &args)
    }

    unsafe fn foreign_keys(&self, _stmt: Handle, args: [WideArg; 6]) -> SqlReturn {
        self.catalog("SQLForeignKeysW", &args)
    }

    unsafe fn statistics(&self, _stmt: Handle, args: [WideArg; 3], unique: u16, _reserved: u16) -> SqlReturn {
        self.catalog_with("SQLStatisticsW", &args, Some(unique.to_string()))
    }

    unsafe fn procedures(&self, _stmt: Handle, args: [WideArg; 3]) -> SqlReturn {
        self.catalog("SQLProceduresW", &args)
    }

    unsafe fn special_columns(
        &self,
        _stmt: Handle,
        identifier_type: u16,
        args: [WideArg; 3],
        _scope: u16,
        _nullable: u16,
    ) -> SqlReturn {
        self.catalog_with("SQLSpecialColumnsW", &args, Some(identifier_type.to_string()))
    }

    unsafe fn get_type_info(&self, _stmt: Handle, data_type: i16) -> SqlReturn {
        let (mut st, injected) = self.enter("SQLGetTypeInfoW");
        if let Some(rc) = injected {
            return rc;
        }
        st.open_catalog("SQLGetTypeInfoW", vec![Some(data_type.to_string())]);
        SqlReturn::SUCCESS
    }
}

impl MockDriver {
    unsafe fn catalog(&self, function: &'static str, args: &[WideArg]) -> SqlReturn {
        self.catalog_with(function, args, None)
    }

    unsafe fn catalog_with(
        &self,
        function: &'static str,
        args: &[WideArg],
        extra: Option<String>,
    ) -> SqlReturn {
        let (mut st, injected) = self.enter(function);
        if let Some(rc) = injected {
            return rc;
        }
        let mut decoded: Vec<Option<String>> = args
            .iter()
            .map(|a| decode_wide_arg(a.ptr, a.len as i32))
            .collect();
        if extra.is_some() {
            decoded.push(extra);
        }
        st.open_catalog(function, decoded);
        SqlReturn::SUCCESS
    }
}
