//! The driver function table consumed by every marshaling component.
//!
//! Components never call the driver manager directly; they receive an
//! `Arc<dyn DriverApi>` (usually [`default_driver`]) and invoke it through
//! the raw C calling convention. Every return code is checked by the caller.

pub mod diagnostics;
pub mod library;
#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;

use crate::error::{MarshalError, Result};
use odbc_api::sys::{Len, SqlReturn, ULen};
use std::ffi::c_void;
use std::sync::Arc;

pub use diagnostics::{get_diagnostic, get_diagnostics, DiagnosticRecord};
pub use library::OdbcLibrary;

pub type Handle = *mut c_void;
pub type Pointer = *mut c_void;

pub const HANDLE_ENV: i16 = 1;
pub const HANDLE_DBC: i16 = 2;
pub const HANDLE_STMT: i16 = 3;
pub const HANDLE_DESC: i16 = 4;

pub const ATTR_ODBC_VERSION: i32 = 200;
pub const OV_ODBC3: usize = 3;
pub const ATTR_CONNECTION_POOLING: i32 = 201;
pub const CP_OFF: usize = 0;
pub const CP_ONE_PER_DRIVER: usize = 1;
pub const CP_ONE_PER_HENV: usize = 2;

pub const ATTR_ROW_BIND_TYPE: i32 = 5;
pub const ATTR_PARAM_BIND_TYPE: i32 = 18;
pub const ATTR_PARAMSET_SIZE: i32 = 22;
pub const ATTR_ROWS_FETCHED_PTR: i32 = 26;
pub const ATTR_ROW_ARRAY_SIZE: i32 = 27;
pub const ATTR_APP_ROW_DESC: i32 = 10010;
pub const ATTR_APP_PARAM_DESC: i32 = 10011;
/// Column-wise binding for both `ATTR_ROW_BIND_TYPE` and `ATTR_PARAM_BIND_TYPE`.
pub const BIND_BY_COLUMN: usize = 0;

pub const DESC_TYPE: i16 = 1002;
pub const DESC_PRECISION: i16 = 1005;
pub const DESC_SCALE: i16 = 1006;
pub const DESC_DATA_PTR: i16 = 1010;

pub const FREE_CLOSE: u16 = 0;
pub const FREE_UNBIND: u16 = 2;
pub const FREE_RESET_PARAMS: u16 = 3;

pub const DRIVER_NOPROMPT: u16 = 0;
pub const IS_POINTER: i32 = -4;
pub const IS_UINTEGER: i32 = -5;
pub const IS_INTEGER: i32 = -6;

pub const POSITION: u16 = 0;
pub const LOCK_NO_CHANGE: u16 = 0;

/// `SQLFetchScroll` orientations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrientation {
    Next,
    First,
    Last,
    Prior,
    Absolute,
    Relative,
}

impl FetchOrientation {
    pub fn as_raw(self) -> i16 {
        match self {
            FetchOrientation::Next => 1,
            FetchOrientation::First => 2,
            FetchOrientation::Last => 3,
            FetchOrientation::Prior => 4,
            FetchOrientation::Absolute => 5,
            FetchOrientation::Relative => 6,
        }
    }
}

/// Optional UTF-16 string argument to a catalog function. A null pointer
/// passes "no filter" to the driver.
#[derive(Debug, Clone, Copy)]
pub struct WideArg {
    pub ptr: *const u16,
    pub len: i16,
}

impl WideArg {
    pub const NULL: WideArg = WideArg {
        ptr: std::ptr::null(),
        len: 0,
    };

    /// Borrows `units`; the slice must outlive the driver call.
    pub fn from_units(units: Option<&[u16]>) -> Self {
        match units {
            Some(units) => WideArg {
                ptr: units.as_ptr(),
                len: units.len() as i16,
            },
            None => WideArg::NULL,
        }
    }
}

/// Raw ODBC entry points.
///
/// # Safety
///
/// Every method is a direct C-ABI call. Pointers passed in must be valid
/// for the access the corresponding ODBC function performs, and bound
/// buffers must stay valid until they are unbound or reset.
pub trait DriverApi: Send + Sync {
    unsafe fn alloc_handle(&self, handle_type: i16, input: Handle, output: *mut Handle)
        -> SqlReturn;
    unsafe fn free_handle(&self, handle_type: i16, handle: Handle) -> SqlReturn;
    unsafe fn set_env_attr(
        &self,
        env: Handle,
        attribute: i32,
        value: Pointer,
        string_length: i32,
    ) -> SqlReturn;
    unsafe fn set_connect_attr(
        &self,
        dbc: Handle,
        attribute: i32,
        value: Pointer,
        string_length: i32,
    ) -> SqlReturn;
    #[allow(clippy::too_many_arguments)]
    unsafe fn driver_connect(
        &self,
        dbc: Handle,
        window: Handle,
        in_connection_string: *const u16,
        in_length: i16,
        out_connection_string: *mut u16,
        out_buffer_length: i16,
        out_length: *mut i16,
        completion: u16,
    ) -> SqlReturn;
    unsafe fn disconnect(&self, dbc: Handle) -> SqlReturn;

    unsafe fn set_stmt_attr(
        &self,
        stmt: Handle,
        attribute: i32,
        value: Pointer,
        string_length: i32,
    ) -> SqlReturn;
    unsafe fn get_stmt_attr(
        &self,
        stmt: Handle,
        attribute: i32,
        value: Pointer,
        buffer_length: i32,
        string_length: *mut i32,
    ) -> SqlReturn;
    unsafe fn set_desc_field(
        &self,
        desc: Handle,
        record: i16,
        field: i16,
        value: Pointer,
        buffer_length: i32,
    ) -> SqlReturn;

    unsafe fn exec_direct(&self, stmt: Handle, text: *const u16, text_length: i32) -> SqlReturn;
    unsafe fn prepare(&self, stmt: Handle, text: *const u16, text_length: i32) -> SqlReturn;
    unsafe fn execute(&self, stmt: Handle) -> SqlReturn;
    #[allow(clippy::too_many_arguments)]
    unsafe fn bind_parameter(
        &self,
        stmt: Handle,
        parameter_number: u16,
        io_type: i16,
        value_type: i16,
        parameter_type: i16,
        column_size: ULen,
        decimal_digits: i16,
        value: Pointer,
        buffer_length: Len,
        str_len_or_ind: *mut Len,
    ) -> SqlReturn;
    unsafe fn describe_param(
        &self,
        stmt: Handle,
        parameter_number: u16,
        data_type: *mut i16,
        parameter_size: *mut ULen,
        decimal_digits: *mut i16,
        nullable: *mut i16,
    ) -> SqlReturn;
    unsafe fn param_data(&self, stmt: Handle, value: *mut Pointer) -> SqlReturn;
    unsafe fn put_data(&self, stmt: Handle, data: Pointer, str_len_or_ind: Len) -> SqlReturn;

    unsafe fn num_result_cols(&self, stmt: Handle, column_count: *mut i16) -> SqlReturn;
    #[allow(clippy::too_many_arguments)]
    unsafe fn describe_col(
        &self,
        stmt: Handle,
        column_number: u16,
        column_name: *mut u16,
        buffer_length: i16,
        name_length: *mut i16,
        data_type: *mut i16,
        column_size: *mut ULen,
        decimal_digits: *mut i16,
        nullable: *mut i16,
    ) -> SqlReturn;
    unsafe fn bind_col(
        &self,
        stmt: Handle,
        column_number: u16,
        target_type: i16,
        target_value: Pointer,
        buffer_length: Len,
        str_len_or_ind: *mut Len,
    ) -> SqlReturn;
    unsafe fn fetch(&self, stmt: Handle) -> SqlReturn;
    unsafe fn fetch_scroll(&self, stmt: Handle, orientation: i16, offset: Len) -> SqlReturn;
    unsafe fn set_pos(&self, stmt: Handle, row: ULen, operation: u16, lock_type: u16)
        -> SqlReturn;
    unsafe fn get_data(
        &self,
        stmt: Handle,
        column_number: u16,
        target_type: i16,
        target_value: Pointer,
        buffer_length: Len,
        str_len_or_ind: *mut Len,
    ) -> SqlReturn;
    unsafe fn more_results(&self, stmt: Handle) -> SqlReturn;
    unsafe fn row_count(&self, stmt: Handle, row_count: *mut Len) -> SqlReturn;
    unsafe fn free_stmt(&self, stmt: Handle, option: u16) -> SqlReturn;

    #[allow(clippy::too_many_arguments)]
    unsafe fn get_diag_rec(
        &self,
        handle_type: i16,
        handle: Handle,
        record: i16,
        state: *mut u16,
        native_error: *mut i32,
        message: *mut u16,
        buffer_length: i16,
        text_length: *mut i16,
    ) -> SqlReturn;

    /// catalog, schema, table, table type
    unsafe fn tables(&self, stmt: Handle, args: [WideArg; 4]) -> SqlReturn;
    /// catalog, schema, table, column
    unsafe fn columns(&self, stmt: Handle, args: [WideArg; 4]) -> SqlReturn;
    /// catalog, schema, table
    unsafe fn primary_keys(&self, stmt: Handle, args: [WideArg; 3]) -> SqlReturn;
    /// pk catalog, pk schema, pk table, fk catalog, fk schema, fk table
    unsafe fn foreign_keys(&self, stmt: Handle, args: [WideArg; 6]) -> SqlReturn;
    unsafe fn statistics(
        &self,
        stmt: Handle,
        args: [WideArg; 3],
        unique: u16,
        reserved: u16,
    ) -> SqlReturn;
    /// catalog, schema, procedure
    unsafe fn procedures(&self, stmt: Handle, args: [WideArg; 3]) -> SqlReturn;
    unsafe fn special_columns(
        &self,
        stmt: Handle,
        identifier_type: u16,
        args: [WideArg; 3],
        scope: u16,
        nullable: u16,
    ) -> SqlReturn;
    unsafe fn get_type_info(&self, stmt: Handle, data_type: i16) -> SqlReturn;
}

pub fn succeeded(rc: SqlReturn) -> bool {
    rc == SqlReturn::SUCCESS || rc == SqlReturn::SUCCESS_WITH_INFO
}

/// Passes success, `NO_DATA` and `NEED_DATA` through for the caller to
/// branch on; anything else becomes `DriverCallFailure`.
pub fn check(rc: SqlReturn, function: &'static str) -> Result<SqlReturn> {
    if succeeded(rc) || rc == SqlReturn::NO_DATA || rc == SqlReturn::NEED_DATA {
        return Ok(rc);
    }
    log::error!("{} returned {}", function, rc.0);
    Err(MarshalError::driver(function, rc))
}

/// Like [`check`], attaching the first diagnostic record from `handle`.
pub fn check_with_diag(
    driver: &dyn DriverApi,
    handle_type: i16,
    handle: Handle,
    rc: SqlReturn,
    function: &'static str,
) -> Result<SqlReturn> {
    match check(rc, function) {
        Ok(rc) => Ok(rc),
        Err(_) if rc == SqlReturn::INVALID_HANDLE => Err(MarshalError::driver(function, rc)),
        Err(_) => {
            let diagnostic = get_diagnostic(driver, handle_type, handle, 1);
            if let Some(record) = &diagnostic {
                log::error!("{}: {}", function, record);
            }
            Err(MarshalError::DriverCallFailure {
                function,
                code: rc,
                diagnostic,
            })
        }
    }
}

pub fn check_stmt(
    driver: &dyn DriverApi,
    stmt: Handle,
    rc: SqlReturn,
    function: &'static str,
) -> Result<SqlReturn> {
    check_with_diag(driver, HANDLE_STMT, stmt, rc, function)
}

/// Sets an integer-valued statement attribute.
pub fn set_stmt_usize(
    driver: &dyn DriverApi,
    stmt: Handle,
    attribute: i32,
    value: usize,
    function: &'static str,
) -> Result<()> {
    let rc = unsafe { driver.set_stmt_attr(stmt, attribute, value as Pointer, IS_UINTEGER) };
    check_stmt(driver, stmt, rc, function).map(|_| ())
}

/// Writes one field of descriptor record `record`; integer fields are passed
/// by value in the pointer argument.
pub fn set_desc_value(
    driver: &dyn DriverApi,
    desc: Handle,
    record: u16,
    field: i16,
    value: Pointer,
) -> Result<()> {
    let rc = unsafe { driver.set_desc_field(desc, record as i16, field, value, 0) };
    check_with_diag(driver, HANDLE_DESC, desc, rc, "SQLSetDescField").map(|_| ())
}

/// Resolves the application descriptor (`ATTR_APP_PARAM_DESC` or
/// `ATTR_APP_ROW_DESC`) of `stmt`.
pub fn app_descriptor(driver: &dyn DriverApi, stmt: Handle, attribute: i32) -> Result<Handle> {
    let mut desc: Handle = std::ptr::null_mut();
    let rc = unsafe {
        driver.get_stmt_attr(
            stmt,
            attribute,
            &mut desc as *mut Handle as Pointer,
            IS_POINTER,
            std::ptr::null_mut(),
        )
    };
    check_stmt(driver, stmt, rc, "SQLGetStmtAttr")?;
    Ok(desc)
}

lazy_static::lazy_static! {
    static ref DEFAULT_DRIVER: std::result::Result<Arc<OdbcLibrary>, String> =
        OdbcLibrary::load_default().map(Arc::new).map_err(|e| e.to_string());
}

/// Process-wide driver manager table, resolved on first use. A load failure
/// is cached and returned to every later caller.
pub fn default_driver() -> Result<Arc<dyn DriverApi>> {
    match &*DEFAULT_DRIVER {
        Ok(library) => Ok(library.clone() as Arc<dyn DriverApi>),
        Err(message) => Err(MarshalError::DriverLoad(message.clone())),
    }
}
