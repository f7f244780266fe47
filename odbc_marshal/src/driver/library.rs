//! Function table resolved from the system ODBC driver manager at runtime.

use super::{DriverApi, Handle, Pointer, WideArg};
use libloading::Library;
use odbc_api::sys::{Len, SqlReturn, ULen};

/// Overrides the library search below with an explicit path.
pub const DRIVER_MANAGER_ENV: &str = "ODBC_DRIVER_MANAGER";

#[cfg(target_os = "windows")]
const CANDIDATES: &[&str] = &["odbc32.dll"];
#[cfg(target_os = "macos")]
const CANDIDATES: &[&str] = &["libodbc.2.dylib", "libiodbc.2.dylib", "libodbc.dylib"];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const CANDIDATES: &[&str] = &["libodbc.so.2", "libodbc.so", "libiodbc.so.2"];

type W = *const u16;

macro_rules! odbc_functions {
    ($($field:ident = $symbol:literal ($($arg:ty),*);)*) => {
        struct Functions {
            $($field: unsafe extern "system" fn($($arg),*) -> i16,)*
        }

        impl Functions {
            unsafe fn resolve(library: &Library) -> Result<Self, libloading::Error> {
                Ok(Self {
                    $($field: *library
                        .get::<unsafe extern "system" fn($($arg),*) -> i16>($symbol)?,)*
                })
            }
        }
    };
}

odbc_functions! {
    alloc_handle = b"SQLAllocHandle\0" (i16, Handle, *mut Handle);
    free_handle = b"SQLFreeHandle\0" (i16, Handle);
    set_env_attr = b"SQLSetEnvAttr\0" (Handle, i32, Pointer, i32);
    set_connect_attr = b"SQLSetConnectAttrW\0" (Handle, i32, Pointer, i32);
    driver_connect = b"SQLDriverConnectW\0" (Handle, Handle, W, i16, *mut u16, i16, *mut i16, u16);
    disconnect = b"SQLDisconnect\0" (Handle);
    set_stmt_attr = b"SQLSetStmtAttrW\0" (Handle, i32, Pointer, i32);
    get_stmt_attr = b"SQLGetStmtAttrW\0" (Handle, i32, Pointer, i32, *mut i32);
    set_desc_field = b"SQLSetDescFieldW\0" (Handle, i16, i16, Pointer, i32);
    exec_direct = b"SQLExecDirectW\0" (Handle, W, i32);
    prepare = b"SQLPrepareW\0" (Handle, W, i32);
    execute = b"SQLExecute\0" (Handle);
    bind_parameter = b"SQLBindParameter\0" (Handle, u16, i16, i16, i16, ULen, i16, Pointer, Len, *mut Len);
    describe_param = b"SQLDescribeParam\0" (Handle, u16, *mut i16, *mut ULen, *mut i16, *mut i16);
    param_data = b"SQLParamData\0" (Handle, *mut Pointer);
    put_data = b"SQLPutData\0" (Handle, Pointer, Len);
    num_result_cols = b"SQLNumResultCols\0" (Handle, *mut i16);
    describe_col = b"SQLDescribeColW\0" (Handle, u16, *mut u16, i16, *mut i16, *mut i16, *mut ULen, *mut i16, *mut i16);
    bind_col = b"SQLBindCol\0" (Handle, u16, i16, Pointer, Len, *mut Len);
    fetch = b"SQLFetch\0" (Handle);
    fetch_scroll = b"SQLFetchScroll\0" (Handle, i16, Len);
    set_pos = b"SQLSetPos\0" (Handle, ULen, u16, u16);
    get_data = b"SQLGetData\0" (Handle, u16, i16, Pointer, Len, *mut Len);
    more_results = b"SQLMoreResults\0" (Handle);
    row_count = b"SQLRowCount\0" (Handle, *mut Len);
    free_stmt = b"SQLFreeStmt\0" (Handle, u16);
    get_diag_rec = b"SQLGetDiagRecW\0" (i16, Handle, i16, *mut u16, *mut i32, *mut u16, i16, *mut i16);
    tables = b"SQLTablesW\0" (Handle, W, i16, W, i16, W, i16, W, i16);
    columns = b"SQLColumnsW\0" (Handle, W, i16, W, i16, W, i16, W, i16);
    primary_keys = b"SQLPrimaryKeysW\0" (Handle, W, i16, W, i16, W, i16);
    foreign_keys = b"SQLForeignKeysW\0" (Handle, W, i16, W, i16, W, i16, W, i16, W, i16, W, i16);
    statistics = b"SQLStatisticsW\0" (Handle, W, i16, W, i16, W, i16, u16, u16);
    procedures = b"SQLProceduresW\0" (Handle, W, i16, W, i16, W, i16);
    special_columns = b"SQLSpecialColumnsW\0" (Handle, u16, W, i16, W, i16, W, i16, u16, u16);
    get_type_info = b"SQLGetTypeInfoW\0" (Handle, i16);
}

/// A loaded driver manager. The `Library` is kept alive for as long as the
/// resolved function pointers are reachable.
pub struct OdbcLibrary {
    functions: Functions,
    path: String,
    _library: Library,
}

impl OdbcLibrary {
    /// Loads the library at `path` and resolves every entry point.
    pub fn load(path: &str) -> Result<Self, libloading::Error> {
        let library = unsafe { Library::new(path)? };
        let functions = unsafe { Functions::resolve(&library)? };
        log::info!("Loaded ODBC driver manager from {}", path);
        Ok(Self {
            functions,
            path: path.to_string(),
            _library: library,
        })
    }

    /// `ODBC_DRIVER_MANAGER` if set, otherwise the platform candidates in order.
    pub fn load_default() -> Result<Self, libloading::Error> {
        if let Ok(path) = std::env::var(DRIVER_MANAGER_ENV) {
            if !path.trim().is_empty() {
                return Self::load(path.trim());
            }
        }
        let mut last_error = None;
        for candidate in CANDIDATES {
            match Self::load(candidate) {
                Ok(library) => return Ok(library),
                Err(e) => {
                    log::debug!("Driver manager candidate {} not loadable: {}", candidate, e);
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Self::load(CANDIDATES[0]),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl std::fmt::Debug for OdbcLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OdbcLibrary").field("path", &self.path).finish()
    }
}

impl DriverApi for OdbcLibrary {
    unsafe fn alloc_handle(&self, handle_type: i16, input: Handle, output: *mut Handle) -> SqlReturn {
        SqlReturn((self.functions.alloc_handle)(handle_type, input, output))
    }

    unsafe fn free_handle(&self, handle_type: i16, handle: Handle) -> SqlReturn {
        SqlReturn((self.functions.free_handle)(handle_type, handle))
    }

    unsafe fn set_env_attr(&self, env: Handle, attribute: i32, value: Pointer, len: i32) -> SqlReturn {
        SqlReturn((self.functions.set_env_attr)(env, attribute, value, len))
    }

    unsafe fn set_connect_attr(&self, dbc: Handle, attribute: i32, value: Pointer, len: i32) -> SqlReturn {
        SqlReturn((self.functions.set_connect_attr)(dbc, attribute, value, len))
    }

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
    ) -> SqlReturn {
        SqlReturn((self.functions.driver_connect)(
            dbc,
            window,
            in_connection_string,
            in_length,
            out_connection_string,
            out_buffer_length,
            out_length,
            completion,
        ))
    }

    unsafe fn disconnect(&self, dbc: Handle) -> SqlReturn {
        SqlReturn((self.functions.disconnect)(dbc))
    }

    unsafe fn set_stmt_attr(&self, stmt: Handle, attribute: i32, value: Pointer, len: i32) -> SqlReturn {
        SqlReturn((self.functions.set_stmt_attr)(stmt, attribute, value, len))
    }

    unsafe fn get_stmt_attr(
        &self,
        stmt: Handle,
        attribute: i32,
        value: Pointer,
        buffer_length: i32,
        string_length: *mut i32,
    ) -> SqlReturn {
        SqlReturn((self.functions.get_stmt_attr)(
            stmt,
            attribute,
            value,
            buffer_length,
            string_length,
        ))
    }

    unsafe fn set_desc_field(
        &self,
        desc: Handle,
        record: i16,
        field: i16,
        value: Pointer,
        buffer_length: i32,
    ) -> SqlReturn {
        SqlReturn((self.functions.set_desc_field)(desc, record, field, value, buffer_length))
    }

    unsafe fn exec_direct(&self, stmt: Handle, text: *const u16, text_length: i32) -> SqlReturn {
        SqlReturn((self.functions.exec_direct)(stmt, text, text_length))
    }

    unsafe fn prepare(&self, stmt: Handle, text: *const u16, text_length: i32) -> SqlReturn {
        SqlReturn((self.functions.prepare)(stmt, text, text_length))
    }

    unsafe fn execute(&self, stmt: Handle) -> SqlReturn {
        SqlReturn((self.functions.execute)(stmt))
    }

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
    ) -> SqlReturn {
        SqlReturn((self.functions.bind_parameter)(
            stmt,
            parameter_number,
            io_type,
            value_type,
            parameter_type,
            column_size,
            decimal_digits,
            value,
            buffer_length,
            str_len_or_ind,
        ))
    }

    unsafe fn describe_param(
        &self,
        stmt: Handle,
        parameter_number: u16,
        data_type: *mut i16,
        parameter_size: *mut ULen,
        decimal_digits: *mut i16,
        nullable: *mut i16,
    ) -> SqlReturn {
        SqlReturn((self.functions.describe_param)(
            stmt,
            parameter_number,
            data_type,
            parameter_size,
            decimal_digits,
            nullable,
        ))
    }

    unsafe fn param_data(&self, stmt: Handle, value: *mut Pointer) -> SqlReturn {
        SqlReturn((self.functions.param_data)(stmt, value))
    }

    unsafe fn put_data(&self, stmt: Handle, data: Pointer, str_len_or_ind: Len) -> SqlReturn {
        SqlReturn((self.functions.put_data)(stmt, data, str_len_or_ind))
    }

    unsafe fn num_result_cols(&self, stmt: Handle, column_count: *mut i16) -> SqlReturn {
        SqlReturn((self.functions.num_result_cols)(stmt, column_count))
    }

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
    ) -> SqlReturn {
        SqlReturn((self.functions.describe_col)(
            stmt,
            column_number,
            column_name,
            buffer_length,
            name_length,
            data_type,
            column_size,
            decimal_digits,
            nullable,
        ))
    }

    unsafe fn bind_col(
        &self,
        stmt: Handle,
        column_number: u16,
        target_type: i16,
        target_value: Pointer,
        buffer_length: Len,
        str_len_or_ind: *mut Len,
    ) -> SqlReturn {
        SqlReturn((self.functions.bind_col)(
            stmt,
            column_number,
            target_type,
            target_value,
            buffer_length,
            str_len_or_ind,
        ))
    }

    unsafe fn fetch(&self, stmt: Handle) -> SqlReturn {
        SqlReturn((self.functions.fetch)(stmt))
    }

    unsafe fn fetch_scroll(&self, stmt: Handle, orientation: i16, offset: Len) -> SqlReturn {
        SqlReturn((self.functions.fetch_scroll)(stmt, orientation, offset))
    }

    unsafe fn set_pos(&self, stmt: Handle, row: ULen, operation: u16, lock_type: u16) -> SqlReturn {
        SqlReturn((self.functions.set_pos)(stmt, row, operation, lock_type))
    }

    unsafe fn get_data(
        &self,
        stmt: Handle,
        column_number: u16,
        target_type: i16,
        target_value: Pointer,
        buffer_length: Len,
        str_len_or_ind: *mut Len,
    ) -> SqlReturn {
        SqlReturn((self.functions.get_data)(
            stmt,
            column_number,
            target_type,
            target_value,
            buffer_length,
            str_len_or_ind,
        ))
    }

    unsafe fn more_results(&self, stmt: Handle) -> SqlReturn {
        SqlReturn((self.functions.more_results)(stmt))
    }

    unsafe fn row_count(&self, stmt: Handle, row_count: *mut Len) -> SqlReturn {
        SqlReturn((self.functions.row_count)(stmt, row_count))
    }

    unsafe fn free_stmt(&self, stmt: Handle, option: u16) -> SqlReturn {
        SqlReturn((self.functions.free_stmt)(stmt, option))
    }

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
    ) -> SqlReturn {
        SqlReturn((self.functions.get_diag_rec)(
            handle_type,
            handle,
            record,
            state,
            native_error,
            message,
            buffer_length,
            text_length,
        ))
    }

    unsafe fn tables(&self, stmt: Handle, [a, b, c, d]: [WideArg; 4]) -> SqlReturn {
        SqlReturn((self.functions.tables)(
            stmt, a.ptr, a.len, b.ptr, b.len, c.ptr, c.len, d.ptr, d.len,
        ))
    }

    unsafe fn columns(&self, stmt: Handle, [a, b, c, d]: [WideArg; 4]) -> SqlReturn {
        SqlReturn((self.functions.columns)(
            stmt, a.ptr, a.len, b.ptr, b.len, c.ptr, c.len, d.ptr, d.len,
        ))
    }

    unsafe fn primary_keys(&self, stmt: Handle, [a, b, c]: [WideArg; 3]) -> SqlReturn {
        SqlReturn((self.functions.primary_keys)(
            stmt, a.ptr, a.len, b.ptr, b.len, c.ptr, c.len,
        ))
    }

    unsafe fn foreign_keys(&self, stmt: Handle, [a, b, c, d, e, f]: [WideArg; 6]) -> SqlReturn {
        SqlReturn((self.functions.foreign_keys)(
            stmt, a.ptr, a.len, b.ptr, b.len, c.ptr, c.len, d.ptr, d.len, e.ptr, e.len, f.ptr,
            f.len,
        ))
    }

    unsafe fn statistics(
        &self,
        stmt: Handle,
        [a, b, c]: [WideArg; 3],
        unique: u16,
        reserved: u16,
    ) -> SqlReturn {
        SqlReturn((self.functions.statistics)(
            stmt, a.ptr, a.len, b.ptr, b.len, c.ptr, c.len, unique, reserved,
        ))
    }

    unsafe fn procedures(&self, stmt: Handle, [a, b, c]: [WideArg; 3]) -> SqlReturn {
        SqlReturn((self.functions.procedures)(
            stmt, a.ptr, a.len, b.ptr, b.len, c.ptr, c.len,
        ))
    }

    unsafe fn special_columns(
        &self,
        stmt: Handle,
        identifier_type: u16,
        [a, b, c]: [WideArg; 3],
        scope: u16,
        nullable: u16,
    ) -> SqlReturn {
        SqlReturn((self.functions.special_columns)(
            stmt,
            identifier_type,
            a.ptr,
            a.len,
            b.ptr,
            b.len,
            c.ptr,
            c.len,
            scope,
            nullable,
        ))
    }

    unsafe fn get_type_info(&self, stmt: Handle, data_type: i16) -> SqlReturn {
        SqlReturn((self.functions.get_type_info)(stmt, data_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_is_an_error() {
        let err = OdbcLibrary::load("/nonexistent/libodbc-missing.so").unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn test_candidates_not_empty() {
        assert!(!CANDIDATES.is_empty());
    }
}
