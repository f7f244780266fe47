//! Owned ENV / DBC / STMT handles. Each child keeps its parent alive, and
//! every handle is freed exactly once, explicitly or on drop.

use crate::driver::{
    check, check_with_diag, DriverApi, Handle, Pointer, ATTR_ODBC_VERSION, DRIVER_NOPROMPT,
    HANDLE_DBC, HANDLE_ENV, HANDLE_STMT, IS_INTEGER, IS_UINTEGER, OV_ODBC3,
};
use crate::error::{MarshalError, Result};
use crate::observability::StructuredLogger;
use log::Level;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use zeroize::Zeroizing;

fn alloc(driver: &dyn DriverApi, handle_type: i16, parent: Handle, function: &'static str) -> Result<Handle> {
    let mut handle: Handle = null_mut();
    let rc = unsafe { driver.alloc_handle(handle_type, parent, &mut handle) };
    if parent.is_null() {
        check(rc, function)?;
    } else {
        let parent_type = if handle_type == HANDLE_STMT { HANDLE_DBC } else { HANDLE_ENV };
        check_with_diag(driver, parent_type, parent, rc, function)?;
    }
    if handle.is_null() {
        return Err(MarshalError::Internal(format!("{} returned a null handle", function)));
    }
    Ok(handle)
}

/// Frees `handle` once; later calls are no-ops.
fn free_once(driver: &dyn DriverApi, handle_type: i16, handle: Handle, freed: &AtomicBool) -> Result<()> {
    if freed.swap(true, Ordering::AcqRel) {
        return Ok(());
    }
    let rc = unsafe { driver.free_handle(handle_type, handle) };
    check_with_diag(driver, handle_type, handle, rc, "SQLFreeHandle").map(|_| ())
}

pub struct Environment {
    driver: Arc<dyn DriverApi>,
    handle: Handle,
    freed: AtomicBool,
}

// ODBC 3.x handles may be used from any thread; the driver manager serialises access.
unsafe impl Send for Environment {}
unsafe impl Sync for Environment {}

impl Environment {
    pub fn new(driver: Arc<dyn DriverApi>) -> Result<Self> {
        let handle = alloc(driver.as_ref(), HANDLE_ENV, null_mut(), "SQLAllocHandle(ENV)")?;
        let env = Self {
            driver,
            handle,
            freed: AtomicBool::new(false),
        };
        let rc = unsafe {
            env.driver
                .set_env_attr(handle, ATTR_ODBC_VERSION, OV_ODBC3 as Pointer, IS_INTEGER)
        };
        check_with_diag(env.driver.as_ref(), HANDLE_ENV, handle, rc, "SQLSetEnvAttr")?;
        log::debug!("Allocated ODBC 3 environment");
        Ok(env)
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn driver(&self) -> &Arc<dyn DriverApi> {
        &self.driver
    }

    pub fn free(&self) -> Result<()> {
        free_once(self.driver.as_ref(), HANDLE_ENV, self.handle, &self.freed)
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if let Err(e) = self.free() {
            log::warn!("Failed to free environment handle: {}", e);
        }
    }
}

pub struct Connection {
    env: Arc<Environment>,
    handle: Handle,
    connection_string: Zeroizing<Vec<u16>>,
    connected: AtomicBool,
    freed: AtomicBool,
}

unsafe impl Send for Connection {}
unsafe impl Sync for Connection {}

impl Connection {
    /// Connects without prompting. `attributes` are applied before connect
    /// (login timeout, autocommit, ...).
    pub fn connect(
        env: Arc<Environment>,
        connection_string: &str,
        attributes: &[(i32, usize)],
    ) -> Result<Self> {
        let driver = env.driver().clone();
        let handle = alloc(driver.as_ref(), HANDLE_DBC, env.handle(), "SQLAllocHandle(DBC)")?;
        let conn = Self {
            env,
            handle,
            connection_string: Zeroizing::new(connection_string.encode_utf16().collect()),
            connected: AtomicBool::new(false),
            freed: AtomicBool::new(false),
        };
        for (attribute, value) in attributes {
            conn.set_attribute(*attribute, *value)?;
        }

        let logger = StructuredLogger::default();
        let units = &conn.connection_string;
        let rc = unsafe {
            driver.driver_connect(
                handle,
                null_mut(),
                units.as_ptr(),
                units.len() as i16,
                null_mut(),
                0,
                null_mut(),
                DRIVER_NOPROMPT,
            )
        };
        if let Err(e) = check_with_diag(driver.as_ref(), HANDLE_DBC, handle, rc, "SQLDriverConnectW") {
            logger.log_connection(Level::Error, connection_string, "failed");
            return Err(e);
        }
        conn.connected.store(true, Ordering::Release);
        logger.log_connection(Level::Info, connection_string, "established");
        Ok(conn)
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn driver(&self) -> &Arc<dyn DriverApi> {
        self.env.driver()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_attribute(&self, attribute: i32, value: usize) -> Result<()> {
        let driver = self.driver();
        let rc = unsafe {
            driver.set_connect_attr(self.handle, attribute, value as Pointer, IS_UINTEGER)
        };
        check_with_diag(driver.as_ref(), HANDLE_DBC, self.handle, rc, "SQLSetConnectAttrW").map(|_| ())
    }

    pub fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let driver = self.driver();
        let rc = unsafe { driver.disconnect(self.handle) };
        check_with_diag(driver.as_ref(), HANDLE_DBC, self.handle, rc, "SQLDisconnect")?;
        log::info!("Disconnected");
        Ok(())
    }

    /// Disconnects if needed, then frees the DBC handle.
    pub fn free(&self) -> Result<()> {
        self.disconnect()?;
        free_once(self.driver().as_ref(), HANDLE_DBC, self.handle, &self.freed)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.free() {
            log::warn!("Failed to release connection handle: {}", e);
        }
    }
}

pub struct StatementHandle {
    driver: Arc<dyn DriverApi>,
    handle: Handle,
    _parent: Option<Arc<Connection>>,
    freed: AtomicBool,
}

unsafe impl Send for StatementHandle {}
unsafe impl Sync for StatementHandle {}

impl StatementHandle {
    pub fn allocate(conn: &Arc<Connection>) -> Result<Self> {
        let driver = conn.driver().clone();
        let handle = alloc(driver.as_ref(), HANDLE_STMT, conn.handle(), "SQLAllocHandle(STMT)")?;
        Ok(Self {
            driver,
            handle,
            _parent: Some(conn.clone()),
            freed: AtomicBool::new(false),
        })
    }

    /// Adopts a handle allocated elsewhere. It is freed on drop like any other.
    pub fn from_raw(driver: Arc<dyn DriverApi>, handle: Handle) -> Self {
        Self {
            driver,
            handle,
            _parent: None,
            freed: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn driver(&self) -> &Arc<dyn DriverApi> {
        &self.driver
    }

    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::Acquire)
    }

    pub fn free(&self) -> Result<()> {
        free_once(self.driver.as_ref(), HANDLE_STMT, self.handle, &self.freed)
    }
}

impl Drop for StatementHandle {
    fn drop(&mut self) {
        if let Err(e) = self.free() {
            log::warn!("Failed to free statement handle: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use odbc_api::sys::SqlReturn;

    fn env(mock: &Arc<MockDriver>) -> Arc<Environment> {
        Arc::new(Environment::new(mock.clone()).unwrap())
    }

    #[test]
    fn test_environment_sets_odbc3() {
        let mock = Arc::new(MockDriver::new());
        let _env = env(&mock);
        assert_eq!(mock.env_attrs(), vec![(ATTR_ODBC_VERSION, OV_ODBC3)]);
    }

    #[test]
    fn test_connect_and_drop_order() {
        let mock = Arc::new(MockDriver::new());
        let conn = Arc::new(
            Connection::connect(env(&mock), "DSN=test;PWD=pw", &[(113, 5)]).unwrap(),
        );
        assert!(conn.is_connected());
        assert_eq!(mock.connection_string().as_deref(), Some("DSN=test;PWD=pw"));
        assert_eq!(mock.connect_attrs(), vec![(113, 5)]);

        let stmt = StatementHandle::allocate(&conn).unwrap();
        drop(conn);
        // statement still holds the connection
        assert!(mock.is_connected());
        drop(stmt);
        assert!(!mock.is_connected());
        let freed: Vec<i16> = mock.freed_handles().iter().map(|(t, _)| *t).collect();
        assert_eq!(freed, vec![HANDLE_STMT, HANDLE_DBC, HANDLE_ENV]);
    }

    #[test]
    fn test_free_is_idempotent() {
        let mock = Arc::new(MockDriver::new());
        let stmt = StatementHandle::from_raw(mock.clone(), mock.stmt_handle());
        stmt.free().unwrap();
        stmt.free().unwrap();
        assert!(stmt.is_freed());
        drop(stmt);
        assert_eq!(mock.call_count("SQLFreeHandle"), 1);
    }

    #[test]
    fn test_connect_failure_carries_diagnostic() {
        let mock = Arc::new(MockDriver::new());
        mock.fail_next("SQLDriverConnectW", SqlReturn::ERROR);
        mock.push_diagnostic("08001", 17, "Server does not exist or access denied.");
        let err = match Connection::connect(env(&mock), "DSN=missing", &[]) {
            Ok(_) => panic!("connect should fail"),
            Err(e) => e,
        };
        assert_eq!(err.sqlstate(), "08001");
        assert!(err.is_retryable());
    }
}
