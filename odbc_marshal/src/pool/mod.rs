//! Driver-manager connection pooling switch. Policy (sizes, timeouts) is
//! recorded for the embedding layer; the driver manager does the pooling.

use crate::driver::{
    check, DriverApi, Pointer, ATTR_CONNECTION_POOLING, CP_OFF, CP_ONE_PER_HENV, IS_INTEGER,
};
use crate::error::{MarshalError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolingConfig {
    pub enabled: bool,
    pub max_size: u32,
    pub idle_timeout_secs: u64,
}

impl Default for PoolingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_size: 100,
            idle_timeout_secs: 600,
        }
    }
}

lazy_static::lazy_static! {
    static ref POOLING: Mutex<PoolingConfig> = Mutex::new(PoolingConfig::default());
}

fn store(config: PoolingConfig) -> Result<()> {
    let mut guard = POOLING
        .lock()
        .map_err(|_| MarshalError::Internal("pooling config lock poisoned".to_string()))?;
    *guard = config;
    Ok(())
}

fn set_process_pooling(driver: &dyn DriverApi, mode: usize) -> Result<()> {
    // process-level attribute: set on the null environment handle
    let rc = unsafe {
        driver.set_env_attr(
            std::ptr::null_mut(),
            ATTR_CONNECTION_POOLING,
            mode as Pointer,
            IS_INTEGER,
        )
    };
    check(rc, "SQLSetEnvAttr(SQL_ATTR_CONNECTION_POOLING)").map(|_| ())
}

/// Must run before the first environment is allocated to take effect.
pub fn enable_pooling(driver: &dyn DriverApi, config: PoolingConfig) -> Result<()> {
    set_process_pooling(driver, CP_ONE_PER_HENV)?;
    log::info!(
        "Connection pooling enabled (max_size={}, idle_timeout={}s)",
        config.max_size,
        config.idle_timeout_secs
    );
    store(PoolingConfig {
        enabled: true,
        ..config
    })
}

pub fn disable_pooling(driver: &dyn DriverApi) -> Result<()> {
    set_process_pooling(driver, CP_OFF)?;
    log::info!("Connection pooling disabled");
    let current = pooling_config();
    store(PoolingConfig {
        enabled: false,
        ..current
    })
}

pub fn pooling_config() -> PoolingConfig {
    POOLING
        .lock()
        .map(|guard| guard.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use odbc_api::sys::SqlReturn;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_enable_then_disable() {
        let mock = MockDriver::new();
        let config = PoolingConfig {
            enabled: false,
            max_size: 8,
            idle_timeout_secs: 30,
        };
        enable_pooling(&mock, config).unwrap();
        let current = pooling_config();
        assert!(current.enabled);
        assert_eq!(current.max_size, 8);

        disable_pooling(&mock).unwrap();
        assert!(!pooling_config().enabled);
        assert_eq!(
            mock.env_attrs(),
            vec![
                (ATTR_CONNECTION_POOLING, CP_ONE_PER_HENV),
                (ATTR_CONNECTION_POOLING, CP_OFF)
            ]
        );
    }

    #[test]
    #[serial]
    fn test_failed_enable_keeps_config() {
        let mock = MockDriver::new();
        disable_pooling(&mock).unwrap();
        mock.fail_next("SQLSetEnvAttr", SqlReturn::ERROR);
        assert!(enable_pooling(&mock, PoolingConfig::default()).is_err());
        assert!(!pooling_config().enabled);
    }

    #[test]
    fn test_config_serde() {
        let json = serde_json::to_string(&PoolingConfig::default()).unwrap();
        let back: PoolingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PoolingConfig::default());
    }
}
