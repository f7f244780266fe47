use log::Level;
use std::collections::BTreeMap;

const SECRET_KEYS: &[&str] = &["pwd", "password", "accesstoken", "access_token", "secret"];

pub struct StructuredLogger {
    enabled: bool,
}

impl StructuredLogger {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// SQL text and caller metadata. Parameter values never pass through here.
    pub fn log_statement(&self, level: Level, sql: &str, metadata: &BTreeMap<&str, String>) {
        if !self.enabled {
            return;
        }
        log::log!(level, "Statement: {}{}", sql, render_metadata(metadata));
    }

    pub fn log_fetch(&self, level: Level, rows: usize, batch_size: usize) {
        if !self.enabled {
            return;
        }
        log::log!(level, "Fetched {} rows (batch size {})", rows, batch_size);
    }

    pub fn log_connection(&self, level: Level, connection_string: &str, action: &str) {
        if !self.enabled {
            return;
        }
        log::log!(
            level,
            "Connection {}: {}",
            action,
            mask_connection_string(connection_string)
        );
    }

    pub fn log_error(&self, error: &dyn std::fmt::Display, metadata: &BTreeMap<&str, String>) {
        if !self.enabled {
            return;
        }
        log::error!("Error: {}{}", error, render_metadata(metadata));
    }
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new(true)
    }
}

fn render_metadata(metadata: &BTreeMap<&str, String>) -> String {
    metadata
        .iter()
        .map(|(key, value)| format!(", {}={}", key, value))
        .collect()
}

fn split_connection_string_parts(connection_string: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    let mut brace_depth = 0u32;

    for (idx, ch) in connection_string.char_indices() {
        match ch {
            '{' => brace_depth = brace_depth.saturating_add(1),
            '}' => brace_depth = brace_depth.saturating_sub(1),
            ';' if brace_depth == 0 => {
                parts.push(&connection_string[start..idx]);
                start = idx + ch.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&connection_string[start..]);
    parts
}

/// Replaces the value of every credential key with `***`. Braced values
/// containing `;` are treated as a single value.
pub fn mask_connection_string(connection_string: &str) -> String {
    split_connection_string_parts(connection_string)
        .into_iter()
        .map(|part| match part.split_once('=') {
            Some((key, _)) if SECRET_KEYS.contains(&key.trim().to_ascii_lowercase().as_str()) => {
                format!("{}=***", key)
            }
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}
