//! Opaque theme configuration handed to every transform call of a session.

use anyhow::{Context as _, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Theme tables (colors, spacing, typography, ...) loaded once per session.
///
/// The pipeline never looks inside; it only passes the same value to every
/// transform so all files of a session resolve tokens identically.
#[derive(Clone, Debug, PartialEq)]
pub struct ThemeConfig {
    value: Arc<Value>,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self::new(Value::Object(Map::new()))
    }
}

impl ThemeConfig {
    #[inline]
    pub fn new(value: Value) -> Self {
        Self {
            value: Arc::new(value),
        }
    }

    /// Parse a theme from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if `text` is not valid JSON.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value = serde_json::from_str(text).context("parsing theme JSON")?;
        Ok(Self::new(value))
    }

    /// Read and parse a theme file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading theme {}", path.display()))?;
        Self::from_json_str(&text)
    }

    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }
}
