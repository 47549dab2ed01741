//! Configuration for the extraction pipeline.
//!
//! Settings can be constructed programmatically, deserialized from a JSON
//! file, or layered over defaults from environment variables.

use anyhow::{Context as _, Result};
use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Settings shared by every integration of one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExtractConfig {
    /// Passed through to the transform; strict mode reports non-extractable
    /// expressions as errors instead of warnings.
    pub strict: bool,
    /// File extensions (without the dot) that enter the pipeline.
    pub extensions: Vec<String>,
    /// Glob patterns for paths that never enter the pipeline.
    pub exclude: Vec<String>,
    /// Text a source file must contain to be worth transforming.
    pub import_marker: String,
    /// Module prepended to a file whose transform failed, activating runtime
    /// style injection for it. `None` leaves the source untouched.
    pub fallback_import: Option<String>,
    /// Import specifier of the virtual stylesheet.
    pub virtual_id: String,
    /// Append a comment per contributing file after the generated CSS.
    pub annotate_sources: bool,
    /// Debounce window for watch-mode flushes.
    pub debounce_ms: u64,
    /// Path the live CSS endpoint answers on.
    pub endpoint_path: String,
    /// Event the dev server broadcasts after each flush.
    pub event_name: String,
    /// Where one-shot builds write the combined stylesheet, if anywhere.
    pub output_file: Option<PathBuf>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            strict: true,
            extensions: ["ts", "tsx", "js", "jsx"].map(String::from).to_vec(),
            exclude: vec!["**/node_modules/**".to_owned()],
            import_marker: "strata".to_owned(),
            fallback_import: Some("strata/inject".to_owned()),
            virtual_id: "virtual:strata.css".to_owned(),
            annotate_sources: false,
            debounce_ms: 100,
            endpoint_path: "/__strata/css".to_owned(),
            event_name: "strata:update".to_owned(),
            output_file: None,
        }
    }
}

impl ExtractConfig {
    /// Load configuration from environment variables over the defaults.
    ///
    /// Reads the following environment variables:
    /// - `STRATA_STRICT`: Set to "0" to disable strict mode (default: enabled)
    /// - `STRATA_DEBOUNCE_MS`: Flush debounce window in milliseconds (default: 100)
    /// - `STRATA_ANNOTATE_SOURCES`: Set to "1" to annotate generated CSS
    /// - `STRATA_OUTPUT_FILE`: Output path for one-shot builds
    #[inline]
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let strict = env::var("STRATA_STRICT").ok().as_deref() != Some("0");
        let debounce_ms = env::var("STRATA_DEBOUNCE_MS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .unwrap_or(defaults.debounce_ms);
        let annotate_sources = env::var("STRATA_ANNOTATE_SOURCES").ok().as_deref() == Some("1");
        let output_file = env::var_os("STRATA_OUTPUT_FILE")
            .filter(|val| !val.is_empty())
            .map(PathBuf::from);
        Self {
            strict,
            debounce_ms,
            annotate_sources,
            output_file,
            ..defaults
        }
    }

    /// Load configuration from a JSON file. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON for
    /// this structure.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Get the flush debounce window as a `Duration`.
    #[inline]
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
