//! Contract with the external source-to-rules transform.
//!
//! The transform parses a file's style expressions, rewrites the source and
//! returns the extracted rules. Its internals are not part of this crate;
//! hosts plug one in through [`Transformer`].

use crate::store::FileId;
use crate::theme::ThemeConfig;
use anyhow::Result;
use core::fmt;
use log::{error, warn};
use serde::{Deserialize, Serialize};

/// Inputs for transforming one file.
#[derive(Clone, Copy, Debug)]
pub struct TransformRequest<'src> {
    pub source: &'src str,
    pub file: &'src FileId,
    /// First layer the file's rules may use.
    pub layer_base: u32,
    pub theme: &'src ThemeConfig,
    pub strict: bool,
}

/// One extracted rule, ready to emit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedRule {
    pub class_name: String,
    pub css_text: String,
    pub layer: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub line: u32,
    pub column: u32,
    pub severity: Severity,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{} - {}", self.line, self.column, self.message)
    }
}

/// Result of a successful transform.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformOutput {
    /// Rewritten source for further compilation.
    pub code: String,
    pub rules: Vec<ExtractedRule>,
    /// First layer after the range this file consumed.
    pub next_layer: u32,
    /// Some expressions could only be resolved at runtime.
    pub has_dynamic: bool,
    pub diagnostics: Vec<Diagnostic>,
}

/// The external transform.
///
/// Failing is expressed by returning an error; the session catches it (and
/// any panic) at file granularity.
pub trait Transformer: Send + Sync {
    /// Transform one file.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be transformed.
    fn transform(&self, request: TransformRequest<'_>) -> Result<TransformOutput>;
}

impl<F> Transformer for F
where
    F: Fn(TransformRequest<'_>) -> Result<TransformOutput> + Send + Sync,
{
    fn transform(&self, request: TransformRequest<'_>) -> Result<TransformOutput> {
        self(request)
    }
}

/// Log diagnostics for `file` and return how many were errors.
///
/// Error-severity diagnostics are logged as errors but never abort the
/// pipeline; the host decides whether they fail the build.
pub fn report_diagnostics(file: &FileId, diagnostics: &[Diagnostic]) -> usize {
    let mut errors = 0;
    for diagnostic in diagnostics {
        match diagnostic.severity {
            Severity::Error => {
                errors += 1;
                error!("[strata] ERROR {file}:{diagnostic}");
            }
            Severity::Warning => warn!("[strata] WARN {file}:{diagnostic}"),
        }
    }
    errors
}
