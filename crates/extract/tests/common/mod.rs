#![allow(dead_code, reason = "Each test binary uses a different subset of helpers")]

use anyhow::{Result, bail};
use parking_lot::Mutex;
use std::sync::Arc;
use strata_extract::{
    Diagnostic, ExtractConfig, ExtractedRule, ExtractionSession, FileId, Lifecycle, Severity,
    ThemeConfig, TransformOutput, TransformRequest, Transformer,
};

/// Stand-in for the real transform, driven by the source text.
///
/// Every line starting with `.` is one rule. A line `fail` makes the
/// transform error, `panic` makes it panic and `warn` adds a warning.
#[derive(Default)]
pub struct ScriptedTransformer {
    calls: Mutex<Vec<(String, u32)>>,
}

impl ScriptedTransformer {
    /// `(file, layer_base)` of every call so far.
    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().clone()
    }

    /// Layer bases requested for `file`, in call order.
    pub fn bases_for(&self, file: &str) -> Vec<u32> {
        self.calls
            .lock()
            .iter()
            .filter(|(called, _)| called == file)
            .map(|(_, base)| *base)
            .collect()
    }
}

impl Transformer for ScriptedTransformer {
    #[allow(clippy::panic, reason = "Exercises panic isolation in the session")]
    fn transform(&self, request: TransformRequest<'_>) -> Result<TransformOutput> {
        self.calls
            .lock()
            .push((request.file.to_string(), request.layer_base));
        let lines: Vec<&str> = request.source.lines().map(str::trim).collect();
        if lines.contains(&"fail") {
            bail!("unexpected token in {}", request.file);
        }
        if lines.contains(&"panic") {
            panic!("transform crashed on {}", request.file);
        }

        let base = request.layer_base;
        let rules: Vec<ExtractedRule> = lines
            .iter()
            .filter(|line| line.starts_with('.'))
            .zip(base..)
            .map(|(line, layer)| ExtractedRule {
                class_name: format!("_l{layer}"),
                css_text: (*line).to_owned(),
                layer,
            })
            .collect();
        let diagnostics = if lines.contains(&"warn") {
            vec![Diagnostic {
                message: "dynamic value kept at runtime".to_owned(),
                line: 1,
                column: 1,
                severity: Severity::Warning,
            }]
        } else {
            Vec::new()
        };
        Ok(TransformOutput {
            code: format!("// rewritten {} at {base}", request.file),
            next_layer: base + rules.len() as u32,
            rules,
            has_dynamic: !diagnostics.is_empty(),
            diagnostics,
        })
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A session over a fresh scripted transformer, returned alongside it.
pub fn session(lifecycle: Lifecycle) -> Result<(ExtractionSession, Arc<ScriptedTransformer>)> {
    session_with(lifecycle, ExtractConfig::default())
}

pub fn session_with(
    lifecycle: Lifecycle,
    config: ExtractConfig,
) -> Result<(ExtractionSession, Arc<ScriptedTransformer>)> {
    init_logging();
    let transformer = Arc::new(ScriptedTransformer::default());
    let session = ExtractionSession::new(
        lifecycle,
        config,
        ThemeConfig::default(),
        Arc::clone(&transformer) as Arc<dyn Transformer>,
    )?;
    Ok((session, transformer))
}

/// Source text that passes the filter and yields `rules`.
pub fn source(rules: &[&str]) -> String {
    let mut text = String::from("import { css } from 'strata';\n");
    for rule in rules {
        text.push_str(rule);
        text.push('\n');
    }
    text
}

pub fn id(path: &str) -> FileId {
    FileId::from(path)
}
