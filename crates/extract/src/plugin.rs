//! Bundler-facing facade: the hooks a host build tool calls.

use crate::filter::SourceKind;
use crate::resolver::VirtualStylesheet;
use crate::session::{ExtractionSession, ProcessOutcome};
use crate::store::FileId;
use crate::transform::{Diagnostic, Severity};
use anyhow::Result;
use log::debug;

/// A diagnostic in the shape bundlers report them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub text: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl Message {
    fn from_diagnostic(file: &FileId, diagnostic: &Diagnostic) -> Self {
        Self {
            text: diagnostic.message.clone(),
            file: file.to_string(),
            line: diagnostic.line,
            column: diagnostic.column,
        }
    }
}

/// What the host compiles in place of a processed module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleOutput {
    pub code: String,
    pub kind: SourceKind,
    pub warnings: Vec<Message>,
    pub errors: Vec<Message>,
    /// The stylesheet changed because of this module.
    pub mutated: bool,
}

pub struct BuildPlugin {
    session: ExtractionSession,
    stylesheet: VirtualStylesheet,
}

impl BuildPlugin {
    pub fn new(session: ExtractionSession) -> Self {
        let stylesheet = VirtualStylesheet::for_session(&session);
        Self {
            session,
            stylesheet,
        }
    }

    pub fn resolve_id(&self, specifier: &str) -> Option<&str> {
        self.stylesheet.resolve_id(specifier)
    }

    /// Content for `module_id`, or `None` if the module is not ours.
    ///
    /// # Errors
    ///
    /// Returns an error if a one-shot stylesheet cannot be generated.
    pub fn load(&mut self, module_id: &str) -> Result<Option<String>> {
        if !self.stylesheet.is_virtual(module_id) {
            return Ok(None);
        }
        self.stylesheet.load(&mut self.session).map(Some)
    }

    /// Process one module. `None` means the host keeps the module as is.
    pub fn transform(&mut self, module_id: &str, code: &str) -> Option<ModuleOutput> {
        let file = FileId::from(module_id);
        let kind = SourceKind::from_path(module_id);
        let (code, diagnostics, mutated) = match self.session.process(&file, code) {
            ProcessOutcome::Skipped(reason) => {
                debug!("[strata] {file} left untouched: {reason:?}");
                return None;
            }
            ProcessOutcome::Unchanged { code, diagnostics } => (
                self.stylesheet.inject_import(&code).into_owned(),
                diagnostics,
                false,
            ),
            ProcessOutcome::Transformed(transformed) => (
                self.stylesheet.inject_import(&transformed.code).into_owned(),
                transformed.diagnostics,
                true,
            ),
            ProcessOutcome::Fallback(fallback) => {
                let message = Message {
                    text: format!("{:#}", fallback.error),
                    file: file.to_string(),
                    line: 0,
                    column: 0,
                };
                return Some(ModuleOutput {
                    code: fallback.code,
                    kind,
                    warnings: vec![message],
                    errors: Vec::new(),
                    mutated: false,
                });
            }
        };

        let (errors, warnings) = diagnostics
            .iter()
            .partition::<Vec<_>, _>(|diagnostic| diagnostic.severity == Severity::Error);
        Some(ModuleOutput {
            code,
            kind,
            warnings: warnings
                .into_iter()
                .map(|diagnostic| Message::from_diagnostic(&file, diagnostic))
                .collect(),
            errors: errors
                .into_iter()
                .map(|diagnostic| Message::from_diagnostic(&file, diagnostic))
                .collect(),
            mutated,
        })
    }

    /// Whether an edited file affects the stylesheet module, i.e. it
    /// currently contributes rules.
    pub fn handle_hot_update(&self, module_id: &str) -> bool {
        !self.session.store().get(&FileId::from(module_id)).is_empty()
    }

    /// Forget a deleted module. Returns whether it had contributed.
    pub fn remove(&mut self, module_id: &str) -> bool {
        self.session.remove_file(&FileId::from(module_id))
    }

    /// Write the stylesheet to the configured output file, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the stylesheet cannot be generated or written.
    pub fn emit_configured_output(&mut self) -> Result<bool> {
        self.session
            .config()
            .output_file
            .clone()
            .map_or(Ok(false), |path| self.stylesheet.emit(&mut self.session, &path))
    }

    #[inline]
    pub const fn stylesheet(&self) -> &VirtualStylesheet {
        &self.stylesheet
    }

    #[inline]
    pub const fn session(&self) -> &ExtractionSession {
        &self.session
    }

    #[inline]
    pub const fn session_mut(&mut self) -> &mut ExtractionSession {
        &mut self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractConfig;
    use crate::theme::ThemeConfig;
    use crate::transform::{ExtractedRule, TransformOutput, TransformRequest};
    use crate::Lifecycle;
    use anyhow::{anyhow, bail};
    use std::sync::Arc;

    fn fake_transform(request: TransformRequest<'_>) -> Result<TransformOutput> {
        if request.source.contains("broken") {
            bail!("unexpected token");
        }
        let base = request.layer_base;
        let rules = if request.source.contains("unstyled") {
            Vec::new()
        } else {
            vec![ExtractedRule {
                class_name: format!("_c{base}"),
                css_text: format!("@layer l{base} {{ ._c{base} {{ color: red; }} }}"),
                layer: base,
            }]
        };
        Ok(TransformOutput {
            code: format!("export const card = '_c{base}';"),
            next_layer: base + rules.len() as u32,
            rules,
            has_dynamic: false,
            diagnostics: vec![Diagnostic {
                message: "prefer tokens".to_owned(),
                line: 2,
                column: 5,
                severity: Severity::Warning,
            }],
        })
    }

    fn plugin(lifecycle: Lifecycle) -> Result<BuildPlugin> {
        let session = ExtractionSession::new(
            lifecycle,
            ExtractConfig::default(),
            ThemeConfig::default(),
            Arc::new(fake_transform),
        )?;
        Ok(BuildPlugin::new(session))
    }

    #[test]
    fn transformed_module_imports_stylesheet() -> Result<()> {
        let mut plugin = plugin(Lifecycle::Build)?;
        let output = plugin
            .transform("/src/card.ts", "import { css } from 'strata';")
            .ok_or_else(|| anyhow!("module was skipped"))?;
        assert!(output.code.starts_with("import 'virtual:strata.css';\n"));
        assert_eq!(output.kind, SourceKind::Ts);
        assert_eq!(output.warnings.len(), 1);
        assert_eq!(output.warnings[0].line, 2);
        assert!(output.errors.is_empty());
        assert!(output.mutated);
        assert!(plugin.handle_hot_update("/src/card.ts"));

        let css = plugin.load("\0virtual:strata.css")?;
        assert_eq!(css.as_deref(), Some("@layer l0 { ._c0 { color: red; } }"));
        Ok(())
    }

    #[test]
    fn unchanged_module_keeps_its_warnings() -> Result<()> {
        let mut plugin = plugin(Lifecycle::Watch)?;
        let source = "import { css } from 'strata';";
        plugin.transform("/src/card.ts", source);
        let again = plugin
            .transform("/src/card.ts", source)
            .ok_or_else(|| anyhow!("module was skipped"))?;
        assert!(!again.mutated);
        assert_eq!(again.warnings.len(), 1);
        assert_eq!(again.warnings[0].text, "prefer tokens");
        Ok(())
    }

    #[test]
    fn hot_update_ignores_modules_without_rules() -> Result<()> {
        let mut plugin = plugin(Lifecycle::Watch)?;
        let output = plugin
            .transform("/src/plain.ts", "import 'strata'; // unstyled")
            .ok_or_else(|| anyhow!("module was skipped"))?;
        assert!(output.mutated);
        assert!(plugin.session().store().contains(&FileId::from("/src/plain.ts")));
        assert!(!plugin.handle_hot_update("/src/plain.ts"));
        Ok(())
    }

    #[test]
    fn unrelated_modules_are_left_alone() -> Result<()> {
        let mut plugin = plugin(Lifecycle::Build)?;
        assert!(plugin.transform("/src/util.ts", "export const x = 1;").is_none());
        assert!(plugin.transform("/src/logo.svg", "strata").is_none());
        assert_eq!(plugin.load("/src/util.ts")?, None);
        assert!(!plugin.handle_hot_update("/src/util.ts"));
        Ok(())
    }

    #[test]
    fn failed_module_falls_back_to_runtime_injection() -> Result<()> {
        let mut plugin = plugin(Lifecycle::Build)?;
        let output = plugin
            .transform("/src/bad.tsx", "import 'strata'; broken(")
            .ok_or_else(|| anyhow!("module was skipped"))?;
        assert_eq!(output.kind, SourceKind::Tsx);
        assert!(output.code.starts_with("import 'strata/inject';\n"));
        assert!(!output.mutated);
        assert_eq!(output.warnings.len(), 1);
        assert!(output.warnings[0].text.contains("unexpected token"));
        Ok(())
    }

    #[test]
    fn watch_plugin_serves_client_stub() -> Result<()> {
        let mut plugin = plugin(Lifecycle::Watch)?;
        let stub = plugin
            .load("\0virtual:strata.css")?
            .ok_or_else(|| anyhow!("virtual module not served"))?;
        assert!(stub.contains("/__strata/css"));
        Ok(())
    }
}
