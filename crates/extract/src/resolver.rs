//! Exposes the aggregate stylesheet to the bundler as a virtual module.
//!
//! One-shot builds embed the stylesheet itself. Watch sessions embed a small
//! client stub instead, which fetches the live stylesheet from the dev
//! server and refetches it whenever the server announces a flush.

use crate::config::ExtractConfig;
use crate::session::ExtractionSession;
use anyhow::{Context as _, Result};
use log::info;
use serde_json::Value;
use std::borrow::Cow;
use std::fs;
use std::path::Path;

/// Bundlers treat ids with this prefix as internal, never touching the disk.
const RESOLVED_PREFIX: char = '\0';

/// How long the stub waits before its first fetch, so that the initial
/// request does not race the first transforms of the session.
pub const STUB_INITIAL_DELAY_MS: u64 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResolverMode {
    /// The stylesheet text is the module's content.
    OneShot,
    /// The module is a client stub talking to the live endpoint.
    Watch,
}

#[derive(Clone, Debug)]
pub struct VirtualStylesheet {
    mode: ResolverMode,
    id: String,
    resolved_id: String,
    endpoint_path: String,
    event_name: String,
}

impl VirtualStylesheet {
    pub fn new(mode: ResolverMode, config: &ExtractConfig) -> Self {
        Self {
            mode,
            id: config.virtual_id.clone(),
            resolved_id: format!("{RESOLVED_PREFIX}{}", config.virtual_id),
            endpoint_path: config.endpoint_path.clone(),
            event_name: config.event_name.clone(),
        }
    }

    /// Resolver matching the session's lifecycle and configuration.
    pub fn for_session(session: &ExtractionSession) -> Self {
        Self::new(session.lifecycle().resolver_mode(), session.config())
    }

    #[inline]
    pub const fn mode(&self) -> ResolverMode {
        self.mode
    }

    /// Import specifier source files use.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Map an import specifier to the internal module id, if it is ours.
    pub fn resolve_id(&self, specifier: &str) -> Option<&str> {
        (specifier == self.id).then_some(self.resolved_id.as_str())
    }

    /// Whether `module_id` is the resolved virtual stylesheet.
    pub fn is_virtual(&self, module_id: &str) -> bool {
        module_id == self.resolved_id
    }

    /// Module content for the virtual stylesheet.
    ///
    /// # Errors
    ///
    /// In one-shot mode, returns an error if the stylesheet cannot be
    /// generated.
    pub fn load(&self, session: &mut ExtractionSession) -> Result<String> {
        match self.mode {
            ResolverMode::OneShot => session.stylesheet(),
            ResolverMode::Watch => Ok(self.client_stub()),
        }
    }

    /// Make `code` import the virtual stylesheet so it ends up in the bundle.
    pub fn inject_import<'code>(&self, code: &'code str) -> Cow<'code, str> {
        if code.contains(self.id.as_str()) {
            Cow::Borrowed(code)
        } else {
            Cow::Owned(format!("import '{}';\n{code}", self.id))
        }
    }

    /// Write the aggregate stylesheet to `path`, creating parent directories.
    ///
    /// Returns `false` without writing when no file contributed any rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the stylesheet cannot be generated or written.
    pub fn emit(&self, session: &mut ExtractionSession, path: &Path) -> Result<bool> {
        let css = session.stylesheet()?;
        if css.is_empty() {
            return Ok(false);
        }
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating output directory {}", parent.display()))?;
        }
        fs::write(path, &css).with_context(|| format!("writing {}", path.display()))?;
        info!("[strata] wrote {} bytes of CSS to {}", css.len(), path.display());
        Ok(true)
    }

    /// Browser module that keeps a `<style>` element in sync with the live
    /// endpoint.
    pub fn client_stub(&self) -> String {
        let endpoint = js_string(&self.endpoint_path);
        let event = js_string(&self.event_name);
        format!(
            r#"const endpoint = {endpoint};
const style = document.createElement('style');
style.setAttribute('data-strata', '');
document.head.appendChild(style);
let loaded = false;
let timer;
async function refresh() {{
  const response = await fetch(endpoint, {{ cache: 'no-store' }});
  if (!response.ok) return;
  style.textContent = await response.text();
  loaded = true;
}}
function schedule(delay) {{
  clearTimeout(timer);
  timer = setTimeout(() => {{ refresh().catch(() => {{}}); }}, delay);
}}
if (import.meta.hot) {{
  import.meta.hot.on({event}, () => schedule(loaded ? 0 : {STUB_INITIAL_DELAY_MS}));
}}
schedule({STUB_INITIAL_DELAY_MS});
"#
        )
    }
}

/// Quote `value` as a JavaScript string literal.
fn js_string(value: &str) -> String {
    Value::from(value).to_string()
}
