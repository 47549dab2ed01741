//! The live CSS endpoint watch-mode clients fetch from.

use log::warn;
use parking_lot::Mutex;
use std::sync::Arc;
use strata_extract::BuildPlugin;

pub const CONTENT_TYPE: &str = "text/css; charset=utf-8";
pub const CACHE_CONTROL: &str = "no-store";

/// A transport-independent HTTP response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, &'static str)>,
    pub body: String,
}

impl LiveResponse {
    fn css(status: u16, body: String) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", CONTENT_TYPE), ("Cache-Control", CACHE_CONTROL)],
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| *value)
    }
}

#[derive(Clone)]
pub struct LiveEndpoint {
    plugin: Arc<Mutex<BuildPlugin>>,
    path: String,
}

impl LiveEndpoint {
    pub fn new(plugin: Arc<Mutex<BuildPlugin>>) -> Self {
        let path = plugin.lock().session().config().endpoint_path.clone();
        Self { plugin, path }
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Answer `request_path` if it addresses this endpoint.
    pub fn handle(&self, request_path: &str) -> Option<LiveResponse> {
        let path = request_path
            .split_once('?')
            .map_or(request_path, |(path, _)| path);
        (path == self.path).then(|| self.fetch())
    }

    /// The full current stylesheet, recomputed if any file changed.
    ///
    /// If the recompute fails the previous complete stylesheet is served, so
    /// clients never see a partial one.
    pub fn fetch(&self) -> LiveResponse {
        let mut plugin = self.plugin.lock();
        let session = plugin.session_mut();
        match session.stylesheet() {
            Ok(css) => LiveResponse::css(200, css),
            Err(err) => {
                warn!("[strata] serving previous stylesheet: {err:#}");
                match session.last_good_stylesheet() {
                    Some(css) => LiveResponse::css(200, css.to_owned()),
                    None => LiveResponse::css(503, String::new()),
                }
            }
        }
    }
}
