//! Cheap checks deciding which files enter the pipeline at all.

use crate::config::ExtractConfig;
use crate::store::FileId;
use anyhow::{Context as _, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Why a file bypassed the pipeline. None of these are errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// The extension is not in the processed allow-list.
    UnsupportedExtension,
    /// The path matches an excluded pattern (dependency or vendor trees).
    Excluded,
    /// The source never mentions the styling system.
    NoMarker,
}

/// Loader the host should use for the (possibly rewritten) source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Ts,
    Tsx,
    Js,
    Jsx,
}

impl SourceKind {
    /// Loader for a file path. Anything unrecognised is plain JavaScript.
    pub fn from_path(path: &str) -> Self {
        match extension_of(path) {
            Some("tsx") => Self::Tsx,
            Some("ts" | "mts" | "cts") => Self::Ts,
            Some("jsx") => Self::Jsx,
            _ => Self::Js,
        }
    }

    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ts => "ts",
            Self::Tsx => "tsx",
            Self::Js => "js",
            Self::Jsx => "jsx",
        }
    }
}

/// Extension allow-list, excluded-path globs and the marker text.
#[derive(Clone, Debug)]
pub struct FileFilter {
    extensions: Vec<String>,
    excluded: GlobSet,
    marker: String,
}

impl FileFilter {
    /// Build the filter from session configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any exclude pattern is not a valid glob.
    pub fn from_config(config: &ExtractConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.exclude {
            let glob = Glob::new(pattern)
                .with_context(|| format!("invalid exclude pattern '{pattern}'"))?;
            builder.add(glob);
        }
        let excluded = builder
            .build()
            .context("failed to build exclude glob set")?;
        Ok(Self {
            extensions: config
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            excluded,
            marker: config.import_marker.clone(),
        })
    }

    /// Returns the reason to skip `file`, or `None` if it should be transformed.
    ///
    /// Ordered cheapest first: extension, path patterns, then a scan of the
    /// source for the marker.
    pub fn check(&self, file: &FileId, source: &str) -> Option<SkipReason> {
        let path = file.as_str();
        let supported = extension_of(path).is_some_and(|ext| {
            self.extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        });
        if !supported {
            return Some(SkipReason::UnsupportedExtension);
        }
        if self.is_excluded(path) {
            return Some(SkipReason::Excluded);
        }
        if !source.contains(self.marker.as_str()) {
            return Some(SkipReason::NoMarker);
        }
        None
    }

    /// Whether `path` sits in an excluded tree.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded.is_match(strip_query(path))
    }
}

/// Bundler ids may carry a query suffix (`file.tsx?v=123`).
fn strip_query(path: &str) -> &str {
    path.split_once('?').map_or(path, |(head, _)| head)
}

fn extension_of(path: &str) -> Option<&str> {
    let path = strip_query(path);
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    name.rsplit_once('.').map(|(_, ext)| ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> Result<FileFilter> {
        FileFilter::from_config(&ExtractConfig::default())
    }

    #[test]
    fn accepts_marked_typescript() -> Result<()> {
        let filter = filter()?;
        let file = FileId::from("/app/src/card.tsx");
        assert_eq!(filter.check(&file, "import { tw } from 'strata'"), None);
        Ok(())
    }

    #[test]
    fn skip_reasons() -> Result<()> {
        let filter = filter()?;
        let marked = "import 'strata'";
        assert_eq!(
            filter.check(&FileId::from("/app/styles.css"), marked),
            Some(SkipReason::UnsupportedExtension)
        );
        assert_eq!(
            filter.check(&FileId::from("/app/node_modules/pkg/index.js"), marked),
            Some(SkipReason::Excluded)
        );
        assert_eq!(
            filter.check(&FileId::from("/app/src/plain.ts"), "export const x = 1"),
            Some(SkipReason::NoMarker)
        );
        Ok(())
    }

    #[test]
    fn query_suffix_is_ignored() -> Result<()> {
        let filter = filter()?;
        let file = FileId::from("/app/src/card.tsx?t=1700000000");
        assert_eq!(filter.check(&file, "strata"), None);
        assert_eq!(SourceKind::from_path(file.as_str()), SourceKind::Tsx);
        Ok(())
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let config = ExtractConfig {
            exclude: vec!["[unclosed".to_owned()],
            ..ExtractConfig::default()
        };
        assert!(FileFilter::from_config(&config).is_err());
    }
}
