//! Per-file record of the most recently extracted rules.

use crate::transform::Diagnostic;
use core::fmt;
use core::hash::Hasher as _;
use rustc_hash::FxHasher;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Stable identifier of a source file (its path or bundler id).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(Arc<str>);

impl FileId {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for FileId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&Path> for FileId {
    fn from(value: &Path) -> Self {
        Self(Arc::from(value.to_string_lossy().as_ref()))
    }
}

/// Content hash of a processed source text.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn of(source: &str) -> Self {
        let mut hasher = FxHasher::default();
        hasher.write(source.as_bytes());
        hasher.write_usize(source.len());
        Self(hasher.finish())
    }
}

/// What the pipeline remembers about one file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileRecord {
    /// Extracted rule texts, in the order the transform returned them.
    pub rules: Vec<String>,
    /// Layer base the rules were generated with.
    pub layer_base: u32,
    /// First layer after this file's range.
    pub next_layer: u32,
    /// Fingerprint of the last successfully transformed source.
    pub fingerprint: Option<Fingerprint>,
    /// Rewritten source from that transform, reused for no-op re-invocations.
    pub code: Option<String>,
    /// Diagnostics that transform reported, replayed alongside `code`.
    pub diagnostics: Vec<Diagnostic>,
}

/// All files' current rule lists.
///
/// Files keep the position of their first appearance, so flattening is
/// deterministic for a given sequence of updates. Cascade order itself comes
/// from each rule's embedded layer, not from this order.
#[derive(Clone, Debug, Default)]
pub struct RuleStore {
    order: Vec<FileId>,
    records: HashMap<FileId, FileRecord>,
    revision: u64,
}

impl RuleStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the rule list for `file`. Other files are never touched.
    ///
    /// An empty list still overwrites: the file no longer extracts anything.
    pub fn put(&mut self, file: &FileId, rules: Vec<String>) {
        if let Some(record) = self.records.get_mut(file) {
            record.rules = rules;
        } else {
            self.order.push(file.clone());
            self.records.insert(
                file.clone(),
                FileRecord {
                    rules,
                    ..FileRecord::default()
                },
            );
        }
        self.revision = self.revision.wrapping_add(1);
    }

    /// Replace the whole record for `file`.
    pub fn put_record(&mut self, file: &FileId, record: FileRecord) {
        if self.records.insert(file.clone(), record).is_none() {
            self.order.push(file.clone());
        }
        self.revision = self.revision.wrapping_add(1);
    }

    /// Rules last stored for `file`; empty if it never contributed.
    pub fn get(&self, file: &FileId) -> &[String] {
        self.records
            .get(file)
            .map(|record| record.rules.as_slice())
            .unwrap_or_default()
    }

    pub fn record(&self, file: &FileId) -> Option<&FileRecord> {
        self.records.get(file)
    }

    pub fn contains(&self, file: &FileId) -> bool {
        self.records.contains_key(file)
    }

    /// Forget a file the host removed from the project.
    pub fn remove(&mut self, file: &FileId) -> Option<FileRecord> {
        let removed = self.records.remove(file)?;
        self.order.retain(|known| known != file);
        self.revision = self.revision.wrapping_add(1);
        Some(removed)
    }

    /// Every stored rule, flattened across files.
    pub fn all(&self) -> Vec<&str> {
        self.iter()
            .flat_map(|(_, record)| record.rules.iter().map(String::as_str))
            .collect()
    }

    /// Files paired with their records, in first-appearance order.
    pub fn iter(&self) -> impl Iterator<Item = (&FileId, &FileRecord)> {
        self.order
            .iter()
            .filter_map(|file| self.records.get(file).map(|record| (file, record)))
    }

    pub fn files(&self) -> impl Iterator<Item = &FileId> {
        self.order.iter()
    }

    pub fn rule_count(&self) -> usize {
        self.records.values().map(|record| record.rules.len()).sum()
    }

    /// Bumped on every mutation; equal revisions mean equal contents.
    #[inline]
    pub const fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_replaces_only_its_file() {
        let mut store = RuleStore::new();
        let card = FileId::from("card.ts");
        let list = FileId::from("list.ts");
        store.put(&card, vec!["._a{color:red}".to_owned()]);
        store.put(&list, vec!["._l{margin:0}".to_owned()]);
        store.put(&card, vec!["._b{padding:4px}".to_owned()]);

        assert_eq!(store.get(&card), ["._b{padding:4px}"]);
        assert_eq!(store.get(&list), ["._l{margin:0}"]);
        assert_eq!(store.all(), ["._b{padding:4px}", "._l{margin:0}"]);
    }

    #[test]
    fn empty_put_overwrites() {
        let mut store = RuleStore::new();
        let card = FileId::from("card.ts");
        store.put(&card, vec!["._a{color:red}".to_owned()]);
        store.put(&card, Vec::new());
        assert!(store.get(&card).is_empty());
        assert!(store.contains(&card));
        assert_eq!(store.rule_count(), 0);
    }

    #[test]
    fn revision_tracks_mutations() {
        let mut store = RuleStore::new();
        let card = FileId::from("card.ts");
        let start = store.revision();
        store.put(&card, Vec::new());
        assert_ne!(store.revision(), start);
        let after_put = store.revision();
        assert!(store.remove(&FileId::from("missing.ts")).is_none());
        assert_eq!(store.revision(), after_put);
        assert!(store.remove(&card).is_some());
        assert_ne!(store.revision(), after_put);
        assert_eq!(store.files().count(), 0);
    }

    #[test]
    fn fingerprint_is_content_based() {
        assert_eq!(Fingerprint::of("a"), Fingerprint::of("a"));
        assert_ne!(Fingerprint::of("a"), Fingerprint::of("b"));
    }
}
