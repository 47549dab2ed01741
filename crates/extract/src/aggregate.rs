//! Derives the combined stylesheet from the rule store.

use crate::store::RuleStore;
use anyhow::Result;
use log::{debug, error};
use tracing::info_span;

/// The external rule-ordering and text-generation function.
///
/// Must be deterministic for a given list of rule texts; ordering is taken
/// from the layer each rule embeds.
pub trait RuleGenerator: Send + Sync {
    /// Produce stylesheet text from rule texts.
    ///
    /// # Errors
    ///
    /// Returns an error if the rules cannot be combined.
    fn generate_css(&self, rules: &[&str]) -> Result<String>;
}

impl<F> RuleGenerator for F
where
    F: Fn(&[&str]) -> Result<String> + Send + Sync,
{
    fn generate_css(&self, rules: &[&str]) -> Result<String> {
        self(rules)
    }
}

/// Joins rule texts verbatim, separated by a blank line.
#[derive(Clone, Copy, Debug, Default)]
pub struct JoinedRules;

impl RuleGenerator for JoinedRules {
    fn generate_css(&self, rules: &[&str]) -> Result<String> {
        Ok(rules.join("\n\n"))
    }
}

/// A complete stylesheet and the store revision it was derived from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Aggregate {
    pub text: String,
    pub revision: u64,
}

pub struct Aggregator {
    generator: Box<dyn RuleGenerator>,
    annotate_sources: bool,
    /// Most recent successful recompute; never a partial result.
    last_good: Option<Aggregate>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(Box::new(JoinedRules))
    }
}

impl Aggregator {
    pub fn new(generator: Box<dyn RuleGenerator>) -> Self {
        Self {
            generator,
            annotate_sources: false,
            last_good: None,
        }
    }

    /// Append one `sourceMappingURL` comment per contributing file.
    #[must_use]
    pub fn with_source_annotations(mut self, annotate: bool) -> Self {
        self.annotate_sources = annotate;
        self
    }

    /// Current stylesheet text for `store`.
    ///
    /// Empty when no file contributes a rule. Repeated calls without an
    /// intervening store mutation return the memoised text unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule generator fails. The previous good
    /// aggregate stays available through [`last_good`](Self::last_good).
    pub fn recompute(&mut self, store: &RuleStore) -> Result<String> {
        if let Some(current) = self
            .last_good
            .as_ref()
            .filter(|aggregate| aggregate.revision == store.revision())
        {
            debug!("[strata] aggregate is current at revision {}", current.revision);
            return Ok(current.text.clone());
        }

        let _span = info_span!("strata.aggregate", revision = store.revision()).entered();
        let rules = store.all();
        let text = if rules.is_empty() {
            String::new()
        } else {
            let mut css = self.generator.generate_css(&rules).inspect_err(|err| {
                error!("[strata] stylesheet generation failed: {err:#}");
            })?;
            if self.annotate_sources {
                append_source_annotations(&mut css, store);
            }
            css
        };

        self.last_good = Some(Aggregate {
            text: text.clone(),
            revision: store.revision(),
        });
        Ok(text)
    }

    /// True if the store changed since the last successful recompute.
    pub fn is_stale(&self, store: &RuleStore) -> bool {
        self.last_good
            .as_ref()
            .is_none_or(|aggregate| aggregate.revision != store.revision())
    }

    pub fn last_good(&self) -> Option<&Aggregate> {
        self.last_good.as_ref()
    }
}

fn append_source_annotations(css: &mut String, store: &RuleStore) {
    let mut contributing = store
        .iter()
        .filter(|(_, record)| !record.rules.is_empty())
        .peekable();
    if contributing.peek().is_none() {
        return;
    }
    css.push('\n');
    for (file, _) in contributing {
        css.push_str(&format!("\n/* sourceMappingURL={file} */"));
    }
}
