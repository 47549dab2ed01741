//! The extraction session: transforms files and owns all pipeline state.
//!
//! Every mutation of the layer allocator and the rule store goes through
//! [`ExtractionSession::process`] (or its batch form). A failing transform
//! leaves both exactly as they were and only affects the failing file.

use crate::aggregate::{Aggregator, RuleGenerator};
use crate::config::ExtractConfig;
use crate::filter::{FileFilter, SkipReason};
use crate::layer::{LayerAllocator, LayerPolicy, Reservation};
use crate::store::{FileId, FileRecord, Fingerprint, RuleStore};
use crate::theme::ThemeConfig;
use crate::Lifecycle;
use crate::transform::{
    Diagnostic, TransformOutput, TransformRequest, Transformer, report_diagnostics,
};
use anyhow::{Error, Result, anyhow};
use core::any::Any;
use log::{debug, error, info};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::info_span;

/// A successful transform.
#[derive(Debug)]
pub struct Transformed {
    /// Rewritten source for further compilation.
    pub code: String,
    pub diagnostics: Vec<Diagnostic>,
    /// Error-severity diagnostics among `diagnostics`.
    pub error_count: usize,
    pub has_dynamic: bool,
    pub layer_base: u32,
    pub rule_count: usize,
}

/// A failed transform: the host compiles `code` instead.
#[derive(Debug)]
pub struct Fallback {
    /// The original source, annotated with the runtime-injection import
    /// when one is configured.
    pub code: String,
    pub error: Error,
}

#[derive(Debug)]
pub enum ProcessOutcome {
    /// The file bypassed the pipeline; the host uses its source as is.
    Skipped(SkipReason),
    /// Same source as the last successful transform; nothing was redone.
    Unchanged {
        code: String,
        /// Diagnostics from that transform.
        diagnostics: Vec<Diagnostic>,
    },
    Transformed(Transformed),
    Fallback(Fallback),
}

impl ProcessOutcome {
    /// Source the host should compile, if it differs from the input.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Skipped(_) => None,
            Self::Unchanged { code, .. } => Some(code),
            Self::Transformed(transformed) => Some(&transformed.code),
            Self::Fallback(fallback) => Some(&fallback.code),
        }
    }

    /// Whether the rule store changed, i.e. the stylesheet must be refreshed.
    pub const fn mutated_store(&self) -> bool {
        matches!(self, Self::Transformed(_))
    }
}

/// Per-file work decided before any transform runs in a batch.
enum Prepared {
    Done(ProcessOutcome),
    Pending {
        fingerprint: Fingerprint,
        reservation: Reservation,
    },
    /// Repeated file in one batch; processed after the parallel phase.
    Deferred,
}

pub struct ExtractionSession {
    lifecycle: Lifecycle,
    config: ExtractConfig,
    filter: FileFilter,
    theme: ThemeConfig,
    transformer: Arc<dyn Transformer>,
    allocator: LayerAllocator,
    store: RuleStore,
    aggregator: Aggregator,
    fallback_files: BTreeSet<FileId>,
}

impl ExtractionSession {
    /// Create a session for one lifecycle. The layer policy follows from it
    /// and never changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured exclude patterns are invalid.
    pub fn new(
        lifecycle: Lifecycle,
        config: ExtractConfig,
        theme: ThemeConfig,
        transformer: Arc<dyn Transformer>,
    ) -> Result<Self> {
        let filter = FileFilter::from_config(&config)?;
        let aggregator = Aggregator::default().with_source_annotations(config.annotate_sources);
        info!(
            "[strata] {lifecycle:?} session started with {:?} layers",
            lifecycle.layer_policy()
        );
        Ok(Self {
            lifecycle,
            filter,
            theme,
            transformer,
            allocator: LayerAllocator::new(lifecycle.layer_policy()),
            store: RuleStore::new(),
            aggregator,
            fallback_files: BTreeSet::new(),
            config,
        })
    }

    /// Replace the rule-ordering function (defaults to [`crate::JoinedRules`]).
    #[must_use]
    pub fn with_generator(mut self, generator: Box<dyn RuleGenerator>) -> Self {
        self.aggregator =
            Aggregator::new(generator).with_source_annotations(self.config.annotate_sources);
        self
    }

    /// Run one file through the pipeline.
    ///
    /// Never fails: transform errors (and panics) become
    /// [`ProcessOutcome::Fallback`] for this file only.
    pub fn process(&mut self, file: &FileId, source: &str) -> ProcessOutcome {
        let _span = info_span!("strata.process", file = %file).entered();
        match self.prepare(file, source, &HashSet::new()) {
            Prepared::Done(outcome) => outcome,
            Prepared::Pending {
                fingerprint,
                reservation,
            } => {
                let result = run_transform(
                    self.transformer.as_ref(),
                    TransformRequest {
                        source,
                        file,
                        layer_base: reservation.base(),
                        theme: &self.theme,
                        strict: self.config.strict,
                    },
                );
                self.finish(file, source, fingerprint, reservation, result)
            }
            Prepared::Deferred => self.process(file, source),
        }
    }

    /// Run several files, assigning layers in submission order.
    ///
    /// Monotonic sessions transform strictly one after another, since each
    /// file's base depends on the previous file's result. Stable sessions
    /// reserve every base up front, transform in parallel and commit the
    /// results in submission order.
    pub fn process_batch(&mut self, files: &[(FileId, String)]) -> Vec<ProcessOutcome> {
        if self.allocator.policy() == LayerPolicy::Monotonic {
            return files
                .iter()
                .map(|(file, source)| self.process(file, source))
                .collect();
        }

        let _span = info_span!("strata.process_batch", files = files.len()).entered();
        let mut pending = HashSet::new();
        let prepared: Vec<Prepared> = files
            .iter()
            .map(|(file, source)| {
                let step = self.prepare(file, source, &pending);
                if matches!(step, Prepared::Pending { .. }) {
                    pending.insert(file.clone());
                }
                step
            })
            .collect();

        let transformer = self.transformer.as_ref();
        let theme = &self.theme;
        let strict = self.config.strict;
        let results: Vec<Option<Result<TransformOutput>>> = files
            .par_iter()
            .zip(prepared.par_iter())
            .map(|((file, source), step)| match step {
                Prepared::Pending { reservation, .. } => Some(run_transform(
                    transformer,
                    TransformRequest {
                        source,
                        file,
                        layer_base: reservation.base(),
                        theme,
                        strict,
                    },
                )),
                Prepared::Done(_) | Prepared::Deferred => None,
            })
            .collect();

        files
            .iter()
            .zip(prepared.into_iter().zip(results))
            .map(|((file, source), (step, result))| match step {
                Prepared::Done(outcome) => outcome,
                Prepared::Pending {
                    fingerprint,
                    reservation,
                } => {
                    let result =
                        result.unwrap_or_else(|| Err(anyhow!("no transform result for {file}")));
                    self.finish(file, source, fingerprint, reservation, result)
                }
                Prepared::Deferred => self.process(file, source),
            })
            .collect()
    }

    /// Forget a file the host removed from the project.
    pub fn remove_file(&mut self, file: &FileId) -> bool {
        self.fallback_files.remove(file);
        self.store.remove(file).is_some()
    }

    /// The aggregate stylesheet for the current rule store.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule generator fails; the store is untouched
    /// and [`last_good_stylesheet`](Self::last_good_stylesheet) still holds
    /// the previous complete aggregate.
    pub fn stylesheet(&mut self) -> Result<String> {
        self.aggregator.recompute(&self.store)
    }

    pub fn last_good_stylesheet(&self) -> Option<&str> {
        self.aggregator
            .last_good()
            .map(|aggregate| aggregate.text.as_str())
    }

    /// True if the stylesheet must be recomputed before it is served.
    pub fn is_stale(&self) -> bool {
        self.aggregator.is_stale(&self.store)
    }

    #[inline]
    pub const fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    #[inline]
    pub const fn config(&self) -> &ExtractConfig {
        &self.config
    }

    #[inline]
    pub const fn store(&self) -> &RuleStore {
        &self.store
    }

    #[inline]
    pub const fn allocator(&self) -> &LayerAllocator {
        &self.allocator
    }

    /// Files currently relying on runtime style injection.
    pub fn fallback_files(&self) -> impl Iterator<Item = &FileId> {
        self.fallback_files.iter()
    }

    fn prepare(&mut self, file: &FileId, source: &str, pending: &HashSet<FileId>) -> Prepared {
        if let Some(reason) = self.filter.check(file, source) {
            debug!("[strata] skipping {file}: {reason:?}");
            return Prepared::Done(ProcessOutcome::Skipped(reason));
        }
        if pending.contains(file) {
            return Prepared::Deferred;
        }

        let fingerprint = Fingerprint::of(source);
        if let Some((code, diagnostics)) = self
            .store
            .record(file)
            .filter(|record| record.fingerprint == Some(fingerprint))
            .and_then(|record| Some((record.code.clone()?, record.diagnostics.clone())))
        {
            debug!("[strata] {file} is unchanged, reusing previous transform");
            // A revert to the last good source serves extracted code again.
            self.fallback_files.remove(file);
            return Prepared::Done(ProcessOutcome::Unchanged { code, diagnostics });
        }

        match self.allocator.reserve(file) {
            Ok(reservation) => Prepared::Pending {
                fingerprint,
                reservation,
            },
            Err(err) => Prepared::Done(self.fall_back(file, source, err)),
        }
    }

    fn finish(
        &mut self,
        file: &FileId,
        source: &str,
        fingerprint: Fingerprint,
        reservation: Reservation,
        result: Result<TransformOutput>,
    ) -> ProcessOutcome {
        let output = match result {
            Ok(output) => output,
            Err(err) => {
                self.allocator.release(reservation);
                return self.fall_back(file, source, err);
            }
        };

        let layer_base = reservation.base();
        self.allocator.commit(reservation, output.next_layer);
        let error_count = report_diagnostics(file, &output.diagnostics);
        let rules: Vec<String> = output
            .rules
            .into_iter()
            .map(|rule| rule.css_text)
            .collect();
        let rule_count = rules.len();
        debug!(
            "[strata] {file}: {rule_count} rules at layers {layer_base}..{}",
            output.next_layer
        );
        self.store.put_record(
            file,
            FileRecord {
                rules,
                layer_base,
                next_layer: output.next_layer,
                fingerprint: Some(fingerprint),
                code: Some(output.code.clone()),
                diagnostics: output.diagnostics.clone(),
            },
        );
        self.fallback_files.remove(file);

        ProcessOutcome::Transformed(Transformed {
            code: output.code,
            diagnostics: output.diagnostics,
            error_count,
            has_dynamic: output.has_dynamic,
            layer_base,
            rule_count,
        })
    }

    fn fall_back(&mut self, file: &FileId, source: &str, err: Error) -> ProcessOutcome {
        error!("[strata] Failed to transform {file}: {err:#}");
        self.fallback_files.insert(file.clone());
        let code = match &self.config.fallback_import {
            Some(module) if !source.contains(module.as_str()) => {
                format!("import '{module}';\n{source}")
            }
            _ => source.to_owned(),
        };
        ProcessOutcome::Fallback(Fallback { code, error: err })
    }
}

/// Invoke the transform, turning a panic into an error for this file.
fn run_transform(
    transformer: &dyn Transformer,
    request: TransformRequest<'_>,
) -> Result<TransformOutput> {
    panic::catch_unwind(AssertUnwindSafe(|| transformer.transform(request))).unwrap_or_else(
        |payload| {
            Err(anyhow!(
                "transform panicked: {}",
                panic_message(payload.as_ref())
            ))
        },
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
