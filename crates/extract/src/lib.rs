//! Incremental CSS extraction and layering for strata.
//!
//! Source files that reference strata are run through an external transform
//! which rewrites the source and extracts static CSS rules. This crate keeps
//! the per-file results, assigns each file a deterministic layer range, and
//! folds everything into one correctly-ordered stylesheet.
//!
//! # Architecture
//!
//! ```text
//! FileFilter ──▶ ExtractionSession::process ──▶ Transformer (external)
//!                     │            │
//!               LayerAllocator   RuleStore ──▶ Aggregator ──▶ RuleGenerator (external)
//!                                                  │
//!                                       VirtualStylesheet / BuildPlugin
//! ```
//!
//! A session is created for one [`Lifecycle`]. `Build` sessions hand out
//! monotonic layer ranges and embed the aggregate directly; `Watch` sessions
//! pin each file to a stable slot so generated class names survive edits, and
//! serve a client stub that fetches the live stylesheet.

#![allow(
    clippy::module_name_repetitions,
    reason = "Types like LayerPolicy read better than Policy at call sites"
)]

mod aggregate;
mod config;
mod filter;
mod layer;
mod plugin;
mod resolver;
mod session;
mod store;
mod theme;
mod transform;

pub use aggregate::{Aggregate, Aggregator, JoinedRules, RuleGenerator};
pub use config::ExtractConfig;
pub use filter::{FileFilter, SkipReason, SourceKind};
pub use layer::{LayerAllocator, LayerPolicy, Reservation, STABLE_LAYER_SPACING};
pub use plugin::{BuildPlugin, Message, ModuleOutput};
pub use resolver::{ResolverMode, STUB_INITIAL_DELAY_MS, VirtualStylesheet};
pub use session::{ExtractionSession, Fallback, ProcessOutcome, Transformed};
pub use store::{FileId, FileRecord, Fingerprint, RuleStore};
pub use theme::ThemeConfig;
pub use transform::{
    Diagnostic, ExtractedRule, Severity, TransformOutput, TransformRequest, Transformer,
    report_diagnostics,
};

/// Which build lifecycle a session serves.
///
/// Fixed when the session is created; it selects both the layer policy and
/// how the virtual stylesheet is exposed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// One-shot production build: every file is transformed once.
    Build,
    /// Long-running watch/dev session with incremental re-transforms.
    Watch,
}

impl Lifecycle {
    /// Layer policy used by sessions of this lifecycle.
    #[inline]
    pub const fn layer_policy(self) -> LayerPolicy {
        match self {
            Self::Build => LayerPolicy::Monotonic,
            Self::Watch => LayerPolicy::StableCached,
        }
    }

    /// How the virtual stylesheet is exposed for this lifecycle.
    #[inline]
    pub const fn resolver_mode(self) -> ResolverMode {
        match self {
            Self::Build => ResolverMode::OneShot,
            Self::Watch => ResolverMode::Watch,
        }
    }
}
