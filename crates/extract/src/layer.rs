//! Layer assignment: the ordering key every extracted rule carries.
//!
//! A transform receives a layer base and reports the first layer after the
//! range it consumed. The allocator decides which base each file gets.

use crate::store::FileId;
use anyhow::{Result, bail};
use log::warn;
use std::collections::{BTreeSet, HashMap};

/// Width of the slot each file owns under [`LayerPolicy::StableCached`].
///
/// Must exceed the number of rules any single file extracts.
pub const STABLE_LAYER_SPACING: u32 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayerPolicy {
    /// One global counter advanced by each transform's reported next layer.
    ///
    /// Intended for single-pass builds where each file is transformed once.
    /// Ranges already handed to other files are never adjusted; a file that
    /// is transformed again starts a fresh range at the current counter.
    Monotonic,
    /// Each file is pinned to a multiple of [`STABLE_LAYER_SPACING`] on first
    /// encounter and keeps it for the life of the process.
    StableCached,
}

/// A layer base handed out for one transform, awaiting commit or release.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a reservation must be committed or released"]
pub struct Reservation {
    file: FileId,
    base: u32,
    fresh: bool,
}

impl Reservation {
    #[inline]
    pub const fn base(&self) -> u32 {
        self.base
    }

    #[inline]
    pub fn file(&self) -> &FileId {
        &self.file
    }

    /// True if this reservation created the file's stable slot.
    #[inline]
    pub const fn is_fresh(&self) -> bool {
        self.fresh
    }
}

#[derive(Debug)]
pub struct LayerAllocator {
    policy: LayerPolicy,
    /// Next free layer (monotonic) or highest reported next layer (stable).
    counter: u32,
    /// One past the highest stable slot handed out.
    next_slot: u32,
    /// Slots below `next_slot` given back by failed first transforms.
    free_slots: BTreeSet<u32>,
    stable_bases: HashMap<FileId, u32>,
    /// Monotonic read-modify-write in progress.
    outstanding: bool,
}

impl LayerAllocator {
    pub fn new(policy: LayerPolicy) -> Self {
        Self {
            policy,
            counter: 0,
            next_slot: 0,
            free_slots: BTreeSet::new(),
            stable_bases: HashMap::new(),
            outstanding: false,
        }
    }

    #[inline]
    pub const fn policy(&self) -> LayerPolicy {
        self.policy
    }

    /// Base `file` would be transformed with right now.
    ///
    /// Under the stable policy the first call for a file allocates its slot
    /// permanently; every later call returns the same value.
    pub fn base_for(&mut self, file: &FileId) -> u32 {
        match self.policy {
            LayerPolicy::Monotonic => self.counter,
            LayerPolicy::StableCached => self.stable_slot(file).0,
        }
    }

    /// Start a transform for `file`.
    ///
    /// # Errors
    ///
    /// Under the monotonic policy, returns an error if another reservation
    /// has not been committed or released yet: two files reading the counter
    /// before either advances it would receive overlapping ranges.
    pub fn reserve(&mut self, file: &FileId) -> Result<Reservation> {
        match self.policy {
            LayerPolicy::Monotonic => {
                if self.outstanding {
                    bail!("layer counter is already reserved; cannot reserve for {file}");
                }
                self.outstanding = true;
                Ok(Reservation {
                    file: file.clone(),
                    base: self.counter,
                    fresh: false,
                })
            }
            LayerPolicy::StableCached => {
                let (base, fresh) = self.stable_slot(file);
                Ok(Reservation {
                    file: file.clone(),
                    base,
                    fresh,
                })
            }
        }
    }

    /// Record a successful transform that reported `next_layer`.
    pub fn commit(&mut self, reservation: Reservation, next_layer: u32) {
        let Reservation { file, base, .. } = reservation;
        if next_layer < base {
            warn!(
                "[strata] {file}: transform reported next layer {next_layer} below its base {base}"
            );
        }
        match self.policy {
            LayerPolicy::Monotonic => {
                self.outstanding = false;
            }
            LayerPolicy::StableCached => {
                if next_layer.saturating_sub(base) > STABLE_LAYER_SPACING {
                    warn!(
                        "[strata] {file}: {} layers overrun the {STABLE_LAYER_SPACING}-wide slot at {base}",
                        next_layer - base
                    );
                }
            }
        }
        self.counter = self.counter.max(next_layer);
    }

    /// Abandon a reservation after a failed transform, restoring the state
    /// from before [`reserve`](Self::reserve).
    pub fn release(&mut self, reservation: Reservation) {
        let Reservation { file, base, fresh } = reservation;
        match self.policy {
            LayerPolicy::Monotonic => {
                self.outstanding = false;
            }
            LayerPolicy::StableCached => {
                if fresh {
                    self.stable_bases.remove(&file);
                    self.free_slots.insert(base / STABLE_LAYER_SPACING);
                    // Shrink past every unowned slot at the top, in whatever
                    // order the releases arrived.
                    while self.next_slot > 0 && self.free_slots.remove(&(self.next_slot - 1)) {
                        self.next_slot -= 1;
                    }
                }
            }
        }
    }

    /// Stable base already pinned for `file`, without allocating.
    pub fn stable_base(&self, file: &FileId) -> Option<u32> {
        self.stable_bases.get(file).copied()
    }

    /// Monotonic: the next free layer. Stable: the highest next layer seen.
    #[inline]
    pub const fn counter(&self) -> u32 {
        self.counter
    }

    fn stable_slot(&mut self, file: &FileId) -> (u32, bool) {
        if let Some(&base) = self.stable_bases.get(file) {
            return (base, false);
        }
        let slot = self.free_slots.pop_first().unwrap_or_else(|| {
            let newest = self.next_slot;
            self.next_slot = self.next_slot.saturating_add(1);
            newest
        });
        let base = self.slot_base(slot);
        self.stable_bases.insert(file.clone(), base);
        (base, true)
    }

    const fn slot_base(&self, slot: u32) -> u32 {
        slot.saturating_mul(STABLE_LAYER_SPACING)
    }
}
