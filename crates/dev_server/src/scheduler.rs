//! Debounced stylesheet flushes.
//!
//! Every rule store mutation arms (or re-arms) a short timer. Only when the
//! timer runs out without another mutation does the scheduler recompute the
//! aggregate once and tell its subscribers that the stylesheet changed.

use crate::clock::Clock;
use anyhow::Result;
use core::time::Duration;
use log::{debug, error, info};
use std::time::Instant;
use strata_extract::ExtractionSession;
use tracing::info_span;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    PendingFlush {
        deadline: Instant,
        /// Mutations folded into this flush so far.
        coalesced: usize,
    },
}

/// Payload-free "refetch the stylesheet" signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StylesheetChanged {
    /// Number of flushes so far, this one included.
    pub generation: u64,
}

/// Observer invoked synchronously after each flush.
pub trait FlushSubscriber: Send {
    /// Handle one flush notification.
    ///
    /// # Errors
    ///
    /// Errors are logged by the scheduler; other subscribers still run.
    fn stylesheet_changed(&mut self, event: &StylesheetChanged) -> Result<()>;
}

impl<F> FlushSubscriber for F
where
    F: FnMut(&StylesheetChanged) -> Result<()> + Send,
{
    fn stylesheet_changed(&mut self, event: &StylesheetChanged) -> Result<()> {
        self(event)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

pub struct UpdateScheduler<C: Clock> {
    clock: C,
    delay: Duration,
    state: SchedulerState,
    subscribers: Vec<(SubscriberId, Box<dyn FlushSubscriber>)>,
    next_subscriber: u64,
    flushes: u64,
}

impl<C: Clock> UpdateScheduler<C> {
    pub fn new(clock: C, delay: Duration) -> Self {
        Self {
            clock,
            delay,
            state: SchedulerState::Idle,
            subscribers: Vec::new(),
            next_subscriber: 0,
            flushes: 0,
        }
    }

    #[inline]
    pub const fn state(&self) -> SchedulerState {
        self.state
    }

    #[inline]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Record a rule store mutation, pushing the flush back by one delay.
    pub fn notify_mutation(&mut self) {
        let deadline = self.clock.now() + self.delay;
        let coalesced = match self.state {
            SchedulerState::Idle => 1,
            SchedulerState::PendingFlush { coalesced, .. } => coalesced + 1,
        };
        debug!("[strata] flush re-armed; {coalesced} mutation(s) pending");
        self.state = SchedulerState::PendingFlush {
            deadline,
            coalesced,
        };
    }

    /// When the pending flush fires, if one is pending.
    pub const fn deadline(&self) -> Option<Instant> {
        match self.state {
            SchedulerState::Idle => None,
            SchedulerState::PendingFlush { deadline, .. } => Some(deadline),
        }
    }

    pub fn is_due(&self) -> bool {
        self.deadline()
            .is_some_and(|deadline| self.clock.now() >= deadline)
    }

    /// Flush if the debounce window has elapsed.
    ///
    /// Returns the notification that was sent, or `None` if nothing was due.
    ///
    /// # Errors
    ///
    /// Returns an error if the aggregate cannot be recomputed. The scheduler
    /// is idle afterwards and no subscriber is notified; the next mutation
    /// arms a new flush.
    pub fn poll(&mut self, session: &mut ExtractionSession) -> Result<Option<StylesheetChanged>> {
        if !self.is_due() {
            return Ok(None);
        }
        let coalesced = match self.state {
            SchedulerState::PendingFlush { coalesced, .. } => coalesced,
            SchedulerState::Idle => 0,
        };
        self.state = SchedulerState::Idle;

        let _span = info_span!("strata.flush", coalesced).entered();
        let css = session.stylesheet()?;
        self.flushes += 1;
        let event = StylesheetChanged {
            generation: self.flushes,
        };
        info!(
            "[strata] flush #{}: {} bytes from {coalesced} mutation(s)",
            event.generation,
            css.len()
        );
        for (id, subscriber) in &mut self.subscribers {
            if let Err(err) = subscriber.stylesheet_changed(&event) {
                error!("[strata] flush subscriber {id:?} failed: {err:#}");
            }
        }
        Ok(Some(event))
    }

    /// Drop a pending flush. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        let pending = matches!(self.state, SchedulerState::PendingFlush { .. });
        if pending {
            debug!("[strata] pending flush cancelled");
        }
        self.state = SchedulerState::Idle;
        pending
    }

    pub fn subscribe(&mut self, subscriber: Box<dyn FlushSubscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_subscriber);
        self.next_subscriber += 1;
        self.subscribers.push((id, subscriber));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(known, _)| *known != id);
        self.subscribers.len() != before
    }

    /// Completed flushes since the scheduler was created.
    #[inline]
    pub const fn flush_count(&self) -> u64 {
        self.flushes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use anyhow::{anyhow, bail};
    use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use strata_extract::{
        ExtractConfig, ExtractedRule, FileId, Lifecycle, ThemeConfig, TransformOutput,
        TransformRequest,
    };

    const DELAY: Duration = Duration::from_millis(100);

    fn one_rule(request: TransformRequest<'_>) -> Result<TransformOutput> {
        let base = request.layer_base;
        Ok(TransformOutput {
            code: String::new(),
            rules: vec![ExtractedRule {
                class_name: format!("_r{base}"),
                css_text: format!("._r{base}{{color:red}}"),
                layer: base,
            }],
            next_layer: base + 1,
            ..TransformOutput::default()
        })
    }

    fn session() -> Result<ExtractionSession> {
        ExtractionSession::new(
            Lifecycle::Watch,
            ExtractConfig::default(),
            ThemeConfig::default(),
            Arc::new(one_rule),
        )
    }

    fn counting_subscriber(count: &Arc<AtomicUsize>) -> Box<dyn FlushSubscriber> {
        let count = Arc::clone(count);
        Box::new(move |_: &StylesheetChanged| -> Result<()> {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn burst_of_mutations_flushes_once() -> Result<()> {
        let clock = ManualClock::new();
        let mut scheduler = UpdateScheduler::new(clock.clone(), DELAY);
        let mut session = session()?;
        let flushed = Arc::new(AtomicUsize::new(0));
        scheduler.subscribe(counting_subscriber(&flushed));

        for index in 0..5 {
            let file = FileId::from(format!("/src/f{index}.ts"));
            session.process(&file, "import 'strata';");
            scheduler.notify_mutation();
            clock.advance(Duration::from_millis(30));
            assert_eq!(scheduler.poll(&mut session)?, None);
        }
        assert!(matches!(
            scheduler.state(),
            SchedulerState::PendingFlush { coalesced: 5, .. }
        ));

        clock.advance(Duration::from_millis(70));
        assert_eq!(
            scheduler.poll(&mut session)?,
            Some(StylesheetChanged { generation: 1 })
        );
        assert_eq!(scheduler.poll(&mut session)?, None);
        assert_eq!(flushed.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(!session.is_stale());
        Ok(())
    }

    #[test]
    fn cancelled_flush_never_fires() -> Result<()> {
        let clock = ManualClock::new();
        let mut scheduler = UpdateScheduler::new(clock.clone(), DELAY);
        let mut session = session()?;
        let flushed = Arc::new(AtomicUsize::new(0));
        scheduler.subscribe(counting_subscriber(&flushed));

        scheduler.notify_mutation();
        assert!(scheduler.cancel());
        assert!(!scheduler.cancel());
        clock.advance(DELAY * 2);
        assert_eq!(scheduler.poll(&mut session)?, None);
        assert_eq!(flushed.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.flush_count(), 0);
        Ok(())
    }

    #[test]
    fn failed_aggregation_notifies_nobody() -> Result<()> {
        let clock = ManualClock::new();
        let mut scheduler = UpdateScheduler::new(clock.clone(), DELAY);
        let broken = Arc::new(AtomicBool::new(true));
        let switch = Arc::clone(&broken);
        let generator = move |rules: &[&str]| -> Result<String> {
            if switch.load(Ordering::SeqCst) {
                bail!("ordering failed");
            }
            Ok(rules.join("\n"))
        };
        let mut session = session()?.with_generator(Box::new(generator));
        let flushed = Arc::new(AtomicUsize::new(0));
        scheduler.subscribe(counting_subscriber(&flushed));

        session.process(&FileId::from("/src/card.ts"), "import 'strata';");
        scheduler.notify_mutation();
        clock.advance(DELAY);
        assert!(scheduler.poll(&mut session).is_err());
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(flushed.load(Ordering::SeqCst), 0);

        broken.store(false, Ordering::SeqCst);
        scheduler.notify_mutation();
        clock.advance(DELAY);
        assert!(scheduler.poll(&mut session)?.is_some());
        assert_eq!(flushed.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn failing_subscriber_does_not_block_others() -> Result<()> {
        let clock = ManualClock::new();
        let mut scheduler = UpdateScheduler::new(clock.clone(), DELAY);
        let mut session = session()?;
        let flushed = Arc::new(AtomicUsize::new(0));
        scheduler.subscribe(Box::new(|_: &StylesheetChanged| -> Result<()> {
            Err(anyhow!("socket closed"))
        }));
        let counted = scheduler.subscribe(counting_subscriber(&flushed));

        scheduler.notify_mutation();
        clock.advance(DELAY);
        scheduler.poll(&mut session)?;
        assert_eq!(flushed.load(Ordering::SeqCst), 1);

        assert!(scheduler.unsubscribe(counted));
        scheduler.notify_mutation();
        clock.advance(DELAY);
        scheduler.poll(&mut session)?;
        assert_eq!(flushed.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.flush_count(), 2);
        Ok(())
    }
}
