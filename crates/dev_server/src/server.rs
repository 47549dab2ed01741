//! Ties a watch-mode plugin to a background flush task.

use crate::clock::{Clock, TokioClock};
use crate::endpoint::LiveEndpoint;
use crate::notify::NotificationHub;
use crate::scheduler::{FlushSubscriber, StylesheetChanged, UpdateScheduler};
use anyhow::{Context as _, Result, bail};
use core::future;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use strata_extract::{BuildPlugin, Lifecycle, ModuleOutput};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant as TokioInstant};

/// Broadcast buffer; clients that lag further only miss redundant refetches.
const NOTIFICATION_CAPACITY: usize = 16;

enum Command {
    Mutation,
    Subscribe(Box<dyn FlushSubscriber>),
}

/// Watch-mode runtime around a [`BuildPlugin`].
///
/// Hooks called through the server notify the background task whenever the
/// rule store changes; the task debounces those into flushes, which reach
/// the [`NotificationHub`] and any other subscriber.
pub struct DevServer {
    plugin: Arc<Mutex<BuildPlugin>>,
    hub: NotificationHub,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl DevServer {
    /// Start the flush task on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the plugin was not created for a watch session or
    /// no tokio runtime is running.
    pub fn start(plugin: BuildPlugin) -> Result<Self> {
        Self::start_with_clock(plugin, TokioClock)
    }

    /// Like [`start`](Self::start) with a custom clock. The clock must agree
    /// with tokio's timer, which is what wakes the flush task.
    ///
    /// # Errors
    ///
    /// Returns an error if the plugin was not created for a watch session or
    /// no tokio runtime is running.
    pub fn start_with_clock<C>(plugin: BuildPlugin, clock: C) -> Result<Self>
    where
        C: Clock + 'static,
    {
        let lifecycle = plugin.session().lifecycle();
        if lifecycle != Lifecycle::Watch {
            bail!("the dev server needs a watch session, got {lifecycle:?}");
        }
        let runtime = Handle::try_current().context("the dev server needs a tokio runtime")?;

        let config = plugin.session().config();
        let hub = NotificationHub::new(config.event_name.clone(), NOTIFICATION_CAPACITY);
        let mut scheduler = UpdateScheduler::new(clock, config.debounce());
        scheduler.subscribe(Box::new(hub.clone()));
        info!(
            "[strata] dev server started; CSS at {}, {}ms debounce",
            config.endpoint_path,
            scheduler.delay().as_millis()
        );

        let plugin = Arc::new(Mutex::new(plugin));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = runtime.spawn(run_flushes(
            scheduler,
            Arc::clone(&plugin),
            command_rx,
            shutdown_rx,
        ));

        Ok(Self {
            plugin,
            hub,
            commands,
            shutdown: Some(shutdown),
            task: Some(task),
        })
    }

    /// Transform a module, scheduling a flush if its rules changed.
    pub fn transform(&self, module_id: &str, code: &str) -> Option<ModuleOutput> {
        let output = self.plugin.lock().transform(module_id, code);
        if output.as_ref().is_some_and(|output| output.mutated) {
            self.notify_mutation();
        }
        output
    }

    /// Forget a deleted module, scheduling a flush if it had contributed.
    pub fn remove_file(&self, module_id: &str) -> bool {
        let removed = self.plugin.lock().remove(module_id);
        if removed {
            self.notify_mutation();
        }
        removed
    }

    /// Arm the debounced flush for a change made outside the server's hooks.
    pub fn notify_mutation(&self) {
        self.send(Command::Mutation);
    }

    /// Add a subscriber called after every flush.
    pub fn subscribe(&self, subscriber: impl FlushSubscriber + 'static) {
        self.send(Command::Subscribe(Box::new(subscriber)));
    }

    /// Receiver for flush notifications.
    pub fn notifications(&self) -> broadcast::Receiver<StylesheetChanged> {
        self.hub.subscribe()
    }

    #[inline]
    pub fn event_name(&self) -> &str {
        self.hub.event_name()
    }

    pub fn endpoint(&self) -> LiveEndpoint {
        LiveEndpoint::new(Arc::clone(&self.plugin))
    }

    pub fn plugin(&self) -> Arc<Mutex<BuildPlugin>> {
        Arc::clone(&self.plugin)
    }

    /// Stop the flush task. A pending flush is dropped, not run.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush task panicked.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            if shutdown.send(()).is_err() {
                debug!("[strata] flush task already stopped");
            }
        }
        if let Some(task) = self.task.take() {
            task.await.context("flush task failed")?;
        }
        info!("[strata] dev server stopped");
        Ok(())
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("[strata] flush task is gone; dropping notification");
        }
    }
}

async fn run_flushes<C: Clock>(
    mut scheduler: UpdateScheduler<C>,
    plugin: Arc<Mutex<BuildPlugin>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let deadline = scheduler.deadline();
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            command = commands.recv() => match command {
                Some(Command::Mutation) => scheduler.notify_mutation(),
                Some(Command::Subscribe(subscriber)) => {
                    scheduler.subscribe(subscriber);
                }
                None => break,
            },
            () = sleep_until(deadline) => {
                let mut plugin = plugin.lock();
                if let Err(err) = scheduler.poll(plugin.session_mut()) {
                    error!("[strata] flush failed, keeping previous stylesheet: {err:#}");
                }
            }
        }
    }
    if scheduler.cancel() {
        info!("[strata] dropped pending flush on shutdown");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(TokioInstant::from_std(deadline)).await,
        None => future::pending().await,
    }
}
