//! Fan-out of flush notifications to connected clients.

use crate::scheduler::{FlushSubscriber, StylesheetChanged};
use anyhow::Result;
use log::trace;
use tokio::sync::broadcast;

/// Broadcasts [`StylesheetChanged`] under a named event.
///
/// Transports (websocket, SSE, HMR channels) hold a receiver each and forward
/// the event name to their clients, which then refetch the live endpoint.
#[derive(Clone, Debug)]
pub struct NotificationHub {
    event_name: String,
    sender: broadcast::Sender<StylesheetChanged>,
}

impl NotificationHub {
    pub fn new(event_name: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            event_name: event_name.into(),
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StylesheetChanged> {
        self.sender.subscribe()
    }

    #[inline]
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl FlushSubscriber for NotificationHub {
    fn stylesheet_changed(&mut self, event: &StylesheetChanged) -> Result<()> {
        // A send only fails when nobody listens, which is not an error here.
        match self.sender.send(*event) {
            Ok(receivers) => trace!(
                "[strata] '{}' sent to {receivers} client(s)",
                self.event_name
            ),
            Err(_) => trace!("[strata] '{}' has no listeners", self.event_name),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_receiver_sees_the_event() -> Result<()> {
        let mut hub = NotificationHub::new("strata:update", 8);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        let event = StylesheetChanged { generation: 3 };
        hub.stylesheet_changed(&event)?;
        assert_eq!(first.try_recv()?, event);
        assert_eq!(second.try_recv()?, event);
        Ok(())
    }

    #[test]
    fn no_listeners_is_fine() -> Result<()> {
        let mut hub = NotificationHub::new("strata:update", 8);
        assert_eq!(hub.receiver_count(), 0);
        hub.stylesheet_changed(&StylesheetChanged { generation: 1 })
    }
}
