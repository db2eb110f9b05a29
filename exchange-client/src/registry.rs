//! Correlation registry for synchronous calls.
//!
//! A caller that wants to block on a response subscribes under the response's
//! event name, sends its request, then waits on the single-value slot the
//! receive loop fills. Entries are keyed by event name only: two concurrent
//! calls of the same operation share one slot and may receive each other's
//! response.

use log::Level;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::dispatch::Event;
use crate::logging::{emit, Logger};

/// What happened to an event offered to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Nobody is subscribed under the event name.
    NoWaiter,
    Delivered,
    /// The slot still held an earlier value; the new one was dropped.
    SlotFull,
}

/// Single-value mailbox.
#[derive(Default)]
struct Slot {
    value: Mutex<Option<Event>>,
    ready: Condvar,
}

impl Slot {
    /// Never blocks. Hands the event back if the slot is occupied.
    fn offer(&self, event: Event) -> Result<(), Event> {
        let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        if value.is_some() {
            return Err(event);
        }
        *value = Some(event);
        self.ready.notify_all();
        Ok(())
    }

    fn take(&self, timeout: Duration) -> Option<Event> {
        let value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut value, _) = self
            .ready
            .wait_timeout_while(value, timeout, |value| value.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        value.take()
    }
}

pub struct CorrelationRegistry {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    logger: Logger,
}

impl CorrelationRegistry {
    pub fn new(logger: Logger) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            logger,
        }
    }

    /// Installs a fresh, empty slot under `event`, replacing any previous one.
    ///
    /// Must happen before the request is sent, or a fast response finds no
    /// subscriber and only reaches the callbacks.
    pub fn subscribe(&self, event: &str) {
        let replaced = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event.to_string(), Arc::new(Slot::default()));
        if replaced.is_some() {
            emit!(
                self.logger,
                Level::Debug,
                "Replaced pending subscription for {}",
                event
            );
        }
    }

    /// Blocks until the receive loop fills the slot for `event`, or `timeout`
    /// elapses. `None` on timeout or when nothing is subscribed.
    pub fn wait(&self, event: &str, timeout: Duration) -> Option<Event> {
        let slot = self.slot(event)?;
        let value = slot.take(timeout);
        if value.is_none() {
            emit!(
                self.logger,
                Level::Debug,
                "No {} response within {:?}",
                event,
                timeout
            );
        }
        value
    }

    pub fn unsubscribe(&self, event: &str) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(event);
    }

    /// Called by the receive loop. Never blocks.
    pub fn deliver(&self, event: Event) -> Delivery {
        let name = event.name();
        let Some(slot) = self.slot(name) else {
            return Delivery::NoWaiter;
        };
        match slot.offer(event) {
            Ok(()) => Delivery::Delivered,
            Err(_) => {
                emit!(
                    self.logger,
                    Level::Warn,
                    "Slot for {} already holds a response, dropping the newer one",
                    name
                );
                Delivery::SlotFull
            }
        }
    }

    pub fn is_subscribed(&self, event: &str) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(event)
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, event: &str) -> Option<Arc<Slot>> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned()
    }
}
