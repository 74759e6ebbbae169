//! Consumer side of a session's event queue

use crate::dispatch::Envelope;
use crate::session::shared::SessionCore;
use common::{EventReceiver, Polled};
use protocol::SessionEvent;
use std::sync::Arc;

/// Ordered stream of a session's events
///
/// Exactly one consumer drains it. Events are yielded in the order the
/// engine produced them, one at a time, with nothing merged; events that
/// no longer apply (a previous capture cycle, a closed session) are
/// skipped. The stream ends after the session is closed and every queued
/// event has been yielded.
pub struct SessionEvents {
    core: Arc<SessionCore>,
    rx: EventReceiver<Envelope>,
}

impl SessionEvents {
    pub(crate) fn new(core: Arc<SessionCore>, rx: EventReceiver<Envelope>) -> Self {
        Self { core, rx }
    }

    /// Wait for the next event; `None` once the session is closed and drained
    pub async fn next(&mut self) -> Option<SessionEvent> {
        loop {
            if let Some(envelope) = self.core.pop_pending() {
                if let Some(event) = self.core.admit(envelope) {
                    return Some(event);
                }
                continue;
            }

            match self.rx.recv().await {
                Some(envelope) => {
                    if let Some(event) = self.core.admit(envelope) {
                        return Some(event);
                    }
                }
                None if self.core.lock().pending.is_empty() => return None,
                None => {}
            }
        }
    }

    /// Blocking variant of [`next`](Self::next) for non-async consumers
    pub fn next_blocking(&mut self) -> Option<SessionEvent> {
        loop {
            if let Some(envelope) = self.core.pop_pending() {
                if let Some(event) = self.core.admit(envelope) {
                    return Some(event);
                }
                continue;
            }

            match self.rx.recv_blocking() {
                Some(envelope) => {
                    if let Some(event) = self.core.admit(envelope) {
                        return Some(event);
                    }
                }
                None if self.core.lock().pending.is_empty() => return None,
                None => {}
            }
        }
    }

    /// Next event if one is ready, without waiting
    pub fn try_next(&mut self) -> Option<SessionEvent> {
        loop {
            let envelope = match self.core.pop_pending() {
                Some(envelope) => envelope,
                None => match self.rx.try_recv() {
                    Polled::Ready(envelope) => envelope,
                    Polled::Empty | Polled::Closed => return None,
                },
            };
            if let Some(event) = self.core.admit(envelope) {
                return Some(event);
            }
        }
    }

    /// Events queued but not yet admitted
    pub fn backlog(&self) -> usize {
        self.rx.len() + self.core.lock().pending.len()
    }
}

impl std::fmt::Debug for SessionEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEvents")
            .field("device", &self.core.device)
            .field("backlog", &self.backlog())
            .finish()
    }
}
