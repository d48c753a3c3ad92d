//! Correlates request tags with reply callbacks.
//!
//! Most traffic on a connection is client-initiated, but the server does
//! originate a few requests of its own (srbchannel setup, extension
//! callbacks). Each gets a fresh tag here; the peer's `REPLY`/`ERROR` is
//! routed back to the registered callback, or a timeout fires it with
//! [`PulseError::Timeout`].

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::protocol::PulseError;

/// A reply as routed to a callback: the raw tagstruct payload past the
/// opcode and tag, or the error the peer answered with.
pub type ReplyResult = Result<Vec<u8>, PulseError>;

type ReplyHandler = Box<dyn FnOnce(ReplyResult) + Send>;

struct Pending {
    deadline: Option<Instant>,
    handler: ReplyHandler,
}

/// The per-connection tag table.
#[derive(Default)]
pub struct Dispatcher {
    next_tag: u32,
    pending: BTreeMap<u32, Pending>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("next_tag", &self.next_tag)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a tag and registers `handler` for its reply.
    pub fn register(
        &mut self,
        timeout: Option<Duration>,
        handler: impl FnOnce(ReplyResult) + Send + 'static,
    ) -> u32 {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1);

        self.pending.insert(
            tag,
            Pending {
                deadline: timeout.map(|t| Instant::now() + t),
                handler: Box::new(handler),
            },
        );

        tag
    }

    /// Routes an incoming reply or error. Returns false for a tag nobody is
    /// waiting on, which the connection treats as a protocol violation.
    pub fn dispatch(&mut self, tag: u32, result: ReplyResult) -> bool {
        match self.pending.remove(&tag) {
            Some(pending) => {
                (pending.handler)(result);
                true
            }
            None => false,
        }
    }

    /// Fires `Timeout` into every handler whose deadline has passed.
    pub fn sweep_timeouts(&mut self, now: Instant) {
        let expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline.is_some_and(|d| d <= now))
            .map(|(tag, _)| *tag)
            .collect();

        for tag in expired {
            if let Some(pending) = self.pending.remove(&tag) {
                (pending.handler)(Err(PulseError::Timeout));
            }
        }
    }

    /// The earliest pending deadline, for sizing the poll timeout.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().filter_map(|p| p.deadline).min()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn replies_route_by_tag() {
        let mut d = Dispatcher::new();

        let hits = Arc::new(AtomicU32::new(0));

        let h = hits.clone();
        let tag_a = d.register(None, move |r| {
            assert!(r.is_ok());
            h.fetch_add(1, Ordering::SeqCst);
        });

        let h = hits.clone();
        let tag_b = d.register(None, move |r| {
            assert_eq!(r, Err(PulseError::NoEntity));
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_ne!(tag_a, tag_b);
        assert!(d.dispatch(tag_b, Err(PulseError::NoEntity)));
        assert!(d.dispatch(tag_a, Ok(Vec::new())));
        assert!(!d.dispatch(tag_a, Ok(Vec::new())));

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn timeouts_fire_once() {
        let mut d = Dispatcher::new();

        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        d.register(Some(Duration::from_millis(1)), move |r| {
            assert_eq!(r, Err(PulseError::Timeout));
            h.fetch_add(1, Ordering::SeqCst);
        });

        let later = Instant::now() + Duration::from_secs(1);
        d.sweep_timeouts(later);
        d.sweep_timeouts(later);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(d.is_empty());
        assert_eq!(d.next_deadline(), None);
    }
}
