use std::collections::{HashSet, VecDeque};

/// Remembers the most recent inbound reliable nonces and filters repeats.
///
/// A retransmitted packet carries the nonce of the original. It still has to
/// be acknowledged (the first ack may have been lost) but must not be
/// processed twice. The filter holds at most `window` nonces and forgets the
/// oldest first, so it makes no assumption about where the peer's sequence
/// starts or whether it wraps.
#[derive(Debug, Clone)]
pub struct DuplicateFilter {
    order: VecDeque<u16>,
    seen: HashSet<u16>,
    window: usize,
}

impl DuplicateFilter {
    pub fn new(window: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(window),
            seen: HashSet::with_capacity(window),
            window,
        }
    }

    /// Records `nonce`. Returns true if it is new and should be processed.
    pub fn see(&mut self, nonce: u16) -> bool {
        if self.window == 0 {
            return true;
        }
        if !self.seen.insert(nonce) {
            return false;
        }
        self.order.push_back(nonce);
        if self.order.len() > self.window {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    /// Checks a nonce without recording it.
    pub fn has_seen(&self, nonce: u16) -> bool {
        self.seen.contains(&nonce)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
