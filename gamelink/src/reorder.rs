//! Receiver-side reorder buffer for the reliable channel.
//!
//! Out-of-order arrivals are buffered in a BTreeMap and released as the
//! contiguous run starting at `next_expected`. A seat that stays empty past
//! the give-up threshold is skipped so a permanently lost packet cannot
//! stall the delivery cursor: the sender has given up on it by then too.
//! Skipped seqnos fall below `next_expected`, so a late copy is dropped on
//! arrival; nothing below `next_expected` is ever buffered.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use crate::frame::Frame;

pub struct ReorderBuffer {
    /// Next seqno to deliver; starts at 1.
    next_expected: u16,
    /// Out-of-order arrivals awaiting contiguous delivery.
    buffer: BTreeMap<u16, Frame>,
    /// First time each missing seat was noticed.
    missing_since: HashMap<u16, Instant>,
    /// Arrival time per seqno, kept for diagnostics.
    arrivals: HashMap<u16, Instant>,
    /// How long a seat may stay empty before it is skipped.
    give_up_after: Duration,
}

impl ReorderBuffer {
    pub fn new(give_up_after: Duration) -> Self {
        Self {
            next_expected: 1,
            buffer: BTreeMap::new(),
            missing_since: HashMap::new(),
            arrivals: HashMap::new(),
            give_up_after,
        }
    }

    pub fn next_expected(&self) -> u16 {
        self.next_expected
    }

    /// The cumulative ACK value this receiver should advertise, or `None`
    /// before anything has been delivered or skipped.
    pub fn ack_value(&self) -> Option<u16> {
        if self.next_expected > 1 {
            Some(self.next_expected - 1)
        } else {
            None
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn arrival_time(&self, seqno: u16) -> Option<Instant> {
        self.arrivals.get(&seqno).copied()
    }

    /// Accept one reliable data frame and return everything now deliverable,
    /// in strictly increasing seqno order.
    ///
    /// Duplicates (already delivered, already skipped, or already buffered)
    /// are dropped silently, but still drive the missing-seat scan: every
    /// arrival is an opportunity to expire overdue seats.
    pub fn insert(&mut self, frame: Frame, now: Instant) -> Vec<Frame> {
        self.arrivals.insert(frame.seqno, now);

        if frame.seqno >= self.next_expected {
            self.buffer.entry(frame.seqno).or_insert(frame);
        }

        self.skip_missing(now);

        let mut delivered = Vec::new();
        while let Some(frame) = self.buffer.remove(&self.next_expected) {
            delivered.push(frame);
            self.next_expected = self.next_expected.wrapping_add(1);
        }
        delivered
    }

    /// Scan `[next_expected, max buffered]` for empty seats. A seat seen
    /// missing for longer than the give-up threshold is dropped from
    /// tracking, and the cursor steps over it when it is the seat currently
    /// blocking delivery.
    fn skip_missing(&mut self, now: Instant) {
        let Some(&max_arrived) = self.buffer.keys().next_back() else {
            return;
        };

        for seqno in self.next_expected..=max_arrived {
            if self.buffer.contains_key(&seqno) {
                self.missing_since.remove(&seqno);
                continue;
            }
            match self.missing_since.get(&seqno).copied() {
                None => {
                    self.missing_since.insert(seqno, now);
                }
                Some(first_noticed) => {
                    if now.duration_since(first_noticed) > self.give_up_after {
                        tracing::debug!(
                            seqno,
                            missing_ms = now.duration_since(first_noticed).as_millis() as u64,
                            "skipping lost packet"
                        );
                        self.missing_since.remove(&seqno);
                        if seqno == self.next_expected {
                            self.next_expected = self.next_expected.wrapping_add(1);
                        }
                    }
                }
            }
        }
    }
}
