//! Sender-side sliding window for the reliable channel.
//!
//! Seqnos are assigned monotonically from 1. At most `size` packets may be
//! unresolved at once: `base <= next_seqno <= base + size` holds at all
//! times. A packet leaves the window when a cumulative ACK covers it or when
//! the retransmit sweep gives up on it; give-ups leave gaps, which the
//! `resolved` set lets `base` advance across.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use bytes::Bytes;

/// One unacknowledged reliable packet.
///
/// `bytes` is the full encoded frame, stored at first dispatch and re-sent
/// bit-identical (same seqno, same timestamp) on every retransmission.
#[derive(Debug, Clone)]
pub struct InFlight {
    pub bytes: Bytes,
    pub first_sent: Instant,
    pub last_sent: Instant,
    pub retransmits: u32,
    pub payload_len: usize,
}

/// Outcome of one retransmit sweep.
#[derive(Debug, Default)]
pub struct Sweep {
    /// Frames whose retransmit interval elapsed: `(seqno, encoded bytes)`.
    pub resend: Vec<(u16, Bytes)>,
    /// Seqnos abandoned after the give-up threshold.
    pub gave_up: Vec<u16>,
}

/// Snapshot of the window cursors, for introspection and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStatus {
    pub base: u16,
    pub next_seqno: u16,
    pub in_flight: usize,
}

pub struct SendWindow {
    /// Oldest unresolved seqno.
    base: u16,
    /// Next seqno to assign.
    next_seqno: u16,
    size: u16,
    in_flight: BTreeMap<u16, InFlight>,
    /// Seqnos acknowledged or given up, kept only while `>= base`.
    resolved: BTreeSet<u16>,
}

impl SendWindow {
    pub fn new(size: u16) -> Self {
        Self {
            base: 1,
            next_seqno: 1,
            size,
            in_flight: BTreeMap::new(),
            resolved: BTreeSet::new(),
        }
    }

    /// Whether a new seqno may be assigned without violating the window.
    pub fn has_space(&self) -> bool {
        self.next_seqno.wrapping_sub(self.base) < self.size
    }

    /// The seqno the next committed send will carry.
    pub fn next_seqno(&self) -> u16 {
        self.next_seqno
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn status(&self) -> WindowStatus {
        WindowStatus {
            base: self.base,
            next_seqno: self.next_seqno,
            in_flight: self.in_flight.len(),
        }
    }

    pub fn retransmits(&self, seqno: u16) -> Option<u32> {
        self.in_flight.get(&seqno).map(|p| p.retransmits)
    }

    /// Commit the next seqno and start tracking the encoded frame.
    ///
    /// Must only be called when [`has_space`](Self::has_space) is true, under
    /// the same lock: assigning only at commit time means an aborted window
    /// wait never leaves a gap in the seqno sequence.
    pub fn commit(&mut self, bytes: Bytes, payload_len: usize, now: Instant) -> u16 {
        debug_assert!(self.has_space());
        let seqno = self.next_seqno;
        self.next_seqno = self.next_seqno.wrapping_add(1);
        self.in_flight.insert(
            seqno,
            InFlight {
                bytes,
                first_sent: now,
                last_sent: now,
                retransmits: 0,
                payload_len,
            },
        );
        seqno
    }

    /// Consume a cumulative ACK: every in-flight seqno in `[base, ack]` is
    /// resolved and an RTT sample taken for it. Returns the samples.
    ///
    /// An ACK below `base` (late or duplicate) or at/above `next_seqno`
    /// (acknowledging something never sent) is a silent no-op.
    pub fn on_ack(&mut self, ack: u16, now: Instant) -> Vec<Duration> {
        if ack < self.base || ack >= self.next_seqno {
            return Vec::new();
        }

        let mut samples = Vec::new();
        for seqno in self.base..=ack {
            if let Some(packet) = self.in_flight.remove(&seqno) {
                samples.push(now.duration_since(packet.first_sent));
            }
            self.resolved.insert(seqno);
        }
        self.advance_base();
        samples
    }

    /// One pass of the retransmit timer over all in-flight packets.
    ///
    /// Packets older than `give_up_after` (since first send) are abandoned;
    /// packets idle longer than `retransmit_after` (since last send) are
    /// re-queued with their stored bytes and their `last_sent` reset.
    pub fn sweep(
        &mut self,
        now: Instant,
        retransmit_after: Duration,
        give_up_after: Duration,
    ) -> Sweep {
        let mut out = Sweep::default();
        let mut abandoned = Vec::new();

        for (&seqno, packet) in self.in_flight.iter_mut() {
            if now.duration_since(packet.first_sent) > give_up_after {
                abandoned.push(seqno);
            } else if now.duration_since(packet.last_sent) >= retransmit_after {
                packet.last_sent = now;
                packet.retransmits += 1;
                out.resend.push((seqno, packet.bytes.clone()));
            }
        }

        for seqno in abandoned {
            self.in_flight.remove(&seqno);
            self.resolved.insert(seqno);
            out.gave_up.push(seqno);
        }
        self.advance_base();
        out
    }

    /// Drop every in-flight record without emitting anything.
    pub fn clear_in_flight(&mut self) {
        self.in_flight.clear();
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Slide `base` forward over the contiguous run of resolved seqnos and
    /// drop resolution records that fall behind it.
    fn advance_base(&mut self) {
        while self.resolved.remove(&self.base) {
            self.base = self.base.wrapping_add(1);
        }
        self.resolved = self.resolved.split_off(&self.base);
        debug_assert!(self.next_seqno.wrapping_sub(self.base) <= self.size);
    }
}
