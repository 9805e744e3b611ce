//! Receiver- and sender-side performance accounting.
//!
//! Per channel: byte/packet counters, one-way transit samples, an RFC 3550
//! jitter estimate (smoothing coefficient 1/16), and the set of observed
//! sequence numbers from which loss is derived. Loss is a pure function of
//! sequence-number gaps: `expected` is the largest seqno seen, `lost` is
//! `expected` minus the number of distinct seqnos delivered.

use std::collections::HashSet;
use std::time::Instant;

use serde::Serialize;

use crate::error::Result;
use crate::frame::Channel;

/// Running statistics for one channel.
#[derive(Debug, Default)]
struct ChannelStats {
    packets_sent: u64,
    bytes_sent: u64,
    packets_received: u64,
    bytes_received: u64,
    /// One-way transit samples in seconds. May be negative under clock skew.
    latency_samples: Vec<f64>,
    /// RFC 3550 interarrival jitter estimate, seconds.
    jitter: f64,
    last_transit: Option<f64>,
    max_seqno: u16,
    observed: HashSet<u16>,
    given_up: u64,
}

impl ChannelStats {
    fn record_received(&mut self, payload_len: usize, seqno: u16, transit: f64) {
        self.packets_received += 1;
        self.bytes_received += payload_len as u64;
        self.max_seqno = self.max_seqno.max(seqno);
        self.observed.insert(seqno);

        self.latency_samples.push(transit);
        if let Some(last) = self.last_transit {
            let d = transit - last;
            self.jitter += (d.abs() - self.jitter) / 16.0;
        }
        self.last_transit = Some(transit);
    }

    fn report(&self, duration: f64) -> ChannelReport {
        let expected = self.max_seqno as u64;
        let lost = expected.saturating_sub(self.observed.len() as u64);
        let (delivery_ratio_pct, loss_ratio_pct) = if expected > 0 {
            (
                self.packets_received as f64 / expected as f64 * 100.0,
                lost as f64 / expected as f64 * 100.0,
            )
        } else {
            (0.0, 0.0)
        };

        ChannelReport {
            packets_sent: self.packets_sent,
            packets_expected: expected,
            packets_received: self.packets_received,
            packets_lost: lost,
            packets_given_up: self.given_up,
            send_throughput_bps: rate(self.bytes_sent, duration),
            recv_throughput_bps: rate(self.bytes_received, duration),
            avg_latency_ms: mean(&self.latency_samples) * 1000.0,
            jitter_ms: self.jitter * 1000.0,
            delivery_ratio_pct,
            loss_ratio_pct,
        }
    }
}

fn rate(bytes: u64, duration: f64) -> f64 {
    if duration > 0.0 {
        bytes as f64 / duration
    } else {
        0.0
    }
}

fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

/// Records everything the engine observes; one per engine.
#[derive(Debug)]
pub struct MetricsRecorder {
    started: Instant,
    reliable: ChannelStats,
    unreliable: ChannelStats,
    /// Round-trip samples in seconds, taken when cumulative ACKs resolve
    /// in-flight reliable packets.
    rtt_samples: Vec<f64>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            reliable: ChannelStats::default(),
            unreliable: ChannelStats::default(),
            rtt_samples: Vec::new(),
        }
    }

    fn stats_mut(&mut self, channel: Channel) -> &mut ChannelStats {
        match channel {
            Channel::Reliable => &mut self.reliable,
            Channel::Unreliable => &mut self.unreliable,
        }
    }

    pub fn record_sent(&mut self, channel: Channel, payload_len: usize) {
        let stats = self.stats_mut(channel);
        stats.packets_sent += 1;
        stats.bytes_sent += payload_len as u64;
    }

    /// Record a delivered packet with its one-way transit time in seconds.
    pub fn record_received(
        &mut self,
        channel: Channel,
        payload_len: usize,
        seqno: u16,
        transit: f64,
    ) {
        self.stats_mut(channel).record_received(payload_len, seqno, transit);
    }

    pub fn record_rtt(&mut self, rtt_secs: f64) {
        self.rtt_samples.push(rtt_secs);
    }

    /// Record a reliable-channel packet abandoned by the retransmit timer.
    pub fn record_give_up(&mut self, channel: Channel) {
        self.stats_mut(channel).given_up += 1;
    }

    /// Derive the full report for the caller-supplied label.
    pub fn report(&self, label: &str) -> MetricsReport {
        let duration = self.started.elapsed().as_secs_f64();
        MetricsReport {
            label: label.to_owned(),
            duration,
            overall: OverallReport {
                packets_sent: self.reliable.packets_sent + self.unreliable.packets_sent,
                packets_received: self.reliable.packets_received
                    + self.unreliable.packets_received,
                send_throughput_bps: rate(
                    self.reliable.bytes_sent + self.unreliable.bytes_sent,
                    duration,
                ),
                recv_throughput_bps: rate(
                    self.reliable.bytes_received + self.unreliable.bytes_received,
                    duration,
                ),
                avg_rtt_ms: mean(&self.rtt_samples) * 1000.0,
            },
            reliable: self.reliable.report(duration),
            unreliable: self.unreliable.report(duration),
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Cross-channel totals.
#[derive(Debug, Clone, Serialize)]
pub struct OverallReport {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub send_throughput_bps: f64,
    pub recv_throughput_bps: f64,
    pub avg_rtt_ms: f64,
}

/// Per-channel section of the report.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelReport {
    pub packets_sent: u64,
    pub packets_expected: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub packets_given_up: u64,
    pub send_throughput_bps: f64,
    pub recv_throughput_bps: f64,
    pub avg_latency_ms: f64,
    pub jitter_ms: f64,
    pub delivery_ratio_pct: f64,
    pub loss_ratio_pct: f64,
}

/// Snapshot returned by [`crate::ChannelEngine::metrics_report`]; test
/// harnesses persist it as a JSON record keyed by `label`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub label: String,
    /// Seconds since the engine was created.
    pub duration: f64,
    pub overall: OverallReport,
    pub reliable: ChannelReport,
    pub unreliable: ChannelReport,
}

impl MetricsReport {
    /// Serialize for the result-file dumps the test drivers append to.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_and_ratios() {
        let mut m = MetricsRecorder::new();
        for seq in [1u16, 2, 4, 5] {
            m.record_received(Channel::Reliable, 10, seq, 0.05);
        }
        let report = m.report("test");
        let r = &report.reliable;
        assert_eq!(r.packets_expected, 5);
        assert_eq!(r.packets_received, 4);
        assert_eq!(r.packets_lost, 1);
        assert!((r.delivery_ratio_pct - 80.0).abs() < 1e-9);
        assert!((r.loss_ratio_pct - 20.0).abs() < 1e-9);
    }

    #[test]
    fn zero_expected_reports_zero_ratios() {
        let m = MetricsRecorder::new();
        let report = m.report("empty");
        assert_eq!(report.reliable.packets_expected, 0);
        assert_eq!(report.reliable.delivery_ratio_pct, 0.0);
        assert_eq!(report.reliable.loss_ratio_pct, 0.0);
    }

    #[test]
    fn jitter_follows_rfc3550() {
        let mut m = MetricsRecorder::new();
        m.record_received(Channel::Unreliable, 1, 1, 0.100);
        // First sample sets last_transit but leaves J at 0.
        assert_eq!(m.report("j").unreliable.jitter_ms, 0.0);

        m.record_received(Channel::Unreliable, 1, 2, 0.120);
        // J = 0 + (|0.020| - 0) / 16 = 0.00125 s
        let j = m.report("j").unreliable.jitter_ms;
        assert!((j - 1.25).abs() < 1e-9, "jitter_ms = {j}");

        m.record_received(Channel::Unreliable, 1, 3, 0.080);
        // J = 0.00125 + (0.040 - 0.00125) / 16
        let expect = (0.00125 + (0.040 - 0.00125) / 16.0) * 1000.0;
        let j = m.report("j").unreliable.jitter_ms;
        assert!((j - expect).abs() < 1e-9, "jitter_ms = {j}");
    }

    #[test]
    fn duplicate_seqnos_do_not_inflate_observed() {
        let mut m = MetricsRecorder::new();
        m.record_received(Channel::Unreliable, 1, 3, 0.0);
        m.record_received(Channel::Unreliable, 1, 3, 0.0);
        let r = m.report("dup").unreliable;
        assert_eq!(r.packets_received, 2);
        assert_eq!(r.packets_expected, 3);
        assert_eq!(r.packets_lost, 2); // seqnos 1 and 2 never seen
    }

    #[test]
    fn avg_latency_is_mean_of_samples() {
        let mut m = MetricsRecorder::new();
        m.record_received(Channel::Reliable, 1, 1, 0.010);
        m.record_received(Channel::Reliable, 1, 2, 0.030);
        let r = m.report("lat").reliable;
        assert!((r.avg_latency_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn sender_side_counters() {
        let mut m = MetricsRecorder::new();
        m.record_sent(Channel::Reliable, 100);
        m.record_sent(Channel::Unreliable, 50);
        m.record_rtt(0.040);
        m.record_give_up(Channel::Reliable);
        let report = m.report("send");
        assert_eq!(report.overall.packets_sent, 2);
        assert_eq!(report.reliable.packets_sent, 1);
        assert_eq!(report.reliable.packets_given_up, 1);
        assert!((report.overall.avg_rtt_ms - 40.0).abs() < 1e-9);
    }

    #[test]
    fn report_serializes_with_expected_field_names() {
        let m = MetricsRecorder::new();
        let json = m.report("serde").to_json().unwrap();
        for key in [
            "\"label\"",
            "\"duration\"",
            "\"overall\"",
            "\"packets_expected\"",
            "\"recv_throughput_bps\"",
            "\"jitter_ms\"",
            "\"delivery_ratio_pct\"",
            "\"loss_ratio_pct\"",
        ] {
            assert!(json.contains(key), "missing {key} in {json}");
        }
    }
}
