//! The channel engine: one per connection endpoint, serving both directions.
//!
//! Each peer numbers its outgoing packets, buffers and re-orders incoming
//! reliable ones, emits cumulative ACKs, retransmits unacknowledged packets
//! on a fixed cadence, and records a performance report. All engine state
//! lives behind a single mutex; the send path, the receive path, and the
//! retransmit sweep each take it briefly and never hold it across an await,
//! a transport dispatch, or a user callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::{GameLinkError, Result};
use crate::frame::{
    reconstruct_millis, unix_millis_now, wire_timestamp, Channel, Frame, MAX_PAYLOAD,
};
use crate::metrics::{MetricsRecorder, MetricsReport};
use crate::reorder::ReorderBuffer;
use crate::transport::{DatagramTransport, TransportEvent};
use crate::window::{SendWindow, WindowStatus};

/// Tunable timing and sizing knobs. The defaults are the protocol's
/// reference values; tests shrink the durations to keep runs fast.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Maximum reliable packets in flight at once.
    pub window_size: u16,
    /// Idle time after the last (re)send before a packet is re-dispatched.
    pub retransmit_interval: Duration,
    /// Age after first send (sender) or first noticed missing (receiver)
    /// beyond which a packet is abandoned.
    pub give_up_threshold: Duration,
    /// Cadence of the retransmit sweep task.
    pub sweep_interval: Duration,
    /// Poll granularity while `send` waits for window space.
    pub window_poll_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            retransmit_interval: Duration::from_millis(100),
            give_up_threshold: Duration::from_millis(500),
            sweep_interval: Duration::from_millis(100),
            window_poll_interval: Duration::from_millis(50),
        }
    }
}

/// One packet handed to the receive callback.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub seqno: u16,
    pub channel: Channel,
    pub payload: Bytes,
    /// The sender's wall clock at send time, reconstructed from the
    /// truncated wire timestamp (milliseconds since the Unix epoch).
    pub sender_timestamp_ms: u64,
}

/// Callback invoked for every delivered packet.
pub type ReceiveCallback = dyn Fn(Delivery) + Send + Sync;

struct EngineState {
    window: SendWindow,
    reorder: ReorderBuffer,
    unreliable_seqno: u16,
    /// Reassembly buffer for stream 0; incomplete frames wait here.
    stream_buf: BytesMut,
    metrics: MetricsRecorder,
}

struct EngineShared {
    config: ChannelConfig,
    transport: Arc<dyn DatagramTransport>,
    state: Mutex<EngineState>,
    callback: RwLock<Option<Arc<ReceiveCallback>>>,
    /// Signalled whenever `base` advances and window space may have opened.
    window_open: Notify,
    closed: AtomicBool,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

/// Endpoint object for one connection. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ChannelEngine {
    shared: Arc<EngineShared>,
}

impl ChannelEngine {
    pub fn new(transport: Arc<dyn DatagramTransport>, config: ChannelConfig) -> Self {
        let state = EngineState {
            window: SendWindow::new(config.window_size),
            reorder: ReorderBuffer::new(config.give_up_threshold),
            unreliable_seqno: 0,
            stream_buf: BytesMut::new(),
            metrics: MetricsRecorder::new(),
        };
        Self {
            shared: Arc::new(EngineShared {
                config,
                transport,
                state: Mutex::new(state),
                callback: RwLock::new(None),
                window_open: Notify::new(),
                closed: AtomicBool::new(false),
                sweep_task: Mutex::new(None),
            }),
        }
    }

    /// Register the function invoked for every delivered packet. Must be set
    /// before the first data frame arrives.
    pub fn set_receive_callback<F>(&self, callback: F)
    where
        F: Fn(Delivery) + Send + Sync + 'static,
    {
        *self.shared.callback.write() = Some(Arc::new(callback));
    }

    /// Send a payload on the reliable or unreliable channel.
    ///
    /// Completes once the frame has been handed to the transport. A reliable
    /// send suspends while the window is full and only assigns its seqno
    /// after space opens, so an abandoned wait never leaves a gap in the
    /// sequence. Unreliable sends never block.
    pub async fn send(&self, payload: Bytes, reliable: bool) -> Result<()> {
        if payload.len() > MAX_PAYLOAD {
            return Err(GameLinkError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD,
            });
        }
        if !reliable {
            return self.send_unreliable(payload);
        }

        loop {
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(GameLinkError::EngineClosed);
            }
            let committed = {
                let mut state = self.shared.state.lock();
                if state.window.has_space() {
                    let now_ms = unix_millis_now();
                    let frame = Frame::data(
                        Channel::Reliable,
                        state.window.next_seqno(),
                        wire_timestamp(now_ms),
                        payload.clone(),
                    )?;
                    let encoded = frame.encode();
                    state
                        .window
                        .commit(encoded.clone(), payload.len(), Instant::now());
                    state.metrics.record_sent(Channel::Reliable, payload.len());
                    Some(encoded)
                } else {
                    None
                }
            };
            match committed {
                Some(encoded) => {
                    self.shared.transport.send_stream(&encoded)?;
                    self.shared.transport.flush();
                    return Ok(());
                }
                None => {
                    let _ = tokio::time::timeout(
                        self.shared.config.window_poll_interval,
                        self.shared.window_open.notified(),
                    )
                    .await;
                }
            }
        }
    }

    fn send_unreliable(&self, payload: Bytes) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(GameLinkError::EngineClosed);
        }
        let encoded = {
            let mut state = self.shared.state.lock();
            state.unreliable_seqno = state.unreliable_seqno.wrapping_add(1);
            let now_ms = unix_millis_now();
            let frame = Frame::data(
                Channel::Unreliable,
                state.unreliable_seqno,
                wire_timestamp(now_ms),
                payload.clone(),
            )?;
            state
                .metrics
                .record_sent(Channel::Unreliable, payload.len());
            frame.encode()
        };
        self.shared.transport.send_datagram(&encoded)?;
        self.shared.transport.flush();
        Ok(())
    }

    /// Spawn the background retransmit sweep. Idempotent; must run inside a
    /// tokio runtime. Aborting the task (as `shutdown` does) is safe at any
    /// point, the sweep holds no state across its sleep.
    pub fn start_retransmit_task(&self) {
        let mut slot = self.shared.sweep_task.lock();
        if slot.is_some() || self.shared.closed.load(Ordering::Acquire) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(shared.config.sweep_interval);
            loop {
                ticker.tick().await;
                if shared.closed.load(Ordering::Acquire) {
                    break;
                }
                run_sweep(&shared);
            }
        }));
    }

    /// Feed one inbound transport event through the engine.
    ///
    /// ACK frames update the sender window; reliable data enters the reorder
    /// buffer and flushes to the callback in seqno order, answered with a
    /// cumulative ACK per reception; unreliable data is delivered
    /// immediately. Data arriving before a callback is registered is misuse
    /// and fails fast; frames already drained from the reassembly buffer are
    /// dropped in that case.
    pub fn process_transport_event(&self, event: TransportEvent) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(GameLinkError::EngineClosed);
        }
        let now = Instant::now();
        let now_ms = unix_millis_now();

        let mut state = self.shared.state.lock();
        let frames = match event {
            TransportEvent::StreamData(bytes) => {
                state.stream_buf.extend_from_slice(&bytes);
                Frame::decode_stream(&mut state.stream_buf)
            }
            TransportEvent::Datagram(bytes) => match Frame::decode_one(&bytes) {
                Ok(frame) => vec![frame],
                Err(err) => {
                    tracing::warn!(%err, "dropping malformed datagram");
                    return Ok(());
                }
            },
        };

        let callback = self.shared.callback.read().clone();
        if callback.is_none() && frames.iter().any(|f| !f.is_ack()) {
            return Err(GameLinkError::CallbackNotSet);
        }

        let mut deliveries = Vec::new();
        let mut acks: Vec<Bytes> = Vec::new();
        let mut window_advanced = false;

        for frame in frames {
            if frame.is_ack() {
                let before = state.window.base();
                for sample in state.window.on_ack(frame.seqno, now) {
                    state.metrics.record_rtt(sample.as_secs_f64());
                }
                window_advanced |= state.window.base() != before;
                continue;
            }
            match frame.channel() {
                Channel::Reliable => {
                    for ready in state.reorder.insert(frame, now) {
                        let sender_ms = reconstruct_millis(ready.timestamp, now_ms);
                        let transit = (now_ms as i64 - sender_ms as i64) as f64 / 1000.0;
                        state.metrics.record_received(
                            Channel::Reliable,
                            ready.payload.len(),
                            ready.seqno,
                            transit,
                        );
                        deliveries.push(Delivery {
                            seqno: ready.seqno,
                            channel: Channel::Reliable,
                            payload: ready.payload,
                            sender_timestamp_ms: sender_ms,
                        });
                    }
                    // One cumulative ACK per reception, out-of-order arrivals
                    // included: the duplicate ACK marks the gap for the peer.
                    if let Some(ack_seqno) = state.reorder.ack_value() {
                        acks.push(Frame::ack(ack_seqno, wire_timestamp(now_ms)).encode());
                    }
                }
                Channel::Unreliable => {
                    let sender_ms = reconstruct_millis(frame.timestamp, now_ms);
                    let transit = (now_ms as i64 - sender_ms as i64) as f64 / 1000.0;
                    state.metrics.record_received(
                        Channel::Unreliable,
                        frame.payload.len(),
                        frame.seqno,
                        transit,
                    );
                    deliveries.push(Delivery {
                        seqno: frame.seqno,
                        channel: Channel::Unreliable,
                        payload: frame.payload,
                        sender_timestamp_ms: sender_ms,
                    });
                }
            }
        }
        drop(state);

        if window_advanced {
            self.shared.window_open.notify_waiters();
        }
        for ack in &acks {
            self.shared.transport.send_stream(ack)?;
        }
        if !acks.is_empty() {
            self.shared.transport.flush();
        }
        if let Some(callback) = callback {
            for delivery in deliveries {
                callback(delivery);
            }
        }
        Ok(())
    }

    /// Snapshot of the receiver-side performance report.
    pub fn metrics_report(&self, label: &str) -> MetricsReport {
        self.shared.state.lock().metrics.report(label)
    }

    /// Current sender-window cursors, for drivers and tests.
    pub fn window_status(&self) -> WindowStatus {
        self.shared.state.lock().window.status()
    }

    /// Stop the engine: cancel the sweep task and drop all in-flight
    /// records without emitting anything. Closing the connection itself is
    /// the transport owner's job. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.shared.sweep_task.lock().take() {
            handle.abort();
        }
        self.shared.state.lock().window.clear_in_flight();
        // Wake any sender parked on the window so it observes the close.
        self.shared.window_open.notify_waiters();
    }
}

fn run_sweep(shared: &EngineShared) {
    let (outcome, window_advanced) = {
        let mut state = shared.state.lock();
        let before = state.window.base();
        let outcome = state.window.sweep(
            Instant::now(),
            shared.config.retransmit_interval,
            shared.config.give_up_threshold,
        );
        for &seqno in &outcome.gave_up {
            state.metrics.record_give_up(Channel::Reliable);
            tracing::debug!(seqno, "giving up on unacknowledged packet");
        }
        let advanced = state.window.base() != before;
        (outcome, advanced)
    };

    for (seqno, bytes) in &outcome.resend {
        tracing::debug!(seqno = *seqno, "retransmitting");
        if let Err(err) = shared.transport.send_stream(bytes) {
            tracing::warn!(%err, seqno = *seqno, "retransmission failed");
        }
    }
    if !outcome.resend.is_empty() {
        shared.transport.flush();
    }
    if window_advanced {
        shared.window_open.notify_waiters();
    }
}
