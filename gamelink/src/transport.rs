//! The seam between the channel engine and the underlying QUIC connection.
//!
//! The engine never owns sockets or crypto. It consumes exactly three
//! primitives, modelled on a QUIC implementation's connection object where
//! sends are synchronous enqueue operations and `flush` schedules actual
//! transmission. Reliable traffic (data and ACK frames alike) always rides
//! stream 0 with `end_stream = false`; unreliable traffic is one frame per
//! datagram, never fragmented.

use bytes::Bytes;

use crate::error::Result;

/// Send primitives the engine requires from the transport.
pub trait DatagramTransport: Send + Sync {
    /// Append bytes to the ordered, reliable byte stream (QUIC stream 0).
    /// The peer may observe them split or coalesced across reads.
    fn send_stream(&self, data: &[u8]) -> Result<()>;

    /// Send one best-effort datagram carrying exactly one frame.
    fn send_datagram(&self, data: &[u8]) -> Result<()>;

    /// Called after every dispatch so queued bytes actually leave.
    fn flush(&self);
}

/// One inbound event from the transport, fed to
/// [`crate::ChannelEngine::process_transport_event`] by the integrator.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A read from stream 0. May contain any number of complete frames plus
    /// an incomplete tail; the engine reassembles across events.
    StreamData(Bytes),
    /// One received datagram.
    Datagram(Bytes),
}
