//! GameLink -- a dual-channel reliability and ordering layer for game
//! traffic over a QUIC-style transport.
//!
//! One [`ChannelEngine`] is attached to each connection endpoint and
//! multiplexes two logical channels over it:
//! - **Reliable**: in-order, at-most-once delivery with a sliding send
//!   window, cumulative ACKs, fixed-cadence retransmission, and bounded
//!   give-up on permanent loss.
//! - **Unreliable**: best-effort datagrams with sequence numbering and gap
//!   detection but no retransmission or reordering.
//!
//! The engine consumes the transport through [`DatagramTransport`] (send on
//! stream 0 / send one datagram / flush) and is fed inbound traffic via
//! [`TransportEvent`]s. Receiver-side throughput, one-way latency, RFC 3550
//! jitter, and gap-derived loss are available as a [`MetricsReport`].

pub mod engine;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod reorder;
pub mod transport;
pub mod window;

// Re-export key public types at crate root.
pub use engine::{ChannelConfig, ChannelEngine, Delivery, ReceiveCallback};
pub use error::{GameLinkError, Result};
pub use frame::{Channel, Frame, FrameFlags};
pub use metrics::{ChannelReport, MetricsReport, OverallReport};
pub use transport::{DatagramTransport, TransportEvent};
pub use window::WindowStatus;
