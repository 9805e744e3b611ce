//! Shared harness for the integration tests: a transport double that
//! captures every dispatch, plus helpers to shuttle bytes between two
//! engines the way the real QUIC glue would.

#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use gamelink::{ChannelEngine, DatagramTransport, Delivery, Result, TransportEvent};

/// Records stream and datagram sends instead of hitting a network.
#[derive(Default)]
pub struct TestTransport {
    stream: Mutex<Vec<Bytes>>,
    datagrams: Mutex<Vec<Bytes>>,
}

impl TestTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Drain captured stream writes, one entry per `send_stream` call.
    pub fn take_stream(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.stream.lock())
    }

    /// Drain stream writes coalesced into a single chunk, the way a real
    /// stream read may deliver them to the peer.
    pub fn take_stream_coalesced(&self) -> Bytes {
        let mut buf = Vec::new();
        for chunk in self.take_stream() {
            buf.extend_from_slice(&chunk);
        }
        Bytes::from(buf)
    }

    pub fn take_datagrams(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.datagrams.lock())
    }
}

impl DatagramTransport for TestTransport {
    fn send_stream(&self, data: &[u8]) -> Result<()> {
        self.stream.lock().push(Bytes::copy_from_slice(data));
        Ok(())
    }

    fn send_datagram(&self, data: &[u8]) -> Result<()> {
        self.datagrams.lock().push(Bytes::copy_from_slice(data));
        Ok(())
    }

    fn flush(&self) {}
}

/// Deliver everything `from` wrote on stream 0 into `to` as one coalesced
/// stream read.
pub fn pump_stream(from: &TestTransport, to: &ChannelEngine) {
    let chunk = from.take_stream_coalesced();
    if !chunk.is_empty() {
        to.process_transport_event(TransportEvent::StreamData(chunk))
            .expect("stream event");
    }
}

/// Install a callback that appends every delivery to the returned log.
pub fn record_deliveries(engine: &ChannelEngine) -> Arc<Mutex<Vec<Delivery>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    engine.set_receive_callback(move |delivery| sink.lock().push(delivery));
    log
}

pub fn delivered_seqnos(log: &Mutex<Vec<Delivery>>) -> Vec<u16> {
    log.lock().iter().map(|d| d.seqno).collect()
}
