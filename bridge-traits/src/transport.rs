//! Byte Transport Abstraction
//!
//! A transport fetches the encoded bytes of one audio source (HTTP body, file
//! contents, ...) and pushes them to the core as they arrive. Transports are
//! push-driven: the core never blocks waiting on them.

use bytes::Bytes;
use std::sync::Arc;

use crate::error::Result;

/// Event pushed by a transport to its listener.
///
/// Every event names the absolute byte position it refers to, so the core
/// can tell events of an abandoned read from those of the current one.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A contiguous run of bytes starting at `offset`.
    ///
    /// After a [`Transport::seek_to`], the first `Data` event of the new read
    /// starts at the requested byte offset.
    Data {
        offset: u64,
        bytes: Bytes,
        /// Cumulative download progress in `0.0..=1.0`, when known.
        progress: Option<f64>,
        /// Total size of the resource, when the transport can tell.
        total_bytes_expected: Option<u64>,
    },
    /// The resource was read to its end, which lies at `end_offset`.
    Finished { end_offset: u64 },
    /// The transport gave up (after its own retries).
    Failed(String),
}

impl TransportEvent {
    /// Convenience constructor for a bare data event.
    pub fn data(offset: u64, bytes: impl Into<Bytes>) -> Self {
        Self::Data {
            offset,
            bytes: bytes.into(),
            progress: None,
            total_bytes_expected: None,
        }
    }

    pub fn finished(end_offset: u64) -> Self {
        Self::Finished { end_offset }
    }
}

/// Receiver of transport events.
///
/// Implementations must return quickly; the core only enqueues the event.
pub trait TransportListener: Send + Sync {
    fn on_transport_event(&self, event: TransportEvent);
}

/// Source of encoded audio bytes.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::transport::{Transport, TransportListener};
///
/// fn begin(transport: &dyn Transport, listener: Arc<dyn TransportListener>) {
///     transport.start(listener).ok();
///     // later, when the decoder needs bytes we never received:
///     transport.seek_to(1_500_000);
/// }
/// ```
pub trait Transport: Send + Sync {
    /// Begin delivering bytes from offset zero to `listener`.
    fn start(&self, listener: Arc<dyn TransportListener>) -> Result<()>;

    /// Abandon the current read and restart delivery at `byte_offset`.
    ///
    /// Events belonging to the abandoned read must not be delivered after
    /// this call returns.
    fn seek_to(&self, byte_offset: u64);

    /// Stop delivering and release any connection or file handle.
    fn cancel(&self);
}
