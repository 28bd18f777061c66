//! # Event Bus System
//!
//! Broadcast channel carrying every state change the playback core publishes,
//! as serde-serialisable events. Hosts that prefer async streams over
//! callbacks (bridges, loggers, test harnesses) subscribe here; callback
//! observers use [`PlaybackUpdates`](crate::observers::PlaybackUpdates),
//! which feeds this bus as well.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  publish  ┌──────────────────┐   emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ Stream actor ├──────────>│ PlaybackUpdates  ├─────────>│ EventBus  ├────────────>│ Subscriber │
//! └──────────────┘           │ (cache+callbacks)│          │(broadcast)│             └────────────┘
//!                            └──────────────────┘          └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, EventStream, StreamEvent};
//! use core_runtime::stream::StreamKey;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(64);
//! let key = StreamKey::from_locator("https://example.com/a.mp3");
//! let mut stream = EventStream::new(bus.subscribe()).for_stream(key.clone());
//!
//! bus.emit(CoreEvent::Stream(StreamEvent::NeedleChanged { key, needle: 1.5 }))
//!     .ok();
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.description(), "Needle changed");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events. Needle
//!   events arrive many times per second, so slow subscribers should expect
//!   this and simply continue.
//! - **`RecvError::Closed`**: every sender was dropped (shutdown).

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

use crate::stream::{AvailabilityRange, Needle, PlayingStatus, StreamKey};

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Sized for a few seconds of needle ticks from several concurrent streams.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published through the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Per-stream playback state changes
    Stream(StreamEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Stream(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Stream(StreamEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Stream(StreamEvent::Opened { .. })
            | CoreEvent::Stream(StreamEvent::Closed { .. }) => EventSeverity::Info,
            CoreEvent::Stream(StreamEvent::StatusChanged { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Key of the stream the event belongs to.
    pub fn stream_key(&self) -> &StreamKey {
        match self {
            CoreEvent::Stream(e) => e.key(),
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Stream Events
// ============================================================================

/// State changes of one stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum StreamEvent {
    /// A session was created for the key.
    Opened { key: StreamKey },
    /// Playback position moved (tick or seek).
    NeedleChanged { key: StreamKey, needle: Needle },
    /// Predicted total length changed.
    DurationChanged { key: StreamKey, duration: f64 },
    /// Buffering / playing / paused / ended.
    StatusChanged { key: StreamKey, status: PlayingStatus },
    /// Loaded window changed past the debounce threshold.
    AvailabilityChanged {
        key: StreamKey,
        range: AvailabilityRange,
    },
    /// The stream was torn down by a fatal error.
    Failed {
        key: StreamKey,
        message: String,
        /// Whether reopening the same source may succeed.
        recoverable: bool,
    },
    /// The session was invalidated.
    Closed { key: StreamKey },
}

impl StreamEvent {
    fn description(&self) -> &str {
        match self {
            StreamEvent::Opened { .. } => "Stream opened",
            StreamEvent::NeedleChanged { .. } => "Needle changed",
            StreamEvent::DurationChanged { .. } => "Duration changed",
            StreamEvent::StatusChanged { .. } => "Playing status changed",
            StreamEvent::AvailabilityChanged { .. } => "Availability changed",
            StreamEvent::Failed { .. } => "Stream failed",
            StreamEvent::Closed { .. } => "Stream closed",
        }
    }

    /// Key of the stream the event belongs to.
    pub fn key(&self) -> &StreamKey {
        match self {
            StreamEvent::Opened { key }
            | StreamEvent::NeedleChanged { key, .. }
            | StreamEvent::DurationChanged { key, .. }
            | StreamEvent::StatusChanged { key, .. }
            | StreamEvent::AvailabilityChanged { key, .. }
            | StreamEvent::Failed { key, .. }
            | StreamEvent::Closed { key } => key,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus clones the sender; every clone publishes into the same
/// channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// Subscribers falling behind by more than `capacity` events receive
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if nobody is listening.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only yield events matching `predicate`. Replaces any previous filter.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Only yield events of the stream identified by `key`.
    pub fn for_stream(self, key: StreamKey) -> Self {
        self.filter(move |event| event.stream_key() == &key)
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without waiting.
    ///
    /// Returns `None` if no matching event is currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
