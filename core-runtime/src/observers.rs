//! # Playback Update Hub
//!
//! Typed publish/subscribe object for the four per-stream values the core
//! publishes: needle, duration, playing status and availability. One hub is
//! shared (by `Arc`) between every session a registry owns, so payloads are
//! always keyed by [`StreamKey`] and subscribers filter by key themselves.
//!
//! - Subscribers attach per kind and get back a [`SubscriptionId`] they can
//!   later detach with.
//! - The latest value of every key is cached; attaching replays the cache to
//!   the new subscriber immediately.
//! - A callback returning [`ControlFlow::Break`] is detached.
//! - When an [`EventBus`] is attached, every publication is also emitted as a
//!   [`CoreEvent::Stream`].
//!
//! Callbacks run on the publishing task (the stream's session actor) and
//! must return quickly. Within one kind, publishing and the replay on attach
//! are serialized, so a subscriber never misses a value published while it
//! attaches and never sees a replayed value after a newer one.

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::events::{CoreEvent, EventBus, StreamEvent};
use crate::stream::{AvailabilityRange, Needle, PlayingStatus, StreamKey};

/// Opaque handle returned by the `attach_*` methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subscriber callback for values of type `T`.
pub type UpdateCallback<T> = Arc<dyn Fn(&StreamKey, &T) -> ControlFlow<()> + Send + Sync>;

struct Channel<T> {
    latest: RwLock<HashMap<StreamKey, T>>,
    subscribers: Mutex<Vec<(SubscriptionId, UpdateCallback<T>)>>,
    /// Held across cache update and callback fan-out. Reentrant so callbacks
    /// may attach on the publishing thread.
    delivery: ReentrantMutex<()>,
}

impl<T: Clone> Channel<T> {
    fn new() -> Self {
        Self {
            latest: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            delivery: ReentrantMutex::new(()),
        }
    }

    fn attach(&self, id: SubscriptionId, callback: UpdateCallback<T>) {
        let _delivery = self.delivery.lock();
        let snapshot: Vec<(StreamKey, T)> = self
            .latest
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        for (key, value) in &snapshot {
            if callback(key, value).is_break() {
                return;
            }
        }

        self.subscribers.lock().push((id, callback));
    }

    fn detach(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    fn publish(&self, key: &StreamKey, value: &T) {
        let _delivery = self.delivery.lock();
        self.latest.write().insert(key.clone(), value.clone());

        // Callbacks run without the subscriber lock held so they may attach
        // or detach.
        let subscribers: Vec<(SubscriptionId, UpdateCallback<T>)> =
            self.subscribers.lock().clone();
        let finished: Vec<SubscriptionId> = subscribers
            .iter()
            .filter(|(_, callback)| callback(key, value).is_break())
            .map(|(id, _)| *id)
            .collect();

        if !finished.is_empty() {
            self.subscribers
                .lock()
                .retain(|(id, _)| !finished.contains(id));
        }
    }

    fn latest(&self, key: &StreamKey) -> Option<T> {
        self.latest.read().get(key).cloned()
    }

    fn forget(&self, key: &StreamKey) {
        self.latest.write().remove(key);
    }

    fn clear(&self) {
        self.latest.write().clear();
        self.subscribers.lock().clear();
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Hub through which sessions publish per-stream state.
pub struct PlaybackUpdates {
    next_id: AtomicU64,
    needle: Channel<Needle>,
    duration: Channel<f64>,
    status: Channel<PlayingStatus>,
    availability: Channel<AvailabilityRange>,
    bus: Option<EventBus>,
}

impl PlaybackUpdates {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            needle: Channel::new(),
            duration: Channel::new(),
            status: Channel::new(),
            availability: Channel::new(),
            bus: None,
        }
    }

    /// Hub that mirrors every publication onto `bus`.
    pub fn with_event_bus(bus: EventBus) -> Self {
        Self {
            bus: Some(bus),
            ..Self::new()
        }
    }

    pub fn event_bus(&self) -> Option<&EventBus> {
        self.bus.as_ref()
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn emit(&self, event: StreamEvent) {
        if let Some(bus) = &self.bus {
            // No subscribers is not an error for the publisher.
            let _ = bus.emit(CoreEvent::Stream(event));
        }
    }

    /// Emit a lifecycle event (opened, failed, closed) on the bus.
    pub fn announce(&self, event: StreamEvent) {
        self.emit(event);
    }

    // ------------------------------------------------------------------
    // Attach
    // ------------------------------------------------------------------

    pub fn attach_needle<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StreamKey, &Needle) -> ControlFlow<()> + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.needle.attach(id, Arc::new(callback));
        id
    }

    pub fn attach_duration<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StreamKey, &f64) -> ControlFlow<()> + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.duration.attach(id, Arc::new(callback));
        id
    }

    pub fn attach_status<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StreamKey, &PlayingStatus) -> ControlFlow<()> + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.status.attach(id, Arc::new(callback));
        id
    }

    pub fn attach_availability<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StreamKey, &AvailabilityRange) -> ControlFlow<()> + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.availability.attach(id, Arc::new(callback));
        id
    }

    // ------------------------------------------------------------------
    // Detach
    // ------------------------------------------------------------------

    pub fn detach_needle(&self, id: SubscriptionId) -> Result<()> {
        found(self.needle.detach(id), id)
    }

    pub fn detach_duration(&self, id: SubscriptionId) -> Result<()> {
        found(self.duration.detach(id), id)
    }

    pub fn detach_status(&self, id: SubscriptionId) -> Result<()> {
        found(self.status.detach(id), id)
    }

    pub fn detach_availability(&self, id: SubscriptionId) -> Result<()> {
        found(self.availability.detach(id), id)
    }

    // ------------------------------------------------------------------
    // Publish
    // ------------------------------------------------------------------

    pub fn publish_needle(&self, key: &StreamKey, needle: Needle) {
        self.needle.publish(key, &needle);
        self.emit(StreamEvent::NeedleChanged {
            key: key.clone(),
            needle,
        });
    }

    pub fn publish_duration(&self, key: &StreamKey, duration: f64) {
        self.duration.publish(key, &duration);
        self.emit(StreamEvent::DurationChanged {
            key: key.clone(),
            duration,
        });
    }

    pub fn publish_status(&self, key: &StreamKey, status: PlayingStatus) {
        self.status.publish(key, &status);
        self.emit(StreamEvent::StatusChanged {
            key: key.clone(),
            status,
        });
    }

    pub fn publish_availability(&self, key: &StreamKey, range: AvailabilityRange) {
        self.availability.publish(key, &range);
        self.emit(StreamEvent::AvailabilityChanged {
            key: key.clone(),
            range,
        });
    }

    // ------------------------------------------------------------------
    // Cache
    // ------------------------------------------------------------------

    pub fn latest_needle(&self, key: &StreamKey) -> Option<Needle> {
        self.needle.latest(key)
    }

    pub fn latest_duration(&self, key: &StreamKey) -> Option<f64> {
        self.duration.latest(key)
    }

    pub fn latest_status(&self, key: &StreamKey) -> Option<PlayingStatus> {
        self.status.latest(key)
    }

    pub fn latest_availability(&self, key: &StreamKey) -> Option<AvailabilityRange> {
        self.availability.latest(key)
    }

    /// Drop every cached value of `key`. Subscribers stay attached.
    pub fn forget(&self, key: &StreamKey) {
        self.needle.forget(key);
        self.duration.forget(key);
        self.status.forget(key);
        self.availability.forget(key);
    }

    /// Drop all cached values and all subscribers.
    pub fn clear(&self) {
        self.needle.clear();
        self.duration.clear();
        self.status.clear();
        self.availability.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.needle.subscriber_count()
            + self.duration.subscriber_count()
            + self.status.subscriber_count()
            + self.availability.subscriber_count()
    }
}

fn found(removed: bool, id: SubscriptionId) -> Result<()> {
    if removed {
        Ok(())
    } else {
        Err(Error::SubscriptionNotFound(id.as_u64()))
    }
}

impl Default for PlaybackUpdates {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PlaybackUpdates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackUpdates")
            .field("subscriber_count", &self.subscriber_count())
            .field("has_event_bus", &self.bus.is_some())
            .finish()
    }
}
