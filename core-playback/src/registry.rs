//! # Stream Registry
//!
//! Explicit, per-instance map from [`StreamKey`] to its running
//! [`StreamSession`]. Every concurrently playing source is isolated under its
//! own key; a failure or teardown of one never touches another.

use std::collections::HashMap;
use std::sync::Arc;

use bridge_traits::decoder::StreamDecoder;
use bridge_traits::sink::PlaybackSink;
use bridge_traits::transport::Transport;
use core_runtime::events::StreamEvent;
use core_runtime::logging::display_locator;
use core_runtime::observers::PlaybackUpdates;
use core_runtime::stream::StreamKey;
use parking_lot::RwLock;
use tracing::{debug, info, instrument};

use crate::config::StreamingConfig;
use crate::error::{PlaybackError, Result};
use crate::session::StreamSession;

pub struct StreamRegistry {
    config: StreamingConfig,
    updates: Arc<PlaybackUpdates>,
    sessions: RwLock<HashMap<StreamKey, Arc<StreamSession>>>,
}

impl StreamRegistry {
    pub fn new(config: StreamingConfig, updates: Arc<PlaybackUpdates>) -> Self {
        Self {
            config,
            updates,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Observer hub every session of this registry publishes to.
    pub fn updates(&self) -> &Arc<PlaybackUpdates> {
        &self.updates
    }

    /// Open `locator` under the key derived from it.
    ///
    /// A session already registered under that key is invalidated and
    /// replaced.
    #[instrument(skip_all, fields(locator = %display_locator(locator)))]
    pub fn open(
        &self,
        locator: &str,
        decoder: Box<dyn StreamDecoder>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn PlaybackSink>,
    ) -> Result<Arc<StreamSession>> {
        let key = StreamKey::from_locator(locator);
        self.open_with_key(key, decoder, transport, sink)
    }

    /// Open a stream under an explicit key.
    pub fn open_with_key(
        &self,
        key: StreamKey,
        decoder: Box<dyn StreamDecoder>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn PlaybackSink>,
    ) -> Result<Arc<StreamSession>> {
        let session = Arc::new(StreamSession::spawn(
            key.clone(),
            self.config.clone(),
            decoder,
            transport,
            sink,
            self.updates.clone(),
        )?);
        self.register(session.clone());
        self.updates.announce(StreamEvent::Opened { key: key.clone() });
        info!(stream_key = %key, session_id = %session.id(), "Stream opened");
        Ok(session)
    }

    /// Register `session`, invalidating any session it replaces.
    pub fn register(&self, session: Arc<StreamSession>) {
        let key = session.key().clone();
        let replaced = self.sessions.write().insert(key.clone(), session);
        if let Some(old) = replaced {
            debug!(stream_key = %key, session_id = %old.id(), "Replacing session");
            old.invalidate();
        }
    }

    pub fn get(&self, key: &StreamKey) -> Option<Arc<StreamSession>> {
        self.sessions.read().get(key).cloned()
    }

    /// Session for `key`, or [`PlaybackError::StreamNotFound`].
    pub fn session(&self, key: &StreamKey) -> Result<Arc<StreamSession>> {
        self.get(key)
            .ok_or_else(|| PlaybackError::StreamNotFound(key.to_string()))
    }

    pub fn contains(&self, key: &StreamKey) -> bool {
        self.sessions.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<StreamKey> {
        self.sessions.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Tear down the stream under `key` and drop its cached updates.
    pub fn remove(&self, key: &StreamKey) -> Result<()> {
        let session = self
            .sessions
            .write()
            .remove(key)
            .ok_or_else(|| PlaybackError::StreamNotFound(key.to_string()))?;
        session.invalidate();
        self.updates.forget(key);
        self.updates.announce(StreamEvent::Closed { key: key.clone() });
        info!(stream_key = %key, "Stream closed");
        Ok(())
    }

    /// Drop sessions whose actor has stopped (failed or invalidated).
    ///
    /// Cached updates of pruned streams are kept so hosts can still read
    /// the last status of a failed stream.
    pub fn prune(&self) -> Vec<StreamKey> {
        let mut sessions = self.sessions.write();
        let dead: Vec<StreamKey> = sessions
            .iter()
            .filter(|(_, session)| !session.is_running())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &dead {
            sessions.remove(key);
            debug!(stream_key = %key, "Pruned stopped session");
        }
        dead
    }

    /// Shut every session down and wait for their teardown.
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<StreamSession>> =
            self.sessions.write().drain().map(|(_, session)| session).collect();
        for session in sessions {
            session.shutdown().await;
            self.updates.forget(session.key());
            self.updates.announce(StreamEvent::Closed {
                key: session.key().clone(),
            });
        }
        info!("All streams shut down");
    }
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("streams", &self.len())
            .finish()
    }
}
