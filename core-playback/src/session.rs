//! # Stream Session
//!
//! One running stream: a tokio task (the session actor) that owns the
//! [`StreamingPlaybackScheduler`] and serializes everything that touches it.
//!
//! ## Architecture
//!
//! ```text
//!   transport events ──┐
//!   sink completions ──┼──> mpsc<SessionCommand> ──> actor loop ──> scheduler
//!   host commands ─────┘                               ^
//!                                       interval tick ─┘
//! ```
//!
//! Collaborator callbacks never touch stream state; they only enqueue a
//! command. Cancelling the session leaves the loop, then invalidates the
//! adapter (transport cancelled, bytes dropped) and stops the sink, in that
//! order.

use std::fmt;
use std::sync::Arc;

use bridge_traits::decoder::StreamDecoder;
use bridge_traits::sink::PlaybackSink;
use bridge_traits::transport::{Transport, TransportEvent, TransportListener};
use core_runtime::events::StreamEvent;
use core_runtime::observers::PlaybackUpdates;
use core_runtime::stream::{Needle, StreamKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::adapter::PullDecodeAdapter;
use crate::config::{SchedulerStats, StreamingConfig};
use crate::error::{PlaybackError, Result};
use crate::scheduler::{SchedulerMode, StreamingPlaybackScheduler};

/// Unique identifier of one session.
///
/// A replaced stream and its successor share a [`StreamKey`] but never a
/// `SessionId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message processed by the session actor.
#[derive(Debug)]
pub enum SessionCommand {
    /// Event pushed by the transport.
    Transport(TransportEvent),
    /// A sink buffer scheduled under `generation` completed.
    BufferCompleted { generation: u64 },
    Seek {
        needle: Needle,
        ack: Option<oneshot::Sender<Result<()>>>,
    },
    Play,
    Pause,
    Toggle,
    SetRate {
        rate: f32,
        ack: Option<oneshot::Sender<Result<()>>>,
    },
    SkipForward,
    SkipBackward,
    Stats {
        reply: oneshot::Sender<SchedulerStats>,
    },
}

/// Forwards transport events into the session's command queue.
struct CommandListener {
    commands: UnboundedSender<SessionCommand>,
}

impl TransportListener for CommandListener {
    fn on_transport_event(&self, event: TransportEvent) {
        // The session may have shut down while the transport was reading.
        let _ = self.commands.send(SessionCommand::Transport(event));
    }
}

/// Handle to a running stream.
pub struct StreamSession {
    key: StreamKey,
    id: SessionId,
    commands: UnboundedSender<SessionCommand>,
    cancellation_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamSession {
    /// Start streaming `key`.
    ///
    /// Starts the transport and spawns the session actor on the current
    /// tokio runtime. Playback does not begin until [`play`](Self::play).
    ///
    /// # Errors
    ///
    /// - [`PlaybackError::InvalidConfig`] if `config` fails validation
    /// - [`PlaybackError::SourceUnavailable`] if the transport cannot start
    #[instrument(skip_all, fields(stream_key = %key))]
    pub fn spawn(
        key: StreamKey,
        config: StreamingConfig,
        decoder: Box<dyn StreamDecoder>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn PlaybackSink>,
        updates: Arc<PlaybackUpdates>,
    ) -> Result<Self> {
        config.validate().map_err(PlaybackError::InvalidConfig)?;

        let (commands, receiver) = mpsc::unbounded_channel();
        let adapter = PullDecodeAdapter::new(
            key.clone(),
            decoder,
            transport,
            config.redelivery_floor_bytes,
        );
        adapter.start(Arc::new(CommandListener {
            commands: commands.clone(),
        }))?;

        let tick_interval = config.tick_interval;
        let scheduler = StreamingPlaybackScheduler::new(
            key.clone(),
            config,
            adapter,
            sink,
            updates.clone(),
            commands.clone(),
        );

        let id = SessionId::new();
        let cancellation_token = CancellationToken::new();
        let actor = SessionActor {
            scheduler,
            receiver,
            cancellation_token: cancellation_token.clone(),
            updates,
            id,
        };
        let span = info_span!("stream_session", stream_key = %key, session_id = %id);
        let task = tokio::spawn(actor.run(tick_interval).instrument(span));

        info!(session_id = %id, "Stream session started");

        Ok(Self {
            key,
            id,
            commands,
            cancellation_token,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns `true` while the actor is alive.
    pub fn is_running(&self) -> bool {
        if self.cancellation_token.is_cancelled() {
            return false;
        }
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn play(&self) -> Result<()> {
        self.send(SessionCommand::Play)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(SessionCommand::Pause)
    }

    pub fn toggle(&self) -> Result<()> {
        self.send(SessionCommand::Toggle)
    }

    pub fn skip_forward(&self) -> Result<()> {
        self.send(SessionCommand::SkipForward)
    }

    pub fn skip_backward(&self) -> Result<()> {
        self.send(SessionCommand::SkipBackward)
    }

    /// Seek to `needle` seconds.
    ///
    /// Resolves once the actor applied the seek, or parked it because the
    /// stream format is not known yet.
    #[instrument(skip(self), fields(stream_key = %self.key))]
    pub async fn seek(&self, needle: Needle) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(SessionCommand::Seek {
            needle,
            ack: Some(ack),
        })?;
        done.await.map_err(|_| PlaybackError::SessionClosed)?
    }

    #[instrument(skip(self), fields(stream_key = %self.key))]
    pub async fn set_rate(&self, rate: f32) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(SessionCommand::SetRate {
            rate,
            ack: Some(ack),
        })?;
        done.await.map_err(|_| PlaybackError::SessionClosed)?
    }

    pub async fn stats(&self) -> Result<SchedulerStats> {
        let (reply, done) = oneshot::channel();
        self.send(SessionCommand::Stats { reply })?;
        done.await.map_err(|_| PlaybackError::SessionClosed)
    }

    /// Ask the actor to tear the stream down. Idempotent, does not wait.
    pub fn invalidate(&self) {
        if !self.cancellation_token.is_cancelled() {
            debug!(stream_key = %self.key, session_id = %self.id, "Invalidating session");
            self.cancellation_token.cancel();
        }
    }

    /// Invalidate and wait until the actor finished its teardown.
    pub async fn shutdown(&self) {
        self.invalidate();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(stream_key = %self.key, error = %e, "Session task panicked");
            }
        }
    }

    fn send(&self, command: SessionCommand) -> Result<()> {
        if self.cancellation_token.is_cancelled() {
            return Err(PlaybackError::SessionClosed);
        }
        self.commands
            .send(command)
            .map_err(|_| PlaybackError::SessionClosed)
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("cancelled", &self.cancellation_token.is_cancelled())
            .finish()
    }
}

struct SessionActor {
    scheduler: StreamingPlaybackScheduler,
    receiver: UnboundedReceiver<SessionCommand>,
    cancellation_token: CancellationToken,
    updates: Arc<PlaybackUpdates>,
    id: SessionId,
}

impl SessionActor {
    async fn run(mut self, tick_interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let outcome = loop {
            let step = tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => break Ok(()),
                command = self.receiver.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break Ok(()),
                },
                _ = ticker.tick() => self.scheduler.tick(),
            };

            if let Err(err) = step {
                if self.scheduler.mode() == SchedulerMode::Failed {
                    break Err(err);
                }
                debug!(error = %err, "Command rejected");
            }
        };

        // Timer is gone with the loop; now the adapter, then the sink.
        self.scheduler.invalidate();
        self.cancellation_token.cancel();

        let key = self.scheduler.key().clone();
        match outcome {
            Ok(()) => debug!("Session actor stopped"),
            Err(err) => {
                warn!(error = %err, "Stream torn down after failure");
                self.updates.announce(StreamEvent::Failed {
                    key,
                    message: err.to_string(),
                    recoverable: err.is_transient(),
                });
            }
        }
    }

    fn handle(&mut self, command: SessionCommand) -> Result<()> {
        let scheduler = &mut self.scheduler;
        match command {
            SessionCommand::Transport(event) => scheduler.on_transport_event(event),
            SessionCommand::BufferCompleted { generation } => {
                scheduler.on_buffer_completed(generation)
            }
            SessionCommand::Seek { needle, ack } => {
                let result = scheduler.seek(needle);
                reply(ack, &result);
                result
            }
            SessionCommand::Play => scheduler.play(),
            SessionCommand::Pause => {
                scheduler.pause();
                Ok(())
            }
            SessionCommand::Toggle => scheduler.toggle(),
            SessionCommand::SetRate { rate, ack } => {
                let result = scheduler.set_rate(rate);
                reply(ack, &result);
                result
            }
            SessionCommand::SkipForward => scheduler.skip_forward(),
            SessionCommand::SkipBackward => scheduler.skip_backward(),
            SessionCommand::Stats { reply } => {
                let _ = reply.send(scheduler.stats());
                Ok(())
            }
        }
    }
}

/// Answer a waiting caller with a copy of `result`.
fn reply(ack: Option<oneshot::Sender<Result<()>>>, result: &Result<()>) {
    let Some(ack) = ack else {
        return;
    };
    let answer = match result {
        Ok(()) => Ok(()),
        Err(PlaybackError::InvalidRate(rate)) => Err(PlaybackError::InvalidRate(*rate)),
        Err(PlaybackError::SessionClosed) => Err(PlaybackError::SessionClosed),
        Err(err) => Err(PlaybackError::Internal(err.to_string())),
    };
    let _ = ack.send(answer);
}
