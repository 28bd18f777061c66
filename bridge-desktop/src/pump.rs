//! Shared read bookkeeping for the desktop transports.
//!
//! Every (re)start of a read opens a new generation. Events are handed to
//! the listener while the state lock is held and only if their generation is
//! still current, so once `begin`/`cancel` returns no event of an older read
//! can reach the listener.

use std::sync::Arc;

use bridge_traits::error::{BridgeError, Result};
use bridge_traits::transport::{TransportEvent, TransportListener};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Identity of one read.
#[derive(Debug, Clone)]
pub(crate) struct ReadTicket {
    pub generation: u64,
    pub token: CancellationToken,
}

struct PumpState {
    generation: u64,
    token: CancellationToken,
    cancelled: bool,
    listener: Option<Arc<dyn TransportListener>>,
    runtime: Option<Handle>,
}

pub(crate) struct Pump {
    state: Mutex<PumpState>,
}

impl Pump {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PumpState {
                generation: 0,
                token: CancellationToken::new(),
                cancelled: false,
                listener: None,
                runtime: None,
            }),
        })
    }

    /// Attach the listener and capture the runtime reads are spawned on.
    pub fn attach(&self, listener: Arc<dyn TransportListener>) -> Result<()> {
        let runtime = Handle::try_current()
            .map_err(|_| BridgeError::NotAvailable("no tokio runtime for transport".into()))?;
        let mut state = self.state.lock();
        state.listener = Some(listener);
        state.runtime = Some(runtime);
        state.cancelled = false;
        Ok(())
    }

    /// Supersede the current read. Returns the new read's ticket and the
    /// runtime to run it on, or `None` once cancelled or never attached.
    pub fn begin(&self) -> Option<(ReadTicket, Handle)> {
        let mut state = self.state.lock();
        if state.cancelled {
            return None;
        }
        let runtime = state.runtime.clone()?;
        state.token.cancel();
        state.generation += 1;
        state.token = CancellationToken::new();
        Some((
            ReadTicket {
                generation: state.generation,
                token: state.token.clone(),
            },
            runtime,
        ))
    }

    /// Hand `event` to the listener if `ticket` is still current.
    pub fn deliver(&self, ticket: &ReadTicket, event: TransportEvent) -> bool {
        let state = self.state.lock();
        if state.cancelled || state.generation != ticket.generation {
            return false;
        }
        match &state.listener {
            Some(listener) => {
                listener.on_transport_event(event);
                true
            }
            None => false,
        }
    }

    /// Stop the current read and drop the listener.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        state.token.cancel();
        state.generation += 1;
        state.listener = None;
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }
}
