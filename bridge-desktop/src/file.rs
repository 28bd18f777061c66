//! Local file transport using Tokio's async file API.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bridge_traits::error::{BridgeError, Result};
use bridge_traits::transport::{Transport, TransportEvent, TransportListener};
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

use crate::pump::{Pump, ReadTicket};

#[derive(Debug, Clone)]
pub struct FileTransportConfig {
    /// Bytes per `Data` event.
    pub chunk_size: usize,
    /// Pause between chunks, to emulate a slow medium.
    pub read_delay: Option<Duration>,
}

impl Default for FileTransportConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            read_delay: None,
        }
    }
}

/// Streams a file from disk, restarting at any byte offset on request.
pub struct FileTransport {
    path: PathBuf,
    config: FileTransportConfig,
    pump: Arc<Pump>,
}

impl FileTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_config(path, FileTransportConfig::default())
    }

    pub fn with_config(path: impl Into<PathBuf>, config: FileTransportConfig) -> Self {
        Self {
            path: path.into(),
            config,
            pump: Pump::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn spawn_read(&self, offset: u64) {
        let Some((ticket, runtime)) = self.pump.begin() else {
            return;
        };
        runtime.spawn(read_file(
            self.path.clone(),
            offset,
            self.config.clone(),
            ticket,
            self.pump.clone(),
        ));
    }
}

impl Transport for FileTransport {
    fn start(&self, listener: Arc<dyn TransportListener>) -> Result<()> {
        if !self.path.is_file() {
            return Err(BridgeError::NotAvailable(format!(
                "file not found: {}",
                self.path.display()
            )));
        }
        self.pump.attach(listener)?;
        debug!(path = %self.path.display(), "Starting file transport");
        self.spawn_read(0);
        Ok(())
    }

    fn seek_to(&self, byte_offset: u64) {
        debug!(path = %self.path.display(), byte_offset, "Restarting file read");
        self.spawn_read(byte_offset);
    }

    fn cancel(&self) {
        self.pump.cancel();
    }
}

impl std::fmt::Debug for FileTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTransport")
            .field("path", &self.path)
            .field("cancelled", &self.pump.is_cancelled())
            .finish()
    }
}

async fn read_file(
    path: PathBuf,
    offset: u64,
    config: FileTransportConfig,
    ticket: ReadTicket,
    pump: Arc<Pump>,
) {
    let token = ticket.token.clone();
    let outcome = tokio::select! {
        _ = token.cancelled() => return,
        outcome = pump_file(&path, offset, &config, &ticket, &pump) => outcome,
    };

    match outcome {
        Ok(end_offset) => {
            pump.deliver(&ticket, TransportEvent::Finished { end_offset });
        }
        Err(e) => {
            warn!(path = %path.display(), offset, error = %e, "File read failed");
            pump.deliver(&ticket, TransportEvent::Failed(e.to_string()));
        }
    }
}

async fn pump_file(
    path: &Path,
    offset: u64,
    config: &FileTransportConfig,
    ticket: &ReadTicket,
    pump: &Pump,
) -> std::io::Result<u64> {
    let mut file = File::open(path).await?;
    let total = file.metadata().await?.len();
    if offset > 0 {
        file.seek(SeekFrom::Start(offset)).await?;
    }

    let mut position = offset;
    let mut buf = vec![0u8; config.chunk_size.max(1)];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(position);
        }
        let start = position;
        position += n as u64;

        let event = TransportEvent::Data {
            offset: start,
            bytes: Bytes::copy_from_slice(&buf[..n]),
            progress: (total > 0).then(|| (position as f64 / total as f64).min(1.0)),
            total_bytes_expected: Some(total),
        };
        if !pump.deliver(ticket, event) {
            return Ok(position);
        }

        if let Some(delay) = config.read_delay {
            tokio::time::sleep(delay).await;
        }
    }
}
