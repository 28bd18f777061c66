//! HTTP transport using Reqwest
//!
//! Streams a remote resource with `Range` requests so that a read can be
//! restarted at any byte offset. Interrupted reads are resumed from the last
//! delivered byte with exponential backoff; only when the retries run out is
//! a `Failed` event reported.

use std::sync::Arc;
use std::time::Duration;

use bridge_traits::error::{BridgeError, Result};
use bridge_traits::transport::{Transport, TransportEvent, TransportListener};
use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::pump::{Pump, ReadTicket};

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub connect_timeout: Duration,
    /// Retries per interruption; the counter resets once bytes flow again.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_retries: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            user_agent: format!("stream-pipeline/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Reqwest-based [`Transport`] for `http(s)` sources.
pub struct HttpTransport {
    url: String,
    host: String,
    client: Client,
    config: HttpTransportConfig,
    pump: Arc<Pump>,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, config: HttpTransportConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(4)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| BridgeError::OperationFailed(format!("HTTP client setup: {e}")))?;
        Ok(Self::with_client(url, client, config))
    }

    /// Use a preconfigured client, e.g. one shared across streams.
    pub fn with_client(url: impl Into<String>, client: Client, config: HttpTransportConfig) -> Self {
        let url = url.into();
        let host = reqwest::Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .unwrap_or_default();
        Self {
            url,
            host,
            client,
            config,
            pump: Pump::new(),
        }
    }

    fn spawn_read(&self, offset: u64) {
        let Some((ticket, runtime)) = self.pump.begin() else {
            return;
        };
        runtime.spawn(stream_body(
            self.client.clone(),
            self.url.clone(),
            offset,
            self.config.clone(),
            ticket,
            self.pump.clone(),
        ));
    }
}

impl Transport for HttpTransport {
    fn start(&self, listener: Arc<dyn TransportListener>) -> Result<()> {
        if reqwest::Url::parse(&self.url).is_err() {
            return Err(BridgeError::NotAvailable(format!(
                "invalid URL for host '{}'",
                self.host
            )));
        }
        self.pump.attach(listener)?;
        debug!(host = %self.host, "Starting HTTP transport");
        self.spawn_read(0);
        Ok(())
    }

    fn seek_to(&self, byte_offset: u64) {
        debug!(host = %self.host, byte_offset, "Restarting HTTP read");
        self.spawn_read(byte_offset);
    }

    fn cancel(&self) {
        self.pump.cancel();
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("host", &self.host)
            .field("cancelled", &self.pump.is_cancelled())
            .finish()
    }
}

/// `Range` header value asking for everything from `offset`.
pub(crate) fn range_header(offset: u64) -> String {
    format!("bytes={offset}-")
}

/// Complete length from a `Content-Range` value such as `bytes 0-99/1234`.
pub(crate) fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

/// Delay before retry number `attempt` (1-based).
pub(crate) fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(max)
}

enum Attempt {
    Done,
    Retry(String),
    Fatal(String),
}

async fn stream_body(
    client: Client,
    url: String,
    offset: u64,
    config: HttpTransportConfig,
    ticket: ReadTicket,
    pump: Arc<Pump>,
) {
    let token = ticket.token.clone();
    tokio::select! {
        _ = token.cancelled() => {}
        event = fetch(&client, &url, offset, &config, &ticket, &pump) => {
            pump.deliver(&ticket, event);
        }
    }
}

async fn fetch(
    client: &Client,
    url: &str,
    offset: u64,
    config: &HttpTransportConfig,
    ticket: &ReadTicket,
    pump: &Pump,
) -> TransportEvent {
    let mut position = offset;
    let mut total = None;
    let mut attempt = 0u32;

    loop {
        let before = position;
        match read_once(client, url, &mut position, &mut total, ticket, pump).await {
            Attempt::Done => return TransportEvent::Finished { end_offset: position },
            Attempt::Fatal(message) => {
                warn!(position, error = %message, "HTTP read failed");
                return TransportEvent::Failed(message);
            }
            Attempt::Retry(message) => {
                if position > before {
                    attempt = 0;
                }
                attempt += 1;
                if attempt > config.max_retries {
                    warn!(
                        position,
                        attempts = attempt,
                        error = %message,
                        "HTTP read retries exhausted"
                    );
                    return TransportEvent::Failed(message);
                }

                let delay = backoff_delay(config.base_delay, config.max_delay, attempt);
                warn!(
                    position,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "HTTP read interrupted, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}

async fn read_once(
    client: &Client,
    url: &str,
    position: &mut u64,
    total: &mut Option<u64>,
    ticket: &ReadTicket,
    pump: &Pump,
) -> Attempt {
    let mut request = client.get(url);
    if *position > 0 {
        request = request.header(RANGE, range_header(*position));
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) if e.is_connect() => return Attempt::Retry(format!("Connection failed: {e}")),
        Err(e) if e.is_timeout() => return Attempt::Retry("Request timed out".to_string()),
        Err(e) => return Attempt::Retry(e.to_string()),
    };

    let status = response.status();
    let header_total = response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range_total);

    if status == StatusCode::RANGE_NOT_SATISFIABLE {
        return match header_total.or(*total) {
            Some(length) if *position >= length => Attempt::Done,
            _ => Attempt::Fatal(format!("HTTP {status} at byte {position}")),
        };
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Attempt::Retry(format!("HTTP {status}"));
    }
    if !status.is_success() {
        return Attempt::Fatal(format!("HTTP {status}"));
    }
    if *position > 0 && status != StatusCode::PARTIAL_CONTENT {
        return Attempt::Fatal("server does not support range requests".to_string());
    }

    if let Some(length) = header_total.or_else(|| {
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|len| len + *position)
    }) {
        *total = Some(length);
    }

    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => return Attempt::Retry(e.to_string()),
        };
        if bytes.is_empty() {
            continue;
        }
        let offset = *position;
        *position += bytes.len() as u64;
        let event = TransportEvent::Data {
            offset,
            bytes,
            progress: (*total)
                .filter(|t| *t > 0)
                .map(|t| (*position as f64 / t as f64).min(1.0)),
            total_bytes_expected: *total,
        };
        if !pump.deliver(ticket, event) {
            return Attempt::Done;
        }
    }

    match *total {
        Some(length) if *position < length => {
            Attempt::Retry(format!("connection closed at byte {position} of {length}"))
        }
        _ => Attempt::Done,
    }
}
