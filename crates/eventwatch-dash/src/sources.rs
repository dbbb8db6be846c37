//! Leaf sources: status poller, event poller and push-stream listener.
//!
//! Each runs as its own task, reports into the core through the
//! `DashboardEvent` channel and exits when its cancellation token fires or
//! the core's channel closes.  Failures are logged and retried: pollers on
//! their next tick, the stream listener after a backoff.

use std::time::{Duration, Instant};

use eventwatch_proto::protocol::decode_push;
use eventwatch_proto::sse::SseDecoder;
use futures_util::StreamExt;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::core::DashboardEvent;
use crate::reconciler::Snapshot;

/// A running source and the token that stops it.
pub struct SourceHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SourceHandle {
    pub fn stop(self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

fn ticker(interval: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Query `GET /status` every `interval`, starting immediately.
pub fn spawn_status_poller(
    api: ApiClient,
    interval: Duration,
    tx: mpsc::Sender<DashboardEvent>,
    cancel: CancellationToken,
) -> SourceHandle {
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        let mut ticker = ticker(interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let result = tokio::select! {
                _ = token.cancelled() => break,
                r = api.status() => r,
            };
            match result {
                Ok(status) => {
                    debug!(
                        "status: active={} stream={:?}",
                        status.service_active, status.stream_url
                    );
                    if tx.send(DashboardEvent::StatusReading(status)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("status poll failed: {}", e),
            }
        }
        debug!("status poller stopped");
    });
    SourceHandle { cancel, task }
}

/// Fetch the newest `limit` events every `interval`, starting immediately.
pub fn spawn_event_poller(
    api: ApiClient,
    interval: Duration,
    limit: usize,
    tx: mpsc::Sender<DashboardEvent>,
    cancel: CancellationToken,
) -> SourceHandle {
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        let mut ticker = ticker(interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let requested_at = Instant::now();
            let result = tokio::select! {
                _ = token.cancelled() => break,
                r = api.events(limit) => r,
            };
            match result {
                Ok(decoded) => {
                    if decoded.rejected > 0 {
                        warn!(
                            "event poll: {} malformed record(s) skipped",
                            decoded.rejected
                        );
                    }
                    let snapshot = Snapshot {
                        requested_at,
                        events: decoded.events,
                    };
                    if tx.send(DashboardEvent::Snapshot(snapshot)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("event poll failed: {}", e),
            }
        }
        debug!("event poller stopped");
    });
    SourceHandle { cancel, task }
}

/// Reconnect delay: 1 s doubling per failed attempt, capped, plus jitter.
pub fn backoff_delay(attempt: u32, max: Duration) -> Duration {
    let exp = 2u64.saturating_pow(attempt.saturating_sub(1).min(16));
    let base = Duration::from_millis(1000u64.saturating_mul(exp)).min(max);
    let jitter = rand::thread_rng().gen_range(0..250);
    base + Duration::from_millis(jitter)
}

/// Subscribe to the push stream, reconnecting until cancelled.
pub fn spawn_stream_listener(
    api: ApiClient,
    path: String,
    max_backoff: Duration,
    tx: mpsc::Sender<DashboardEvent>,
    cancel: CancellationToken,
) -> SourceHandle {
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        let mut attempt = 0u32;
        let mut decoder = SseDecoder::new();
        'outer: loop {
            if attempt > 0 {
                let delay = backoff_delay(attempt, max_backoff);
                info!("stream: reconnecting in {}ms (attempt {})", delay.as_millis(), attempt);
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            attempt += 1;

            let response = tokio::select! {
                _ = token.cancelled() => break,
                r = api.open_stream(&path) => r,
            };
            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    warn!("stream: connect failed: {}", e);
                    continue;
                }
            };
            info!("stream: connected to {}", path);
            decoder.reset();
            let mut body = response.bytes_stream();
            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => break 'outer,
                    n = body.next() => n,
                };
                let chunk = match next {
                    Some(Ok(c)) => c,
                    Some(Err(e)) => {
                        warn!("stream: read error: {}", e);
                        break;
                    }
                    None => {
                        info!("stream: closed by server");
                        break;
                    }
                };
                // a delivered chunk means the connection is healthy again
                attempt = 1;
                for message in decoder.feed(&chunk) {
                    match decode_push(&message) {
                        Ok(event) => {
                            if tx.send(DashboardEvent::Push(event)).await.is_err() {
                                break 'outer;
                            }
                        }
                        Err(e) => warn!("stream: dropping message: {}", e),
                    }
                }
            }
        }
        debug!("stream listener stopped");
    });
    SourceHandle { cancel, task }
}
