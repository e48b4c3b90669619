//! Live shipment thread stream.
//!
//! Framing on the wire:
//!
//! ```text
//! retry: 3000                     once, at open
//!
//! id: 42                          one block per new message
//! event: message
//! data: {"id":42,...}
//!
//! : heartbeat                     after every poll cycle
//! ```
//!
//! The connection closes once the budget elapses and the client reconnects
//! with `Last-Event-ID`. Appends wake the loop early through the shipment
//! notifier; the poll interval is only the fallback cadence.

use std::convert::Infallible;
use std::time::Duration;

use async_stream::stream;
use axum::response::sse::Event;
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

use super::api::ShipmentMessageItem;
use super::thread::ShipmentThread;
use crate::broker::Subscription;
use crate::error::{Error, Result};
use crate::state::ServerConfig;
use crate::storage::ShipmentMessageRecord;
use crate::thread::{Listed, Thread};

/// Timing of one stream connection.
#[derive(Debug, Clone, Copy)]
pub struct StreamTiming {
    pub budget: Duration,
    pub poll_interval: Duration,
    pub retry: Duration,
}

impl From<&ServerConfig> for StreamTiming {
    fn from(config: &ServerConfig) -> Self {
        Self {
            budget: config.stream_budget,
            poll_interval: config.stream_poll_interval,
            retry: config.stream_retry,
        }
    }
}

/// Logs when the client goes away or the budget runs out.
struct StreamGuard {
    shipment_id: i64,
    viewer_id: i64,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        tracing::info!(
            shipment_id = self.shipment_id,
            user_id = self.viewer_id,
            "Shipment stream closed"
        );
    }
}

/// Build the event stream for an already authorized subscriber.
///
/// `wake` must be subscribed before the first poll so no append between the
/// poll and the wait is lost.
pub fn message_stream(
    thread: ShipmentThread,
    viewer_id: i64,
    since_id: i64,
    mut wake: Option<Subscription<i64>>,
    timing: StreamTiming,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    stream! {
        let guard = StreamGuard {
            shipment_id: thread.id(),
            viewer_id,
        };
        tracing::info!(
            shipment_id = guard.shipment_id,
            user_id = viewer_id,
            since_id = since_id,
            "Shipment stream opened"
        );

        yield Ok(Event::default().retry(timing.retry));

        let deadline = Instant::now() + timing.budget;
        let mut cursor = EmittedCursor::new(since_id);

        while Instant::now() < deadline {
            match cursor.next_batch(&thread, viewer_id).await {
                Ok(batch) => {
                    for listed in batch {
                        match message_event(listed) {
                            Ok(event) => yield Ok(event),
                            Err(e) => tracing::warn!(error = %e, "Failed to encode stream event"),
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(
                        shipment_id = guard.shipment_id,
                        error = %e,
                        "Shipment stream poll failed"
                    );
                    break;
                }
            }

            yield Ok(Event::default().comment("heartbeat"));

            let next_poll = (Instant::now() + timing.poll_interval).min(deadline);
            match wake.as_mut() {
                Some(rx) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(next_poll) => {}
                        received = rx.recv() => {
                            if let Err(RecvError::Closed) = received {
                                wake = None;
                            }
                        }
                    }
                }
                None => tokio::time::sleep_until(next_poll).await,
            }
        }
    }
}

/// High-water-mark of what one connection already emitted.
#[derive(Debug, Clone, Copy)]
struct EmittedCursor {
    last_id: i64,
}

impl EmittedCursor {
    fn new(since_id: i64) -> Self {
        Self { last_id: since_id }
    }

    /// Messages after the mark; the mark moves past everything returned.
    ///
    /// The query runs on the blocking pool so a slow store never stalls the
    /// runtime worker driving the stream.
    async fn next_batch(
        &mut self,
        thread: &ShipmentThread,
        viewer_id: i64,
    ) -> Result<Vec<Listed<ShipmentMessageRecord>>> {
        let thread = thread.clone();
        let after = self.last_id;
        let batch = tokio::task::spawn_blocking(move || thread.messages_after(viewer_id, after))
            .await
            .map_err(|e| Error::Internal(format!("stream poll task failed: {e}")))??;
        if let Some(newest) = batch.last() {
            self.last_id = newest.message.id;
        }
        Ok(batch)
    }
}

fn message_event(listed: Listed<ShipmentMessageRecord>) -> Result<Event> {
    let id = listed.message.id;
    let payload = serde_json::to_string(&ShipmentMessageItem::from(listed))?;
    Ok(Event::default()
        .id(id.to_string())
        .event("message")
        .data(payload))
}

/// Resume point: `since_id` query wins over the `Last-Event-ID` header.
pub fn resume_point(since_id: Option<i64>, last_event_id: Option<&str>) -> i64 {
    since_id
        .or_else(|| last_event_id.and_then(|v| v.trim().parse::<i64>().ok()))
        .unwrap_or(0)
        .max(0)
}
