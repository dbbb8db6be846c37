use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// A detected event as stored by the detection service.
///
/// Events never change after they arrive; `id` is the only field the
/// dashboard interprets; everything else is display data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    #[serde(rename = "event_id")]
    pub id: i64,
    /// ISO-8601 text exactly as the server sent it.
    #[serde(rename = "event_timestamp")]
    pub timestamp: String,
    #[serde(rename = "event_code")]
    pub code: String,
    #[serde(rename = "event_description")]
    pub description: String,
    /// AI explanation of why the event was flagged.
    #[serde(rename = "event_detection_explanation_by_ai")]
    pub explanation: String,
    /// Opaque locator for the recorded clip, resolved to a URL on demand.
    #[serde(rename = "event_video_url")]
    pub clip_reference: String,
}

impl Event {
    /// Timestamp rendered in local time, or the raw server text when it does
    /// not parse.  The server emits naive timestamps when the database column
    /// carries no offset; those are taken as UTC.
    pub fn display_time(&self) -> String {
        use chrono::{DateTime, Local, NaiveDateTime, Utc};

        if let Ok(dt) = DateTime::parse_from_rfc3339(&self.timestamp) {
            return dt.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string();
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(&self.timestamp, "%Y-%m-%dT%H:%M:%S%.f") {
            let utc: DateTime<Utc> = DateTime::from_naive_utc_and_offset(naive, Utc);
            return utc.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string();
        }
        self.timestamp.clone()
    }
}

/// Queue depths reported by `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct QueueInfo {
    #[serde(default)]
    pub video_chunks_queue_size: u64,
    #[serde(default)]
    pub event_detection_queue_size: u64,
}

/// Response of `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ServiceStatus {
    pub service_active: bool,
    #[serde(default)]
    pub queue_info: QueueInfo,
    /// Live camera address; only present while a session is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
}

impl ServiceStatus {
    /// The live stream address, treating an empty string as absent.
    pub fn live_url(&self) -> Option<&str> {
        self.stream_url.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// One detection rule inside a [`SessionConfig`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventRule {
    pub event_code: String,
    pub event_description: String,
    pub detection_guidelines: String,
}

/// Body of `POST /start`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    pub model: String,
    pub rtsp_url: String,
    /// Seconds of video per analysed chunk.
    pub chunk_duration: u32,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub events: Vec<EventRule>,
}

/// Error body produced by the backend.  Domain errors carry a structured
/// `detail`, framework errors a plain string.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub detail: ErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetail {
    Coded { error_code: String, message: String },
    Text(String),
}

impl ErrorDetail {
    pub fn message(&self) -> &str {
        match self {
            ErrorDetail::Coded { message, .. } => message,
            ErrorDetail::Text(s) => s,
        }
    }
}

/// Pull a human-readable message out of an error response body, if any.
pub fn error_message(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .map(|b| b.detail.message().to_string())
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed event list envelope: {0}")]
    Envelope(serde_json::Error),
    #[error("malformed event record: {0}")]
    Record(serde_json::Error),
}

/// Result of decoding a `GET /events` body.
#[derive(Debug, Clone, Default)]
pub struct DecodedEvents {
    pub events: Vec<Event>,
    /// Records inside the envelope that did not decode and were skipped.
    pub rejected: usize,
}

#[derive(Deserialize)]
struct RawEventList {
    events: Vec<serde_json::Value>,
}

/// Decode an event list body record by record.
///
/// A body whose envelope is not `{ "events": [...] }` is an error.  A bad
/// record inside a good envelope is logged and skipped so one corrupt row
/// cannot hide the rest of the snapshot.
pub fn decode_event_list(body: &[u8]) -> Result<DecodedEvents, PayloadError> {
    let raw: RawEventList = serde_json::from_slice(body).map_err(PayloadError::Envelope)?;
    let mut out = DecodedEvents {
        events: Vec::with_capacity(raw.events.len()),
        rejected: 0,
    };
    for (idx, value) in raw.events.into_iter().enumerate() {
        match serde_json::from_value::<Event>(value) {
            Ok(event) => out.events.push(event),
            Err(e) => {
                warn!("event list: skipping record #{}: {}", idx, e);
                out.rejected += 1;
            }
        }
    }
    Ok(out)
}

/// Decode one push-stream message.
pub fn decode_push(data: &str) -> Result<Event, PayloadError> {
    serde_json::from_str(data).map_err(PayloadError::Record)
}
