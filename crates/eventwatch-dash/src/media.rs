//! MediaSelector: decides what the preview pane shows.
//!
//! Priority, highest first:
//!   1. selected event with a resolved clip URL   → `PlayingClip`
//!   2. selected event, resolution pending/failed → `Connecting` / `ClipError`
//!   3. live stream address known                 → `LiveImage`
//!   4. otherwise                                 → `Connecting`
//!
//! Clip URLs resolve asynchronously.  Every selection change bumps
//! `generation`; a resolution carries the generation it was started under and
//! its completion is applied only if that is still current.  The request
//! itself is never aborted, its result is just dropped.

use eventwatch_proto::protocol::Event;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResolvedMedia {
    PlayingClip(String),
    LiveImage(String),
    Connecting,
    ClipError(String),
}

/// A clip resolution the caller must perform and report back through
/// [`MediaSelector::complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    pub generation: u64,
    pub event_id: i64,
    pub clip_reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    Pending,
    Resolved(String),
    Failed(String),
}

#[derive(Debug, Clone)]
struct Selected {
    event_id: i64,
    resolution: Resolution,
}

#[derive(Debug, Default)]
pub struct MediaSelector {
    selected: Option<Selected>,
    generation: u64,
    live_url: Option<String>,
}

impl MediaSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected_id(&self) -> Option<i64> {
        self.selected.as_ref().map(|s| s.event_id)
    }

    /// Change the selection.  Returns the resolution to start, if any.
    ///
    /// Re-selecting the current event is a no-op unless its last
    /// resolution failed, in which case it is attempted again.
    pub fn select(&mut self, event: Option<&Event>) -> Option<ResolveRequest> {
        let Some(event) = event else {
            if self.selected.take().is_some() {
                self.generation += 1;
                debug!("media: deselected (gen {})", self.generation);
            }
            return None;
        };

        if let Some(current) = &self.selected {
            if current.event_id == event.id
                && !matches!(current.resolution, Resolution::Failed(_))
            {
                return None;
            }
        }

        self.generation += 1;
        info!(
            "media: selected event {} (gen {}), resolving {}",
            event.id, self.generation, event.clip_reference
        );
        self.selected = Some(Selected {
            event_id: event.id,
            resolution: Resolution::Pending,
        });
        Some(ResolveRequest {
            generation: self.generation,
            event_id: event.id,
            clip_reference: event.clip_reference.clone(),
        })
    }

    /// Report a finished resolution.  Returns `true` if it was applied,
    /// `false` if it belonged to a superseded selection.
    pub fn complete(&mut self, generation: u64, result: Result<String, String>) -> bool {
        if generation != self.generation {
            debug!(
                "media: discarding stale resolution (gen {} != current {})",
                generation, self.generation
            );
            return false;
        }
        let Some(selected) = self.selected.as_mut() else {
            return false;
        };
        selected.resolution = match result {
            Ok(url) => {
                info!("media: clip for event {} ready: {}", selected.event_id, url);
                Resolution::Resolved(url)
            }
            Err(message) => {
                warn!("media: clip for event {} failed: {}", selected.event_id, message);
                Resolution::Failed(message)
            }
        };
        true
    }

    /// Update the live stream address.  Returns `true` if it changed.
    pub fn set_live_url(&mut self, url: Option<String>) -> bool {
        if self.live_url == url {
            return false;
        }
        debug!("media: live url {:?} → {:?}", self.live_url, url);
        self.live_url = url;
        true
    }

    pub fn current(&self) -> ResolvedMedia {
        if let Some(selected) = &self.selected {
            return match &selected.resolution {
                Resolution::Resolved(url) => ResolvedMedia::PlayingClip(url.clone()),
                Resolution::Pending => ResolvedMedia::Connecting,
                Resolution::Failed(msg) => ResolvedMedia::ClipError(msg.clone()),
            };
        }
        match &self.live_url {
            Some(url) => ResolvedMedia::LiveImage(url.clone()),
            None => ResolvedMedia::Connecting,
        }
    }
}
