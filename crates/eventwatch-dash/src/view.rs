//! DashboardView: read-only snapshot of dashboard state for consumers.
//!
//! The core is the only writer.  The list view, the console and the control
//! API read it, typically after a `DashboardUpdate` broadcast says something
//! changed.

use std::sync::Arc;

use eventwatch_proto::protocol::{Event, ServiceStatus};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::media::ResolvedMedia;
use crate::mode::ServiceMode;

/// Change notifications broadcast by the core.
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardUpdate {
    EventsChanged,
    ModeChanged(ServiceMode),
    MediaChanged(ResolvedMedia),
    /// The monitoring session ended; the application should leave the
    /// dashboard and call for shutdown.
    LeaveDashboard,
    /// Operator-facing message, e.g. a failed stop request.
    Notice(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewState {
    /// Incremented on every publish.
    pub rev: u64,
    pub mode: ServiceMode,
    /// Newest first.
    pub events: Vec<Event>,
    pub selected: Option<i64>,
    pub media: ResolvedMedia,
    pub status: Option<ServiceStatus>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            rev: 0,
            mode: ServiceMode::Inactive,
            events: Vec::new(),
            selected: None,
            media: ResolvedMedia::Connecting,
            status: None,
        }
    }
}

impl ViewState {
    pub fn event(&self, id: i64) -> Option<&Event> {
        self.events.iter().find(|e| e.id == id)
    }
}

#[derive(Clone, Default)]
pub struct DashboardView {
    state: Arc<RwLock<ViewState>>,
}

impl DashboardView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> ViewState {
        self.state.read().await.clone()
    }

    pub async fn event(&self, id: i64) -> Option<Event> {
        self.state.read().await.event(id).cloned()
    }

    /// Replace the published state; `rev` is taken care of here.
    pub(crate) async fn publish(&self, mut next: ViewState) {
        let mut state = self.state.write().await;
        next.rev = state.rev + 1;
        *state = next;
    }
}
