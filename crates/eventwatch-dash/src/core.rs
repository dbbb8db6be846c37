/// DashboardCore: single-owner event loop for all dashboard state.
///
/// The event log (`EventLog`), the service mode (`ModeController`) and the
/// preview selection (`MediaSelector`) are owned exclusively by this loop.
/// Sources, clip resolutions and operator commands send `DashboardEvent`s on
/// one channel; the loop applies them one at a time in receipt order, so a
/// push and a snapshot never interleave.
///
/// After each event that changes something visible, the core republishes
/// `DashboardView` and broadcasts the matching `DashboardUpdate`s.
///
/// Lifecycle is explicit: `run` starts the status poller, `Shutdown` (or the
/// channel closing) stops every source and clears the log.
use std::time::Duration;

use eventwatch_proto::config::Config;
use eventwatch_proto::protocol::{Event, ServiceStatus};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::ApiClient;
use crate::media::{MediaSelector, ResolvedMedia};
use crate::mode::{ModeController, ServiceMode, SourceEffect};
use crate::reconciler::{EventLog, Snapshot, SnapshotOutcome};
use crate::sources::{self, SourceHandle};
use crate::view::{DashboardUpdate, DashboardView, ViewState};

// ── DashboardEvent ────────────────────────────────────────────────────────────

/// All inputs into the DashboardCore loop.
#[derive(Debug)]
pub enum DashboardEvent {
    /// Status poller reading.
    StatusReading(ServiceStatus),
    /// Event poller snapshot.
    Snapshot(Snapshot),
    /// One event from the push stream.
    Push(Event),
    /// A clip resolution finished (possibly for a superseded selection).
    ClipResolved {
        generation: u64,
        result: Result<String, String>,
    },
    /// Operator input.
    Operator(OperatorCommand),
    /// Leave the dashboard: stop all sources and clear state.
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum OperatorCommand {
    /// Focus an event (`None` clears the selection).
    Select(Option<Event>),
    /// Flip between live and paused.
    ToggleAutoRefresh,
    /// Ask the service to stop the monitoring session.
    StopService,
}

// ── DashboardCore ─────────────────────────────────────────────────────────────

pub struct DashboardCore {
    config: Config,
    api: ApiClient,
    log: EventLog,
    mode: ModeController,
    media: MediaSelector,
    status: Option<ServiceStatus>,
    view: DashboardView,
    /// Own sender, handed to sources and resolution tasks.
    event_tx: mpsc::Sender<DashboardEvent>,
    broadcast_tx: broadcast::Sender<DashboardUpdate>,
    /// Parent of every source token; cancelled on shutdown.
    root_cancel: CancellationToken,
    status_poller: Option<SourceHandle>,
    event_poller: Option<SourceHandle>,
    stream_listener: Option<SourceHandle>,
    /// Last broadcast values, to avoid redundant updates.
    last_mode: ServiceMode,
    last_media: ResolvedMedia,
}

impl DashboardCore {
    pub fn new(
        config: Config,
        api: ApiClient,
        broadcast_tx: broadcast::Sender<DashboardUpdate>,
        event_tx: mpsc::Sender<DashboardEvent>,
    ) -> Self {
        let log = EventLog::new(config.dashboard.capacity);
        let mode = ModeController::new(config.dashboard.auto_refresh);
        Self {
            config,
            api,
            log,
            mode,
            media: MediaSelector::new(),
            status: None,
            view: DashboardView::new(),
            event_tx,
            broadcast_tx,
            root_cancel: CancellationToken::new(),
            status_poller: None,
            event_poller: None,
            stream_listener: None,
            last_mode: ServiceMode::Inactive,
            last_media: ResolvedMedia::Connecting,
        }
    }

    /// Shared read-only view (for the console, control API and tests).
    pub fn view(&self) -> DashboardView {
        self.view.clone()
    }

    /// Run the event loop.  Returns after `Shutdown` or when every sender
    /// has been dropped.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DashboardEvent>) -> anyhow::Result<()> {
        info!("DashboardCore: starting event loop");
        self.start();
        self.publish().await;

        loop {
            let evt = event_rx.recv().await;
            match evt {
                None => {
                    info!("DashboardCore: event channel closed, shutting down");
                    break;
                }

                Some(DashboardEvent::Shutdown) => {
                    info!("DashboardCore: shutdown requested");
                    break;
                }

                Some(DashboardEvent::StatusReading(status)) => {
                    self.handle_status(status).await;
                }

                Some(DashboardEvent::Snapshot(snapshot)) => {
                    self.handle_snapshot(snapshot).await;
                }

                Some(DashboardEvent::Push(event)) => {
                    self.handle_push(event).await;
                }

                Some(DashboardEvent::ClipResolved { generation, result }) => {
                    if self.media.complete(generation, result) {
                        self.publish().await;
                    }
                }

                Some(DashboardEvent::Operator(cmd)) => {
                    debug!("DashboardCore: operator {:?}", cmd);
                    self.handle_operator(cmd).await;
                }
            }
        }

        self.stop().await;
        Ok(())
    }

    // ── lifecycle ─────────────────────────────────────────────────────────────

    fn start(&mut self) {
        let interval = Duration::from_secs(self.config.polling.interval_secs);
        self.status_poller = Some(sources::spawn_status_poller(
            self.api.clone(),
            interval,
            self.event_tx.clone(),
            self.root_cancel.child_token(),
        ));
    }

    async fn stop(&mut self) {
        info!("DashboardCore: stopping all sources");
        self.root_cancel.cancel();
        self.status_poller = None;
        self.event_poller = None;
        self.stream_listener = None;
        if !self.log.is_empty() {
            debug!("DashboardCore: clearing {} events", self.log.len());
        }
        self.log.clear();
        self.media.select(None);
        self.publish().await;
    }

    // ── source events ─────────────────────────────────────────────────────────

    async fn handle_status(&mut self, status: ServiceStatus) {
        if self.mode.is_finished() {
            debug!("DashboardCore: status reading after session end ignored");
            return;
        }
        let effects = self.mode.on_status(status.service_active);
        self.media
            .set_live_url(status.live_url().map(|s| s.to_string()));
        self.status = Some(status);
        self.apply_effects(&effects);
        self.publish().await;
        if effects.contains(&SourceEffect::LeaveDashboard) {
            let _ = self.broadcast_tx.send(DashboardUpdate::LeaveDashboard);
        }
    }

    async fn handle_snapshot(&mut self, snapshot: Snapshot) {
        if !self.mode.accepts_updates() {
            debug!(
                "DashboardCore: dropping snapshot while {}",
                self.mode.mode().label()
            );
            return;
        }
        let count = snapshot.events.len();
        if self.log.apply_snapshot(snapshot) == SnapshotOutcome::Applied {
            debug!("DashboardCore: snapshot applied ({} events)", count);
            self.publish_events().await;
        }
    }

    async fn handle_push(&mut self, event: Event) {
        if !self.mode.accepts_updates() {
            debug!(
                "DashboardCore: dropping push {} while {}",
                event.id,
                self.mode.mode().label()
            );
            return;
        }
        let id = event.id;
        if self.log.apply_push(event) {
            info!(
                "DashboardCore: new event {} ({}/{} in log)",
                id,
                self.log.len(),
                self.log.capacity()
            );
            self.publish_events().await;
        }
    }

    // ── operator ──────────────────────────────────────────────────────────────

    async fn handle_operator(&mut self, cmd: OperatorCommand) {
        match cmd {
            OperatorCommand::Select(event) => {
                if let Some(req) = self.media.select(event.as_ref()) {
                    let api = self.api.clone();
                    let tx = self.event_tx.clone();
                    debug!(
                        "DashboardCore: resolving clip for event {} (generation {})",
                        req.event_id, req.generation
                    );
                    tokio::spawn(async move {
                        let result = api
                            .resolve_clip(&req.clip_reference)
                            .await
                            .map_err(|e| e.to_string());
                        let _ = tx
                            .send(DashboardEvent::ClipResolved {
                                generation: req.generation,
                                result,
                            })
                            .await;
                    });
                }
                self.publish().await;
            }
            OperatorCommand::ToggleAutoRefresh => {
                let effects = self.mode.toggle();
                self.apply_effects(&effects);
                self.publish().await;
            }
            OperatorCommand::StopService => {
                info!("DashboardCore: requesting service stop");
                let api = self.api.clone();
                let broadcast_tx = self.broadcast_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = api.stop().await {
                        error!("stop request failed: {}", e);
                        let _ = broadcast_tx
                            .send(DashboardUpdate::Notice(format!("stop failed: {}", e)));
                    }
                });
            }
        }
    }

    // ── source management ─────────────────────────────────────────────────────

    fn apply_effects(&mut self, effects: &[SourceEffect]) {
        for effect in effects {
            match effect {
                SourceEffect::StartStream => {
                    if !self.config.stream.enabled {
                        continue;
                    }
                    if self
                        .stream_listener
                        .as_ref()
                        .is_some_and(|h| !h.is_finished())
                    {
                        continue;
                    }
                    self.stream_listener = Some(sources::spawn_stream_listener(
                        self.api.clone(),
                        self.config.stream.path.clone(),
                        Duration::from_secs(self.config.stream.max_backoff_secs),
                        self.event_tx.clone(),
                        self.root_cancel.child_token(),
                    ));
                }
                SourceEffect::StopStream => {
                    if let Some(h) = self.stream_listener.take() {
                        h.stop();
                    }
                }
                SourceEffect::StartEventPoller => {
                    if self
                        .event_poller
                        .as_ref()
                        .is_some_and(|h| !h.is_finished())
                    {
                        continue;
                    }
                    self.event_poller = Some(sources::spawn_event_poller(
                        self.api.clone(),
                        Duration::from_secs(self.config.polling.interval_secs),
                        self.config.polling.event_limit,
                        self.event_tx.clone(),
                        self.root_cancel.child_token(),
                    ));
                }
                SourceEffect::StopEventPoller => {
                    if let Some(h) = self.event_poller.take() {
                        h.stop();
                    }
                }
                SourceEffect::StopStatusPoller => {
                    if let Some(h) = self.status_poller.take() {
                        h.stop();
                    }
                }
                SourceEffect::LeaveDashboard => {
                    warn!("DashboardCore: monitoring session is over");
                }
            }
        }
    }

    // ── publishing ────────────────────────────────────────────────────────────

    fn snapshot_view(&self) -> ViewState {
        ViewState {
            rev: 0,
            mode: self.mode.mode(),
            events: self.log.to_vec(),
            selected: self.media.selected_id(),
            media: self.media.current(),
            status: self.status.clone(),
        }
    }

    /// Publish the view and broadcast whatever changed in mode or media.
    async fn publish(&mut self) {
        self.view.publish(self.snapshot_view()).await;

        let mode = self.mode.mode();
        if mode != self.last_mode {
            self.last_mode = mode;
            let _ = self.broadcast_tx.send(DashboardUpdate::ModeChanged(mode));
        }
        let media = self.media.current();
        if media != self.last_media {
            self.last_media = media.clone();
            let _ = self.broadcast_tx.send(DashboardUpdate::MediaChanged(media));
        }
    }

    async fn publish_events(&mut self) {
        self.publish().await;
        let _ = self.broadcast_tx.send(DashboardUpdate::EventsChanged);
    }
}

/// Find an event for selection: the local log first, then `GET /events/{id}`.
pub async fn lookup_event(view: &DashboardView, api: &ApiClient, id: i64) -> anyhow::Result<Event> {
    if let Some(event) = view.event(id).await {
        return Ok(event);
    }
    debug!("event {} not in local log, fetching", id);
    Ok(api.event(id).await?)
}
