//! Service mode state machine.
//!
//! ```text
//!                 status: active            toggle
//!   Inactive ─────────────────────► ActiveLive ⇄ ActivePaused
//!      ▲                                 │            │
//!      └────────── status: stopped ──────┴────────────┘
//! ```
//!
//! Only status readings move into or out of `Inactive`; only the operator
//! toggle moves between live and paused.  Once an active session has been
//! seen to stop, the controller is finished: later readings are ignored and
//! the surrounding application is expected to leave the dashboard.
//!
//! Transitions return the [`SourceEffect`]s the core has to carry out, so the
//! machine itself stays free of tasks and timers.

use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceMode {
    Inactive,
    ActiveLive,
    ActivePaused,
}

impl ServiceMode {
    pub fn label(self) -> &'static str {
        match self {
            ServiceMode::Inactive => "inactive",
            ServiceMode::ActiveLive => "live",
            ServiceMode::ActivePaused => "paused",
        }
    }
}

/// Work the core performs after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEffect {
    StartStream,
    StopStream,
    StartEventPoller,
    StopEventPoller,
    StopStatusPoller,
    LeaveDashboard,
}

#[derive(Debug)]
pub struct ModeController {
    mode: ServiceMode,
    /// Mode entered when the service is first seen active.
    auto_refresh: bool,
    finished: bool,
}

impl ModeController {
    pub fn new(auto_refresh: bool) -> Self {
        Self {
            mode: ServiceMode::Inactive,
            auto_refresh,
            finished: false,
        }
    }

    pub fn mode(&self) -> ServiceMode {
        self.mode
    }

    /// True once the session has ended; no further transitions happen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether the event log may currently be mutated by sources.
    pub fn accepts_updates(&self) -> bool {
        self.mode == ServiceMode::ActiveLive
    }

    /// Feed one status reading.
    pub fn on_status(&mut self, service_active: bool) -> Vec<SourceEffect> {
        if self.finished {
            debug!("mode: status after session end ignored");
            return Vec::new();
        }
        match (self.mode, service_active) {
            (ServiceMode::Inactive, true) => {
                let next = if self.auto_refresh {
                    ServiceMode::ActiveLive
                } else {
                    ServiceMode::ActivePaused
                };
                self.enter(next)
            }
            (ServiceMode::Inactive, false) => {
                info!("mode: service is not running, leaving dashboard");
                self.finished = true;
                vec![SourceEffect::StopStatusPoller, SourceEffect::LeaveDashboard]
            }
            (_, false) => self.enter(ServiceMode::Inactive),
            (_, true) => Vec::new(),
        }
    }

    /// Operator auto-refresh toggle.  Ignored while inactive.
    pub fn toggle(&mut self) -> Vec<SourceEffect> {
        match self.mode {
            ServiceMode::ActiveLive => self.enter(ServiceMode::ActivePaused),
            ServiceMode::ActivePaused => self.enter(ServiceMode::ActiveLive),
            ServiceMode::Inactive => {
                debug!("mode: toggle ignored while inactive");
                Vec::new()
            }
        }
    }

    fn enter(&mut self, next: ServiceMode) -> Vec<SourceEffect> {
        let prev = self.mode;
        if prev == next {
            return Vec::new();
        }
        info!("mode: {} → {}", prev.label(), next.label());
        self.mode = next;
        match next {
            ServiceMode::ActiveLive => {
                self.auto_refresh = true;
                vec![SourceEffect::StartStream, SourceEffect::StartEventPoller]
            }
            ServiceMode::ActivePaused => {
                self.auto_refresh = false;
                vec![SourceEffect::StopStream, SourceEffect::StopEventPoller]
            }
            ServiceMode::Inactive => {
                self.finished = true;
                vec![
                    SourceEffect::StopStream,
                    SourceEffect::StopEventPoller,
                    SourceEffect::StopStatusPoller,
                    SourceEffect::LeaveDashboard,
                ]
            }
        }
    }
}
