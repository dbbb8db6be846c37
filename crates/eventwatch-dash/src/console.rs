//! Line-oriented operator console on stdin/stdout.
//!
//! Commands:
//! ```text
//!   select <id>   preview the clip of an event
//!   deselect      back to the live image
//!   toggle        pause / resume auto-refresh
//!   list [n]      print the newest n events (default 10)
//!   stop          stop the monitoring session
//!   quit          leave the dashboard
//! ```

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::core::{lookup_event, DashboardEvent, OperatorCommand};
use crate::media::ResolvedMedia;
use crate::view::{DashboardUpdate, DashboardView};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Select(i64),
    Deselect,
    Toggle,
    List(usize),
    Stop,
    Quit,
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Err("empty command".to_string());
    };
    let arg = parts.next();
    match (cmd.to_ascii_lowercase().as_str(), arg) {
        ("select" | "s", Some(id)) => id
            .parse()
            .map(ConsoleCommand::Select)
            .map_err(|_| format!("not an event id: {}", id)),
        ("select" | "s", None) => Err("usage: select <id>".to_string()),
        ("deselect" | "d", _) => Ok(ConsoleCommand::Deselect),
        ("toggle" | "t", _) => Ok(ConsoleCommand::Toggle),
        ("list" | "l", None) => Ok(ConsoleCommand::List(10)),
        ("list" | "l", Some(n)) => n
            .parse()
            .map(ConsoleCommand::List)
            .map_err(|_| format!("not a count: {}", n)),
        ("stop", _) => Ok(ConsoleCommand::Stop),
        ("quit" | "q" | "exit", _) => Ok(ConsoleCommand::Quit),
        (other, _) => Err(format!("unknown command: {}", other)),
    }
}

pub fn describe_media(media: &ResolvedMedia) -> String {
    match media {
        ResolvedMedia::PlayingClip(url) => format!("playing clip {}", url),
        ResolvedMedia::LiveImage(url) => format!("live {}", url),
        ResolvedMedia::Connecting => "connecting…".to_string(),
        ResolvedMedia::ClipError(msg) => format!("clip error: {}", msg),
    }
}

/// Print dashboard updates until the session ends.  Returns on
/// `LeaveDashboard` or when the core goes away.
pub async fn print_updates(view: DashboardView, mut updates: broadcast::Receiver<DashboardUpdate>) {
    let mut newest_seen: Option<i64> = None;
    loop {
        match updates.recv().await {
            Ok(DashboardUpdate::EventsChanged) => {
                let state = view.get().await;
                for event in state
                    .events
                    .iter()
                    .take_while(|e| Some(e.id) != newest_seen)
                    .take(5)
                {
                    println!(
                        "[{}] #{} {} - {}",
                        event.display_time(),
                        event.id,
                        event.code,
                        event.description
                    );
                }
                newest_seen = state.events.first().map(|e| e.id);
            }
            Ok(DashboardUpdate::ModeChanged(mode)) => println!("mode: {}", mode.label()),
            Ok(DashboardUpdate::MediaChanged(media)) => {
                println!("preview: {}", describe_media(&media))
            }
            Ok(DashboardUpdate::Notice(msg)) => println!("! {}", msg),
            Ok(DashboardUpdate::LeaveDashboard) => {
                println!("monitoring session ended");
                break;
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!("console: lagged by {} updates", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Read operator commands from stdin.  Returns `true` on `quit`, `false`
/// on end of input.
pub async fn read_commands(
    view: DashboardView,
    api: ApiClient,
    event_tx: mpsc::Sender<DashboardEvent>,
) -> anyhow::Result<bool> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let cmd = match parse_command(&line) {
            Ok(cmd) => cmd,
            Err(e) => {
                println!("? {}", e);
                continue;
            }
        };
        let op = match cmd {
            ConsoleCommand::Select(id) => match lookup_event(&view, &api, id).await {
                Ok(event) => OperatorCommand::Select(Some(event)),
                Err(e) => {
                    warn!("console: cannot select {}: {}", id, e);
                    println!("? no event {}", id);
                    continue;
                }
            },
            ConsoleCommand::Deselect => OperatorCommand::Select(None),
            ConsoleCommand::Toggle => OperatorCommand::ToggleAutoRefresh,
            ConsoleCommand::Stop => OperatorCommand::StopService,
            ConsoleCommand::List(n) => {
                let state = view.get().await;
                println!(
                    "{} events, mode {}, preview {}",
                    state.events.len(),
                    state.mode.label(),
                    describe_media(&state.media)
                );
                for event in state.events.iter().take(n) {
                    let marker = if state.selected == Some(event.id) { '>' } else { ' ' };
                    println!(
                        "{} #{:<6} {} {:<8} {}",
                        marker,
                        event.id,
                        event.display_time(),
                        event.code,
                        event.description
                    );
                }
                continue;
            }
            ConsoleCommand::Quit => return Ok(true),
        };
        if event_tx.send(DashboardEvent::Operator(op)).await.is_err() {
            return Ok(true);
        }
    }
    Ok(false)
}
