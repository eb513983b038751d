//! # Dispatch Console
//!
//! Follows one emergency call from the terminal: prints the responder's
//! remaining distance and ETA as they change, and accepts lifecycle
//! commands (arrival, completion, cancellation) on stdin.

mod commands;
mod config;
mod error;

use crate::commands::{Command, SessionCommand, HELP};
use crate::config::{ConsoleConfig, FeedMode};
use crate::error::{ConsoleError, ConsoleResult};

use dispatch_backend::{
    load_access_token, CallRepository, FileStore, KeyValueStore, ACCESS_TOKEN_KEY, ACTIVE_CALL_KEY,
};
use dispatch_core::{CallId, EventPayload, TrackingEvent};
use dispatch_realtime::{ChangeFeed, PollingFeed, RealtimeFeed};
use dispatch_routing::RouteProviderClient;
use dispatch_tracker::CallSession;

use futures::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let command = match Command::parse(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    let config = ConsoleConfig::load()?;
    info!(
        backend = %config.backend.url,
        routing = %config.routing.base_url,
        feed = ?config.feed,
        "Configuration loaded"
    );

    let store = FileStore::open(&config.storage_path)?;

    let result = match command {
        Command::Follow(call_id) => follow(&config, &store, call_id).await,
        Command::Resume => resume(&config, &store).await,
        Command::Login(token) => store.set(ACCESS_TOKEN_KEY, &token).map_err(Into::into),
        Command::Logout => logout(&store),
    };

    if let Err(e) = &result {
        if e.requires_reauthentication() {
            eprintln!(
                "Not signed in or not configured: {}. Run `dispatch-console login <token>`.",
                e
            );
        }
    }
    result.map_err(Into::into)
}

/// Initialize logging with tracing
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dispatch_tracker=debug,dispatch_routing=debug"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        }
    }
}

fn logout(store: &FileStore) -> ConsoleResult<()> {
    store.remove(ACCESS_TOKEN_KEY)?;
    store.remove(ACTIVE_CALL_KEY)?;
    println!("Signed out");
    Ok(())
}

async fn resume(config: &ConsoleConfig, store: &FileStore) -> ConsoleResult<()> {
    let stored = store
        .get(ACTIVE_CALL_KEY)
        .ok_or_else(|| ConsoleError::usage("no active call, use `follow <call-id>`"))?;
    let call_id = stored
        .parse::<CallId>()
        .map_err(|_| ConsoleError::usage(format!("stored call id is invalid: {}", stored)))?;
    follow(config, store, call_id).await
}

async fn follow(config: &ConsoleConfig, store: &FileStore, call_id: CallId) -> ConsoleResult<()> {
    let token = load_access_token(store)?;
    let repository: Arc<dyn CallRepository> =
        Arc::new(dispatch_backend::connect(config.backend.clone(), store)?);
    let provider = Arc::new(RouteProviderClient::osrm(config.routing.clone())?);

    let feed: Box<dyn ChangeFeed> = match config.feed {
        FeedMode::Realtime => Box::new(RealtimeFeed::new(&config.backend, token)),
        FeedMode::Poll => Box::new(PollingFeed::new(
            repository.clone(),
            config.backend.poll_interval(),
        )),
    };

    let session = CallSession::start(
        call_id,
        repository,
        feed.as_ref(),
        provider.clone(),
        config.tracker.clone(),
    )
    .await?;
    store.set(ACTIVE_CALL_KEY, &call_id.to_string())?;

    println!("Following call {} ({})", call_id, session.status());
    println!("{}", session.snapshot().summary());
    println!("Type help for commands.");

    let mut printer = tokio::spawn(print_events(session.clone()));
    let finished = run_commands(&session, &mut printer).await;

    session.teardown();
    printer.abort();

    if session.status().is_terminal() {
        store.remove(ACTIVE_CALL_KEY)?;
    }

    let stats = provider.stats();
    info!(
        call_id = %call_id,
        recalculations = session.snapshot().recalculations,
        provider_requests = stats.requests_sent,
        cache_hits = stats.cache_hits,
        rate_limited = stats.rate_limited,
        "Stopped following call"
    );
    finished
}

/// Read stdin until the call closes, the user quits or a signal arrives.
/// `printer` finishes when the session closes.
async fn run_commands(session: &CallSession, printer: &mut JoinHandle<()>) -> ConsoleResult<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        if session.is_closed() {
            return Ok(());
        }

        let line = tokio::select! {
            _ = &mut shutdown => return Ok(()),
            _ = &mut *printer => return Ok(()),
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            return Ok(());
        };

        let command = match line.parse::<SessionCommand>() {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        let outcome = match command {
            SessionCommand::Arrived => session.on_arrival_confirmed().await.map(|_| ()),
            SessionCommand::Complete => session.on_completion().await.map(|_| ()),
            SessionCommand::Cancel => session.on_cancellation().await.map(|_| ()),
            SessionCommand::Position(position) => {
                let outcome = session.on_device_position(position).await;
                println!("{:?}", outcome);
                Ok(())
            }
            SessionCommand::Status => {
                println!("{} | {}", session.status(), session.snapshot().summary());
                Ok(())
            }
            SessionCommand::Help => {
                println!("{}", HELP);
                Ok(())
            }
            SessionCommand::Quit => return Ok(()),
        };

        // Lifecycle failures are shown and the call stays as it was
        if let Err(e) = outcome {
            warn!(error = %e, "Command failed");
            println!("Failed: {} (status unchanged: {})", e, session.status());
            if e.requires_reauthentication() {
                return Err(e.into());
            }
        }
    }
}

async fn print_events(session: CallSession) {
    let events = session.events().stream();
    tokio::pin!(events);

    while let Some(event) = events.next().await {
        if let Some(line) = describe(&event) {
            println!("{}", line);
        }
        if matches!(event.payload, EventPayload::Closed(_)) {
            break;
        }
    }
}

/// Human-readable line for an event; noisy events are skipped
fn describe(event: &TrackingEvent) -> Option<String> {
    let line = match &event.payload {
        EventPayload::Eta(eta) => format!("{} · {}", eta.display_distance(), eta.display_eta()),
        EventPayload::Route(route) if route.removed_points == 0 => {
            format!("New route: {} points", route.remaining_points)
        }
        EventPayload::Arrival(arrival) => {
            format!(
                "Responder is {:.0} m from the patient, type `arrived` to confirm",
                arrival.distance_m
            )
        }
        EventPayload::Status(status) => {
            format!("Status: {} -> {}", status.old_status, status.new_status)
        }
        EventPayload::Closed(closed) => match closed.final_status {
            Some(status) => format!("Session closed ({})", status),
            None => "Session closed".to_string(),
        },
        EventPayload::Position(_) | EventPayload::Route(_) => return None,
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::{CallStatus, Coordinate, EtaEstimate};

    #[test]
    fn test_describe_eta_and_status() {
        let call_id = CallId::new();

        let eta = TrackingEvent::eta_updated(
            call_id,
            EtaEstimate::from_route(Some(6.0), Some(300.0), 60.0),
        );
        assert_eq!(describe(&eta).as_deref(), Some("6.0 km · 5 min"));

        let unknown = TrackingEvent::eta_updated(call_id, EtaEstimate::unknown());
        assert_eq!(describe(&unknown).as_deref(), Some("— · —"));

        let status =
            TrackingEvent::status_changed(call_id, CallStatus::EnRoute, CallStatus::OnSite);
        assert_eq!(describe(&status).as_deref(), Some("Status: en_route -> on_site"));
    }

    #[test]
    fn test_describe_skips_noise() {
        let call_id = CallId::new();
        let position = TrackingEvent::position_updated(call_id, Coordinate::new(0.0, 0.0));
        assert!(describe(&position).is_none());
        assert!(describe(&TrackingEvent::route_trimmed(call_id, 3, 10)).is_none());
        assert!(describe(&TrackingEvent::route_recalculated(call_id, 10, Some(60.0))).is_some());
    }
}
