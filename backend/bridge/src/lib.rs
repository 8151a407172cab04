//! Documentation of a client-side session bridge.
//!
//! A page (or any long-lived client) does not own login. A remote authority does, and the page only
//! mirrors what the authority says. This crate keeps that mirror correct.
//!
//!
//!
//! # General Infrastructure
//! - Remote authority exposes a primary session endpoint and an older legacy one
//! - Bridge asks the primary first, the legacy one only when the primary fails
//! - Answer is normalized into authenticated, unauthenticated or unknown
//! - Reconciler compares the answer with what the page currently believes
//! - Changes are written to storage first, then rendered, then announced as events
//! - Scheduler decides when to ask: on load, on return from the authority, on an interval, on demand
//!
//!
//!
//! # Not Logging People Out By Accident
//!
//! **Goal**: A flaky network must never look like a logout.
//!
//! - Timeouts, 5xx, unparsable bodies and `success: false` all become **unknown**
//! - Unknown changes nothing, not the cached user, not the markup, no events
//! - Only an explicit "not authenticated" answer clears the user
//! - Logout asks the authority first and clears locally only once it confirms
//! - If the authority cannot be reached on logout, the page navigates there instead
//!
//!
//!
//! # Notes
//!
//! ## Storage Tiers
//! Persistent file, optional Redis session tier, then memory. Every tier gets a trial write at startup and any tier
//! that fails a write is dropped for the rest of the process. Memory always works, so a read-only disk and a
//! dead Redis still leave a working bridge, just one that forgets on restart.
//!
//! The user is written under two keys, `auth.user` and the older `userData`, since pages in the wild still
//! read the old one directly.
//!
//! ## Ordering
//! Every check gets a sequence number when it starts. A result older than the last applied one is
//! dropped. With only one check in flight at a time this mostly matters for logout racing a poll.
//!
//!
//!
//! # Setup
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! `````
//!
//! Run the watcher against a local authority.
//! ```sh
//! BRIDGE_PRIMARY_URL=http://127.0.0.1:8080/api/auth/session RUST_LOG=info cargo run -p watcher
//! `````
//!
//! One check, then exit.
//! ```sh
//! cargo run -p watcher -- --once
//! ```
use std::sync::Arc;

use tokio::{
    signal::{
        self,
        unix::{SignalKind, signal},
    },
    sync::broadcast::error::RecvError,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod binder;
pub mod config;
pub mod dom;
pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod oracle;
pub mod scheduler;
pub mod state;
pub mod utils;

use config::Config;
use dom::Document;
use error::BridgeError;
use scheduler::{LaunchContext, Scheduler};
use state::SyncContext;

pub fn init_tracing() {
    let _ = fmt().with_env_filter(EnvFilter::from_default_env()).try_init();
}

/// Runs the bridge until Ctrl+C or SIGTERM.
pub async fn start_bridge(
    config: Config,
    document: Box<dyn Document>,
    launch: LaunchContext,
) -> Result<Arc<SyncContext>, BridgeError> {
    info!("Initializing session bridge...");
    let ctx = SyncContext::from_config(config, document)?;

    if ctx.seed_from_cache().await {
        info!("Seeded session from cache");
    }

    let mut events = ctx.subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!("{} {}", event.name(), event.detail()),
                Err(RecvError::Lagged(skipped)) => warn!("Event log lagged, skipped {skipped}"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let interval = ctx.config().poll_interval;
    info!("Polling every {interval:?}");
    let scheduler = Scheduler::start(ctx.clone(), interval, launch);

    shutdown_signal().await;

    scheduler.stop().await;
    logger.abort();

    info!("Session bridge shutting down...");
    Ok(ctx)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => error!("Failed to install Ctrl+C handler: {e}"),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
