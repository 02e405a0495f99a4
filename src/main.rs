//! slircd-bans - server ban subsystem of the Straylight IRC daemon.
//!
//! Loads the configuration and the ban journal, then serves an operator
//! console on standard input until it is closed. Replies go to standard
//! output, logs to standard error.

use anyhow::Context as _;
use futures_util::{SinkExt, StreamExt};
use slircd_bans::config::{Config, validation};
use slircd_bans::console::Console;
use slircd_bans::event::EventQueue;
use slircd_bans::metrics;
use slircd_bans::security::{BanJournal, BanStore};
use slircd_bans::state::{Matrix, expiry_event, unix_now};
use slircd_bans::sync::{LinkState, PeerMessage};
use slircd_bans::telemetry::spans;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{Instrument, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Per-link send queue. A full queue drops the command with a warning.
const LINK_QUEUE_SIZE: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    // Load configuration
    let config_path = PathBuf::from(
        std::env::args()
            .nth(1)
            .unwrap_or_else(|| "config.toml".to_string()),
    );

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = validation::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("{} configuration error(s)", errors.len());
    }

    info!(
        server = %config.server.name,
        sid = %config.server.sid,
        "Starting slircd-bans"
    );

    metrics::init();

    let now = unix_now();
    let store = BanStore::open(BanJournal::new(&config.database.path), now).with_context(|| {
        format!(
            "failed to load ban journal {}",
            config.database.path.display()
        )
    })?;
    let mut matrix = Matrix::new(&config, store);
    let configured = matrix.rehash(&config, now)?;
    info!(
        persisted = matrix.bans.len().saturating_sub(configured),
        configured, "Bans loaded"
    );

    // Peer links. The transport is external; queued commands are logged.
    for link in &config.link {
        let (tx, mut rx) = mpsc::channel::<Arc<PeerMessage>>(LINK_QUEUE_SIZE);
        matrix
            .router
            .add_link(LinkState::new(&link.name, link.capabilities, tx));
        for leaf in &link.leaves {
            matrix.router.introduce(leaf, &link.name);
        }

        tokio::spawn(
            async move {
                while let Some(msg) = rx.recv().await {
                    info!(%msg, "Ban command queued for peer");
                }
                debug!("Link queue closed");
            }
            .instrument(spans::peer(&link.name)),
        );
        info!(link = %link.name, leaves = link.leaves.len(), "Link registered");
    }

    let mut events = EventQueue::new();
    events.add(expiry_event(&matrix.limits), now);
    let mut console = Console::new(matrix, events, config_path);

    let mut input = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    let mut output = FramedWrite::new(tokio::io::stdout(), LinesCodec::new());
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                console.tick(unix_now());
            }
            line = input.next() => match line {
                Some(Ok(line)) => {
                    for reply in console.execute(&line, unix_now()) {
                        output.send(reply).await?;
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Console read failed");
                    break;
                }
                None => break,
            },
        }
    }

    info!("Console closed, shutting down");
    Ok(())
}
