//! Hide & seek simulator: runs several participants against an in-memory room
//! and walks them through a scripted level change and a forced re-roll.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tokio::{
    sync::{mpsc, watch},
    task::JoinSet,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Registry, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

use hide_seek_core::{
    clock::{Clock, TokioClock},
    config::AppConfig,
    services::{
        notifications::LogOverlay,
        runtime::{DriverCommand, RuntimeDriver},
        selection::os_random,
    },
    session::{
        LogHub,
        memory::{MemorySession, RoomHub},
    },
};

const PARTICIPANTS: [&str; 3] = ["Alice", "Bob", "Carol"];
const REPLICATION_INTERVAL: Duration = Duration::from_millis(150);

type FilterHandle = reload::Handle<EnvFilter, Registry>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = init_tracing();
    let config = AppConfig::load();
    if config.seeker.verbose_logs && std::env::var_os("RUST_LOG").is_none() {
        filter
            .modify(|current| *current = EnvFilter::new("debug"))
            .context("raising log verbosity")?;
    }

    let (settings_tx, settings) = config.into_watch();
    let shutdown = CancellationToken::new();
    let clock: Arc<dyn Clock> = Arc::new(TokioClock);
    let hub = RoomHub::new();
    let logs = LogHub::default();

    let mut tasks = JoinSet::new();
    let mut sessions = Vec::new();
    let mut commands = Vec::new();
    let mut overlays = Vec::new();
    for name in PARTICIPANTS {
        let session = hub.join(name);
        let overlay = Arc::new(LogOverlay::new(clock.clone()));
        let driver = RuntimeDriver::new(
            settings.clone(),
            Arc::new(session.clone()),
            overlay.clone(),
            clock.clone(),
            os_random(),
        )
        .with_overlay(overlay.clone());

        let (command_tx, command_rx) = mpsc::channel(8);
        tasks.spawn(driver.run(
            logs.subscribe(),
            command_rx,
            shutdown.clone().cancelled_owned(),
        ));
        sessions.push(session);
        commands.push(command_tx);
        overlays.push((name, overlay));
    }

    tasks.spawn(replicate(hub.clone(), shutdown.clone()));

    tokio::select! {
        result = script(&hub, &sessions, &logs, &commands, &settings_tx) => {
            result.context("running simulation script")?;
        }
        _ = shutdown_signal() => info!("shutdown requested"),
    }

    shutdown.cancel();
    while let Some(joined) = tasks.join_next().await {
        joined.context("joining participant task")?;
    }

    for (name, overlay) in &overlays {
        info!(
            participant = %name,
            blacked_out = overlay.is_blacked_out(),
            hud_visible = overlay.hud_visible(),
            banner = ?overlay.banner(),
            "final overlay state"
        );
    }
    Ok(())
}

/// Scripted host behaviour: lobby, level change, a forced re-roll, then a new level.
async fn script(
    hub: &RoomHub,
    sessions: &[MemorySession],
    logs: &LogHub,
    commands: &[mpsc::Sender<DriverCommand>],
    settings: &watch::Sender<AppConfig>,
) -> anyhow::Result<()> {
    set_scene(sessions, "Lobby");
    logs.publish("Changed level to: Level - Lobby Menu");
    sleep(Duration::from_secs(2)).await;

    set_scene(sessions, "Main");
    logs.publish("Changed level to: Level - Forest");
    sleep(Duration::from_secs(12)).await;

    let leader = hub.leader().context("room has no leader")?;
    info!(leader = %leader, "requesting forced re-roll on the leader");
    let index = sessions
        .iter()
        .position(|session| session.id() == leader)
        .context("leader is not a simulated participant")?;
    commands[index]
        .send(DriverCommand::ForceReselect)
        .await
        .context("sending force reselect")?;

    settings.send_modify(|config| config.seeker.announcement_seconds = 5.0);
    sleep(Duration::from_secs(3)).await;

    let departing = sessions
        .last()
        .context("no participants to remove")?;
    hub.leave(departing.id());
    logs.publish("Changed level to: Level - Old Mansion");
    sleep(Duration::from_secs(10)).await;

    info!("simulation script finished");
    Ok(())
}

fn set_scene(sessions: &[MemorySession], scene: &str) {
    for session in sessions {
        session.set_scene(scene);
    }
}

/// Stand-in for the network layer pushing room properties to every client.
async fn replicate(hub: Arc<RoomHub>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(REPLICATION_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => hub.replicate(),
        }
    }
}

/// Configure tracing subscribers; the returned handle lets the filter change later.
fn init_tracing() -> FilterHandle {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let (filter, handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    handle
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
