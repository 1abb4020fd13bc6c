//! `talkgate`: headless push-to-talk daemon.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] (from the path given as the first argument, or the
//!    platform `settings.toml`; defaults on first run).
//! 3. Create a current-thread [`tokio`] runtime.  Strategies are driven from
//!    this one thread.
//! 4. Build the [`PttService`] with the platform strategies and register.
//! 5. Print every consumer event as one JSON line on stdout.
//! 6. Read manual-state overrides (`{"active":true}` or `true`) line by line
//!    from stdin.
//! 7. Ctrl-C tears everything down and exits.
//!
//! On macOS and Windows the native shortcut registrar only delivers events
//! while a platform event loop runs on the main thread.  The daemon runs
//! none, so there the native strategy is skipped and the chain falls through
//! to the next one.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

use talkgate::{
    config::AppConfig,
    events::{ChannelSink, HeadlessWindow, PttEvent},
    hotkey::StrategySet,
    orchestrator::{PttHandle, PttService},
    session::SessionKind,
};

fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("talkgate starting up");

    // 2. Config
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let loaded = match &config_path {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    let config = loaded.unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    if !config.ptt.push_to_talk {
        log::warn!("push-to-talk is disabled in the configuration; only manual overrides apply");
    }

    // 3. Runtime
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    let result = rt.block_on(run(config));
    // The stdin reader may still be parked in a blocking read.
    rt.shutdown_background();
    result
}

async fn run(config: AppConfig) -> Result<()> {
    let session = SessionKind::detect();
    log::info!("desktop session: {session:?}");

    // 4. Service
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let window = Arc::new(HeadlessWindow);
    let sink = Arc::new(ChannelSink::new(window.clone(), event_tx));
    let strategies = StrategySet::platform_default(config.timing.hook_startup_grace(), false);
    let (service, handle) = PttService::new(strategies, sink, window, session);

    handle
        .register(config)
        .context("service stopped before registration")?;

    // 5. Events → stdout
    let printer = tokio::spawn(print_events(event_rx));

    // 6. stdin → manual overrides
    tokio::spawn(read_overrides(handle.clone()));

    // 7. Ctrl-C
    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("cannot listen for Ctrl-C: {e}");
            return;
        }
        log::info!("Ctrl-C received");
        let _ = ctrl_c_handle.shutdown();
    });

    service.run().await;
    drop(handle);

    printer.await.context("event printer panicked")?;
    log::info!("talkgate stopped");
    Ok(())
}

async fn print_events(mut events: mpsc::UnboundedReceiver<PttEvent>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => log::error!("cannot serialise {event:?}: {e}"),
        }
    }
}

async fn read_overrides(handle: PttHandle) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if handle.manual_payload(line).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::warn!("stdin read failed: {e}");
                break;
            }
        }
    }
}
