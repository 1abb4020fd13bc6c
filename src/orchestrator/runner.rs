//! Async driver for the [`Orchestrator`].
//!
//! [`PttService`] owns the orchestrator and runs it on the current task,
//! selecting over three inputs:
//!
//! ```text
//! PttHandle ──PttCommand──┐
//! strategies ──Signal─────┼──▶ select! ──▶ Orchestrator
//! controller deadline ────┘
//! ```
//!
//! Some OS shortcut registrars are not `Send`, so the service is not spawned
//! onto a multi-threaded runtime; run it with `block_on` on a current-thread
//! runtime (or inside a `LocalSet`).

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::Orchestrator;
use crate::config::AppConfig;
use crate::events::{EventSink, HostWindow};
use crate::hotkey::{Disposition, KeyInput, SignalReceiver, StrategySet};
use crate::session::SessionKind;

/// How long `run` waits for strategies to finish releasing resources.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// PttCommand
// ---------------------------------------------------------------------------

/// Requests from the host to the running service.
#[derive(Debug)]
pub enum PttCommand {
    /// Apply (or re-apply) the configuration.
    Register(AppConfig),
    /// Forced override from the consumer.
    SetManualState(bool),
    /// Forced override as a raw JSON payload.
    ManualPayload(String),
    /// Raw keystroke from the host window; the disposition is sent back.
    WindowInput(KeyInput, oneshot::Sender<Disposition>),
    WindowBlur,
    /// Tear everything down and stop.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("push-to-talk service has stopped")]
pub struct ServiceStopped;

// ---------------------------------------------------------------------------
// PttHandle
// ---------------------------------------------------------------------------

/// Cheap, cloneable handle for talking to a running [`PttService`].
#[derive(Debug, Clone)]
pub struct PttHandle {
    tx: mpsc::UnboundedSender<PttCommand>,
}

impl PttHandle {
    pub fn send(&self, command: PttCommand) -> Result<(), ServiceStopped> {
        self.tx.send(command).map_err(|_| ServiceStopped)
    }

    pub fn register(&self, config: AppConfig) -> Result<(), ServiceStopped> {
        self.send(PttCommand::Register(config))
    }

    pub fn set_manual_state(&self, active: bool) -> Result<(), ServiceStopped> {
        self.send(PttCommand::SetManualState(active))
    }

    pub fn manual_payload(&self, payload: impl Into<String>) -> Result<(), ServiceStopped> {
        self.send(PttCommand::ManualPayload(payload.into()))
    }

    /// Forward a keystroke and wait for the consume/pass-through answer.
    pub async fn window_input(&self, input: KeyInput) -> Result<Disposition, ServiceStopped> {
        let (reply, answer) = oneshot::channel();
        self.send(PttCommand::WindowInput(input, reply))?;
        answer.await.map_err(|_| ServiceStopped)
    }

    pub fn window_blur(&self) -> Result<(), ServiceStopped> {
        self.send(PttCommand::WindowBlur)
    }

    pub fn shutdown(&self) -> Result<(), ServiceStopped> {
        self.send(PttCommand::Shutdown)
    }
}

// ---------------------------------------------------------------------------
// PttService
// ---------------------------------------------------------------------------

pub struct PttService {
    orchestrator: Orchestrator,
    commands: mpsc::UnboundedReceiver<PttCommand>,
    signals: SignalReceiver,
}

impl PttService {
    pub fn new(
        strategies: StrategySet,
        sink: Arc<dyn EventSink>,
        window: Arc<dyn HostWindow>,
        session: SessionKind,
    ) -> (Self, PttHandle) {
        let (signal_tx, signals) = mpsc::unbounded_channel();
        let (tx, commands) = mpsc::unbounded_channel();
        let orchestrator = Orchestrator::new(strategies, sink, window, session, signal_tx);
        (
            Self {
                orchestrator,
                commands,
                signals,
            },
            PttHandle { tx },
        )
    }

    /// Run until [`PttCommand::Shutdown`] arrives or every handle is dropped.
    /// Always ends with a full teardown.
    pub async fn run(self) {
        let PttService {
            mut orchestrator,
            mut commands,
            mut signals,
        } = self;

        loop {
            let deadline = orchestrator.next_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(PttCommand::Shutdown) | None => break,
                    Some(command) => handle_command(&mut orchestrator, command),
                },
                Some(signal) = signals.recv() => {
                    orchestrator.handle_signal(signal, Instant::now());
                }
                _ = sleep_until(deadline) => {
                    orchestrator.poll_timers(Instant::now());
                }
            }
        }

        log::info!("[ptt] service stopping");
        orchestrator.shutdown();

        let pending = orchestrator.take_pending();
        if pending.is_empty() {
            return;
        }
        let settle = async {
            for task in pending {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, settle).await.is_err() {
            log::warn!("[ptt] resources still closing after {SHUTDOWN_GRACE:?}, giving up");
        }
    }
}

fn handle_command(orchestrator: &mut Orchestrator, command: PttCommand) {
    let now = Instant::now();
    match command {
        PttCommand::Register(config) => orchestrator.register(&config),
        PttCommand::SetManualState(active) => orchestrator.set_manual_state(active, now),
        PttCommand::ManualPayload(payload) => {
            // Already logged; an invalid payload changes nothing.
            let _ = orchestrator.handle_manual_payload(&payload, now);
        }
        PttCommand::WindowInput(input, reply) => {
            let disposition = orchestrator.handle_window_input(&input, now);
            let _ = reply.send(disposition);
        }
        PttCommand::WindowBlur => orchestrator.handle_window_blur(now),
        PttCommand::Shutdown => orchestrator.shutdown(),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
