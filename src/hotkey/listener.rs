//! Low-level key hook on a dedicated OS thread using `rdev`.
//!
//! `rdev::listen` / `rdev::grab` are blocking calls that must live on their
//! own OS thread and have **no graceful shutdown API**.  [`LowLevelHook`]
//! therefore starts the thread once, on first registration, and keeps it for
//! the rest of the process.  Registration only swaps the shared
//! [`HookTarget`]; unregistering clears it, after which the callback lets
//! every event through untouched.
//!
//! # Consuming events
//!
//! On macOS and Windows the hook uses `rdev::grab`, so qualifying edges are
//! swallowed before the OS delivers them anywhere else.  On Linux it uses
//! `rdev::listen` (X11 / XWayland), which can observe but not suppress.
//!
//! # Start-up failures
//!
//! A missing permission (macOS Accessibility) or an absent display makes the
//! rdev call return an error almost immediately.  The first `register` waits
//! a short grace period for such an error before reporting success, so the
//! orchestrator can fall through to the next strategy.  Later registrations
//! only check for an error that has already arrived.  If the hook dies after
//! the grace period, the thread reports [`SignalKind::Failed`] through the
//! current target instead.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::accelerator::Modifier;

use super::matcher::{HookMatcher, HookVerdict};
use super::{
    Binding, Capability, Signal, SignalKind, SignalSender, Strategy, StrategyError, StrategyKind,
};

// ---------------------------------------------------------------------------
// HookTarget
// ---------------------------------------------------------------------------

/// What the hook thread is currently watching for.
struct HookTarget {
    matcher: HookMatcher,
    binding: Binding,
    signals: SignalSender,
}

type SharedTarget = Arc<Mutex<Option<HookTarget>>>;

/// Run one event through the current target.  Returns `true` when the event
/// should be swallowed.
fn dispatch(shared: &Mutex<Option<HookTarget>>, event: &rdev::Event) -> bool {
    let (key, down) = match event.event_type {
        rdev::EventType::KeyPress(k) => (k, true),
        rdev::EventType::KeyRelease(k) => (k, false),
        _ => return false,
    };

    let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(target) = guard.as_mut() else {
        return false;
    };

    match target.matcher.on_key(&key_token(key), modifier_of(key), down) {
        HookVerdict::Pass => false,
        HookVerdict::Consume(edge) => {
            log::trace!("[hook] {key:?} -> {edge:?}");
            let signal = Signal::edge(&target.binding, StrategyKind::LowLevelHook, edge);
            if target.signals.send(signal).is_err() {
                log::debug!("[hook] orchestrator gone, dropping edge");
            }
            true
        }
    }
}

/// Tell the orchestrator the hook is gone, if anything is bound to it.
fn report_failure(shared: &Mutex<Option<HookTarget>>, reason: &str) {
    let guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(target) = guard.as_ref() else {
        return;
    };
    let signal = Signal {
        generation: target.binding.generation,
        source: StrategyKind::LowLevelHook,
        kind: SignalKind::Failed(StrategyError::Unavailable(reason.to_string())),
    };
    if target.signals.send(signal).is_err() {
        log::debug!("[hook] orchestrator gone, failure not reported");
    }
}

// ---------------------------------------------------------------------------
// Key naming
// ---------------------------------------------------------------------------

/// Lower-case key name for an rdev key, aligned with the accelerator
/// vocabulary where the two differ.
pub fn key_token(key: rdev::Key) -> String {
    use rdev::Key;

    let name = match key {
        Key::Return | Key::KpReturn => "enter",
        Key::Escape => "escape",
        Key::UpArrow => "up",
        Key::DownArrow => "down",
        Key::LeftArrow => "left",
        Key::RightArrow => "right",
        Key::ControlLeft => "ctrlleft",
        Key::ControlRight => "ctrlright",
        Key::Num0 => "0",
        Key::Num1 => "1",
        Key::Num2 => "2",
        Key::Num3 => "3",
        Key::Num4 => "4",
        Key::Num5 => "5",
        Key::Num6 => "6",
        Key::Num7 => "7",
        Key::Num8 => "8",
        Key::Num9 => "9",
        other => {
            let debug = format!("{other:?}");
            return debug
                .strip_prefix("Key")
                .unwrap_or(&debug)
                .to_lowercase();
        }
    };
    name.to_string()
}

/// Which modifier class a physical key belongs to, if any.
pub fn modifier_of(key: rdev::Key) -> Option<Modifier> {
    use rdev::Key;

    match key {
        Key::ControlLeft | Key::ControlRight => Some(Modifier::Ctrl),
        Key::ShiftLeft | Key::ShiftRight => Some(Modifier::Shift),
        Key::Alt | Key::AltGr => Some(Modifier::Alt),
        Key::MetaLeft | Key::MetaRight => Some(Modifier::Meta),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// LowLevelHook
// ---------------------------------------------------------------------------

/// System-wide key hook strategy.  Hold mode only.
pub struct LowLevelHook {
    target: SharedTarget,
    /// Reports a start-up error from the hook thread, if one arrives.
    startup: Option<std_mpsc::Receiver<String>>,
    /// Kept so the thread is not detached; never joined because the rdev
    /// call never returns while it is healthy.
    thread: Option<std::thread::JoinHandle<()>>,
    failure: Option<String>,
    grace: Duration,
}

impl LowLevelHook {
    pub fn new(grace: Duration) -> Self {
        Self {
            target: Arc::new(Mutex::new(None)),
            startup: None,
            thread: None,
            failure: None,
            grace,
        }
    }

    fn set_target(&self, target: Option<HookTarget>) {
        *self.target.lock().unwrap_or_else(PoisonError::into_inner) = target;
    }

    /// Spawn the hook thread if it is not running yet and give it `grace` to
    /// fail.  Once it is running, only an error that already arrived counts.
    fn ensure_started(&mut self) -> Result<(), String> {
        if let Some(reason) = &self.failure {
            return Err(reason.clone());
        }

        let received = match &self.startup {
            Some(rx) => match rx.try_recv() {
                Ok(reason) => Some(reason),
                Err(std_mpsc::TryRecvError::Empty) => None,
                Err(std_mpsc::TryRecvError::Disconnected) => Some("hook thread exited".into()),
            },
            None => {
                let rx = self.spawn()?;
                let received = match rx.recv_timeout(self.grace) {
                    Ok(reason) => Some(reason),
                    Err(std_mpsc::RecvTimeoutError::Timeout) => None,
                    Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                        Some("hook thread exited".into())
                    }
                };
                self.startup = Some(rx);
                received
            }
        };

        // Nothing received: healthy so far.
        let Some(reason) = received else {
            return Ok(());
        };
        self.failure = Some(reason.clone());
        Err(reason)
    }

    fn spawn(&mut self) -> Result<std_mpsc::Receiver<String>, String> {
        let (err_tx, err_rx) = std_mpsc::channel::<String>();
        let shared = Arc::clone(&self.target);

        let thread = std::thread::Builder::new()
            .name("ptt-key-hook".into())
            .spawn(move || {
                if let Err(reason) = run_hook(Arc::clone(&shared)) {
                    log::error!("[hook] low-level hook exited: {reason}");
                    report_failure(&shared, &reason);
                    let _ = err_tx.send(reason);
                }
            })
            .map_err(|e| format!("cannot spawn hook thread: {e}"))?;

        self.thread = Some(thread);
        Ok(err_rx)
    }
}

#[cfg(any(target_os = "macos", target_os = "windows"))]
fn run_hook(shared: SharedTarget) -> Result<(), String> {
    rdev::grab(move |event| {
        if dispatch(&shared, &event) {
            None
        } else {
            Some(event)
        }
    })
    .map_err(|e| format!("{e:?}"))
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn run_hook(shared: SharedTarget) -> Result<(), String> {
    log::debug!("[hook] using rdev::listen; matched keys are observed but not suppressed");
    rdev::listen(move |event| {
        dispatch(&shared, &event);
    })
    .map_err(|e| format!("{e:?}"))
}

impl Strategy for LowLevelHook {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LowLevelHook
    }

    fn probe(&self) -> Capability {
        if let Some(reason) = &self.failure {
            return Capability::Unavailable(reason.clone());
        }
        if cfg!(target_os = "linux") && std::env::var_os("DISPLAY").is_none() {
            return Capability::Unavailable("no X11 display (pure Wayland session)".into());
        }
        if cfg!(any(target_os = "linux", target_os = "macos", target_os = "windows")) {
            Capability::Available
        } else {
            Capability::Unavailable("no low-level keyboard hook on this platform".into())
        }
    }

    fn register(&mut self, binding: &Binding, signals: SignalSender) -> Result<(), StrategyError> {
        self.set_target(Some(HookTarget {
            matcher: HookMatcher::new(binding.accelerator.clone()),
            binding: binding.clone(),
            signals,
        }));

        if let Err(reason) = self.ensure_started() {
            self.set_target(None);
            return Err(StrategyError::Unavailable(reason));
        }

        log::info!("[hook] watching {} system-wide", binding.accelerator);
        Ok(())
    }

    fn unregister(&mut self) -> Result<(), StrategyError> {
        self.set_target(None);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
