//! Native global-shortcut registration through the `global-hotkey` crate.
//!
//! The OS shortcut registrar only reports that the combination *fired*; on
//! most platforms no dependable release follows, so every activation is
//! forwarded as [`Edge::Triggered`] and Hold mode is emulated by the
//! orchestrator with a re-arming timer.
//!
//! `global-hotkey` delivers events through one process-wide handler.  The
//! handler is installed once and reads the current target from a static, so
//! re-registration only swaps the target.
//!
//! On macOS and Windows the registrar needs the host's main-thread event loop
//! to be pumping; on Linux it talks to X11 directly.  A host without such a
//! loop constructs the strategy with `host_event_loop = false`, and the probe
//! then reports it unavailable on those platforms.

use std::str::FromStr;
use std::sync::{Mutex, Once, PoisonError};

use global_hotkey::hotkey::HotKey;
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};

use super::{Binding, Capability, Edge, Signal, SignalSender, Strategy, StrategyError, StrategyKind};

// ---------------------------------------------------------------------------
// Event routing
// ---------------------------------------------------------------------------

struct NativeTarget {
    hotkey_id: u32,
    binding: Binding,
    signals: SignalSender,
}

static TARGET: Mutex<Option<NativeTarget>> = Mutex::new(None);
static HANDLER: Once = Once::new();

fn set_target(target: Option<NativeTarget>) {
    *TARGET.lock().unwrap_or_else(PoisonError::into_inner) = target;
}

/// Turn a registrar event into a signal for the current target, if it is one.
fn route(event: &GlobalHotKeyEvent, target: Option<&NativeTarget>) -> Option<(Signal, SignalSender)> {
    let target = target?;
    if event.id != target.hotkey_id || event.state != HotKeyState::Pressed {
        return None;
    }
    let signal = Signal::edge(&target.binding, StrategyKind::NativeShortcut, Edge::Triggered);
    Some((signal, target.signals.clone()))
}

fn install_handler() {
    HANDLER.call_once(|| {
        GlobalHotKeyEvent::set_event_handler(Some(|event: GlobalHotKeyEvent| {
            let routed = {
                let guard = TARGET.lock().unwrap_or_else(PoisonError::into_inner);
                route(&event, guard.as_ref())
            };
            if let Some((signal, signals)) = routed {
                log::trace!("[native] shortcut {} fired", event.id);
                let _ = signals.send(signal);
            }
        }));
    });
}

// ---------------------------------------------------------------------------
// NativeShortcut
// ---------------------------------------------------------------------------

/// Platforms where registrar events arrive only through the host's
/// main-thread event loop.
const NEEDS_EVENT_LOOP: bool = cfg!(any(target_os = "macos", target_os = "windows"));
const NO_EVENT_LOOP: &str = "host runs no event loop to deliver shortcut events";

/// Global shortcut strategy backed by the OS registrar.
pub struct NativeShortcut {
    manager: Option<GlobalHotKeyManager>,
    registered: Option<HotKey>,
    host_event_loop: bool,
}

impl NativeShortcut {
    /// `host_event_loop`: the host pumps a platform event loop on its main
    /// thread.
    pub fn new(host_event_loop: bool) -> Self {
        Self {
            manager: None,
            registered: None,
            host_event_loop,
        }
    }

    fn manager(&mut self) -> Result<&GlobalHotKeyManager, StrategyError> {
        if self.manager.is_none() {
            let manager = GlobalHotKeyManager::new()
                .map_err(|e| StrategyError::Unavailable(format!("shortcut registrar: {e}")))?;
            self.manager = Some(manager);
        }
        self.manager
            .as_ref()
            .ok_or_else(|| StrategyError::Unavailable("shortcut registrar missing".into()))
    }
}

/// Parse the accelerator into the registrar's own representation.
pub fn to_hotkey(binding: &Binding) -> Result<HotKey, StrategyError> {
    let text = binding.accelerator.to_hotkey_string();
    HotKey::from_str(&text)
        .map_err(|e| StrategyError::UnsupportedAccelerator(format!("{text}: {e}")))
}

impl Strategy for NativeShortcut {
    fn kind(&self) -> StrategyKind {
        StrategyKind::NativeShortcut
    }

    fn probe(&self) -> Capability {
        if NEEDS_EVENT_LOOP && !self.host_event_loop {
            return Capability::Unavailable(NO_EVENT_LOOP.into());
        }
        if cfg!(target_os = "linux") && std::env::var_os("DISPLAY").is_none() {
            return Capability::Unavailable("no X11 display for XGrabKey".into());
        }
        if cfg!(any(target_os = "linux", target_os = "macos", target_os = "windows")) {
            Capability::Available
        } else {
            Capability::Unavailable("no native shortcut registrar on this platform".into())
        }
    }

    fn register(&mut self, binding: &Binding, signals: SignalSender) -> Result<(), StrategyError> {
        let hotkey = to_hotkey(binding)?;
        self.unregister()?;

        self.manager()?.register(hotkey).map_err(|e| match e {
            global_hotkey::Error::AlreadyRegistered(_) => {
                StrategyError::Conflict(binding.accelerator.to_string())
            }
            other => StrategyError::Unavailable(other.to_string()),
        })?;

        self.registered = Some(hotkey);
        install_handler();
        set_target(Some(NativeTarget {
            hotkey_id: hotkey.id(),
            binding: binding.clone(),
            signals,
        }));

        log::info!("[native] registered {}", binding.accelerator);
        Ok(())
    }

    fn unregister(&mut self) -> Result<(), StrategyError> {
        set_target(None);
        let Some(hotkey) = self.registered.take() else {
            return Ok(());
        };
        let Some(manager) = &self.manager else {
            return Ok(());
        };
        manager
            .unregister(hotkey)
            .map_err(|e| StrategyError::Teardown(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
