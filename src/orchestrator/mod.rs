//! Strategy selector: binds the push-to-talk key with the best strategy the
//! environment offers and routes every edge through the hold controller.
//!
//! # Fallback chain
//!
//! ```text
//! register(config)
//!   ├─ disabled ───────────────────────────────▶ teardown, Unregistered
//!   ├─ same accelerator + mode already bound ──▶ no-op
//!   └─ teardown, Probing
//!        1. Hold mode: low-level key hook ─────▶ Bound
//!        2. native global shortcut ────────────▶ Bound (+ hold-emulation warning)
//!        3. portal-class session: portal ──────▶ Bound (ready after negotiation)
//!        4. focus-scoped interceptor ──────────▶ Bound (+ local-fallback event)
//! ```
//!
//! # Threading
//!
//! The orchestrator is a plain `&mut self` state machine; the caller supplies
//! the current [`Instant`] and drives it from a single task (see
//! [`runner::PttService`]).  Strategies that run elsewhere (the hook thread,
//! the portal task) only ever reach it through [`Signal`]s, and every signal
//! carries the generation of the binding it belongs to, so anything sent by
//! a binding that has since been torn down is dropped here.

pub mod runner;
pub mod state;

pub use runner::{PttCommand, PttHandle, PttService, ServiceStopped};
pub use state::{Bound, Registration};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::accelerator::Accelerator;
use crate::config::{AppConfig, Mode};
use crate::controller::{HoldController, HoldTiming, Reason};
use crate::events::{EventSink, HostWindow, PttEvent, WarningKind};
use crate::hotkey::{
    Binding, Capability, Disposition, Edge, FocusInterceptor, FocusVerdict, KeyInput, Signal,
    SignalKind, SignalSender, StrategyError, StrategyKind, StrategySet,
};
use crate::session::SessionKind;

// ---------------------------------------------------------------------------
// ManualStateError
// ---------------------------------------------------------------------------

/// A malformed inbound override request.
#[derive(Debug, Error)]
pub enum ManualStateError {
    #[error("invalid manual-state payload {payload:?}: {source}")]
    Invalid {
        payload: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Accepted shapes: `{"active": true}` or a bare `true`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ManualPayload {
    Object { active: bool },
    Bare(bool),
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    strategies: StrategySet,
    controller: HoldController,
    sink: Arc<dyn EventSink>,
    window: Arc<dyn HostWindow>,
    session: SessionKind,
    /// Handed to every strategy on registration.
    signals: SignalSender,
    registration: Registration,
    generation: u64,
    /// Present only while bound to the focus-scoped interceptor.
    focus: Option<FocusInterceptor>,
    rearm_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        strategies: StrategySet,
        sink: Arc<dyn EventSink>,
        window: Arc<dyn HostWindow>,
        session: SessionKind,
        signals: SignalSender,
    ) -> Self {
        Self {
            strategies,
            controller: HoldController::new(Arc::clone(&sink), HoldTiming::default()),
            sink,
            window,
            session,
            signals,
            registration: Registration::Unregistered,
            generation: 0,
            focus: None,
            rearm_timeout: Duration::from_millis(400),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn current_state(&self) -> bool {
        self.controller.current_state()
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    pub fn bound_strategy(&self) -> Option<StrategyKind> {
        self.registration.strategy()
    }

    /// When [`poll_timers`](Self::poll_timers) should next be called.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.controller.next_deadline()
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// (Re)apply the push-to-talk configuration.
    pub fn register(&mut self, config: &AppConfig) {
        self.rearm_timeout = config.timing.rearm_timeout();
        self.controller.set_timing(HoldTiming {
            min_hold: config.timing.min_hold(),
            release_delay: config.ptt.release_delay(),
        });

        if !config.ptt.push_to_talk {
            if !self.registration.is_unregistered() {
                log::info!("[ptt] push-to-talk disabled");
            }
            self.teardown();
            return;
        }

        let accelerator = Accelerator::parse(&config.ptt.push_to_talk_keybind);
        let mode = config.ptt.push_to_talk_mode;

        if let Some(bound) = self.registration.bound() {
            if bound.binding.accelerator == accelerator && bound.binding.mode == mode {
                log::debug!("[ptt] {accelerator} ({mode:?}) already bound");
                return;
            }
        }

        self.teardown();
        self.registration = Registration::Probing;
        self.generation += 1;

        let binding = Binding {
            accelerator,
            keybind: config.ptt.push_to_talk_keybind.clone(),
            mode,
            generation: self.generation,
        };

        if mode == Mode::Hold && self.try_strategy(StrategyKind::LowLevelHook, &binding) {
            self.bind(StrategyKind::LowLevelHook, binding, true);
            return;
        }

        if self.try_strategy(StrategyKind::NativeShortcut, &binding) {
            if mode == Mode::Hold {
                log::warn!("[ptt] hold mode emulated from shortcut repeats");
                self.sink.emit(PttEvent::warning(
                    WarningKind::HoldEmulated,
                    format!(
                        "{} is held as long as the key keeps repeating; \
                         release detection is approximate",
                        binding.accelerator
                    ),
                ));
            }
            self.bind(StrategyKind::NativeShortcut, binding, true);
            return;
        }

        if self.session.is_portal_class() && self.try_strategy(StrategyKind::Portal, &binding) {
            self.bind(StrategyKind::Portal, binding, false);
            return;
        }

        self.engage_focus_fallback(binding);
    }

    /// Release the current binding.  Always deactivates first.  Idempotent.
    pub fn teardown(&mut self) {
        self.controller.deactivate(Reason::Teardown);

        let previous = std::mem::take(&mut self.registration);
        self.generation += 1;
        self.focus = None;

        let Registration::Bound(bound) = previous else {
            return;
        };
        if let Some(strategy) = self.strategies.get_mut(bound.strategy) {
            if let Err(e) = strategy.unregister() {
                log::warn!("[ptt] {} teardown: {e}", bound.strategy);
            }
        }
        log::info!("[ptt] released {} ({})", bound.binding.accelerator, bound.strategy);
    }

    /// Tear down and release every strategy's resources, each independently.
    pub fn shutdown(&mut self) {
        self.teardown();
        for strategy in self.strategies.iter_mut() {
            if let Err(e) = strategy.unregister() {
                log::warn!("[ptt] {} teardown on shutdown: {e}", strategy.kind());
            }
        }
    }

    /// Resource releases still in flight after [`shutdown`](Self::shutdown).
    pub fn take_pending(&mut self) -> Vec<JoinHandle<()>> {
        self.strategies
            .iter_mut()
            .flat_map(|strategy| strategy.take_pending())
            .collect()
    }

    fn try_strategy(&mut self, kind: StrategyKind, binding: &Binding) -> bool {
        let signals = self.signals.clone();
        let Some(strategy) = self.strategies.get_mut(kind) else {
            return false;
        };

        if let Capability::Unavailable(reason) = strategy.probe() {
            log::info!("[ptt] {kind} unavailable: {reason}");
            return false;
        }

        match strategy.register(binding, signals) {
            Ok(()) => true,
            Err(e) => {
                log_strategy_error(kind, &e);
                false
            }
        }
    }

    fn bind(&mut self, strategy: StrategyKind, binding: Binding, ready: bool) {
        log::info!("[ptt] {} bound via {strategy}", binding.accelerator);
        self.registration = Registration::Bound(Bound {
            strategy,
            binding,
            ready,
        });
    }

    fn engage_focus_fallback(&mut self, binding: Binding) {
        log::warn!(
            "[ptt] no global capture for {}; falling back to focus-scoped keys",
            binding.accelerator
        );
        self.focus = Some(FocusInterceptor::new(
            binding.accelerator.clone(),
            binding.mode,
        ));
        self.sink.emit(PttEvent::LocalKeybindFallback {
            accelerator: binding.keybind.clone(),
        });
        self.sink.emit(PttEvent::warning(
            WarningKind::GlobalCaptureUnavailable,
            format!(
                "global push-to-talk is unavailable; {} only works while the window is focused",
                binding.accelerator
            ),
        ));
        self.bind(StrategyKind::FocusScoped, binding, true);
    }

    // -----------------------------------------------------------------------
    // Inputs
    // -----------------------------------------------------------------------

    /// Feed a signal from a global strategy.
    pub fn handle_signal(&mut self, signal: Signal, now: Instant) {
        let Registration::Bound(bound) = &mut self.registration else {
            log::debug!("[ptt] dropping {signal:?}, nothing bound");
            return;
        };
        if signal.generation != bound.binding.generation || signal.source != bound.strategy {
            log::debug!("[ptt] dropping stale {signal:?}");
            return;
        }

        match signal.kind {
            SignalKind::Ready => bound.ready = true,
            SignalKind::Edge(edge) => {
                if !bound.ready {
                    log::debug!("[ptt] {edge:?} before {} is ready, ignored", bound.strategy);
                    return;
                }
                let mode = bound.binding.mode;
                self.apply_edge(signal.source, mode, edge, now);
            }
            SignalKind::Failed(err) => {
                let binding = bound.binding.clone();
                self.on_strategy_failed(signal.source, binding, err);
            }
        }
    }

    /// Feed a raw keystroke from the host window.  Only acts while bound to
    /// the focus-scoped interceptor and the window has focus.
    pub fn handle_window_input(&mut self, input: &KeyInput, now: Instant) -> Disposition {
        let mode = match self.registration.bound() {
            Some(bound) if bound.strategy == StrategyKind::FocusScoped => bound.binding.mode,
            _ => return Disposition::PassThrough,
        };
        if !self.window.is_focused() {
            return Disposition::PassThrough;
        }
        let Some(focus) = self.focus.as_mut() else {
            return Disposition::PassThrough;
        };
        let verdict = focus.classify(input);

        match verdict {
            FocusVerdict::Pass => Disposition::PassThrough,
            FocusVerdict::Consume(None) => Disposition::Consumed,
            FocusVerdict::Consume(Some(edge)) => {
                self.apply_edge(StrategyKind::FocusScoped, mode, edge, now);
                Disposition::Consumed
            }
        }
    }

    /// The host window lost focus.  A held focus-scoped key will never report
    /// its release, so release it now.
    pub fn handle_window_blur(&mut self, now: Instant) {
        if let Some(focus) = self.focus.as_mut() {
            focus.reset();
        }
        let holding = self.registration.bound().is_some_and(|b| {
            b.strategy == StrategyKind::FocusScoped && b.binding.mode == Mode::Hold
        });
        if holding && self.controller.current_state() {
            log::debug!("[ptt] window lost focus while held");
            self.controller
                .release(Reason::Strategy(StrategyKind::FocusScoped), now);
        }
    }

    /// Consumer override.  Goes through the same controller as key edges.
    pub fn set_manual_state(&mut self, active: bool, now: Instant) {
        if active {
            self.controller.activate(Reason::Manual, now);
        } else {
            self.controller.deactivate(Reason::Manual);
        }
    }

    /// Consumer override from a raw JSON payload.  Malformed payloads are
    /// dropped without touching the state.
    pub fn handle_manual_payload(
        &mut self,
        payload: &str,
        now: Instant,
    ) -> Result<bool, ManualStateError> {
        let active = match serde_json::from_str::<ManualPayload>(payload) {
            Ok(ManualPayload::Object { active }) | Ok(ManualPayload::Bare(active)) => active,
            Err(source) => {
                let err = ManualStateError::Invalid {
                    payload: payload.to_string(),
                    source,
                };
                log::warn!("[ptt] {err}");
                return Err(err);
            }
        };
        self.set_manual_state(active, now);
        Ok(active)
    }

    /// Fire the controller's timer if it is due.
    pub fn poll_timers(&mut self, now: Instant) {
        self.controller.on_timer(now);
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn apply_edge(&mut self, source: StrategyKind, mode: Mode, edge: Edge, now: Instant) {
        let reason = Reason::Strategy(source);
        match (mode, edge) {
            (Mode::Hold, Edge::Down) => {
                self.controller.activate(reason, now);
            }
            (Mode::Hold, Edge::Up) => self.controller.release(reason, now),
            (Mode::Hold, Edge::Triggered) => {
                // First trigger activates; repeats only push the release out.
                if !self.controller.current_state() {
                    self.controller.activate(reason, now);
                }
                self.controller.arm_release(now + self.rearm_timeout, now);
            }
            (Mode::Toggle, Edge::Down | Edge::Triggered) => {
                self.controller.toggle(reason, now);
            }
            (Mode::Toggle, Edge::Up) => {}
        }
    }

    fn on_strategy_failed(&mut self, source: StrategyKind, binding: Binding, err: StrategyError) {
        self.controller.deactivate(Reason::Teardown);
        if let Some(strategy) = self.strategies.get_mut(source) {
            if let Err(e) = strategy.unregister() {
                log::warn!("[ptt] {source} teardown: {e}");
            }
        }

        log_strategy_error(source, &err);
        if !err.is_capability_absent() {
            let kind = match source {
                StrategyKind::Portal => WarningKind::PortalNegotiationFailed,
                _ => WarningKind::GlobalCaptureUnavailable,
            };
            self.sink
                .emit(PttEvent::warning(kind, format!("{source} failed: {err}")));
        }

        self.engage_focus_fallback(binding);
    }
}

fn log_strategy_error(kind: StrategyKind, err: &StrategyError) {
    if err.is_capability_absent() {
        log::info!("[ptt] {kind}: {err}");
    } else {
        log::warn!("[ptt] {kind}: {err}");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use tokio::sync::mpsc;

    use super::*;
    use crate::accelerator::Modifier;
    use crate::events::tests::RecordingSink;
    use crate::hotkey::{SignalReceiver, Strategy};

    pub(crate) type CallLog = Arc<Mutex<Vec<String>>>;

    /// Scriptable strategy that records its calls.
    pub(crate) struct FakeStrategy {
        kind: StrategyKind,
        capability: Capability,
        on_register: Result<(), StrategyError>,
        on_unregister: Result<(), StrategyError>,
        log: CallLog,
        /// Records whether talk was still on when `unregister` ran.
        witness: Option<Arc<RecordingSink>>,
        /// Set by a background close spawned from `unregister`.
        slow_close: Option<Arc<AtomicBool>>,
        pending: Vec<JoinHandle<()>>,
    }

    impl FakeStrategy {
        pub(crate) fn ok(kind: StrategyKind, log: &CallLog) -> Self {
            Self {
                kind,
                capability: Capability::Available,
                on_register: Ok(()),
                on_unregister: Ok(()),
                log: Arc::clone(log),
                witness: None,
                slow_close: None,
                pending: Vec::new(),
            }
        }

        pub(crate) fn unavailable(kind: StrategyKind, log: &CallLog) -> Self {
            Self {
                capability: Capability::Unavailable("not here".into()),
                ..Self::ok(kind, log)
            }
        }

        pub(crate) fn failing(kind: StrategyKind, err: StrategyError, log: &CallLog) -> Self {
            Self {
                on_register: Err(err),
                ..Self::ok(kind, log)
            }
        }

        /// Release resources on a spawned task that sets `closed` when done.
        pub(crate) fn closing_slowly(mut self, closed: &Arc<AtomicBool>) -> Self {
            self.slow_close = Some(Arc::clone(closed));
            self
        }

        fn teardown_fails(mut self) -> Self {
            self.on_unregister = Err(StrategyError::Teardown("bus gone".into()));
            self
        }
    }

    fn short(kind: StrategyKind) -> &'static str {
        match kind {
            StrategyKind::LowLevelHook => "hook",
            StrategyKind::NativeShortcut => "native",
            StrategyKind::Portal => "portal",
            StrategyKind::FocusScoped => "focus",
        }
    }

    impl Strategy for FakeStrategy {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        fn probe(&self) -> Capability {
            self.capability.clone()
        }

        fn register(&mut self, _: &Binding, _: SignalSender) -> Result<(), StrategyError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("register {}", short(self.kind)));
            self.on_register.clone()
        }

        fn unregister(&mut self) -> Result<(), StrategyError> {
            let mut log = self.log.lock().unwrap();
            log.push(format!("unregister {}", short(self.kind)));
            if let Some(sink) = &self.witness {
                let active = sink.states().last().copied().unwrap_or(false);
                log.push(format!("talk {} at unregister", if active { "on" } else { "off" }));
            }
            if let Some(closed) = &self.slow_close {
                let closed = Arc::clone(closed);
                self.pending.push(tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    closed.store(true, Ordering::SeqCst);
                }));
            }
            self.on_unregister.clone()
        }

        fn take_pending(&mut self) -> Vec<JoinHandle<()>> {
            std::mem::take(&mut self.pending)
        }
    }

    pub(crate) struct TestWindow {
        pub(crate) focused: AtomicBool,
    }

    impl HostWindow for TestWindow {
        fn is_focused(&self) -> bool {
            self.focused.load(Ordering::SeqCst)
        }

        fn is_destroyed(&self) -> bool {
            false
        }
    }

    struct Harness {
        orch: Orchestrator,
        sink: Arc<RecordingSink>,
        window: Arc<TestWindow>,
        log: CallLog,
        _signals: SignalReceiver,
    }

    fn harness(
        session: SessionKind,
        make: impl FnOnce(&CallLog) -> (FakeStrategy, FakeStrategy, FakeStrategy),
    ) -> Harness {
        let log: CallLog = Arc::default();
        let (low_level, native, portal) = make(&log);
        let strategies = StrategySet {
            low_level: Box::new(low_level),
            native: Box::new(native),
            portal: Box::new(portal),
        };
        let sink = Arc::new(RecordingSink::default());
        let window = Arc::new(TestWindow {
            focused: AtomicBool::new(true),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let orch = Orchestrator::new(strategies, sink.clone(), window.clone(), session, tx);
        Harness {
            orch,
            sink,
            window,
            log,
            _signals: rx,
        }
    }

    fn all_ok(log: &CallLog) -> (FakeStrategy, FakeStrategy, FakeStrategy) {
        (
            FakeStrategy::ok(StrategyKind::LowLevelHook, log),
            FakeStrategy::ok(StrategyKind::NativeShortcut, log),
            FakeStrategy::ok(StrategyKind::Portal, log),
        )
    }

    fn only_focus(log: &CallLog) -> (FakeStrategy, FakeStrategy, FakeStrategy) {
        (
            FakeStrategy::failing(
                StrategyKind::LowLevelHook,
                StrategyError::Unavailable("no permission".into()),
                log,
            ),
            FakeStrategy::failing(
                StrategyKind::NativeShortcut,
                StrategyError::Conflict("Shift+V".into()),
                log,
            ),
            FakeStrategy::unavailable(StrategyKind::Portal, log),
        )
    }

    fn only_portal(log: &CallLog) -> (FakeStrategy, FakeStrategy, FakeStrategy) {
        (
            FakeStrategy::unavailable(StrategyKind::LowLevelHook, log),
            FakeStrategy::unavailable(StrategyKind::NativeShortcut, log),
            FakeStrategy::ok(StrategyKind::Portal, log),
        )
    }

    fn config(keybind: &str, mode: Mode) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.ptt.push_to_talk = true;
        cfg.ptt.push_to_talk_keybind = keybind.into();
        cfg.ptt.push_to_talk_mode = mode;
        cfg
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn signal(orch: &Orchestrator, kind: SignalKind) -> Signal {
        let bound = orch.registration().bound().unwrap();
        Signal {
            generation: bound.binding.generation,
            source: bound.strategy,
            kind,
        }
    }

    fn fallback_events(sink: &RecordingSink) -> Vec<PttEvent> {
        sink.events()
            .into_iter()
            .filter(|e| matches!(e, PttEvent::LocalKeybindFallback { .. }))
            .collect()
    }

    fn warnings(sink: &RecordingSink) -> Vec<WarningKind> {
        sink.events()
            .into_iter()
            .filter_map(|e| match e {
                PttEvent::Warning { kind, .. } => Some(kind),
                _ => None,
            })
            .collect()
    }

    // -- fallback chain -----------------------------------------------------

    #[test]
    fn exhausted_chain_falls_back_to_focus_once() {
        let mut h = harness(SessionKind::Wayland, only_focus);

        h.orch.register(&config("Shift+V", Mode::Hold));
        h.orch.register(&config("Shift+V", Mode::Hold));

        assert_eq!(h.orch.bound_strategy(), Some(StrategyKind::FocusScoped));
        assert_eq!(
            fallback_events(&h.sink),
            vec![PttEvent::LocalKeybindFallback {
                accelerator: "Shift+V".into()
            }]
        );
        assert_eq!(warnings(&h.sink), vec![WarningKind::GlobalCaptureUnavailable]);
        assert!(h.sink.states().is_empty());
    }

    #[test]
    fn hold_mode_prefers_low_level_hook() {
        let mut h = harness(SessionKind::X11, all_ok);
        h.orch.register(&config("F8", Mode::Hold));

        assert_eq!(h.orch.bound_strategy(), Some(StrategyKind::LowLevelHook));
        assert_eq!(*h.log.lock().unwrap(), vec!["register hook"]);
        assert!(h.sink.events().is_empty());
    }

    #[test]
    fn toggle_mode_skips_low_level_hook() {
        let mut h = harness(SessionKind::X11, all_ok);
        h.orch.register(&config("F8", Mode::Toggle));

        assert_eq!(h.orch.bound_strategy(), Some(StrategyKind::NativeShortcut));
        assert_eq!(*h.log.lock().unwrap(), vec!["register native"]);
        assert!(warnings(&h.sink).is_empty());
    }

    #[test]
    fn native_hold_warns_about_emulation() {
        let mut h = harness(SessionKind::X11, |log| {
            (
                FakeStrategy::unavailable(StrategyKind::LowLevelHook, log),
                FakeStrategy::ok(StrategyKind::NativeShortcut, log),
                FakeStrategy::ok(StrategyKind::Portal, log),
            )
        });
        h.orch.register(&config("F8", Mode::Hold));

        assert_eq!(h.orch.bound_strategy(), Some(StrategyKind::NativeShortcut));
        assert_eq!(warnings(&h.sink), vec![WarningKind::HoldEmulated]);
    }

    #[test]
    fn portal_is_only_tried_in_portal_class_sessions() {
        let mut h = harness(SessionKind::X11, only_portal);
        h.orch.register(&config("F8", Mode::Hold));
        assert_eq!(h.orch.bound_strategy(), Some(StrategyKind::FocusScoped));
        assert!(!h.log.lock().unwrap().contains(&"register portal".to_string()));

        let mut h = harness(SessionKind::Sandboxed, only_portal);
        h.orch.register(&config("F8", Mode::Hold));
        let bound = h.orch.registration().bound().unwrap();
        assert_eq!(bound.strategy, StrategyKind::Portal);
        assert!(!bound.ready);
        assert!(fallback_events(&h.sink).is_empty());
    }

    // -- registration lifecycle ---------------------------------------------

    #[test]
    fn identical_registration_is_a_no_op() {
        let mut h = harness(SessionKind::X11, all_ok);
        let cfg = config("Shift+V", Mode::Hold);
        h.orch.register(&cfg);
        let generation = h.orch.registration().bound().unwrap().binding.generation;

        // Spelling differences normalise to the same accelerator.
        h.orch.register(&config("shift-v", Mode::Hold));

        assert_eq!(*h.log.lock().unwrap(), vec!["register hook"]);
        assert_eq!(
            h.orch.registration().bound().unwrap().binding.generation,
            generation
        );
        assert!(h.sink.events().is_empty());
    }

    #[test]
    fn mode_change_tears_down_before_rebinding() {
        let mut h = harness(SessionKind::X11, all_ok);
        h.orch.register(&config("F8", Mode::Hold));
        h.orch.register(&config("F8", Mode::Toggle));

        assert_eq!(
            *h.log.lock().unwrap(),
            vec!["register hook", "unregister hook", "register native"]
        );
        assert_eq!(h.orch.bound_strategy(), Some(StrategyKind::NativeShortcut));
    }

    #[test]
    fn disabling_while_active_ends_inactive() {
        let mut h = harness(SessionKind::X11, all_ok);
        let t0 = Instant::now();
        h.orch.register(&config("F8", Mode::Hold));
        let down = signal(&h.orch, SignalKind::Edge(Edge::Down));
        h.orch.handle_signal(down, t0);
        assert!(h.orch.current_state());

        let mut off = config("F8", Mode::Hold);
        off.ptt.push_to_talk = false;
        h.orch.register(&off);

        assert_eq!(h.sink.states(), vec![true, false]);
        assert!(h.orch.registration().is_unregistered());
        assert_eq!(h.orch.next_deadline(), None);
        assert_eq!(h.log.lock().unwrap().last().unwrap(), "unregister hook");
    }

    #[test]
    fn teardown_is_idempotent() {
        let mut h = harness(SessionKind::X11, all_ok);
        h.orch.register(&config("F8", Mode::Hold));
        h.orch.teardown();
        h.orch.teardown();
        assert_eq!(
            *h.log.lock().unwrap(),
            vec!["register hook", "unregister hook"]
        );
        assert!(h.sink.events().is_empty());
    }

    #[test]
    fn shutdown_releases_every_strategy_despite_failures() {
        let mut h = harness(SessionKind::X11, |log| {
            (
                FakeStrategy::ok(StrategyKind::LowLevelHook, log).teardown_fails(),
                FakeStrategy::ok(StrategyKind::NativeShortcut, log).teardown_fails(),
                FakeStrategy::ok(StrategyKind::Portal, log),
            )
        });
        h.orch.register(&config("F8", Mode::Hold));
        h.orch.shutdown();

        let log = h.log.lock().unwrap();
        assert!(log.contains(&"unregister native".to_string()));
        assert!(log.contains(&"unregister portal".to_string()));
        assert!(h.orch.registration().is_unregistered());
    }

    // -- edges ----------------------------------------------------------------

    #[test]
    fn shift_v_hold_is_extended_to_minimum_hold() {
        let mut h = harness(SessionKind::Wayland, only_focus);
        let t0 = Instant::now();
        h.orch.register(&config("Shift+V", Mode::Hold));
        h.sink.clear();

        let down = KeyInput::down("v").with(Modifier::Shift);
        assert_eq!(h.orch.handle_window_input(&down, t0), Disposition::Consumed);
        assert_eq!(h.sink.states(), vec![true]);

        let up = KeyInput::up("v").with(Modifier::Shift);
        assert_eq!(
            h.orch.handle_window_input(&up, t0 + ms(300)),
            Disposition::Consumed
        );
        assert_eq!(h.sink.states(), vec![true]);
        assert_eq!(h.orch.next_deadline(), Some(t0 + ms(600)));

        h.orch.poll_timers(t0 + ms(599));
        assert_eq!(h.sink.states(), vec![true]);

        h.orch.poll_timers(t0 + ms(600));
        assert_eq!(h.sink.states(), vec![true, false]);
    }

    #[test]
    fn shift_released_before_key_still_ends_hold() {
        let mut h = harness(SessionKind::Wayland, only_focus);
        let t0 = Instant::now();
        h.orch.register(&config("Shift+V", Mode::Hold));

        let down = KeyInput::down("v").with(Modifier::Shift);
        assert_eq!(h.orch.handle_window_input(&down, t0), Disposition::Consumed);

        // Shift is already up when V is released.
        assert_eq!(
            h.orch.handle_window_input(&KeyInput::up("v"), t0 + ms(800)),
            Disposition::Consumed
        );
        assert_eq!(h.sink.states(), vec![true, false]);
    }

    #[test]
    fn focus_interceptor_requires_exact_modifiers() {
        let mut h = harness(SessionKind::X11, only_focus);
        h.orch.register(&config("V", Mode::Hold));

        let ctrl_v = KeyInput::down("v").with(Modifier::Ctrl);
        assert_eq!(
            h.orch.handle_window_input(&ctrl_v, Instant::now()),
            Disposition::PassThrough
        );
        assert!(h.sink.states().is_empty());
    }

    #[test]
    fn focus_input_is_ignored_without_focus_or_binding() {
        let mut h = harness(SessionKind::X11, all_ok);
        h.orch.register(&config("F8", Mode::Hold));
        assert_eq!(
            h.orch.handle_window_input(&KeyInput::down("F8"), Instant::now()),
            Disposition::PassThrough
        );

        let mut h = harness(SessionKind::X11, only_focus);
        h.orch.register(&config("F8", Mode::Hold));
        h.window.focused.store(false, Ordering::SeqCst);
        assert_eq!(
            h.orch.handle_window_input(&KeyInput::down("F8"), Instant::now()),
            Disposition::PassThrough
        );
        assert!(h.sink.states().is_empty());
    }

    #[test]
    fn window_blur_releases_held_key() {
        let mut h = harness(SessionKind::X11, only_focus);
        let t0 = Instant::now();
        h.orch.register(&config("F8", Mode::Hold));
        h.orch.handle_window_input(&KeyInput::down("F8"), t0);

        h.orch.handle_window_blur(t0 + ms(1000));
        assert_eq!(h.sink.states(), vec![true, false]);
    }

    #[test]
    fn toggle_flips_on_each_press() {
        let mut h = harness(SessionKind::X11, all_ok);
        let t0 = Instant::now();
        h.orch.register(&config("F8", Mode::Toggle));

        for (i, edge) in [Edge::Triggered, Edge::Triggered, Edge::Triggered]
            .into_iter()
            .enumerate()
        {
            let s = signal(&h.orch, SignalKind::Edge(edge));
            h.orch.handle_signal(s, t0 + ms(100 * i as u64));
        }
        assert_eq!(h.sink.states(), vec![true, false, true]);
    }

    #[test]
    fn toggle_ignores_key_up() {
        let mut h = harness(SessionKind::X11, only_focus);
        let t0 = Instant::now();
        h.orch.register(&config("F8", Mode::Toggle));

        h.orch.handle_window_input(&KeyInput::down("F8"), t0);
        assert_eq!(
            h.orch.handle_window_input(&KeyInput::up("F8"), t0 + ms(50)),
            Disposition::PassThrough
        );
        h.orch.handle_window_input(&KeyInput::down("F8"), t0 + ms(100));
        assert_eq!(h.sink.states(), vec![true, false]);
    }

    #[test]
    fn native_hold_emulation_rearms_on_repeat() {
        let mut h = harness(SessionKind::X11, |log| {
            (
                FakeStrategy::unavailable(StrategyKind::LowLevelHook, log),
                FakeStrategy::ok(StrategyKind::NativeShortcut, log),
                FakeStrategy::unavailable(StrategyKind::Portal, log),
            )
        });
        let t0 = Instant::now();
        h.orch.register(&config("F8", Mode::Hold));
        h.sink.clear();

        let trigger = signal(&h.orch, SignalKind::Edge(Edge::Triggered));
        h.orch.handle_signal(trigger.clone(), t0);
        h.orch.handle_signal(trigger.clone(), t0 + ms(300));
        assert_eq!(h.sink.states(), vec![true]);
        assert_eq!(h.orch.next_deadline(), Some(t0 + ms(700)));

        h.orch.poll_timers(t0 + ms(650));
        assert!(h.orch.current_state());
        h.orch.poll_timers(t0 + ms(700));
        assert_eq!(h.sink.states(), vec![true, false]);
    }

    #[test]
    fn single_native_trigger_honours_minimum_hold() {
        let mut h = harness(SessionKind::X11, |log| {
            (
                FakeStrategy::unavailable(StrategyKind::LowLevelHook, log),
                FakeStrategy::ok(StrategyKind::NativeShortcut, log),
                FakeStrategy::unavailable(StrategyKind::Portal, log),
            )
        });
        let t0 = Instant::now();
        h.orch.register(&config("F8", Mode::Hold));

        let trigger = signal(&h.orch, SignalKind::Edge(Edge::Triggered));
        h.orch.handle_signal(trigger, t0);
        h.orch.poll_timers(t0 + ms(400));
        assert!(h.orch.current_state());
        assert_eq!(h.orch.next_deadline(), Some(t0 + ms(600)));
        h.orch.poll_timers(t0 + ms(600));
        assert!(!h.orch.current_state());
    }

    #[test]
    fn stale_generation_and_foreign_source_are_dropped() {
        let mut h = harness(SessionKind::X11, all_ok);
        let t0 = Instant::now();
        h.orch.register(&config("F8", Mode::Hold));
        let old = signal(&h.orch, SignalKind::Edge(Edge::Down));

        h.orch.register(&config("F9", Mode::Hold));
        h.orch.handle_signal(old, t0);

        let mut foreign = signal(&h.orch, SignalKind::Edge(Edge::Down));
        foreign.source = StrategyKind::NativeShortcut;
        h.orch.handle_signal(foreign, t0);

        assert!(h.sink.states().is_empty());
    }

    // -- portal ---------------------------------------------------------------

    #[test]
    fn portal_edges_wait_for_ready() {
        let mut h = harness(SessionKind::Wayland, only_portal);
        let t0 = Instant::now();
        h.orch.register(&config("F8", Mode::Hold));

        let down = signal(&h.orch, SignalKind::Edge(Edge::Down));
        h.orch.handle_signal(down.clone(), t0);
        assert!(h.sink.states().is_empty());

        h.orch.handle_signal(signal(&h.orch, SignalKind::Ready), t0);
        h.orch.handle_signal(down, t0 + ms(10));
        assert_eq!(h.sink.states(), vec![true]);
    }

    #[test]
    fn portal_negotiation_failure_falls_back_with_warning() {
        let mut h = harness(SessionKind::Wayland, only_portal);
        let t0 = Instant::now();
        h.orch.register(&config("Shift+V", Mode::Hold));

        let failed = signal(
            &h.orch,
            SignalKind::Failed(StrategyError::Negotiation("AccessDenied".into())),
        );
        h.orch.handle_signal(failed.clone(), t0);

        assert_eq!(h.orch.bound_strategy(), Some(StrategyKind::FocusScoped));
        assert!(h.log.lock().unwrap().contains(&"unregister portal".to_string()));
        assert_eq!(
            warnings(&h.sink),
            vec![
                WarningKind::PortalNegotiationFailed,
                WarningKind::GlobalCaptureUnavailable
            ]
        );

        // A second failure report from the same task is stale now.
        h.orch.handle_signal(failed, t0);
        assert_eq!(fallback_events(&h.sink).len(), 1);
    }

    #[test]
    fn failed_strategy_is_released_after_deactivation() {
        let log: CallLog = Arc::default();
        let sink = Arc::new(RecordingSink::default());
        let mut portal = FakeStrategy::ok(StrategyKind::Portal, &log);
        portal.witness = Some(Arc::clone(&sink));
        let strategies = StrategySet {
            low_level: Box::new(FakeStrategy::unavailable(StrategyKind::LowLevelHook, &log)),
            native: Box::new(FakeStrategy::unavailable(StrategyKind::NativeShortcut, &log)),
            portal: Box::new(portal),
        };
        let window = Arc::new(TestWindow {
            focused: AtomicBool::new(true),
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut orch = Orchestrator::new(strategies, sink.clone(), window, SessionKind::Wayland, tx);
        let t0 = Instant::now();

        orch.register(&config("F8", Mode::Hold));
        orch.handle_signal(signal(&orch, SignalKind::Ready), t0);
        orch.handle_signal(signal(&orch, SignalKind::Edge(Edge::Down)), t0);
        let failed = signal(
            &orch,
            SignalKind::Failed(StrategyError::Negotiation("bus closed".into())),
        );
        orch.handle_signal(failed, t0 + ms(100));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["register portal", "unregister portal", "talk off at unregister"]
        );
        assert_eq!(sink.states(), vec![true, false]);
        assert_eq!(orch.bound_strategy(), Some(StrategyKind::FocusScoped));
    }

    #[test]
    fn dead_hook_falls_back_to_focus() {
        let mut h = harness(SessionKind::X11, |log| {
            (
                FakeStrategy::ok(StrategyKind::LowLevelHook, log),
                FakeStrategy::unavailable(StrategyKind::NativeShortcut, log),
                FakeStrategy::unavailable(StrategyKind::Portal, log),
            )
        });
        let t0 = Instant::now();
        h.orch.register(&config("F8", Mode::Hold));
        h.orch
            .handle_signal(signal(&h.orch, SignalKind::Edge(Edge::Down)), t0);

        let failed = signal(
            &h.orch,
            SignalKind::Failed(StrategyError::Unavailable("grab failed".into())),
        );
        h.orch.handle_signal(failed, t0 + ms(700));

        assert_eq!(h.sink.states(), vec![true, false]);
        assert_eq!(h.orch.bound_strategy(), Some(StrategyKind::FocusScoped));
        assert_eq!(warnings(&h.sink), vec![WarningKind::GlobalCaptureUnavailable]);
        assert_eq!(
            h.orch.handle_window_input(&KeyInput::down("F8"), t0 + ms(800)),
            Disposition::Consumed
        );
    }

    #[test]
    fn toggle_without_native_registrar_falls_back_to_focus() {
        let mut h = harness(SessionKind::X11, |log| {
            (
                FakeStrategy::ok(StrategyKind::LowLevelHook, log),
                FakeStrategy::unavailable(StrategyKind::NativeShortcut, log),
                FakeStrategy::ok(StrategyKind::Portal, log),
            )
        });
        h.orch.register(&config("F8", Mode::Toggle));

        assert_eq!(h.orch.bound_strategy(), Some(StrategyKind::FocusScoped));
        assert!(h.log.lock().unwrap().is_empty());
        assert_eq!(fallback_events(&h.sink).len(), 1);
    }

    #[test]
    fn absent_portal_service_falls_back_quietly() {
        let mut h = harness(SessionKind::Wayland, only_portal);
        h.orch.register(&config("F8", Mode::Hold));

        let failed = signal(
            &h.orch,
            SignalKind::Failed(StrategyError::Unavailable("ServiceUnknown".into())),
        );
        h.orch.handle_signal(failed, Instant::now());

        assert_eq!(h.orch.bound_strategy(), Some(StrategyKind::FocusScoped));
        assert_eq!(warnings(&h.sink), vec![WarningKind::GlobalCaptureUnavailable]);
    }

    // -- manual override --------------------------------------------------------

    #[test]
    fn manual_payloads() {
        let mut h = harness(SessionKind::X11, all_ok);
        let t0 = Instant::now();

        assert!(h.orch.handle_manual_payload(r#"{"active":"yes"}"#, t0).is_err());
        assert!(h.orch.handle_manual_payload("not json", t0).is_err());
        assert!(h.sink.events().is_empty());

        assert!(h.orch.handle_manual_payload(r#"{"active":true}"#, t0).unwrap());
        assert!(!h.orch.handle_manual_payload("false", t0).unwrap());
        assert_eq!(h.sink.states(), vec![true, false]);
    }

    #[test]
    fn manual_state_sets_baseline_for_edges() {
        let mut h = harness(SessionKind::X11, all_ok);
        let t0 = Instant::now();
        h.orch.register(&config("F8", Mode::Hold));

        h.orch.set_manual_state(true, t0);
        let down = signal(&h.orch, SignalKind::Edge(Edge::Down));
        h.orch.handle_signal(down, t0 + ms(10));

        assert_eq!(h.sink.states(), vec![true]);
    }
}
