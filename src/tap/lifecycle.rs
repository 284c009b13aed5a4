//! Event tap registration lifecycle
//!
//! Uninstalled -> Installed on successful registration, Installed ->
//! SystemDisabled when macOS switches the tap off, straight back to
//! Installed once it has been re-enabled, and back to Uninstalled on
//! teardown. The registration is released exactly once.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::{DisableCause, FilterKind};
use crate::hotkey::ComboModifier;

/// Where a filter is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TapState {
    Uninstalled,
    Installed,
    SystemDisabled,
}

impl TapState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => TapState::Installed,
            2 => TapState::SystemDisabled,
            _ => TapState::Uninstalled,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TapState::Uninstalled => 0,
            TapState::Installed => 1,
            TapState::SystemDisabled => 2,
        }
    }
}

impl std::fmt::Display for TapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TapState::Uninstalled => write!(f, "Uninstalled"),
            TapState::Installed => write!(f, "Installed"),
            TapState::SystemDisabled => write!(f, "SystemDisabled"),
        }
    }
}

/// Errors registering an event tap
#[derive(Debug, thiserror::Error)]
pub enum TapError {
    #[error("event tap refused - grant Accessibility and Input Monitoring permissions, then restart")]
    PermissionDenied,

    #[error("event taps are not supported on this platform")]
    Unsupported,

    #[error("failed to spawn tap thread: {0}")]
    ThreadSpawn(String),

    #[error("failed to create run loop source for event tap")]
    RunLoopSource,

    #[error("tap thread did not report readiness")]
    StartupTimeout,
}

/// Messages from tap threads to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapNotice {
    /// A filter was disabled by macOS and has already been re-enabled
    Rearmed {
        filter: FilterKind,
        cause: DisableCause,
        rearm_count: u64,
    },
    /// The Shift + X chord was released
    LayoutChord,
}

/// State shared between a lifecycle and the callback of its live tap
#[derive(Debug)]
pub struct TapMonitor {
    kind: FilterKind,
    state: AtomicU8,
    rearms: AtomicU64,
    notices: mpsc::Sender<TapNotice>,
}

impl TapMonitor {
    pub fn new(kind: FilterKind, notices: mpsc::Sender<TapNotice>) -> Self {
        Self {
            kind,
            state: AtomicU8::new(TapState::Uninstalled.as_u8()),
            rearms: AtomicU64::new(0),
            notices,
        }
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn state(&self) -> TapState {
        TapState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: TapState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Total re-arms since the daemon started
    pub fn rearm_count(&self) -> u64 {
        self.rearms.load(Ordering::SeqCst)
    }

    /// Forward a notice without ever blocking the tap thread
    pub fn notify(&self, notice: TapNotice) {
        if let Err(e) = self.notices.try_send(notice) {
            warn!(filter = %self.kind, error = %e, "dropped tap notice");
        }
    }

    /// Called from the tap callback when macOS disabled the tap.
    ///
    /// `rearm` must re-enable the tap synchronously; interception would
    /// otherwise stay dead without anyone noticing.
    pub fn handle_disabled<F: FnOnce()>(&self, cause: DisableCause, rearm: F) {
        self.set_state(TapState::SystemDisabled);
        warn!(filter = %self.kind, ?cause, "event tap disabled by system, re-enabling");

        rearm();

        self.set_state(TapState::Installed);
        let rearm_count = self.rearms.fetch_add(1, Ordering::SeqCst) + 1;
        self.notify(TapNotice::Rearmed {
            filter: self.kind,
            cause,
            rearm_count,
        });
    }
}

/// A live platform registration
pub trait FilterRegistration {
    /// Disable the tap and detach it from its run loop
    fn release(self);
}

/// Platform side of one kind of filter
pub trait FilterBackend {
    type Registration: FilterRegistration;

    /// Whether the process may install event taps at all
    fn is_trusted(&self) -> bool;

    fn register(&mut self, monitor: Arc<TapMonitor>) -> Result<Self::Registration, TapError>;
}

/// Backend of the layout monitor, which is bound to one chord per
/// registration
pub trait ChordBackend: FilterBackend {
    /// Takes effect on the next registration
    fn set_chord_modifier(&mut self, modifier: ComboModifier);
}

/// Owns at most one live registration of a filter
pub struct TapLifecycle<B: FilterBackend> {
    backend: B,
    monitor: Arc<TapMonitor>,
    registration: Option<B::Registration>,
}

impl<B: FilterBackend> TapLifecycle<B> {
    pub fn new(kind: FilterKind, backend: B, notices: mpsc::Sender<TapNotice>) -> Self {
        Self {
            backend,
            monitor: Arc::new(TapMonitor::new(kind, notices)),
            registration: None,
        }
    }

    pub fn kind(&self) -> FilterKind {
        self.monitor.kind()
    }

    pub fn state(&self) -> TapState {
        self.monitor.state()
    }

    pub fn is_installed(&self) -> bool {
        self.registration.is_some()
    }

    pub fn rearm_count(&self) -> u64 {
        self.monitor.rearm_count()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Register the filter unless it is already live.
    ///
    /// Returns `Ok(true)` when a new registration was made. A missing
    /// permission grant is reported, never retried here.
    pub fn install(&mut self) -> Result<bool, TapError> {
        if self.registration.is_some() {
            debug!(filter = %self.kind(), "filter already installed");
            return Ok(false);
        }

        if !self.backend.is_trusted() {
            return Err(TapError::PermissionDenied);
        }

        let monitor = Arc::clone(&self.monitor);
        let backend = &mut self.backend;
        let registration = off_runtime(|| backend.register(monitor))?;
        self.registration = Some(registration);
        self.monitor.set_state(TapState::Installed);

        info!(filter = %self.kind(), "event filter installed");
        Ok(true)
    }

    /// Release the registration if there is one. Returns whether anything
    /// was released.
    pub fn teardown(&mut self) -> bool {
        match self.registration.take() {
            Some(registration) => {
                off_runtime(|| registration.release());
                self.monitor.set_state(TapState::Uninstalled);
                info!(filter = %self.kind(), "event filter removed");
                true
            }
            None => false,
        }
    }
}

/// Run platform work that may block (waiting for a tap thread to start or
/// joining it) without stalling the other tasks of a runtime worker
fn off_runtime<T>(work: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}

impl<B: FilterBackend> Drop for TapLifecycle<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    use super::*;

    /// Backend that counts registrations and releases; clones share state
    #[derive(Clone, Default)]
    pub(crate) struct FakeBackend {
        pub untrusted: Arc<AtomicBool>,
        pub registered: Arc<AtomicUsize>,
        pub released: Arc<AtomicUsize>,
        pub last_monitor: Arc<parking_lot::Mutex<Option<Arc<TapMonitor>>>>,
        pub chord: Arc<parking_lot::Mutex<Option<ComboModifier>>>,
    }

    impl FakeBackend {
        pub fn set_trusted(&self, trusted: bool) {
            self.untrusted.store(!trusted, Ordering::SeqCst);
        }

        pub fn registered(&self) -> usize {
            self.registered.load(Ordering::SeqCst)
        }

        pub fn released(&self) -> usize {
            self.released.load(Ordering::SeqCst)
        }

        /// Monitor handed to the most recent registration, as a tap thread
        /// would hold it
        pub fn monitor(&self) -> Option<Arc<TapMonitor>> {
            self.last_monitor.lock().clone()
        }
    }

    pub(crate) struct FakeRegistration {
        released: Arc<AtomicUsize>,
    }

    impl FilterRegistration for FakeRegistration {
        fn release(self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl FilterBackend for FakeBackend {
        type Registration = FakeRegistration;

        fn is_trusted(&self) -> bool {
            !self.untrusted.load(Ordering::SeqCst)
        }

        fn register(&mut self, monitor: Arc<TapMonitor>) -> Result<FakeRegistration, TapError> {
            self.registered.fetch_add(1, Ordering::SeqCst);
            *self.last_monitor.lock() = Some(monitor);
            Ok(FakeRegistration {
                released: Arc::clone(&self.released),
            })
        }
    }

    impl ChordBackend for FakeBackend {
        fn set_chord_modifier(&mut self, modifier: ComboModifier) {
            *self.chord.lock() = Some(modifier);
        }
    }

    fn lifecycle() -> (
        TapLifecycle<FakeBackend>,
        FakeBackend,
        mpsc::Receiver<TapNotice>,
    ) {
        let (tx, rx) = mpsc::channel(8);
        let backend = FakeBackend::default();
        (
            TapLifecycle::new(FilterKind::EditShortcuts, backend.clone(), tx),
            backend,
            rx,
        )
    }

    #[test]
    fn test_initial_state() {
        let (tap, _, _) = lifecycle();
        assert_eq!(tap.state(), TapState::Uninstalled);
        assert!(!tap.is_installed());
    }

    #[test]
    fn test_install_and_teardown_release_once() {
        let (mut tap, backend, _rx) = lifecycle();

        assert!(tap.install().unwrap());
        assert!(!tap.install().unwrap());
        assert_eq!(tap.state(), TapState::Installed);
        assert_eq!(backend.registered(), 1);

        assert!(tap.teardown());
        assert!(!tap.teardown());
        assert_eq!(tap.state(), TapState::Uninstalled);
        assert_eq!(backend.released(), 1);
    }

    #[test]
    fn test_untrusted_install_is_refused_without_registering() {
        let (mut tap, backend, _rx) = lifecycle();
        backend.set_trusted(false);

        assert!(matches!(tap.install(), Err(TapError::PermissionDenied)));
        assert_eq!(tap.state(), TapState::Uninstalled);
        assert_eq!(backend.registered(), 0);
    }

    #[test]
    fn test_drop_releases_registration() {
        let (mut tap, backend, _rx) = lifecycle();
        tap.install().unwrap();

        drop(tap);

        assert_eq!(backend.released(), 1);
    }

    #[test]
    fn test_system_disable_is_rearmed_immediately() {
        let (mut tap, backend, mut rx) = lifecycle();
        tap.install().unwrap();
        let monitor = backend.monitor().unwrap();

        let mut state_during_rearm = None;
        monitor.handle_disabled(DisableCause::Timeout, || {
            state_during_rearm = Some(monitor.state());
        });

        assert_eq!(state_during_rearm, Some(TapState::SystemDisabled));
        assert_eq!(tap.state(), TapState::Installed);
        assert_eq!(tap.rearm_count(), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            TapNotice::Rearmed {
                filter: FilterKind::EditShortcuts,
                cause: DisableCause::Timeout,
                rearm_count: 1,
            }
        );
    }

    /// Registration that only completes once another task on the same
    /// runtime has run
    struct GatedBackend {
        gate: std::sync::mpsc::Receiver<()>,
        released: Arc<AtomicUsize>,
    }

    impl FilterBackend for GatedBackend {
        type Registration = FakeRegistration;

        fn is_trusted(&self) -> bool {
            true
        }

        fn register(&mut self, _monitor: Arc<TapMonitor>) -> Result<FakeRegistration, TapError> {
            self.gate
                .recv_timeout(std::time::Duration::from_secs(5))
                .map_err(|_| TapError::StartupTimeout)?;
            Ok(FakeRegistration {
                released: Arc::clone(&self.released),
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_slow_registration_does_not_stall_the_worker() {
        let (gate_tx, gate) = std::sync::mpsc::channel();
        let released = Arc::new(AtomicUsize::new(0));
        let (tx, _rx) = mpsc::channel(8);
        let mut tap = TapLifecycle::new(
            FilterKind::EditShortcuts,
            GatedBackend {
                gate,
                released: Arc::clone(&released),
            },
            tx,
        );

        let installed = tokio::spawn(async move {
            // queued on this worker; only runs if install hands the worker off
            tokio::spawn(async move {
                let _ = gate_tx.send(());
            });
            let result = tap.install();
            tap.teardown();
            result
        })
        .await
        .unwrap();

        assert!(installed.unwrap());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_full_notice_queue_does_not_block() {
        let (tx, _rx) = mpsc::channel(1);
        let monitor = TapMonitor::new(FilterKind::LayoutShortcut, tx);

        monitor.notify(TapNotice::LayoutChord);
        monitor.notify(TapNotice::LayoutChord);
        monitor.handle_disabled(DisableCause::UserInput, || {});

        assert_eq!(monitor.rearm_count(), 1);
    }
}
