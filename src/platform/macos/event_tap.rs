//! CGEventTap registrations
//!
//! Each filter runs on a dedicated thread with its own CFRunLoop. The
//! callback must stay fast: macOS disables taps that take too long, and
//! re-enabling happens right here in the callback before the controller
//! hears about it.

use std::cell::RefCell;
use std::os::raw::c_void;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use core_foundation::base::TCFType;
use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement,
    CGEventTapProxy, CGEventType, EventField,
};
use tracing::{debug, error, info};

use super::synth::{CgSynthesizer, SYNTHETIC_EVENT_MARKER};
use super::workspace::{frontmost_app_id, is_process_trusted};
use crate::events::DisableCause;
use crate::hotkey::{ComboAction, ComboModifier, ModifierComboDetector, ModifierState};
use crate::remap::{KeyEvent, KeyRemapEngine, RemapConfigStore};
use crate::tap::{
    ChordBackend, FilterBackend, FilterRegistration, TapError, TapMonitor, TapNotice,
};

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGEventTapEnable(tap: *mut c_void, enable: bool);
}

const STARTUP_TIMEOUT: Duration = Duration::from_secs(2);
const RUN_LOOP_SLICE: Duration = Duration::from_millis(100);

struct TapSpec {
    name: &'static str,
    location: CGEventTapLocation,
    options: CGEventTapOptions,
    events: Vec<CGEventType>,
}

/// A tap thread; stopping it disables the tap and removes its run loop
/// source before the thread exits
pub struct TapThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TapThread {
    /// Start a tap thread and wait until the tap is live.
    ///
    /// `make_handler` runs on the tap thread so the handler may own
    /// non-`Send` CoreGraphics objects.
    fn spawn<M, H>(
        spec: TapSpec,
        monitor: Arc<TapMonitor>,
        make_handler: M,
    ) -> Result<Self, TapError>
    where
        M: FnOnce() -> H + Send + 'static,
        H: FnMut(CGEventType, &CGEvent) -> Option<CGEvent>,
    {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), TapError>>();

        let thread_running = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name(spec.name.to_string())
            .spawn(move || {
                debug!(tap = spec.name, "tap thread started");
                run_tap(spec, monitor, make_handler, thread_running, ready_tx);
                debug!("tap thread stopped");
            })
            .map_err(|e| TapError::ThreadSpawn(e.to_string()))?;

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => Ok(Self {
                running,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                // the thread is left to exit on its own once it notices
                running.store(false, Ordering::SeqCst);
                Err(TapError::StartupTimeout)
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("tap thread panicked");
            }
        }
    }
}

impl FilterRegistration for TapThread {
    fn release(mut self) {
        self.stop();
    }
}

impl Drop for TapThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_tap<M, H>(
    spec: TapSpec,
    monitor: Arc<TapMonitor>,
    make_handler: M,
    running: Arc<AtomicBool>,
    ready_tx: std_mpsc::Sender<Result<(), TapError>>,
) where
    M: FnOnce() -> H,
    H: FnMut(CGEventType, &CGEvent) -> Option<CGEvent>,
{
    let handler = RefCell::new(make_handler());
    let port = AtomicPtr::new(std::ptr::null_mut::<c_void>());

    let callback = |_proxy: CGEventTapProxy,
                    event_type: CGEventType,
                    event: &CGEvent|
     -> Option<CGEvent> {
        let cause = match event_type {
            CGEventType::TapDisabledByTimeout => Some(DisableCause::Timeout),
            CGEventType::TapDisabledByUserInput => Some(DisableCause::UserInput),
            _ => None,
        };
        if let Some(cause) = cause {
            monitor.handle_disabled(cause, || {
                let raw = port.load(Ordering::SeqCst);
                if !raw.is_null() {
                    unsafe { CGEventTapEnable(raw, true) };
                }
            });
            return Some(event.clone());
        }

        // re-entrant delivery while the handler is still running
        match handler.try_borrow_mut() {
            Ok(mut guard) => (&mut *guard)(event_type, event),
            Err(_) => Some(event.clone()),
        }
    };

    // TapDisabled* notifications are delivered without being in the mask
    let tap = match CGEventTap::new(
        spec.location,
        CGEventTapPlacement::HeadInsertEventTap,
        spec.options,
        spec.events,
        callback,
    ) {
        Ok(tap) => tap,
        Err(()) => {
            error!(tap = spec.name, "failed to create event tap - is permission granted?");
            let _ = ready_tx.send(Err(TapError::PermissionDenied));
            return;
        }
    };

    let source = match tap.mach_port.create_runloop_source(0) {
        Ok(source) => source,
        Err(()) => {
            let _ = ready_tx.send(Err(TapError::RunLoopSource));
            return;
        }
    };

    let run_loop = CFRunLoop::get_current();
    unsafe {
        run_loop.add_source(&source, kCFRunLoopCommonModes);
    }
    port.store(
        tap.mach_port.as_concrete_TypeRef() as *mut c_void,
        Ordering::SeqCst,
    );
    tap.enable();

    info!(tap = spec.name, "event tap created and enabled");
    let _ = ready_tx.send(Ok(()));

    while running.load(Ordering::SeqCst) {
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, RUN_LOOP_SLICE, true);
        }
    }

    unsafe {
        CGEventTapEnable(port.swap(std::ptr::null_mut(), Ordering::SeqCst), false);
        run_loop.remove_source(&source, kCFRunLoopCommonModes);
    }
    info!(tap = spec.name, "event tap disabled and detached");
}

/// Active key-down filter that rewrites edit shortcuts
pub struct EditFilterBackend {
    store: RemapConfigStore,
}

impl EditFilterBackend {
    pub fn new(store: RemapConfigStore) -> Self {
        Self { store }
    }
}

impl FilterBackend for EditFilterBackend {
    type Registration = TapThread;

    fn is_trusted(&self) -> bool {
        is_process_trusted(false)
    }

    fn register(&mut self, monitor: Arc<TapMonitor>) -> Result<TapThread, TapError> {
        let spec = TapSpec {
            name: "edit-shortcuts",
            location: CGEventTapLocation::HID,
            options: CGEventTapOptions::Default,
            events: vec![CGEventType::KeyDown],
        };
        let store = self.store.clone();

        TapThread::spawn(spec, monitor, move || {
            let engine = KeyRemapEngine::new(store, CgSynthesizer::new());

            move |event_type: CGEventType, event: &CGEvent| {
                if !matches!(event_type, CGEventType::KeyDown) {
                    return Some(event.clone());
                }

                let key = KeyEvent {
                    key_code: event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE)
                        as u16,
                    modifiers: ModifierState::from_flags(event.get_flags()),
                    is_key_down: true,
                    synthetic: event.get_integer_value_field(EventField::EVENT_SOURCE_USER_DATA)
                        == SYNTHETIC_EVENT_MARKER,
                };

                if engine.process(&key, frontmost_app_id).forwards_original() {
                    Some(event.clone())
                } else {
                    None
                }
            }
        })
    }
}

/// Listen-only modifier monitor for the layout chord
pub struct LayoutMonitorBackend {
    chord: ComboModifier,
}

impl LayoutMonitorBackend {
    pub fn new(chord: ComboModifier) -> Self {
        Self { chord }
    }
}

impl FilterBackend for LayoutMonitorBackend {
    type Registration = TapThread;

    fn is_trusted(&self) -> bool {
        is_process_trusted(false)
    }

    fn register(&mut self, monitor: Arc<TapMonitor>) -> Result<TapThread, TapError> {
        let spec = TapSpec {
            name: "layout-shortcut",
            location: CGEventTapLocation::Session,
            options: CGEventTapOptions::ListenOnly,
            events: vec![CGEventType::FlagsChanged],
        };
        let chord = self.chord;
        let notices = Arc::clone(&monitor);

        TapThread::spawn(spec, monitor, move || {
            let mut detector = ModifierComboDetector::new();

            move |event_type: CGEventType, event: &CGEvent| {
                if matches!(event_type, CGEventType::FlagsChanged) {
                    let current = ModifierState::from_flags(event.get_flags());
                    if matches!(
                        detector.on_modifier_change(current, chord),
                        ComboAction::Fire
                    ) {
                        notices.notify(TapNotice::LayoutChord);
                    }
                }
                Some(event.clone())
            }
        })
    }
}

impl ChordBackend for LayoutMonitorBackend {
    fn set_chord_modifier(&mut self, modifier: ComboModifier) {
        debug!(from = %self.chord, to = %modifier, "layout chord set");
        self.chord = modifier;
    }
}
