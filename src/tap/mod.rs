//! Event tap lifecycle management
//!
//! Platform-neutral state machine around the macOS event taps; the taps
//! themselves live in `platform`.

mod lifecycle;

pub use lifecycle::{
    ChordBackend, FilterBackend, FilterRegistration, TapError, TapLifecycle, TapMonitor,
    TapNotice, TapState,
};

#[cfg(test)]
pub(crate) use lifecycle::tests::FakeBackend;
