//! Stand-ins for platforms without event taps or text input sources

use std::sync::Arc;

use tracing::warn;

use crate::hotkey::ComboModifier;
use crate::input_source::{InputSource, InputSourceError, InputSourceProvider};
use crate::remap::RemapConfigStore;
use crate::tap::{ChordBackend, FilterBackend, FilterRegistration, TapError, TapMonitor};

/// Never constructed: registration always fails here
pub enum NoRegistration {}

impl FilterRegistration for NoRegistration {
    fn release(self) {
        match self {}
    }
}

pub struct EditFilterBackend {
    _store: RemapConfigStore,
}

impl EditFilterBackend {
    pub fn new(store: RemapConfigStore) -> Self {
        Self { _store: store }
    }
}

impl FilterBackend for EditFilterBackend {
    type Registration = NoRegistration;

    fn is_trusted(&self) -> bool {
        true
    }

    fn register(&mut self, _monitor: Arc<TapMonitor>) -> Result<NoRegistration, TapError> {
        Err(TapError::Unsupported)
    }
}

pub struct LayoutMonitorBackend;

impl LayoutMonitorBackend {
    pub fn new(_chord: ComboModifier) -> Self {
        Self
    }
}

impl FilterBackend for LayoutMonitorBackend {
    type Registration = NoRegistration;

    fn is_trusted(&self) -> bool {
        true
    }

    fn register(&mut self, _monitor: Arc<TapMonitor>) -> Result<NoRegistration, TapError> {
        Err(TapError::Unsupported)
    }
}

impl ChordBackend for LayoutMonitorBackend {
    fn set_chord_modifier(&mut self, _modifier: ComboModifier) {}
}

/// Reports no input sources
#[derive(Debug, Default, Clone, Copy)]
pub struct TisProvider;

impl TisProvider {
    pub fn new() -> Self {
        Self
    }
}

impl InputSourceProvider for TisProvider {
    type Handle = ();

    fn selectable_sources(&self) -> Vec<InputSource<()>> {
        Vec::new()
    }

    fn current_source_id(&self) -> Option<String> {
        None
    }

    fn select(&self, source: &InputSource<()>) -> Result<(), InputSourceError> {
        Err(InputSourceError::SelectFailed {
            id: source.id.clone(),
            status: -1,
        })
    }
}

pub fn request_accessibility() -> bool {
    warn!("accessibility permissions are only available on macOS");
    false
}
