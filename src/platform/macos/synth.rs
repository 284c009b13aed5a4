//! Posting replacement key events

use core_graphics::event::{CGEvent, CGEventTapLocation, EventField};
use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};
use tracing::warn;

use crate::hotkey::ModifierState;
use crate::remap::{EventSynthesizer, SynthesisError};

/// Stamped into the source user-data field of every event we post so the
/// edit filter can recognise and skip them
pub const SYNTHETIC_EVENT_MARKER: i64 = 0x4C53_5754;

/// Posts keyboard events at the HID level from a private source
pub struct CgSynthesizer {
    source: Option<CGEventSource>,
}

impl CgSynthesizer {
    pub fn new() -> Self {
        let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState).ok();
        if source.is_none() {
            warn!("failed to create event source, substitutions will drop keys");
        }
        Self { source }
    }
}

impl EventSynthesizer for CgSynthesizer {
    fn post_key(
        &self,
        key_code: u16,
        modifiers: ModifierState,
        key_down: bool,
    ) -> Result<(), SynthesisError> {
        let source = self
            .source
            .as_ref()
            .ok_or(SynthesisError::SourceUnavailable)?;

        let event = CGEvent::new_keyboard_event(source.clone(), key_code, key_down)
            .map_err(|_| SynthesisError::EventCreation(key_code))?;
        event.set_flags(modifiers.to_flags());
        event.set_integer_value_field(EventField::EVENT_SOURCE_USER_DATA, SYNTHETIC_EVENT_MARKER);
        event.post(CGEventTapLocation::HID);

        Ok(())
    }
}
