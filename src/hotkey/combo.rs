//! Layout switch chord detection
//!
//! Watches modifier-only transitions for Shift + a configurable second
//! modifier and fires once the chord is released.

use tracing::debug;

use super::keys::{ComboModifier, Modifier, ModifierState};

/// Outcome of feeding one modifier transition to the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComboAction {
    /// Shift and the required modifier just became held
    Arm,
    /// The chord was released, switch the layout now
    Fire,
    None,
}

/// Edge-triggered detector for the Shift + X chord
#[derive(Debug, Default)]
pub struct ModifierComboDetector {
    armed: bool,
}

impl ModifierComboDetector {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn is_armed(&self) -> bool {
        self.armed
    }

    /// Feed the modifier set reported by a flags-changed event.
    ///
    /// Fires on release rather than press so that extra modifiers may come
    /// and go while the chord is held. Holding the chord indefinitely still
    /// fires exactly once.
    pub fn on_modifier_change(
        &mut self,
        current: ModifierState,
        required: ComboModifier,
    ) -> ComboAction {
        let held = current.contains(Modifier::Shift) && current.contains(required.into());

        if held {
            if self.armed {
                return ComboAction::None;
            }
            self.armed = true;
            debug!(chord = %required, "layout chord armed");
            ComboAction::Arm
        } else if self.armed {
            self.armed = false;
            debug!(chord = %required, "layout chord released");
            ComboAction::Fire
        } else {
            ComboAction::None
        }
    }
}
