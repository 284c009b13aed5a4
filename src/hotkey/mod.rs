//! Hotkey module for modifier chord handling
//!
//! Defines the modifier vocabulary and the Shift + X layout chord detector
//! fed by the layout monitor tap.

mod combo;
pub mod keys;

pub use combo::{ComboAction, ModifierComboDetector};
pub use keys::{codes, ComboModifier, Modifier, ModifierState};
