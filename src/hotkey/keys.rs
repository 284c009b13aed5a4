//! Modifier key definitions and state tracking
//!
//! Provides the modifier vocabulary shared by the layout chord detector and
//! the edit-shortcut remapper, plus the hardware key codes they care about.

use serde::{Deserialize, Serialize};

/// Layout-independent hardware key codes (HIToolbox `kVK_ANSI_*`)
pub mod codes {
    pub const A: u16 = 0;
    pub const S: u16 = 1;
    pub const F: u16 = 3;
    pub const Z: u16 = 6;
    pub const X: u16 = 7;
    pub const C: u16 = 8;
    pub const V: u16 = 9;
    pub const Y: u16 = 16;
    pub const O: u16 = 31;
    pub const P: u16 = 35;
}

/// Modifier key flag masks from macOS CGEventFlags
#[cfg(target_os = "macos")]
pub mod flags {
    use core_graphics::event::CGEventFlags;

    pub const SHIFT: CGEventFlags = CGEventFlags::CGEventFlagShift;
    pub const CONTROL: CGEventFlags = CGEventFlags::CGEventFlagControl;
    /// Option/Alt key modifier flag
    pub const OPTION: CGEventFlags = CGEventFlags::CGEventFlagAlternate;
    pub const COMMAND: CGEventFlags = CGEventFlags::CGEventFlagCommand;
    /// Fn / Globe key, reported as the secondary-fn flag
    pub const FUNCTION: CGEventFlags = CGEventFlags::CGEventFlagSecondaryFn;
}

/// A single modifier key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modifier {
    Shift,
    Control,
    Option,
    Command,
    Fn,
}

impl std::fmt::Display for Modifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Modifier::Shift => write!(f, "Shift ⇧"),
            Modifier::Control => write!(f, "Control ⌃"),
            Modifier::Option => write!(f, "Option ⌥"),
            Modifier::Command => write!(f, "Command ⌘"),
            Modifier::Fn => write!(f, "Fn"),
        }
    }
}

/// The second key of the Shift + X layout switch chord
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComboModifier {
    Fn,
    Option,
    Control,
    Command,
}

impl Default for ComboModifier {
    fn default() -> Self {
        Self::Control
    }
}

impl From<ComboModifier> for Modifier {
    fn from(combo: ComboModifier) -> Self {
        match combo {
            ComboModifier::Fn => Modifier::Fn,
            ComboModifier::Option => Modifier::Option,
            ComboModifier::Control => Modifier::Control,
            ComboModifier::Command => Modifier::Command,
        }
    }
}

impl std::fmt::Display for ComboModifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Shift ⇧ + {}", Modifier::from(*self))
    }
}

/// Tracks which modifier keys are currently pressed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    pub shift: bool,
    pub control: bool,
    /// Option/Alt key is held
    pub option: bool,
    pub command: bool,
    /// Fn / Globe key is held
    pub function: bool,
}

impl ModifierState {
    /// State with exactly one modifier held
    pub fn only(modifier: Modifier) -> Self {
        Self::default().with(modifier)
    }

    /// Copy of this state with `modifier` added
    pub fn with(mut self, modifier: Modifier) -> Self {
        match modifier {
            Modifier::Shift => self.shift = true,
            Modifier::Control => self.control = true,
            Modifier::Option => self.option = true,
            Modifier::Command => self.command = true,
            Modifier::Fn => self.function = true,
        }
        self
    }

    pub fn contains(&self, modifier: Modifier) -> bool {
        match modifier {
            Modifier::Shift => self.shift,
            Modifier::Control => self.control,
            Modifier::Option => self.option,
            Modifier::Command => self.command,
            Modifier::Fn => self.function,
        }
    }

    /// Create a new ModifierState from CGEventFlags
    #[cfg(target_os = "macos")]
    pub fn from_flags(event_flags: core_graphics::event::CGEventFlags) -> Self {
        Self {
            shift: event_flags.contains(flags::SHIFT),
            control: event_flags.contains(flags::CONTROL),
            option: event_flags.contains(flags::OPTION),
            command: event_flags.contains(flags::COMMAND),
            function: event_flags.contains(flags::FUNCTION),
        }
    }

    /// Flags carrying exactly the modifiers held in this state
    #[cfg(target_os = "macos")]
    pub fn to_flags(&self) -> core_graphics::event::CGEventFlags {
        use core_graphics::event::CGEventFlags;

        let mut out = CGEventFlags::CGEventFlagNull;
        for (held, flag) in [
            (self.shift, flags::SHIFT),
            (self.control, flags::CONTROL),
            (self.option, flags::OPTION),
            (self.command, flags::COMMAND),
            (self.function, flags::FUNCTION),
        ] {
            if held {
                out |= flag;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_sets_single_modifier() {
        let state = ModifierState::only(Modifier::Command);
        assert!(state.command);
        assert!(!state.control);
        assert!(!state.shift);
    }

    #[test]
    fn test_with_accumulates() {
        let state = ModifierState::only(Modifier::Shift).with(Modifier::Fn);
        assert!(state.contains(Modifier::Shift));
        assert!(state.contains(Modifier::Fn));
        assert!(!state.contains(Modifier::Option));
    }

    #[test]
    fn test_combo_modifier_default_is_control() {
        assert_eq!(ComboModifier::default(), ComboModifier::Control);
        assert_eq!(Modifier::from(ComboModifier::Fn), Modifier::Fn);
    }

    #[test]
    fn test_combo_modifier_serialization() {
        let json = serde_json::to_string(&ComboModifier::Option).unwrap();
        assert_eq!(json, "\"option\"");
        let parsed: ComboModifier = serde_json::from_str("\"command\"").unwrap();
        assert_eq!(parsed, ComboModifier::Command);
    }
}
