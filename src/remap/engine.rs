//! Key-down classifier and rewriter
//!
//! Runs inside the edit filter callback. Everything here must finish in
//! microseconds: no IO, no locks beyond the config snapshot, no waiting on
//! posted events.

use tracing::{debug, warn};

use super::config::{RemapConfig, RemapConfigStore};
use crate::hotkey::{codes, Modifier, ModifierState};

/// Bundle identifier of an application
pub type AppId = String;

/// One hardware key transition as seen by the edit filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key_code: u16,
    pub modifiers: ModifierState,
    pub is_key_down: bool,
    /// Posted by this daemon rather than the keyboard
    pub synthetic: bool,
}

impl KeyEvent {
    pub fn key_down(key_code: u16, modifiers: ModifierState) -> Self {
        Self {
            key_code,
            modifiers,
            is_key_down: true,
            synthetic: false,
        }
    }
}

/// What the filter should do with the original event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Forward the event untouched
    PassThrough,
    /// Drop the event without replacement
    Suppress,
    /// Drop the event and replay its key with only this modifier held
    Substitute(Modifier),
}

impl Decision {
    /// Whether the original event continues to the foreground application
    pub fn forwards_original(&self) -> bool {
        matches!(self, Decision::PassThrough)
    }
}

/// Errors posting a synthesized key event
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("synthetic event source is unavailable")]
    SourceUnavailable,

    #[error("failed to create keyboard event for key code {0}")]
    EventCreation(u16),
}

/// Posts key events that did not come from the keyboard
pub trait EventSynthesizer {
    /// Post a single key transition carrying exactly `modifiers`
    fn post_key(
        &self,
        key_code: u16,
        modifiers: ModifierState,
        key_down: bool,
    ) -> Result<(), SynthesisError>;
}

/// Decide what to do with one key event.
///
/// `frontmost_app` is only called when the Control remap could apply, so the
/// workspace lookup stays off the path of ordinary typing.
pub fn classify<F>(event: &KeyEvent, config: &RemapConfig, frontmost_app: F) -> Decision
where
    F: FnOnce() -> Option<AppId>,
{
    if !event.is_key_down || event.synthetic {
        return Decision::PassThrough;
    }

    let mods = event.modifiers;
    let enabled = config.enabled_key_codes().contains(&event.key_code);

    if mods.function && event.key_code == codes::Z {
        // Fn+Control+Z is left alone so the chord is never rewritten twice
        if mods.control {
            return Decision::PassThrough;
        }
        if config.ignore_fn_substitution_for_edit_combos() && enabled {
            return Decision::PassThrough;
        }
        return Decision::Substitute(Modifier::Control);
    }

    if mods.control && enabled {
        let in_rdp = frontmost_app().map_or(false, |id| config.is_rdp_app(&id));
        if in_rdp && !config.rdp_ctrl_to_cmd_remap_enabled() {
            return Decision::PassThrough;
        }
        return Decision::Substitute(Modifier::Command);
    }

    Decision::PassThrough
}

/// Classifies key-down events and emits the replacement key presses
pub struct KeyRemapEngine<S> {
    store: RemapConfigStore,
    synthesizer: S,
}

impl<S: EventSynthesizer> KeyRemapEngine<S> {
    pub fn new(store: RemapConfigStore, synthesizer: S) -> Self {
        Self { store, synthesizer }
    }

    /// Classify `event` against the current config and perform any
    /// substitution.
    ///
    /// If posting the replacement fails the original is still dropped: an
    /// unmodified Control or Fn chord has no meaning for the foreground app,
    /// and a lost keystroke beats a wrong one.
    pub fn process<F>(&self, event: &KeyEvent, frontmost_app: F) -> Decision
    where
        F: FnOnce() -> Option<AppId>,
    {
        let config = self.store.snapshot();

        match classify(event, &config, frontmost_app) {
            Decision::Substitute(modifier) => match self.replay(event.key_code, modifier) {
                Ok(()) => {
                    debug!(key_code = event.key_code, to = %modifier, "key substituted");
                    Decision::Substitute(modifier)
                }
                Err(e) => {
                    warn!(key_code = event.key_code, error = %e, "synthesis failed, dropping key");
                    Decision::Suppress
                }
            },
            decision => decision,
        }
    }

    fn replay(&self, key_code: u16, modifier: Modifier) -> Result<(), SynthesisError> {
        let modifiers = ModifierState::only(modifier);
        let down = self.synthesizer.post_key(key_code, modifiers, true);
        // always attempt the release so a key is never left held
        let up = self.synthesizer.post_key(key_code, modifiers, false);
        down.and(up)
    }
}
