//! Windows-style edit shortcut remapping
//!
//! Control+key becomes Command+key for the enabled edit classes, Fn+Z
//! becomes Control+Z, and remote desktop clients can opt out.

mod config;
mod edit_keys;
mod engine;

pub use config::{KeyCodeTransition, RemapConfig, RemapConfigStore};
pub use edit_keys::EditCommandClass;
pub use engine::{
    classify, AppId, Decision, EventSynthesizer, KeyEvent, KeyRemapEngine, SynthesisError,
};
