//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::events::DaemonEvent;
use crate::hotkey::ComboModifier;
use crate::remap::EditCommandClass;
use crate::tap::TapState;

/// Requests from the menu bar UI to the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Subscribe to daemon event notifications
    Subscribe,

    /// Master switch for both filters
    SetEnabled { enabled: bool },

    SetEditClasses { classes: BTreeSet<EditCommandClass> },

    /// Second modifier of the Shift + X layout chord
    SetComboModifier { modifier: ComboModifier },

    SetRdpApps { bundle_ids: BTreeSet<String> },

    AddRdpApp { bundle_id: String },

    RemoveRdpApp { bundle_id: String },

    SetRdpRemap { enabled: bool },

    SetIgnoreFnForEditCombos { enabled: bool },

    /// Switch to the next keyboard input source, as the chord would
    AdvanceInputSource,

    ClearInputSourceCache,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// Subscription confirmed
    Subscribed,

    /// Setting applied
    Ok,

    InputSourceChanged { source_id: String },

    /// Error response
    Error { code: String, message: String },

    /// Pushed to subscribed clients
    Notification { event: DaemonEvent },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// An edit command class with its menu label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditClassStatus {
    pub class: EditCommandClass,
    pub label: String,
    pub enabled: bool,
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    pub enabled: bool,

    pub edit_filter: TapState,

    pub layout_monitor: TapState,

    pub combo_modifier: ComboModifier,

    /// Human readable chord, e.g. "Shift ⇧ + Control ⌃"
    pub combo_label: String,

    /// Every class, enabled or not
    pub edit_classes: Vec<EditClassStatus>,

    /// Sorted
    pub enabled_key_codes: Vec<u16>,

    pub rdp_bundle_identifiers: Vec<String>,

    pub rdp_remap_enabled: bool,

    pub ignore_fn_for_edit_combos: bool,

    /// System-initiated re-arms across both filters since startup
    pub rearm_count: u64,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FilterKind;

    #[test]
    fn test_request_serialization() {
        let req = Request::SetComboModifier {
            modifier: ComboModifier::Option,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("set_combo_modifier"));
        assert!(json.contains("option"));
    }

    #[test]
    fn test_request_from_ui_json() {
        let req: Request =
            serde_json::from_str(r#"{"type":"set_edit_classes","classes":["copy_paste","find"]}"#)
                .unwrap();
        match req {
            Request::SetEditClasses { classes } => {
                assert!(classes.contains(&EditCommandClass::CopyPaste));
                assert!(classes.contains(&EditCommandClass::Find));
            }
            other => panic!("unexpected request {:?}", other),
        }

        let req: Request = serde_json::from_str(r#"{"type":"advance_input_source"}"#).unwrap();
        assert_eq!(req, Request::AdvanceInputSource);
    }

    #[test]
    fn test_unknown_request_is_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"type":"set_mode"}"#).is_err());
    }

    #[test]
    fn test_notification_serialization() {
        let resp = Response::Notification {
            event: DaemonEvent::FilterInstalled {
                filter: FilterKind::EditShortcuts,
            },
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""type":"notification""#));
        assert!(json.contains("filter_installed"));
        assert!(json.contains("edit_shortcuts"));
    }

    #[test]
    fn test_error_response() {
        let json = serde_json::to_string(&Response::error("bad_request", "nope")).unwrap();
        assert_eq!(
            json,
            r#"{"type":"error","code":"bad_request","message":"nope"}"#
        );
    }
}
