//! Events published by the daemon
//!
//! Broadcast to subscribed IPC clients so the menu bar UI can show filter
//! health and layout switches.

use serde::{Deserialize, Serialize};

/// Which of the two event taps an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Key-down filter rewriting edit shortcuts
    EditShortcuts,
    /// Listen-only modifier tap watching for the layout chord
    LayoutShortcut,
}

impl std::fmt::Display for FilterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterKind::EditShortcuts => write!(f, "edit-shortcuts"),
            FilterKind::LayoutShortcut => write!(f, "layout-shortcut"),
        }
    }
}

/// Why macOS switched a tap off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisableCause {
    /// The callback took too long
    Timeout,
    /// Secure input or a similar user action
    UserInput,
}

/// Events emitted by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonEvent {
    FilterInstalled {
        filter: FilterKind,
    },

    FilterRemoved {
        filter: FilterKind,
    },

    /// macOS disabled a tap and it was switched back on
    FilterRearmed {
        filter: FilterKind,
        cause: DisableCause,
        rearm_count: u64,
    },

    /// A tap keeps getting disabled; the callback may be too slow
    FilterUnstable {
        filter: FilterKind,
        recent_rearms: usize,
    },

    /// The tap could not be registered for lack of permission
    PermissionDenied {
        filter: FilterKind,
        remediation: String,
    },

    InputSourceChanged {
        source_id: String,
    },

    /// Layout chord fired but there was nothing to switch to
    InputSourceUnavailable,

    SettingsChanged,
}

impl std::fmt::Display for DaemonEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonEvent::FilterInstalled { filter } => write!(f, "FILTER_INSTALLED ({})", filter),
            DaemonEvent::FilterRemoved { filter } => write!(f, "FILTER_REMOVED ({})", filter),
            DaemonEvent::FilterRearmed {
                filter,
                rearm_count,
                ..
            } => write!(f, "FILTER_REARMED ({}, #{})", filter, rearm_count),
            DaemonEvent::FilterUnstable {
                filter,
                recent_rearms,
            } => write!(f, "FILTER_UNSTABLE ({}, {} recent)", filter, recent_rearms),
            DaemonEvent::PermissionDenied { filter, .. } => {
                write!(f, "PERMISSION_DENIED ({})", filter)
            }
            DaemonEvent::InputSourceChanged { source_id } => {
                write!(f, "INPUT_SOURCE_CHANGED ({})", source_id)
            }
            DaemonEvent::InputSourceUnavailable => write!(f, "INPUT_SOURCE_UNAVAILABLE"),
            DaemonEvent::SettingsChanged => write!(f, "SETTINGS_CHANGED"),
        }
    }
}
