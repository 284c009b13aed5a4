//! Platform bindings
//!
//! macOS provides the real event taps, input sources and permission checks.
//! Elsewhere the daemon still builds and runs its control plane, but every
//! tap registration reports `Unsupported`.

#[cfg(target_os = "macos")]
mod macos;
#[cfg(not(target_os = "macos"))]
mod unsupported;

#[cfg(target_os = "macos")]
pub use macos::{request_accessibility, EditFilterBackend, LayoutMonitorBackend, TisProvider};
#[cfg(not(target_os = "macos"))]
pub use unsupported::{request_accessibility, EditFilterBackend, LayoutMonitorBackend, TisProvider};

/// Where the user grants the permissions event taps need
pub const PERMISSION_REMEDIATION: &str = "Enable layout-switcher in System Settings → Privacy & Security → \
     Accessibility and Input Monitoring, then restart the daemon \
     (x-apple.systempreferences:com.apple.preference.security?Privacy_ListenEvent)";
