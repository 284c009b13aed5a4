//! macOS implementations of the tap, input source and synthesis seams

mod event_tap;
mod input_sources;
mod synth;
mod workspace;

pub use event_tap::{EditFilterBackend, LayoutMonitorBackend};
pub use input_sources::TisProvider;
pub use workspace::request_accessibility;
