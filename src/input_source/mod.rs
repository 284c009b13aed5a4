//! Keyboard input source rotation

mod rotator;

pub use rotator::{InputSource, InputSourceError, InputSourceProvider, InputSourceRotator};

#[cfg(test)]
pub(crate) use rotator::tests::FakeProvider;
