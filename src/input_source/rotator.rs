//! Cyclic switching between selectable keyboard input sources

use tracing::{debug, info, warn};

/// A keyboard input source together with its stable identifier
#[derive(Debug, Clone)]
pub struct InputSource<H> {
    pub id: String,
    pub handle: H,
}

/// Errors switching input sources
#[derive(Debug, thiserror::Error)]
pub enum InputSourceError {
    #[error("no selectable keyboard input sources to switch to")]
    NoSelectableSources,

    #[error("failed to select input source {id} (status {status})")]
    SelectFailed { id: String, status: i32 },
}

/// Platform access to the text input services
pub trait InputSourceProvider {
    type Handle;

    /// Enabled, select-capable keyboard input sources in platform order
    fn selectable_sources(&self) -> Vec<InputSource<Self::Handle>>;

    /// Identifier of the active keyboard input source
    fn current_source_id(&self) -> Option<String>;

    fn select(&self, source: &InputSource<Self::Handle>) -> Result<(), InputSourceError>;
}

/// Advances the active input source through a lazily built cache.
///
/// The active source is located by identifier on every call, never by a
/// remembered index, because the user can switch sources behind our back.
pub struct InputSourceRotator<P: InputSourceProvider> {
    provider: P,
    cache: Vec<InputSource<P::Handle>>,
}

impl<P: InputSourceProvider> InputSourceRotator<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            cache: Vec::new(),
        }
    }

    /// Select the source after the active one, wrapping around.
    ///
    /// Returns the identifier of the newly selected source.
    pub fn advance(&mut self) -> Result<String, InputSourceError> {
        if self.cache.is_empty() {
            self.rebuild();
        }

        let current = self.provider.current_source_id();

        let next = match self.next_index(current.as_deref()) {
            Some(index) => index,
            None => {
                debug!(?current, "active input source not in cache, rebuilding");
                self.rebuild();
                self.next_index(current.as_deref()).ok_or_else(|| {
                    warn!(?current, sources = self.cache.len(), "cannot place active input source");
                    InputSourceError::NoSelectableSources
                })?
            }
        };

        let source = &self.cache[next];
        self.provider.select(source)?;
        info!(from = ?current, to = %source.id, "input source switched");
        Ok(source.id.clone())
    }

    /// Drop the cached list; the next advance rebuilds it
    pub fn clear_cache(&mut self) {
        if !self.cache.is_empty() {
            debug!(sources = self.cache.len(), "input source cache cleared");
        }
        self.cache.clear();
    }

    #[cfg(test)]
    pub(crate) fn cached_len(&self) -> usize {
        self.cache.len()
    }

    fn rebuild(&mut self) {
        self.cache = self.provider.selectable_sources();
        debug!(sources = self.cache.len(), "input source cache rebuilt");
    }

    fn next_index(&self, current: Option<&str>) -> Option<usize> {
        let current = current?;
        let position = self.cache.iter().position(|s| s.id == current)?;
        Some((position + 1) % self.cache.len())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// In-memory input sources; clones share state
    #[derive(Clone, Default)]
    pub(crate) struct FakeProvider {
        pub sources: Arc<Mutex<Vec<String>>>,
        pub current: Arc<Mutex<Option<String>>>,
        pub listings: Arc<Mutex<usize>>,
    }

    impl FakeProvider {
        pub fn with_sources(ids: &[&str], current: &str) -> Self {
            let provider = Self::default();
            *provider.sources.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
            *provider.current.lock().unwrap() = Some(current.to_string());
            provider
        }

        pub fn current(&self) -> Option<String> {
            self.current.lock().unwrap().clone()
        }
    }

    impl InputSourceProvider for FakeProvider {
        type Handle = ();

        fn selectable_sources(&self) -> Vec<InputSource<()>> {
            *self.listings.lock().unwrap() += 1;
            self.sources
                .lock()
                .unwrap()
                .iter()
                .map(|id| InputSource {
                    id: id.clone(),
                    handle: (),
                })
                .collect()
        }

        fn current_source_id(&self) -> Option<String> {
            self.current()
        }

        fn select(&self, source: &InputSource<()>) -> Result<(), InputSourceError> {
            *self.current.lock().unwrap() = Some(source.id.clone());
            Ok(())
        }
    }

    const US: &str = "com.apple.keylayout.US";
    const RU: &str = "com.apple.keylayout.Russian";
    const DE: &str = "com.apple.keylayout.German";

    #[test]
    fn test_advance_selects_next() {
        let provider = FakeProvider::with_sources(&[US, RU, DE], US);
        let mut rotator = InputSourceRotator::new(provider.clone());

        assert_eq!(rotator.advance().unwrap(), RU);
        assert_eq!(provider.current().as_deref(), Some(RU));
    }

    #[test]
    fn test_advance_wraps_around() {
        let provider = FakeProvider::with_sources(&[US, RU, DE], DE);
        let mut rotator = InputSourceRotator::new(provider);

        assert_eq!(rotator.advance().unwrap(), US);
    }

    #[test]
    fn test_full_cycle_returns_to_start() {
        let provider = FakeProvider::with_sources(&[US, RU, DE], RU);
        let mut rotator = InputSourceRotator::new(provider.clone());

        for _ in 0..3 {
            rotator.advance().unwrap();
        }

        assert_eq!(provider.current().as_deref(), Some(RU));
        assert_eq!(*provider.listings.lock().unwrap(), 1);
    }

    #[test]
    fn test_stale_cache_is_rebuilt_once() {
        let provider = FakeProvider::with_sources(&[US, RU], US);
        let mut rotator = InputSourceRotator::new(provider.clone());
        rotator.advance().unwrap();

        // a new layout was enabled and selected outside the daemon
        provider.sources.lock().unwrap().push(DE.to_string());
        *provider.current.lock().unwrap() = Some(DE.to_string());

        assert_eq!(rotator.advance().unwrap(), US);
        assert_eq!(rotator.cached_len(), 3);
        assert_eq!(*provider.listings.lock().unwrap(), 2);
    }

    #[test]
    fn test_unknown_current_source_fails() {
        let provider = FakeProvider::with_sources(&[US, RU], "com.apple.inputmethod.Kotoeri");
        let mut rotator = InputSourceRotator::new(provider.clone());

        assert!(matches!(
            rotator.advance(),
            Err(InputSourceError::NoSelectableSources)
        ));
        assert_eq!(
            provider.current().as_deref(),
            Some("com.apple.inputmethod.Kotoeri")
        );
    }

    #[test]
    fn test_no_sources_fails() {
        let provider = FakeProvider::default();
        let mut rotator = InputSourceRotator::new(provider);

        assert!(matches!(
            rotator.advance(),
            Err(InputSourceError::NoSelectableSources)
        ));
    }

    #[test]
    fn test_clear_cache_forces_rebuild() {
        let provider = FakeProvider::with_sources(&[US, RU], US);
        let mut rotator = InputSourceRotator::new(provider.clone());
        rotator.advance().unwrap();

        rotator.clear_cache();
        assert_eq!(rotator.cached_len(), 0);

        rotator.advance().unwrap();
        assert_eq!(*provider.listings.lock().unwrap(), 2);
    }
}
