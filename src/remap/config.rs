//! Remap configuration shared between the control task and the tap thread
//!
//! The tap thread only ever takes an `Arc` snapshot under a read lock, so a
//! reader never sees a half-applied write and never waits on anything
//! longer than a pointer clone.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::edit_keys::{key_codes_for, EditCommandClass};

/// Everything the key remap engine consults for one key-down event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemapConfig {
    enabled_classes: BTreeSet<EditCommandClass>,
    /// Always derived from `enabled_classes`
    enabled_key_codes: HashSet<u16>,
    rdp_bundle_identifiers: BTreeSet<String>,
    rdp_ctrl_to_cmd_remap_enabled: bool,
    ignore_fn_substitution_for_edit_combos: bool,
}

impl RemapConfig {
    pub fn new(
        enabled_classes: BTreeSet<EditCommandClass>,
        rdp_bundle_identifiers: BTreeSet<String>,
        rdp_ctrl_to_cmd_remap_enabled: bool,
        ignore_fn_substitution_for_edit_combos: bool,
    ) -> Self {
        let enabled_key_codes = key_codes_for(&enabled_classes);
        Self {
            enabled_classes,
            enabled_key_codes,
            rdp_bundle_identifiers,
            rdp_ctrl_to_cmd_remap_enabled,
            ignore_fn_substitution_for_edit_combos,
        }
    }

    pub fn enabled_classes(&self) -> &BTreeSet<EditCommandClass> {
        &self.enabled_classes
    }

    pub fn enabled_key_codes(&self) -> &HashSet<u16> {
        &self.enabled_key_codes
    }

    pub fn rdp_bundle_identifiers(&self) -> &BTreeSet<String> {
        &self.rdp_bundle_identifiers
    }

    pub fn is_rdp_app(&self, bundle_id: &str) -> bool {
        self.rdp_bundle_identifiers.contains(bundle_id)
    }

    pub fn rdp_ctrl_to_cmd_remap_enabled(&self) -> bool {
        self.rdp_ctrl_to_cmd_remap_enabled
    }

    pub fn ignore_fn_substitution_for_edit_combos(&self) -> bool {
        self.ignore_fn_substitution_for_edit_combos
    }

    pub fn set_enabled_classes(&mut self, classes: BTreeSet<EditCommandClass>) {
        self.enabled_key_codes = key_codes_for(&classes);
        self.enabled_classes = classes;
    }

    pub fn set_rdp_bundle_identifiers(&mut self, ids: BTreeSet<String>) {
        self.rdp_bundle_identifiers = ids;
    }

    pub fn set_rdp_ctrl_to_cmd_remap_enabled(&mut self, enabled: bool) {
        self.rdp_ctrl_to_cmd_remap_enabled = enabled;
    }

    pub fn set_ignore_fn_substitution_for_edit_combos(&mut self, ignore: bool) {
        self.ignore_fn_substitution_for_edit_combos = ignore;
    }
}

/// How an update changed the set of intercepted key codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCodeTransition {
    /// Went from some codes to none, the edit filter should be removed
    BecameEmpty,
    /// Went from none to some codes, the edit filter should be installed
    BecameNonEmpty,
    Unchanged,
}

/// Single-writer, many-reader holder of the current [`RemapConfig`]
#[derive(Debug, Clone, Default)]
pub struct RemapConfigStore {
    current: Arc<RwLock<Arc<RemapConfig>>>,
}

impl RemapConfigStore {
    pub fn new(config: RemapConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Consistent view of the whole configuration
    pub fn snapshot(&self) -> Arc<RemapConfig> {
        Arc::clone(&self.current.read())
    }

    /// Apply `change` to a copy of the current config and publish it
    pub fn update<F>(&self, change: F) -> KeyCodeTransition
    where
        F: FnOnce(&mut RemapConfig),
    {
        let mut next = RemapConfig::clone(&self.snapshot());
        let was_empty = next.enabled_key_codes.is_empty();
        change(&mut next);
        let is_empty = next.enabled_key_codes.is_empty();

        debug!(
            key_codes = next.enabled_key_codes.len(),
            rdp_apps = next.rdp_bundle_identifiers.len(),
            "remap config updated"
        );
        *self.current.write() = Arc::new(next);

        match (was_empty, is_empty) {
            (false, true) => KeyCodeTransition::BecameEmpty,
            (true, false) => KeyCodeTransition::BecameNonEmpty,
            _ => KeyCodeTransition::Unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes(list: &[EditCommandClass]) -> BTreeSet<EditCommandClass> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_key_codes_follow_classes() {
        let mut config = RemapConfig::default();
        assert!(config.enabled_key_codes().is_empty());

        config.set_enabled_classes(classes(&[EditCommandClass::Find]));
        assert_eq!(config.enabled_key_codes(), &HashSet::from([3]));

        config.set_enabled_classes(classes(&[EditCommandClass::SelectAll]));
        assert_eq!(config.enabled_key_codes(), &HashSet::from([0]));
    }

    #[test]
    fn test_transitions() {
        let store = RemapConfigStore::default();

        let t = store.update(|c| c.set_enabled_classes(classes(&[EditCommandClass::CopyPaste])));
        assert_eq!(t, KeyCodeTransition::BecameNonEmpty);

        let t = store.update(|c| {
            c.set_enabled_classes(classes(&[EditCommandClass::CopyPaste, EditCommandClass::Print]))
        });
        assert_eq!(t, KeyCodeTransition::Unchanged);

        let t = store.update(|c| c.set_rdp_ctrl_to_cmd_remap_enabled(false));
        assert_eq!(t, KeyCodeTransition::Unchanged);

        let t = store.update(|c| c.set_enabled_classes(BTreeSet::new()));
        assert_eq!(t, KeyCodeTransition::BecameEmpty);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let store = RemapConfigStore::new(RemapConfig::new(
            classes(&[EditCommandClass::UndoRedo]),
            BTreeSet::new(),
            true,
            false,
        ));
        let before = store.snapshot();

        store.update(|c| c.set_ignore_fn_substitution_for_edit_combos(true));

        assert!(!before.ignore_fn_substitution_for_edit_combos());
        assert!(store.snapshot().ignore_fn_substitution_for_edit_combos());
    }

    #[test]
    fn test_clones_share_state() {
        let store = RemapConfigStore::default();
        let reader = store.clone();

        store.update(|c| {
            c.set_rdp_bundle_identifiers(BTreeSet::from(["com.microsoft.rdc.macos".to_string()]))
        });

        assert!(reader.snapshot().is_rdp_app("com.microsoft.rdc.macos"));
    }

    #[test]
    fn test_concurrent_readers_see_whole_configs() {
        let store = RemapConfigStore::default();
        let reader = store.clone();

        let handle = std::thread::spawn(move || {
            for _ in 0..1000 {
                let snapshot = reader.snapshot();
                // classes and codes are swapped together
                assert_eq!(
                    snapshot.enabled_key_codes(),
                    &key_codes_for(snapshot.enabled_classes())
                );
            }
        });

        for i in 0..200 {
            let next = if i % 2 == 0 {
                classes(&[EditCommandClass::CopyPaste, EditCommandClass::OpenSave])
            } else {
                classes(&[EditCommandClass::UndoRedo])
            };
            store.update(|c| c.set_enabled_classes(next));
        }

        handle.join().unwrap();
    }
}
