//! Edit command classes and the hardware key codes they cover

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::hotkey::codes;

/// A group of Windows-style edit shortcuts that can be toggled together
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditCommandClass {
    UndoRedo,
    CopyPaste,
    Find,
    SelectAll,
    OpenSave,
    Print,
}

/// One physical key of an edit class with its legends on supported layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditKey {
    pub code: u16,
    /// QWERTY legend
    pub latin: char,
    /// ЙЦУКЕН legend on the same physical key
    pub cyrillic: char,
}

const fn key(code: u16, latin: char, cyrillic: char) -> EditKey {
    EditKey {
        code,
        latin,
        cyrillic,
    }
}

const UNDO_REDO: &[EditKey] = &[key(codes::Z, 'z', 'я'), key(codes::Y, 'y', 'н')];
const COPY_PASTE: &[EditKey] = &[
    key(codes::X, 'x', 'ч'),
    key(codes::C, 'c', 'с'),
    key(codes::V, 'v', 'м'),
];
const FIND: &[EditKey] = &[key(codes::F, 'f', 'а')];
const SELECT_ALL: &[EditKey] = &[key(codes::A, 'a', 'ф')];
const OPEN_SAVE: &[EditKey] = &[key(codes::O, 'o', 'щ'), key(codes::S, 's', 'ы')];
const PRINT: &[EditKey] = &[key(codes::P, 'p', 'з')];

impl EditCommandClass {
    pub const ALL: [EditCommandClass; 6] = [
        EditCommandClass::UndoRedo,
        EditCommandClass::CopyPaste,
        EditCommandClass::Find,
        EditCommandClass::SelectAll,
        EditCommandClass::OpenSave,
        EditCommandClass::Print,
    ];

    /// Physical keys belonging to this class.
    ///
    /// Key codes are positional, so the Cyrillic legends resolve to the same
    /// codes as their Latin counterparts.
    pub fn keys(self) -> &'static [EditKey] {
        match self {
            EditCommandClass::UndoRedo => UNDO_REDO,
            EditCommandClass::CopyPaste => COPY_PASTE,
            EditCommandClass::Find => FIND,
            EditCommandClass::SelectAll => SELECT_ALL,
            EditCommandClass::OpenSave => OPEN_SAVE,
            EditCommandClass::Print => PRINT,
        }
    }

    pub fn key_codes(self) -> impl Iterator<Item = u16> {
        self.keys().iter().map(|k| k.code)
    }

    /// Menu-style label, e.g. `Copy/Paste: Control ⌃ + X | C | V (Ч | С | М)`
    pub fn label(self) -> String {
        let name = match self {
            EditCommandClass::UndoRedo => "Undo/Redo",
            EditCommandClass::CopyPaste => "Copy/Paste",
            EditCommandClass::Find => "Find",
            EditCommandClass::SelectAll => "Select all",
            EditCommandClass::OpenSave => "Open/Save",
            EditCommandClass::Print => "Print",
        };
        let latin: Vec<String> = self
            .keys()
            .iter()
            .map(|k| k.latin.to_uppercase().to_string())
            .collect();
        let cyrillic: Vec<String> = self
            .keys()
            .iter()
            .map(|k| k.cyrillic.to_uppercase().to_string())
            .collect();
        format!(
            "{}: Control ⌃ + {} ({})",
            name,
            latin.join(" | "),
            cyrillic.join(" | ")
        )
    }
}

/// Union of the key codes of every enabled class
pub fn key_codes_for(classes: &BTreeSet<EditCommandClass>) -> HashSet<u16> {
    classes.iter().flat_map(|class| class.key_codes()).collect()
}
