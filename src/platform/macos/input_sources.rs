//! Text Input Sources access through Carbon

use std::os::raw::c_void;

use core_foundation::array::{CFArray, CFArrayRef};
use core_foundation::base::{Boolean, CFType, CFTypeRef, TCFType};
use core_foundation::boolean::CFBoolean;
use core_foundation::dictionary::{CFDictionary, CFDictionaryRef};
use core_foundation::string::{CFString, CFStringRef};
use tracing::debug;

use crate::input_source::{InputSource, InputSourceError, InputSourceProvider};

type TISInputSourceRef = CFTypeRef;

#[link(name = "Carbon", kind = "framework")]
extern "C" {
    fn TISCreateInputSourceList(
        properties: CFDictionaryRef,
        include_all_installed: Boolean,
    ) -> CFArrayRef;
    fn TISCopyCurrentKeyboardInputSource() -> TISInputSourceRef;
    fn TISGetInputSourceProperty(source: TISInputSourceRef, key: CFStringRef) -> *const c_void;
    fn TISSelectInputSource(source: TISInputSourceRef) -> i32;

    static kTISPropertyInputSourceID: CFStringRef;
    static kTISPropertyInputSourceCategory: CFStringRef;
    static kTISPropertyInputSourceIsEnabled: CFStringRef;
    static kTISPropertyInputSourceIsSelectCapable: CFStringRef;
    static kTISCategoryKeyboardInputSource: CFStringRef;
}

/// Retained `TISInputSourceRef`
#[derive(Clone)]
pub struct TisSource(CFType);

fn source_id(source: TISInputSourceRef) -> Option<String> {
    unsafe {
        let raw = TISGetInputSourceProperty(source, kTISPropertyInputSourceID);
        if raw.is_null() {
            return None;
        }
        Some(CFString::wrap_under_get_rule(raw as CFStringRef).to_string())
    }
}

/// Keyboard input sources as reported by the system
#[derive(Debug, Default, Clone, Copy)]
pub struct TisProvider;

impl TisProvider {
    pub fn new() -> Self {
        Self
    }
}

impl InputSourceProvider for TisProvider {
    type Handle = TisSource;

    fn selectable_sources(&self) -> Vec<InputSource<TisSource>> {
        let filter = unsafe {
            let category = CFString::wrap_under_get_rule(kTISPropertyInputSourceCategory);
            let keyboard = CFString::wrap_under_get_rule(kTISCategoryKeyboardInputSource);
            let enabled = CFString::wrap_under_get_rule(kTISPropertyInputSourceIsEnabled);
            let select_capable =
                CFString::wrap_under_get_rule(kTISPropertyInputSourceIsSelectCapable);

            CFDictionary::from_CFType_pairs(&[
                (category.as_CFType(), keyboard.as_CFType()),
                (enabled.as_CFType(), CFBoolean::true_value().as_CFType()),
                (select_capable.as_CFType(), CFBoolean::true_value().as_CFType()),
            ])
        };

        let raw = unsafe { TISCreateInputSourceList(filter.as_concrete_TypeRef(), 0) };
        if raw.is_null() {
            debug!("input source list unavailable");
            return Vec::new();
        }
        let list: CFArray<CFType> = unsafe { CFArray::wrap_under_create_rule(raw) };

        list.iter()
            .filter_map(|item| {
                let handle: CFType = (*item).clone();
                let id = source_id(handle.as_CFTypeRef())?;
                Some(InputSource {
                    id,
                    handle: TisSource(handle),
                })
            })
            .collect()
    }

    fn current_source_id(&self) -> Option<String> {
        let raw = unsafe { TISCopyCurrentKeyboardInputSource() };
        if raw.is_null() {
            return None;
        }
        let current = unsafe { CFType::wrap_under_create_rule(raw) };
        source_id(current.as_CFTypeRef())
    }

    fn select(&self, source: &InputSource<TisSource>) -> Result<(), InputSourceError> {
        let status = unsafe { TISSelectInputSource(source.handle.0.as_CFTypeRef()) };
        if status != 0 {
            return Err(InputSourceError::SelectFailed {
                id: source.id.clone(),
                status,
            });
        }
        Ok(())
    }
}
