//! Extension-enable bitsets.
//!
//! A bitset is computed once when its session or device is created and is
//! never modified afterwards, so the gated forwarding stubs can read it
//! without synchronization.

use ash::vk;
use vkmux_core::config::LayerEntry;
use vkmux_core::extension::{contains_extension, merge_extensions, write_c_array};
use vkmux_core::{ExtensionProperty, LoaderError, Result};

use crate::ffi;

macro_rules! extension_set {
    (
        $(#[$meta:meta])*
        pub struct $set:ident {
            $( $bit:literal => $flag:ident = $name:literal, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $set {
            bits: u64,
        }

        impl $set {
            $( pub const $flag: u64 = 1 << $bit; )*

            /// Every name this set can record, paired with its bit.
            pub const KNOWN: &'static [(&'static str, u64)] = &[ $( ($name, 1 << $bit), )* ];

            pub const fn empty() -> Self {
                Self { bits: 0 }
            }

            /// Record the known names among `names`; unknown ones are ignored.
            pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
                let mut bits = 0;
                for name in names {
                    if let Some((_, bit)) = Self::KNOWN.iter().find(|(n, _)| *n == name.as_ref()) {
                        bits |= bit;
                    }
                }
                Self { bits }
            }

            #[inline(always)]
            pub fn contains(&self, flag: u64) -> bool {
                self.bits & flag != 0
            }

            pub fn bits(&self) -> u64 {
                self.bits
            }

            pub fn is_known(name: &str) -> bool {
                Self::KNOWN.iter().any(|(n, _)| *n == name)
            }
        }
    };
}

extension_set! {
    /// Instance extensions the loader itself has to know about.
    pub struct InstanceExtensions {
        0 => KHR_SURFACE = "VK_KHR_surface",
        1 => KHR_DISPLAY = "VK_KHR_display",
        2 => KHR_GET_PHYSICAL_DEVICE_PROPERTIES2 = "VK_KHR_get_physical_device_properties2",
        3 => KHR_DEVICE_GROUP_CREATION = "VK_KHR_device_group_creation",
        4 => KHR_EXTERNAL_MEMORY_CAPABILITIES = "VK_KHR_external_memory_capabilities",
        5 => KHR_EXTERNAL_SEMAPHORE_CAPABILITIES = "VK_KHR_external_semaphore_capabilities",
        6 => KHR_EXTERNAL_FENCE_CAPABILITIES = "VK_KHR_external_fence_capabilities",
        7 => KHR_GET_SURFACE_CAPABILITIES2 = "VK_KHR_get_surface_capabilities2",
        8 => KHR_GET_DISPLAY_PROPERTIES2 = "VK_KHR_get_display_properties2",
        9 => KHR_PORTABILITY_ENUMERATION = "VK_KHR_portability_enumeration",
        10 => EXT_DEBUG_REPORT = "VK_EXT_debug_report",
        11 => EXT_DEBUG_UTILS = "VK_EXT_debug_utils",
        12 => EXT_DIRECT_MODE_DISPLAY = "VK_EXT_direct_mode_display",
        13 => EXT_DISPLAY_SURFACE_COUNTER = "VK_EXT_display_surface_counter",
        14 => EXT_HEADLESS_SURFACE = "VK_EXT_headless_surface",
        15 => EXT_ACQUIRE_DRM_DISPLAY = "VK_EXT_acquire_drm_display",
    }
}

extension_set! {
    /// Device extensions whose entry points the loader gates.
    pub struct DeviceExtensions {
        0 => KHR_SWAPCHAIN = "VK_KHR_swapchain",
        1 => KHR_DISPLAY_SWAPCHAIN = "VK_KHR_display_swapchain",
        2 => KHR_DEVICE_GROUP = "VK_KHR_device_group",
        3 => KHR_MAINTENANCE1 = "VK_KHR_maintenance1",
        4 => KHR_GET_MEMORY_REQUIREMENTS2 = "VK_KHR_get_memory_requirements2",
        5 => KHR_BIND_MEMORY2 = "VK_KHR_bind_memory2",
        6 => EXT_DEBUG_MARKER = "VK_EXT_debug_marker",
        7 => EXT_DEBUG_UTILS = "VK_EXT_debug_utils",
    }
}

impl DeviceExtensions {
    /// Device bits for a new device. Debug utils is an instance extension
    /// whose device-level commands follow the instance's enable, and device
    /// groups are core from 1.1 on.
    pub fn for_device<S: AsRef<str>>(names: &[S], instance: &InstanceExtensions, physical_device_api: u32) -> Self {
        let mut set = Self::from_names(names);
        if instance.contains(InstanceExtensions::EXT_DEBUG_UTILS) {
            set.bits |= Self::EXT_DEBUG_UTILS;
        }
        if physical_device_api >= vk::API_VERSION_1_1 {
            set.bits |= Self::KHR_DEVICE_GROUP;
        }
        set
    }
}

/// Check that every requested name is offered by `available` or by one of
/// the `extra` lists (layer extensions).
pub fn validate_requested(
    requested: &[String],
    available: &[ExtensionProperty],
    extra: &[&[ExtensionProperty]],
) -> Result<()> {
    for name in requested {
        let found = contains_extension(available, name)
            || extra.iter().any(|list| contains_extension(list, name));
        if !found {
            tracing::debug!("requested extension {} is not available", name);
            return Err(LoaderError::ExtensionNotPresent(name.clone()));
        }
    }
    Ok(())
}

/// Union of several extension lists, one entry per name.
pub fn merged(lists: &[&[ExtensionProperty]]) -> Vec<ExtensionProperty> {
    let mut out = Vec::new();
    for list in lists {
        merge_extensions(&mut out, list);
    }
    out
}

/// Write an extension list out through the two-call enumeration idiom.
pub unsafe fn write_extension_properties(
    list: &[ExtensionProperty],
    p_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    let raw: Vec<vk::ExtensionProperties> = list.iter().map(ExtensionProperty::to_vk).collect();
    ffi::fill_array(&raw, p_count, p_properties)
}

/// Query an extension enumeration function into owned properties.
pub unsafe fn query_extension_properties(
    mut call: impl FnMut(*mut u32, *mut vk::ExtensionProperties) -> vk::Result,
) -> std::result::Result<Vec<ExtensionProperty>, vk::Result> {
    let raw = ffi::collect_array(|count, out| call(count, out))?;
    Ok(raw.iter().filter_map(ExtensionProperty::from_vk).collect())
}

/// Pick the slot for a call that exists both as a promoted core command and
/// as its extension-suffixed form. When the core version is live the core
/// slot wins; when only the extension was enabled the suffixed one does.
#[inline(always)]
pub fn select_promoted<F>(core_live: bool, extension_enabled: bool, core: Option<F>, suffixed: Option<F>) -> Option<F> {
    if core_live {
        core.or(suffixed)
    } else if extension_enabled {
        suffixed.or(core)
    } else {
        core
    }
}

/// The API record describing a configured layer.
pub fn layer_properties(layer: &LayerEntry) -> vk::LayerProperties {
    let mut props = vk::LayerProperties::default();
    write_c_array(&layer.name, &mut props.layer_name);
    write_c_array(&layer.description, &mut props.description);
    props.spec_version = layer.spec_version.to_packed();
    props.implementation_version = layer.implementation_version;
    props
}
