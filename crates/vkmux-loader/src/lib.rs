//! vkmux loader
//!
//! This cdylib exports the API entry points an application links against.
//! It discovers backends and layers from the loader settings, builds the
//! per-session and per-device call chains, and routes every call through
//! the enabled layers to the backend that owns the object.
#![allow(non_snake_case)]
#![allow(clippy::missing_safety_doc)]

use std::ffi::c_char;

use ash::vk;

pub mod alloc;
pub mod backend;
pub mod chain;
pub mod device;
pub mod dispatch;
pub mod dispatch_table;
pub mod extensions;
pub mod ffi;
pub mod instance;
pub mod layer;
pub mod library;
pub mod loader;
pub mod physical_device;
pub mod pre_instance;
pub mod proc_addr;
pub mod state;
pub mod terminator;
pub mod tracker;

pub use dispatch::ICD_LOADER_MAGIC;
pub use library::{LibraryBridge, NativeLibrary, SystemLibraries};
pub use loader::{Environment, Loader, LoaderBuilder};
pub use physical_device::{unwrap_physical_device, wrap_physical_device};
pub use tracker::LoaderStats;

// ── Global entry points ─────────────────────────────────────

#[no_mangle]
pub unsafe extern "system" fn vkCreateInstance(
    p_create_info: *const vk::InstanceCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    Loader::global().create_instance(p_create_info, p_allocator, p_instance)
}

#[no_mangle]
pub unsafe extern "system" fn vkEnumerateInstanceExtensionProperties(
    p_layer_name: *const c_char,
    p_property_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    Loader::global().enumerate_instance_extension_properties(p_layer_name, p_property_count, p_properties)
}

#[no_mangle]
pub unsafe extern "system" fn vkEnumerateInstanceLayerProperties(
    p_property_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    Loader::global().enumerate_instance_layer_properties(p_property_count, p_properties)
}

#[no_mangle]
pub unsafe extern "system" fn vkEnumerateInstanceVersion(p_api_version: *mut u32) -> vk::Result {
    Loader::global().enumerate_instance_version(p_api_version)
}

/// Live sessions across every loader context in the process.
pub fn live_sessions() -> usize {
    state::lock().live_sessions()
}
