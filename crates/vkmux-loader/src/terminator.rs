//! Bottom of the session chain: the loader's own implementation of the
//! instance-level calls, fanning out to every backend instance of the
//! session.

use std::ffi::{c_char, CStr};

use ash::vk;
use tracing::{debug, warn};

use crate::backend::BackendInstance;
use crate::device::{terminator_create_device, terminator_get_device_proc_addr};
use crate::ffi::{read_string_array, require, void_fn};
use crate::instance::Session;
use crate::physical_device::{
    terminator_enumerate_device_extension_properties, terminator_enumerate_device_layer_properties,
    terminator_enumerate_physical_device_groups, terminator_enumerate_physical_devices,
    terminator_get_physical_device_features, terminator_get_physical_device_features2,
    terminator_get_physical_device_format_properties, terminator_get_physical_device_memory_properties,
    terminator_get_physical_device_memory_properties2, terminator_get_physical_device_properties,
    terminator_get_physical_device_properties2, terminator_get_physical_device_queue_family_properties,
};

/// Terminator for an instance-level name, or `None`.
pub(crate) fn instance_proc(name: &CStr) -> vk::PFN_vkVoidFunction {
    match name.to_bytes() {
        b"vkGetInstanceProcAddr" => void_fn!(get_instance_proc_addr),
        b"vkCreateInstance" => void_fn!(create_instance),
        b"vkDestroyInstance" => void_fn!(destroy_instance),
        b"vkEnumeratePhysicalDevices" => void_fn!(terminator_enumerate_physical_devices),
        b"vkEnumeratePhysicalDeviceGroups" | b"vkEnumeratePhysicalDeviceGroupsKHR" => {
            void_fn!(terminator_enumerate_physical_device_groups)
        }
        b"vkCreateDevice" => void_fn!(terminator_create_device),
        b"vkGetDeviceProcAddr" => void_fn!(terminator_get_device_proc_addr),
        _ => physical_device_proc(name),
    }
}

/// Terminator for a call whose first argument is a physical device.
pub(crate) fn physical_device_proc(name: &CStr) -> vk::PFN_vkVoidFunction {
    match name.to_bytes() {
        b"vkGetPhysicalDeviceProperties" => void_fn!(terminator_get_physical_device_properties),
        b"vkGetPhysicalDeviceProperties2" | b"vkGetPhysicalDeviceProperties2KHR" => {
            void_fn!(terminator_get_physical_device_properties2)
        }
        b"vkGetPhysicalDeviceFeatures" => void_fn!(terminator_get_physical_device_features),
        b"vkGetPhysicalDeviceFeatures2" | b"vkGetPhysicalDeviceFeatures2KHR" => {
            void_fn!(terminator_get_physical_device_features2)
        }
        b"vkGetPhysicalDeviceMemoryProperties" => void_fn!(terminator_get_physical_device_memory_properties),
        b"vkGetPhysicalDeviceMemoryProperties2" | b"vkGetPhysicalDeviceMemoryProperties2KHR" => {
            void_fn!(terminator_get_physical_device_memory_properties2)
        }
        b"vkGetPhysicalDeviceQueueFamilyProperties" => {
            void_fn!(terminator_get_physical_device_queue_family_properties)
        }
        b"vkGetPhysicalDeviceFormatProperties" => void_fn!(terminator_get_physical_device_format_properties),
        b"vkEnumerateDeviceExtensionProperties" => void_fn!(terminator_enumerate_device_extension_properties),
        b"vkEnumerateDeviceLayerProperties" => void_fn!(terminator_enumerate_device_layer_properties),
        _ => None,
    }
}

/// The `pfnNextGetInstanceProcAddr` of the last link.
pub(crate) unsafe extern "system" fn get_instance_proc_addr(
    _instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    if p_name.is_null() {
        return None;
    }
    instance_proc(CStr::from_ptr(p_name))
}

/// The `pfnNextGetPhysicalDeviceProcAddr` of the last link.
pub(crate) unsafe extern "system" fn get_physical_device_proc_addr(
    _instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    if p_name.is_null() {
        return None;
    }
    physical_device_proc(CStr::from_ptr(p_name))
}

/// Creates one native instance per scanned backend. `*pInstance` arrives
/// holding the session, placed there by the trampoline before the chain
/// was entered.
unsafe extern "system" fn create_instance(
    p_create_info: *const vk::InstanceCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    require(p_create_info, "vkCreateInstance: pCreateInfo");
    require(p_instance, "vkCreateInstance: pInstance");
    let session = Session::from_chain_handle(*p_instance, "terminator vkCreateInstance");
    let create_info = &*p_create_info;
    let requested = read_string_array(create_info.pp_enabled_extension_names, create_info.enabled_extension_count);

    let mut backends = Vec::with_capacity(session.scanned.len());
    for (index, scanned) in session.scanned.iter().enumerate() {
        match BackendInstance::create(index, scanned, create_info, session.allocator.callbacks_ptr(), &requested) {
            Ok(backend) => backends.push(Box::new(backend)),
            Err(e) => warn!("backend {} failed to create an instance: {}", scanned.entry.name, e),
        }
    }
    if backends.is_empty() {
        return vk::Result::ERROR_INCOMPATIBLE_DRIVER;
    }

    debug!("session spans {} backend instances", backends.len());
    *session.backends.borrow_mut() = backends;
    *p_instance = session.handle();
    vk::Result::SUCCESS
}

unsafe extern "system" fn destroy_instance(instance: vk::Instance, _p_allocator: *const vk::AllocationCallbacks<'_>) {
    let session = Session::from_chain_handle(instance, "terminator vkDestroyInstance");
    let backends = std::mem::take(&mut *session.backends.borrow_mut());
    drop(backends);
}
