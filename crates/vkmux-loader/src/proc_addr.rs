//! The two public "get function pointer by name" entry points.
//!
//! Names are compared only here and while tables are being filled; the
//! pointers handed out never look anything up when called.

use std::ffi::{c_char, CStr};

use ash::vk;
use ash::vk::Handle;

use crate::device::{device_trampoline, intercepted_device_call, LoaderDevice};
use crate::extensions::InstanceExtensions;
use crate::ffi::void_fn;
use crate::instance::{vkDestroyInstance, Session};
use crate::physical_device::{
    vkEnumerateDeviceExtensionProperties, vkEnumerateDeviceLayerProperties, vkEnumeratePhysicalDeviceGroups,
    vkEnumeratePhysicalDeviceGroupsKHR, vkEnumeratePhysicalDevices, vkGetPhysicalDeviceFeatures,
    vkGetPhysicalDeviceFeatures2, vkGetPhysicalDeviceFeatures2KHR, vkGetPhysicalDeviceFormatProperties,
    vkGetPhysicalDeviceMemoryProperties, vkGetPhysicalDeviceMemoryProperties2, vkGetPhysicalDeviceMemoryProperties2KHR,
    vkGetPhysicalDeviceProperties, vkGetPhysicalDeviceProperties2, vkGetPhysicalDeviceProperties2KHR,
    vkGetPhysicalDeviceQueueFamilyProperties,
};
use crate::state;

/// The calls that work without a session.
fn global_proc(name: &CStr) -> vk::PFN_vkVoidFunction {
    match name.to_bytes() {
        b"vkCreateInstance" => void_fn!(crate::vkCreateInstance),
        b"vkEnumerateInstanceExtensionProperties" => void_fn!(crate::vkEnumerateInstanceExtensionProperties),
        b"vkEnumerateInstanceLayerProperties" => void_fn!(crate::vkEnumerateInstanceLayerProperties),
        b"vkEnumerateInstanceVersion" => void_fn!(crate::vkEnumerateInstanceVersion),
        _ => None,
    }
}

/// Session-scoped trampolines. Suffixed names of promoted calls are only
/// handed out when their extension was enabled.
fn instance_trampoline(session: &Session, name: &CStr) -> vk::PFN_vkVoidFunction {
    let enabled = |flag| session.enabled.contains(flag);
    match name.to_bytes() {
        b"vkDestroyInstance" => void_fn!(vkDestroyInstance),
        b"vkEnumeratePhysicalDevices" => void_fn!(vkEnumeratePhysicalDevices),
        b"vkEnumeratePhysicalDeviceGroups" => void_fn!(vkEnumeratePhysicalDeviceGroups),
        b"vkEnumeratePhysicalDeviceGroupsKHR" if enabled(InstanceExtensions::KHR_DEVICE_GROUP_CREATION) => {
            void_fn!(vkEnumeratePhysicalDeviceGroupsKHR)
        }
        b"vkGetPhysicalDeviceProperties" => void_fn!(vkGetPhysicalDeviceProperties),
        b"vkGetPhysicalDeviceFeatures" => void_fn!(vkGetPhysicalDeviceFeatures),
        b"vkGetPhysicalDeviceMemoryProperties" => void_fn!(vkGetPhysicalDeviceMemoryProperties),
        b"vkGetPhysicalDeviceQueueFamilyProperties" => void_fn!(vkGetPhysicalDeviceQueueFamilyProperties),
        b"vkGetPhysicalDeviceFormatProperties" => void_fn!(vkGetPhysicalDeviceFormatProperties),
        b"vkGetPhysicalDeviceProperties2" => void_fn!(vkGetPhysicalDeviceProperties2),
        b"vkGetPhysicalDeviceFeatures2" => void_fn!(vkGetPhysicalDeviceFeatures2),
        b"vkGetPhysicalDeviceMemoryProperties2" => void_fn!(vkGetPhysicalDeviceMemoryProperties2),
        b"vkGetPhysicalDeviceProperties2KHR" if enabled(InstanceExtensions::KHR_GET_PHYSICAL_DEVICE_PROPERTIES2) => {
            void_fn!(vkGetPhysicalDeviceProperties2KHR)
        }
        b"vkGetPhysicalDeviceFeatures2KHR" if enabled(InstanceExtensions::KHR_GET_PHYSICAL_DEVICE_PROPERTIES2) => {
            void_fn!(vkGetPhysicalDeviceFeatures2KHR)
        }
        b"vkGetPhysicalDeviceMemoryProperties2KHR"
            if enabled(InstanceExtensions::KHR_GET_PHYSICAL_DEVICE_PROPERTIES2) =>
        {
            void_fn!(vkGetPhysicalDeviceMemoryProperties2KHR)
        }
        b"vkEnumerateDeviceExtensionProperties" => void_fn!(vkEnumerateDeviceExtensionProperties),
        b"vkEnumerateDeviceLayerProperties" => void_fn!(vkEnumerateDeviceLayerProperties),
        b"vkCreateDevice" => void_fn!(crate::device::vkCreateDevice),
        _ => device_trampoline(name),
    }
}

/// `vkGetInstanceProcAddr`
///
/// Global names are returned directly without a session. With a session
/// they are only returned while the session's declared version is below
/// the configured gate. Every other name needs a live session; an unknown
/// name yields `None`.
///
/// # Safety
/// `p_name` must be null or a NUL-terminated string; `instance` must be
/// null or a live session handle unless `p_name` names a global call.
#[no_mangle]
pub unsafe extern "system" fn vkGetInstanceProcAddr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    if p_name.is_null() {
        return None;
    }
    let name = CStr::from_ptr(p_name);
    if name == c"vkGetInstanceProcAddr" {
        return void_fn!(vkGetInstanceProcAddr);
    }

    if let Some(global) = global_proc(name) {
        // Null or unknown instances get the global entry point as is.
        let lock = state::lock();
        if !lock.is_live_session(instance.as_raw() as usize) {
            return Some(global);
        }
        let session = Session::from_live_handle(&lock, instance, "vkGetInstanceProcAddr");
        let gate = session.loader.settings().loader.global_proc_addr_gate;
        return if session.api_version >= gate { None } else { Some(global) };
    }

    if instance == vk::Instance::null() {
        return None;
    }
    let lock = state::lock();
    let session = Session::from_live_handle(&lock, instance, "vkGetInstanceProcAddr");
    instance_trampoline(session, name)
}

/// `vkGetDeviceProcAddr`
///
/// Loader-intercepted calls first, then the device table by ordinal, then
/// whatever the chain answers for names the table has no slot for.
///
/// # Safety
/// `device` must be a live device handle; `p_name` must be null or a
/// NUL-terminated string.
#[no_mangle]
pub unsafe extern "system" fn vkGetDeviceProcAddr(device: vk::Device, p_name: *const c_char) -> vk::PFN_vkVoidFunction {
    let loader_device = LoaderDevice::from_handle(device.as_raw(), "vkGetDeviceProcAddr");
    if p_name.is_null() {
        return None;
    }
    let name = CStr::from_ptr(p_name);

    if let Some(f) = intercepted_device_call(name) {
        return Some(f);
    }
    if name == c"vkCreateDevice" {
        return None;
    }
    if let Some(slot) = loader_device.dispatch.lookup(name) {
        return slot;
    }
    match loader_device.dispatch.get_device_proc_addr() {
        Some(gdpa) => gdpa(device, p_name),
        None => None,
    }
}
