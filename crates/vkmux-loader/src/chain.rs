//! Chain links and the layer-facing structures that carry them.
//!
//! A [`Chain`] owns its links. Links are prepended in front of the current
//! head and each one points at the link it was prepended in front of, so
//! walking from the head reaches the terminal link last. Dropping the chain
//! releases links head first, the reverse of the order they were added.

use std::ffi::{c_char, c_void};

use ash::vk;
use vkmux_core::Result;

use crate::alloc::{HostAllocator, HostBox};
use crate::tracker::{ResourceKind, ResourceTracker, Tracked};

/// A link that can point at the link behind it.
pub trait Link {
    fn set_next(&mut self, next: *const Self);
}

#[repr(C)]
pub struct Node<L: Link> {
    link: L,
    next: Option<HostBox<Node<L>>>,
    _tracked: Tracked,
}

pub struct Chain<L: Link> {
    head: Option<HostBox<Node<L>>>,
    len: usize,
    allocator: HostAllocator,
    tracker: ResourceTracker,
}

impl<L: Link> Chain<L> {
    pub fn new(allocator: HostAllocator, tracker: ResourceTracker) -> Self {
        Self { head: None, len: 0, allocator, tracker }
    }

    /// Put `link` in front of the current head. The first link added is the
    /// terminal one and keeps whatever `next` value it was built with.
    pub fn prepend(&mut self, mut link: L) -> Result<()> {
        if let Some(head) = &self.head {
            link.set_next(&head.link);
        }
        let node = Node {
            link,
            next: None,
            _tracked: self.tracker.track(ResourceKind::ChainLink),
        };
        let mut node = self.allocator.alloc(vk::SystemAllocationScope::INSTANCE, node)?;
        node.next = self.head.take();
        self.head = Some(node);
        self.len += 1;
        Ok(())
    }

    pub fn head(&self) -> Option<&L> {
        self.head.as_ref().map(|n| &n.link)
    }

    pub fn head_ptr(&self) -> *const L {
        match &self.head {
            Some(node) => &node.link,
            None => std::ptr::null(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<L: Link> Drop for Chain<L> {
    fn drop(&mut self) {
        // Unlink iteratively so a long chain never recurses.
        let mut cur = self.head.take();
        while let Some(mut node) = cur {
            cur = node.next.take();
        }
    }
}

// ── Pre-session chains ──────────────────────────────────────

pub const CHAIN_TYPE_ENUMERATE_INSTANCE_EXTENSION_PROPERTIES: i32 = 1;
pub const CHAIN_TYPE_ENUMERATE_INSTANCE_LAYER_PROPERTIES: i32 = 2;
pub const CHAIN_TYPE_ENUMERATE_INSTANCE_VERSION: i32 = 3;
pub const CURRENT_CHAIN_VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ChainHeader {
    pub type_: i32,
    pub version: u32,
    pub size: u32,
}

/// One link of a pre-session chain. The layer receives the link *behind*
/// it and calls `pfn_next_layer(link.p_next_link, ...)` to continue.
pub trait PreInstanceLink: Link + Sized {
    type Pfn: Copy;

    fn new(pfn_next_layer: Self::Pfn, p_next_link: *const c_void) -> Self;
}

macro_rules! pre_instance_chains {
    ($( $(#[$meta:meta])* $chain:ident => $pfn:ident = $chain_type:ident; )*) => {
        $(
            $(#[$meta])*
            #[repr(C)]
            pub struct $chain {
                pub header: ChainHeader,
                pub pfn_next_layer: $pfn,
                pub p_next_link: *const $chain,
            }

            impl PreInstanceLink for $chain {
                type Pfn = $pfn;

                fn new(pfn_next_layer: $pfn, p_next_link: *const c_void) -> Self {
                    Self {
                        header: ChainHeader {
                            type_: $chain_type,
                            version: CURRENT_CHAIN_VERSION,
                            size: std::mem::size_of::<Self>() as u32,
                        },
                        pfn_next_layer,
                        p_next_link: p_next_link.cast(),
                    }
                }
            }

            impl Link for $chain {
                fn set_next(&mut self, next: *const Self) {
                    self.p_next_link = next;
                }
            }
        )*
    };
}

pre_instance_chains! {
    /// `VkEnumerateInstanceExtensionPropertiesChain`
    EnumerateInstanceExtensionPropertiesChain =>
        PfnLayerEnumerateInstanceExtensionProperties = CHAIN_TYPE_ENUMERATE_INSTANCE_EXTENSION_PROPERTIES;
    /// `VkEnumerateInstanceLayerPropertiesChain`
    EnumerateInstanceLayerPropertiesChain =>
        PfnLayerEnumerateInstanceLayerProperties = CHAIN_TYPE_ENUMERATE_INSTANCE_LAYER_PROPERTIES;
    /// `VkEnumerateInstanceVersionChain`
    EnumerateInstanceVersionChain => PfnLayerEnumerateInstanceVersion = CHAIN_TYPE_ENUMERATE_INSTANCE_VERSION;
}

pub type PfnLayerEnumerateInstanceExtensionProperties = unsafe extern "system" fn(
    chain: *const EnumerateInstanceExtensionPropertiesChain,
    p_layer_name: *const c_char,
    p_property_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result;

pub type PfnLayerEnumerateInstanceLayerProperties = unsafe extern "system" fn(
    chain: *const EnumerateInstanceLayerPropertiesChain,
    p_property_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result;

pub type PfnLayerEnumerateInstanceVersion = unsafe extern "system" fn(
    chain: *const EnumerateInstanceVersionChain,
    p_api_version: *mut u32,
) -> vk::Result;

// ── Session and device chains ───────────────────────────────

pub type PfnGetPhysicalDeviceProcAddr =
    unsafe extern "system" fn(instance: vk::Instance, p_name: *const c_char) -> vk::PFN_vkVoidFunction;
pub type PfnSetInstanceLoaderData = unsafe extern "system" fn(instance: vk::Instance, object: *mut c_void) -> vk::Result;
pub type PfnSetDeviceLoaderData = unsafe extern "system" fn(device: vk::Device, object: *mut c_void) -> vk::Result;

pub const LOADER_INSTANCE_CREATE_INFO: vk::StructureType = vk::StructureType::from_raw(47);
pub const LOADER_DEVICE_CREATE_INFO: vk::StructureType = vk::StructureType::from_raw(48);

/// `VkLayerFunction`: what a loader create-info record carries.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerFunction(pub i32);

impl LayerFunction {
    pub const LINK_INFO: LayerFunction = LayerFunction(0);
    pub const LOADER_DATA_CALLBACK: LayerFunction = LayerFunction(1);
}

/// What a layer needs to reach the next element of the session chain.
#[repr(C)]
pub struct LayerInstanceLink {
    pub p_next: *mut LayerInstanceLink,
    pub pfn_next_get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub pfn_next_get_physical_device_proc_addr: Option<PfnGetPhysicalDeviceProcAddr>,
}

impl Link for LayerInstanceLink {
    fn set_next(&mut self, next: *const Self) {
        self.p_next = next as *mut Self;
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union LayerInstanceCreateInfoPayload {
    pub p_layer_info: *mut LayerInstanceLink,
    pub pfn_set_instance_loader_data: PfnSetInstanceLoaderData,
    padding: [usize; 2],
}

/// `VkLayerInstanceCreateInfo`, threaded through the create info's pNext.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct LayerInstanceCreateInfo {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub function: LayerFunction,
    pub u: LayerInstanceCreateInfoPayload,
}

impl LayerInstanceCreateInfo {
    pub fn link_info(p_layer_info: *mut LayerInstanceLink) -> Self {
        Self {
            s_type: LOADER_INSTANCE_CREATE_INFO,
            p_next: std::ptr::null(),
            function: LayerFunction::LINK_INFO,
            u: LayerInstanceCreateInfoPayload { p_layer_info },
        }
    }

    pub fn loader_data_callback(callback: PfnSetInstanceLoaderData) -> Self {
        Self {
            s_type: LOADER_INSTANCE_CREATE_INFO,
            p_next: std::ptr::null(),
            function: LayerFunction::LOADER_DATA_CALLBACK,
            u: LayerInstanceCreateInfoPayload { pfn_set_instance_loader_data: callback },
        }
    }
}

/// What a layer needs to reach the next element of the device chain.
#[repr(C)]
pub struct LayerDeviceLink {
    pub p_next: *mut LayerDeviceLink,
    pub pfn_next_get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub pfn_next_get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
}

impl Link for LayerDeviceLink {
    fn set_next(&mut self, next: *const Self) {
        self.p_next = next as *mut Self;
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union LayerDeviceCreateInfoPayload {
    pub p_layer_info: *mut LayerDeviceLink,
    pub pfn_set_device_loader_data: PfnSetDeviceLoaderData,
    padding: [usize; 2],
}

/// `VkLayerDeviceCreateInfo`, threaded through the create info's pNext.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct LayerDeviceCreateInfo {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub function: LayerFunction,
    pub u: LayerDeviceCreateInfoPayload,
}

impl LayerDeviceCreateInfo {
    pub fn link_info(p_layer_info: *mut LayerDeviceLink) -> Self {
        Self {
            s_type: LOADER_DEVICE_CREATE_INFO,
            p_next: std::ptr::null(),
            function: LayerFunction::LINK_INFO,
            u: LayerDeviceCreateInfoPayload { p_layer_info },
        }
    }

    pub fn loader_data_callback(callback: PfnSetDeviceLoaderData) -> Self {
        Self {
            s_type: LOADER_DEVICE_CREATE_INFO,
            p_next: std::ptr::null(),
            function: LayerFunction::LOADER_DATA_CALLBACK,
            u: LayerDeviceCreateInfoPayload { pfn_set_device_loader_data: callback },
        }
    }
}

/// Walk a pNext chain for the loader create-info record carrying `function`.
///
/// # Safety
/// `p_next` must be null or the head of a valid structure chain.
pub unsafe fn find_loader_info<T>(mut p_next: *const c_void, s_type: vk::StructureType, function: LayerFunction) -> *mut T {
    while !p_next.is_null() {
        let base = &*(p_next as *const vk::BaseInStructure<'_>);
        if base.s_type == s_type {
            // Both loader records share the s_type / p_next / function prefix.
            let info = &*(p_next as *const LayerInstanceCreateInfo);
            if info.function == function {
                return p_next as *mut T;
            }
        }
        p_next = base.p_next as *const c_void;
    }
    std::ptr::null_mut()
}

// ── Layer interface negotiation ─────────────────────────────

pub const LAYER_NEGOTIATE_INTERFACE_STRUCT: i32 = 1;
pub const CURRENT_LOADER_LAYER_INTERFACE_VERSION: u32 = 2;

#[repr(C)]
pub struct NegotiateLayerInterface {
    pub s_type: i32,
    pub p_next: *mut c_void,
    pub loader_layer_interface_version: u32,
    pub pfn_get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    pub pfn_get_device_proc_addr: Option<vk::PFN_vkGetDeviceProcAddr>,
    pub pfn_get_physical_device_proc_addr: Option<PfnGetPhysicalDeviceProcAddr>,
}

pub type PfnNegotiateLoaderLayerInterfaceVersion =
    unsafe extern "system" fn(p_version_struct: *mut NegotiateLayerInterface) -> vk::Result;
