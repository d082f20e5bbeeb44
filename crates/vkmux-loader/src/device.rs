//! Logical devices.
//!
//! A [`LoaderDevice`] owns the device-scoped chain and the device dispatch
//! table. The first word of every dispatchable object derived from the
//! device (the device itself, its queues, its command buffers) points at
//! it, so a forwarding stub reaches its slot with two loads.

use std::ffi::{c_char, c_void, CStr, CString};

use ash::vk;
use ash::vk::Handle;
use tracing::{debug, info, warn};
use vkmux_core::extension::contains_extension;
use vkmux_core::{contract_violation, ApiVersion, ExtensionProperty, LoaderError, Result};

use crate::alloc::HostAllocator;
use crate::chain::{Chain, LayerDeviceCreateInfo, LayerDeviceLink};
use crate::dispatch::{has_icd_magic, loader_data, set_loader_data};
use crate::dispatch_table::DeviceDispatchTable;
use crate::extensions::{query_extension_properties, select_promoted, validate_requested, DeviceExtensions};
use crate::ffi::{cast_fn, missing_entry_point, read_string_array, require, void_fn};
use crate::instance::Session;
use crate::layer::ActivatedLayer;
use crate::physical_device::{PhysicalDeviceTerm, PhysicalDeviceTramp};
use crate::state;
use crate::terminator;
use crate::tracker::{ResourceKind, Tracked};

pub const DEVICE_MAGIC: u64 = 0x10AD_ED04_0410_ADED;

#[repr(C)]
pub struct LoaderDevice {
    magic: u64,
    pub(crate) dispatch: DeviceDispatchTable,
    session: *const Session,
    pub(crate) api_version: ApiVersion,
    pub(crate) enabled: DeviceExtensions,
    icd_device: vk::Device,
    backend_get_device_proc_addr: Option<vk::PFN_vkGetDeviceProcAddr>,
    chain: Option<Chain<LayerDeviceLink>>,
    _tracked: Tracked,
}

impl LoaderDevice {
    fn new(session: &Session, api_version: ApiVersion, enabled: DeviceExtensions) -> Self {
        Self {
            magic: DEVICE_MAGIC,
            dispatch: DeviceDispatchTable::empty(),
            session,
            api_version,
            enabled,
            icd_device: vk::Device::null(),
            backend_get_device_proc_addr: None,
            chain: None,
            _tracked: session.loader.inner.tracker.track(ResourceKind::Device),
        }
    }

    /// Checked lookup for the non-hot entry points. Aborts on a null handle,
    /// a null dispatch word or a missing identity tag.
    pub(crate) unsafe fn from_handle<'a>(raw: u64, caller: &str) -> &'a LoaderDevice {
        if raw == 0 {
            contract_violation(&format!("{}: device handle is NULL", caller));
        }
        let device = loader_data(raw as usize as *const c_void) as *const LoaderDevice;
        if device.is_null() || (*device).magic != DEVICE_MAGIC {
            contract_violation(&format!("{}: invalid device {:#x}", caller, raw));
        }
        &*device
    }

    /// Hot-path lookup: one load for the dispatch word.
    #[inline(always)]
    pub(crate) unsafe fn dispatch_of<'a>(raw: u64) -> &'a LoaderDevice {
        let device = loader_data(raw as usize as *const c_void) as *const LoaderDevice;
        debug_assert!(!device.is_null() && (*device).magic == DEVICE_MAGIC);
        &*device
    }

    pub(crate) fn session(&self) -> &Session {
        unsafe { &*self.session }
    }

    fn core_1_1(&self) -> bool {
        self.api_version >= ApiVersion::V1_1
    }

    /// Destroy the backend device this object wraps, if one was created.
    unsafe fn destroy_backend_device(&self, p_allocator: *const vk::AllocationCallbacks<'_>) {
        if self.icd_device == vk::Device::null() {
            return;
        }
        let Some(gdpa) = self.backend_get_device_proc_addr else {
            return;
        };
        if let Some(f) = gdpa(self.icd_device, c"vkDestroyDevice".as_ptr()) {
            let destroy: vk::PFN_vkDestroyDevice = cast_fn(f);
            destroy(self.icd_device, p_allocator);
        }
    }
}

#[no_mangle]
pub unsafe extern "system" fn vkCreateDevice(
    physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_device: *mut vk::Device,
) -> vk::Result {
    require(p_create_info, "vkCreateDevice: pCreateInfo");
    require(p_device, "vkCreateDevice: pDevice");
    let tramp = PhysicalDeviceTramp::from_handle(physical_device, "vkCreateDevice");

    let _lock = state::lock();
    match create_device(tramp, &*p_create_info, p_allocator) {
        Ok(device) => {
            *p_device = device;
            vk::Result::SUCCESS
        }
        Err(e) => {
            debug!("vkCreateDevice failed: {}", e);
            e.to_vk_result()
        }
    }
}

unsafe fn create_device(
    tramp: &PhysicalDeviceTramp,
    create_info: &vk::DeviceCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) -> Result<vk::Device> {
    let session = tramp.session();
    let table = session.table();

    let requested = read_string_array(create_info.pp_enabled_extension_names, create_info.enabled_extension_count);
    let available = match table.enumerate_device_extension_properties() {
        Some(f) => query_extension_properties(|count, props| f(tramp.inner, std::ptr::null(), count, props))
            .map_err(LoaderError::Chain)?,
        None => Vec::new(),
    };
    let layer_lists: Vec<&[ExtensionProperty]> =
        session.layers.iter().map(|l| l.entry.device_extensions.as_slice()).collect();
    validate_requested(&requested, &available, &layer_lists)?;

    let mut props = vk::PhysicalDeviceProperties::default();
    if let Some(f) = table.get_physical_device_properties() {
        f(tramp.inner, &mut props);
    }
    let api_version = std::cmp::min(session.api_version, ApiVersion::from_packed(props.api_version));
    let enabled = DeviceExtensions::for_device(&requested, &session.enabled, api_version.to_packed());

    let allocator = if p_allocator.is_null() {
        session.allocator
    } else {
        HostAllocator::from_callbacks(p_allocator)
    };
    let mut device = allocator.alloc(
        vk::SystemAllocationScope::DEVICE,
        LoaderDevice::new(session, api_version, enabled),
    )?;

    // Only layers with a device resolver take part in the device chain.
    let device_layers: Vec<(&ActivatedLayer, vk::PFN_vkGetDeviceProcAddr)> = session
        .layers
        .iter()
        .filter_map(|l| l.get_device_proc_addr.map(|gdpa| (l, gdpa)))
        .collect();

    let mut chain: Chain<LayerDeviceLink> = Chain::new(allocator, session.loader.inner.tracker.clone());
    if !device_layers.is_empty() {
        chain.prepend(LayerDeviceLink {
            p_next: std::ptr::null_mut(),
            pfn_next_get_instance_proc_addr: terminator::get_instance_proc_addr,
            pfn_next_get_device_proc_addr: terminator_get_device_proc_addr,
        })?;
        for (layer, gdpa) in device_layers.iter().skip(1).rev() {
            chain.prepend(LayerDeviceLink {
                p_next: std::ptr::null_mut(),
                pfn_next_get_instance_proc_addr: layer.get_instance_proc_addr,
                pfn_next_get_device_proc_addr: *gdpa,
            })?;
        }
    }

    let (first_gipa, first_gdpa) = match device_layers.first() {
        Some((layer, gdpa)) => (layer.get_instance_proc_addr, *gdpa),
        None => (
            terminator::get_instance_proc_addr as vk::PFN_vkGetInstanceProcAddr,
            terminator_get_device_proc_addr as vk::PFN_vkGetDeviceProcAddr,
        ),
    };

    let mut loader_data_info = LayerDeviceCreateInfo::loader_data_callback(set_device_loader_data);
    loader_data_info.p_next = create_info.p_next;
    let mut link_info = LayerDeviceCreateInfo::link_info(chain.head_ptr() as *mut LayerDeviceLink);
    link_info.p_next = &loader_data_info as *const LayerDeviceCreateInfo as *const c_void;
    let mut ci = *create_info;
    ci.p_next = &mut link_info as *mut LayerDeviceCreateInfo as *const c_void;

    let create: vk::PFN_vkCreateDevice =
        match first_gipa(session.chain_instance.get(), c"vkCreateDevice".as_ptr()) {
            Some(f) => cast_fn(f),
            None => {
                return Err(LoaderError::InitializationFailed(
                    "vkCreateDevice is not provided by the first layer".to_string(),
                ))
            }
        };

    session.pending_device.set(device.as_mut_ptr());
    let mut handle = vk::Device::null();
    let res = create(tramp.inner, &ci, p_allocator, &mut handle);
    session.pending_device.set(std::ptr::null_mut());
    if let Err(e) = LoaderError::check(res) {
        // A layer failed after the backend device was made.
        if device.icd_device != vk::Device::null() {
            warn!("vkCreateDevice failed above the backend ({}); destroying backend device", e);
            device.destroy_backend_device(p_allocator);
        }
        return Err(e);
    }

    // A layer may return its own object in place of the backend's.
    set_loader_data(handle.as_raw() as usize as *mut c_void, device.as_ptr().cast());
    device.dispatch.fill_with(|name| first_gdpa(handle, name.as_ptr()));
    device.chain = Some(chain);

    info!(
        "created device {:#x} (api {}, {} device layers)",
        handle.as_raw(),
        api_version,
        device_layers.len()
    );
    session.devices.borrow_mut().push(device);
    Ok(handle)
}

#[no_mangle]
pub unsafe extern "system" fn vkDestroyDevice(device: vk::Device, p_allocator: *const vk::AllocationCallbacks<'_>) {
    if device == vk::Device::null() {
        return;
    }
    let _lock = state::lock();
    let loader_device = LoaderDevice::from_handle(device.as_raw(), "vkDestroyDevice");
    if let Some(destroy) = loader_device.dispatch.destroy_device() {
        destroy(device, p_allocator);
    }

    let ptr = loader_device as *const LoaderDevice;
    let session = loader_device.session();
    let removed = {
        let mut devices = session.devices.borrow_mut();
        devices.iter().position(|d| d.as_ptr() == ptr).map(|i| devices.swap_remove(i))
    };
    if removed.is_none() {
        warn!("vkDestroyDevice: device {:#x} is not owned by its session", device.as_raw());
    }
    drop(removed);
    debug!("destroyed device {:#x}", device.as_raw());
}

unsafe extern "system" fn set_device_loader_data(device: vk::Device, object: *mut c_void) -> vk::Result {
    if device == vk::Device::null() || object.is_null() {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }
    set_loader_data(object, loader_data(device.as_raw() as usize as *const c_void));
    vk::Result::SUCCESS
}

// ── Intercepted device calls ────────────────────────────────

#[no_mangle]
pub unsafe extern "system" fn vkGetDeviceQueue(
    device: vk::Device,
    queue_family_index: u32,
    queue_index: u32,
    p_queue: *mut vk::Queue,
) {
    require(p_queue, "vkGetDeviceQueue: pQueue");
    let loader_device = LoaderDevice::dispatch_of(device.as_raw());
    match loader_device.dispatch.get_device_queue() {
        Some(f) => f(device, queue_family_index, queue_index, p_queue),
        None => missing_entry_point("vkGetDeviceQueue"),
    }
    let queue = *p_queue;
    if queue != vk::Queue::null() {
        set_loader_data(queue.as_raw() as usize as *mut c_void, (loader_device as *const LoaderDevice).cast());
    }
}

#[no_mangle]
pub unsafe extern "system" fn vkAllocateCommandBuffers(
    device: vk::Device,
    p_allocate_info: *const vk::CommandBufferAllocateInfo<'_>,
    p_command_buffers: *mut vk::CommandBuffer,
) -> vk::Result {
    require(p_allocate_info, "vkAllocateCommandBuffers: pAllocateInfo");
    let loader_device = LoaderDevice::dispatch_of(device.as_raw());
    let res = match loader_device.dispatch.allocate_command_buffers() {
        Some(f) => f(device, p_allocate_info, p_command_buffers),
        None => missing_entry_point("vkAllocateCommandBuffers"),
    };
    if res == vk::Result::SUCCESS && !p_command_buffers.is_null() {
        for i in 0..(*p_allocate_info).command_buffer_count as usize {
            let cb = *p_command_buffers.add(i);
            set_loader_data(cb.as_raw() as usize as *mut c_void, (loader_device as *const LoaderDevice).cast());
        }
    }
    res
}

#[no_mangle]
pub unsafe extern "system" fn vkTrimCommandPool(
    device: vk::Device,
    command_pool: vk::CommandPool,
    flags: vk::CommandPoolTrimFlags,
) {
    let loader_device = LoaderDevice::dispatch_of(device.as_raw());
    let f = select_promoted(
        loader_device.core_1_1(),
        loader_device.enabled.contains(DeviceExtensions::KHR_MAINTENANCE1),
        loader_device.dispatch.trim_command_pool(),
        loader_device.dispatch.trim_command_pool_khr(),
    );
    match f {
        Some(f) => f(device, command_pool, flags),
        None => missing_entry_point("vkTrimCommandPool"),
    }
}

#[no_mangle]
pub unsafe extern "system" fn vkGetBufferMemoryRequirements2(
    device: vk::Device,
    p_info: *const vk::BufferMemoryRequirementsInfo2<'_>,
    p_memory_requirements: *mut vk::MemoryRequirements2<'_>,
) {
    let loader_device = LoaderDevice::dispatch_of(device.as_raw());
    let f = select_promoted(
        loader_device.core_1_1(),
        loader_device.enabled.contains(DeviceExtensions::KHR_GET_MEMORY_REQUIREMENTS2),
        loader_device.dispatch.get_buffer_memory_requirements2(),
        loader_device.dispatch.get_buffer_memory_requirements2_khr(),
    );
    match f {
        Some(f) => f(device, p_info, p_memory_requirements),
        None => missing_entry_point("vkGetBufferMemoryRequirements2"),
    }
}

// ── Forwarding stubs ────────────────────────────────────────

/// One exported stub per device-level call: read the dispatch word of the
/// first argument, read the slot, call it.
macro_rules! device_trampolines {
    ($( $name:ident => $getter:ident ( $first:ident : $first_ty:ty $(, $arg:ident : $ty:ty )* ) $( -> $ret:ty )?; )*) => {
        $(
            #[no_mangle]
            pub unsafe extern "system" fn $name($first: $first_ty $(, $arg: $ty)*) $(-> $ret)? {
                match LoaderDevice::dispatch_of($first.as_raw()).dispatch.$getter() {
                    Some(f) => f($first $(, $arg)*),
                    None => missing_entry_point(stringify!($name)),
                }
            }
        )*

        fn forwarding_stub(name: &[u8]) -> vk::PFN_vkVoidFunction {
            $(
                if name == stringify!($name).as_bytes() {
                    return void_fn!($name);
                }
            )*
            None
        }
    };
}

device_trampolines! {
    vkDeviceWaitIdle => device_wait_idle(device: vk::Device) -> vk::Result;
    vkQueueSubmit => queue_submit(queue: vk::Queue, submit_count: u32, p_submits: *const vk::SubmitInfo<'_>, fence: vk::Fence) -> vk::Result;
    vkQueueWaitIdle => queue_wait_idle(queue: vk::Queue) -> vk::Result;
    vkAllocateMemory => allocate_memory(
        device: vk::Device,
        p_allocate_info: *const vk::MemoryAllocateInfo<'_>,
        p_allocator: *const vk::AllocationCallbacks<'_>,
        p_memory: *mut vk::DeviceMemory
    ) -> vk::Result;
    vkFreeMemory => free_memory(device: vk::Device, memory: vk::DeviceMemory, p_allocator: *const vk::AllocationCallbacks<'_>);
    vkCreateBuffer => create_buffer(
        device: vk::Device,
        p_create_info: *const vk::BufferCreateInfo<'_>,
        p_allocator: *const vk::AllocationCallbacks<'_>,
        p_buffer: *mut vk::Buffer
    ) -> vk::Result;
    vkDestroyBuffer => destroy_buffer(device: vk::Device, buffer: vk::Buffer, p_allocator: *const vk::AllocationCallbacks<'_>);
    vkCreateFence => create_fence(
        device: vk::Device,
        p_create_info: *const vk::FenceCreateInfo<'_>,
        p_allocator: *const vk::AllocationCallbacks<'_>,
        p_fence: *mut vk::Fence
    ) -> vk::Result;
    vkDestroyFence => destroy_fence(device: vk::Device, fence: vk::Fence, p_allocator: *const vk::AllocationCallbacks<'_>);
    vkWaitForFences => wait_for_fences(
        device: vk::Device,
        fence_count: u32,
        p_fences: *const vk::Fence,
        wait_all: vk::Bool32,
        timeout: u64
    ) -> vk::Result;
    vkResetFences => reset_fences(device: vk::Device, fence_count: u32, p_fences: *const vk::Fence) -> vk::Result;
    vkCreateCommandPool => create_command_pool(
        device: vk::Device,
        p_create_info: *const vk::CommandPoolCreateInfo<'_>,
        p_allocator: *const vk::AllocationCallbacks<'_>,
        p_command_pool: *mut vk::CommandPool
    ) -> vk::Result;
    vkDestroyCommandPool => destroy_command_pool(
        device: vk::Device,
        command_pool: vk::CommandPool,
        p_allocator: *const vk::AllocationCallbacks<'_>
    );
    vkFreeCommandBuffers => free_command_buffers(
        device: vk::Device,
        command_pool: vk::CommandPool,
        command_buffer_count: u32,
        p_command_buffers: *const vk::CommandBuffer
    );
    vkBeginCommandBuffer => begin_command_buffer(
        command_buffer: vk::CommandBuffer,
        p_begin_info: *const vk::CommandBufferBeginInfo<'_>
    ) -> vk::Result;
    vkEndCommandBuffer => end_command_buffer(command_buffer: vk::CommandBuffer) -> vk::Result;
    vkCmdDispatch => cmd_dispatch(command_buffer: vk::CommandBuffer, group_count_x: u32, group_count_y: u32, group_count_z: u32);
    vkCmdFillBuffer => cmd_fill_buffer(
        command_buffer: vk::CommandBuffer,
        dst_buffer: vk::Buffer,
        dst_offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32
    );
}

/// Loader entry point for a device-level name, or `None`.
pub(crate) fn device_trampoline(name: &CStr) -> vk::PFN_vkVoidFunction {
    match name.to_bytes() {
        b"vkGetDeviceProcAddr" => void_fn!(crate::proc_addr::vkGetDeviceProcAddr),
        b"vkDestroyDevice" => void_fn!(vkDestroyDevice),
        b"vkGetDeviceQueue" => void_fn!(vkGetDeviceQueue),
        b"vkAllocateCommandBuffers" => void_fn!(vkAllocateCommandBuffers),
        b"vkTrimCommandPool" | b"vkTrimCommandPoolKHR" => void_fn!(vkTrimCommandPool),
        b"vkGetBufferMemoryRequirements2" | b"vkGetBufferMemoryRequirements2KHR" => {
            void_fn!(vkGetBufferMemoryRequirements2)
        }
        other => forwarding_stub(other),
    }
}

/// Names the device resolver answers with loader code rather than the
/// table, because the loader has to see the objects they return.
pub(crate) fn intercepted_device_call(name: &CStr) -> vk::PFN_vkVoidFunction {
    match name.to_bytes() {
        b"vkGetDeviceProcAddr" => void_fn!(crate::proc_addr::vkGetDeviceProcAddr),
        b"vkDestroyDevice" => void_fn!(vkDestroyDevice),
        b"vkGetDeviceQueue" => void_fn!(vkGetDeviceQueue),
        b"vkAllocateCommandBuffers" => void_fn!(vkAllocateCommandBuffers),
        _ => None,
    }
}

// ── Terminators ─────────────────────────────────────────────

pub(crate) unsafe extern "system" fn terminator_create_device(
    physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_device: *mut vk::Device,
) -> vk::Result {
    require(p_create_info, "vkCreateDevice: pCreateInfo");
    require(p_device, "vkCreateDevice: pDevice");
    let term = PhysicalDeviceTerm::from_handle(physical_device, "terminator vkCreateDevice");
    let pending = term.session().pending_device.get();
    if pending.is_null() {
        contract_violation("vkCreateDevice reached a backend without going through the loader");
    }
    let backend = term.backend();
    let Some(create) = backend.dispatch.create_device() else {
        warn!("backend {} has no vkCreateDevice", backend.name);
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };

    let available = match backend.dispatch.enumerate_device_extension_properties() {
        Some(f) => match query_extension_properties(|count, props| f(term.native, std::ptr::null(), count, props)) {
            Ok(list) => list,
            Err(res) => return res,
        },
        None => Vec::new(),
    };
    let create_info = &*p_create_info;
    let names: Vec<CString> = read_string_array(create_info.pp_enabled_extension_names, create_info.enabled_extension_count)
        .into_iter()
        .filter(|n| contains_extension(&available, n))
        .filter_map(|n| CString::new(n).ok())
        .collect();
    let name_ptrs: Vec<*const c_char> = names.iter().map(|n| n.as_ptr()).collect();

    let mut ci = *create_info;
    ci.enabled_layer_count = 0;
    ci.pp_enabled_layer_names = std::ptr::null();
    ci.enabled_extension_count = name_ptrs.len() as u32;
    ci.pp_enabled_extension_names = if name_ptrs.is_empty() { std::ptr::null() } else { name_ptrs.as_ptr() };

    let mut device = vk::Device::null();
    let res = create(term.native, &ci, p_allocator, &mut device);
    if res != vk::Result::SUCCESS {
        return res;
    }

    let object = device.as_raw() as usize as *mut c_void;
    if !has_icd_magic(object) {
        warn!("backend {} returned device {:#x} without the loader marker", backend.name, device.as_raw());
    }
    set_loader_data(object, pending as *const c_void);
    (*pending).icd_device = device;
    (*pending).backend_get_device_proc_addr = backend.dispatch.get_device_proc_addr();

    *p_device = device;
    vk::Result::SUCCESS
}

/// Bottom of every device chain.
pub(crate) unsafe extern "system" fn terminator_get_device_proc_addr(
    device: vk::Device,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    if p_name.is_null() {
        return None;
    }
    match CStr::from_ptr(p_name).to_bytes() {
        b"vkGetDeviceProcAddr" => return void_fn!(terminator_get_device_proc_addr),
        b"vkDestroyDevice" => return void_fn!(terminator_destroy_device),
        _ => {}
    }
    let loader_device = LoaderDevice::from_handle(device.as_raw(), "terminator vkGetDeviceProcAddr");
    match loader_device.backend_get_device_proc_addr {
        Some(gdpa) => gdpa(loader_device.icd_device, p_name),
        None => None,
    }
}

unsafe extern "system" fn terminator_destroy_device(device: vk::Device, p_allocator: *const vk::AllocationCallbacks<'_>) {
    let loader_device = LoaderDevice::from_handle(device.as_raw(), "terminator vkDestroyDevice");
    loader_device.destroy_backend_device(p_allocator);
}
