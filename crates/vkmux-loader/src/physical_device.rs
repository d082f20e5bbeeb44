//! Physical device identities.
//!
//! Two wrapper kinds exist per session. A *trampoline* wrapper is what the
//! application sees; it holds whatever handle the top of the layer chain
//! returned. A *terminator* wrapper is what the layers see; it holds one
//! backend's native handle and the backend it came from. Both start with the
//! session's dispatch pointer followed by an identity tag.
//!
//! Wrappers are issued once per underlying handle and kept until the
//! session is destroyed, so repeated enumeration returns the same identities.

use std::cell::RefCell;
use std::ffi::c_char;

use ash::vk;
use ash::vk::Handle;
use tracing::debug;
use vkmux_core::{contract_violation, ApiVersion, IdentityMap, LoaderError, Result};

use crate::alloc::HostBox;
use crate::backend::BackendInstance;
use crate::dispatch_table::InstanceDispatchTable;
use crate::extensions::{layer_properties, select_promoted, write_extension_properties, InstanceExtensions};
use crate::ffi::{collect_array, fill_array, missing_entry_point, read_optional_str, require};
use crate::instance::Session;
use crate::state;
use crate::tracker::{ResourceKind, Tracked};

pub const TRAMPOLINE_MAGIC: u64 = 0x10AD_ED02_0210_ADED;
pub const TERMINATOR_MAGIC: u64 = 0x10AD_ED03_0310_ADED;

#[repr(C)]
pub struct PhysicalDeviceTramp {
    dispatch: *const InstanceDispatchTable,
    magic: u64,
    session: *const Session,
    pub(crate) inner: vk::PhysicalDevice,
    _tracked: Tracked,
}

impl PhysicalDeviceTramp {
    /// Recover the wrapper behind an application handle. Aborts when the
    /// handle does not carry the trampoline tag.
    #[inline]
    pub(crate) unsafe fn from_handle<'a>(handle: vk::PhysicalDevice, caller: &str) -> &'a Self {
        let ptr = handle.as_raw() as usize as *const Self;
        if ptr.is_null() || (*ptr).magic != TRAMPOLINE_MAGIC {
            contract_violation(&format!("{}: invalid physical device {:#x}", caller, handle.as_raw()));
        }
        &*ptr
    }

    pub(crate) fn session(&self) -> &Session {
        unsafe { &*self.session }
    }

    fn handle(&self) -> vk::PhysicalDevice {
        vk::PhysicalDevice::from_raw(self as *const Self as u64)
    }
}

#[repr(C)]
pub struct PhysicalDeviceTerm {
    dispatch: *const InstanceDispatchTable,
    magic: u64,
    session: *const Session,
    backend: *const BackendInstance,
    pub(crate) native: vk::PhysicalDevice,
    _tracked: Tracked,
}

impl PhysicalDeviceTerm {
    #[inline]
    pub(crate) unsafe fn from_handle<'a>(handle: vk::PhysicalDevice, caller: &str) -> &'a Self {
        let ptr = handle.as_raw() as usize as *const Self;
        if ptr.is_null() || (*ptr).magic != TERMINATOR_MAGIC {
            contract_violation(&format!("{}: {:#x} is not a loader physical device", caller, handle.as_raw()));
        }
        &*ptr
    }

    pub(crate) fn session(&self) -> &Session {
        unsafe { &*self.session }
    }

    pub(crate) fn backend(&self) -> &BackendInstance {
        unsafe { &*self.backend }
    }

    fn handle(&self) -> vk::PhysicalDevice {
        vk::PhysicalDevice::from_raw(self as *const Self as u64)
    }
}

/// Wrappers issued by one session.
pub struct PhysicalDeviceRegistry {
    tramps: RefCell<Vec<HostBox<PhysicalDeviceTramp>>>,
    terms: RefCell<Vec<HostBox<PhysicalDeviceTerm>>>,
    /// Trampoline address <-> handle returned by the chain
    tramp_ids: IdentityMap<u64>,
    /// Terminator address <-> (backend index, native handle)
    term_ids: IdentityMap<(usize, u64)>,
}

impl PhysicalDeviceRegistry {
    pub fn new() -> Self {
        Self {
            tramps: RefCell::new(Vec::new()),
            terms: RefCell::new(Vec::new()),
            tramp_ids: IdentityMap::new(),
            term_ids: IdentityMap::new(),
        }
    }

    /// Application-facing identity for a handle returned by the chain.
    fn wrap_inner(&self, session: &Session, inner: vk::PhysicalDevice) -> Result<vk::PhysicalDevice> {
        if let Some(addr) = self.tramp_ids.to_wrapper(&inner.as_raw()) {
            return Ok(vk::PhysicalDevice::from_raw(addr as u64));
        }
        let tramp = session.allocator.alloc(
            vk::SystemAllocationScope::INSTANCE,
            PhysicalDeviceTramp {
                dispatch: session.dispatch_ptr(),
                magic: TRAMPOLINE_MAGIC,
                session,
                inner,
                _tracked: session.loader.inner.tracker.track(ResourceKind::PhysicalDevice),
            },
        )?;
        let handle = tramp.handle();
        self.tramp_ids.insert(handle.as_raw() as usize, inner.as_raw());
        self.tramps.borrow_mut().push(tramp);
        Ok(handle)
    }

    /// Layer-facing identity for a backend's native handle.
    fn wrap_native(
        &self,
        session: &Session,
        backend: &BackendInstance,
        native: vk::PhysicalDevice,
    ) -> Result<vk::PhysicalDevice> {
        let key = (backend.index, native.as_raw());
        if let Some(addr) = self.term_ids.to_wrapper(&key) {
            return Ok(vk::PhysicalDevice::from_raw(addr as u64));
        }
        let term = session.allocator.alloc(
            vk::SystemAllocationScope::INSTANCE,
            PhysicalDeviceTerm {
                dispatch: session.dispatch_ptr(),
                magic: TERMINATOR_MAGIC,
                session,
                backend,
                native,
                _tracked: session.loader.inner.tracker.track(ResourceKind::PhysicalDevice),
            },
        )?;
        let handle = term.handle();
        debug!("backend {} physical device {:#x} -> {:#x}", backend.name, native.as_raw(), handle.as_raw());
        self.term_ids.insert(handle.as_raw() as usize, key);
        self.terms.borrow_mut().push(term);
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.tramps.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PhysicalDeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The handle the chain returned for an application-facing identity.
///
/// # Safety
/// `physical_device` must be an identity issued by this loader.
pub unsafe fn unwrap_physical_device(physical_device: vk::PhysicalDevice) -> vk::PhysicalDevice {
    PhysicalDeviceTramp::from_handle(physical_device, "unwrap_physical_device").inner
}

/// The identity previously issued by `instance` for a chain handle, if any.
///
/// # Safety
/// `instance` must be a live session handle.
pub unsafe fn wrap_physical_device(instance: vk::Instance, inner: vk::PhysicalDevice) -> Option<vk::PhysicalDevice> {
    let lock = state::lock();
    let session = Session::from_live_handle(&lock, instance, "wrap_physical_device");
    session
        .physical_devices
        .tramp_ids
        .to_wrapper(&inner.as_raw())
        .map(|addr| vk::PhysicalDevice::from_raw(addr as u64))
}

// ── Trampolines ─────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "system" fn vkEnumeratePhysicalDevices(
    instance: vk::Instance,
    p_physical_device_count: *mut u32,
    p_physical_devices: *mut vk::PhysicalDevice,
) -> vk::Result {
    require(p_physical_device_count, "vkEnumeratePhysicalDevices: pPhysicalDeviceCount");
    let lock = state::lock();
    let session = Session::from_live_handle(&lock, instance, "vkEnumeratePhysicalDevices");
    let Some(enumerate) = session.table().enumerate_physical_devices() else {
        missing_entry_point("vkEnumeratePhysicalDevices")
    };

    let inner = match collect_array(|count, out| enumerate(session.chain_instance.get(), count, out)) {
        Ok(list) => list,
        Err(res) => return res,
    };
    let mut wrapped = Vec::with_capacity(inner.len());
    for pd in inner {
        match session.physical_devices.wrap_inner(session, pd) {
            Ok(handle) => wrapped.push(handle),
            Err(e) => return e.to_vk_result(),
        }
    }
    fill_array(&wrapped, p_physical_device_count, p_physical_devices)
}

unsafe fn enumerate_groups_through_chain(
    instance: vk::Instance,
    p_count: *mut u32,
    p_groups: *mut vk::PhysicalDeviceGroupProperties<'_>,
    caller: &str,
) -> vk::Result {
    require(p_count, caller);
    let lock = state::lock();
    let session = Session::from_live_handle(&lock, instance, caller);
    let table = session.table();
    let enumerate = select_promoted(
        session.api_version >= ApiVersion::V1_1,
        session.enabled.contains(InstanceExtensions::KHR_DEVICE_GROUP_CREATION),
        table.enumerate_physical_device_groups(),
        table.enumerate_physical_device_groups_khr(),
    );
    let Some(enumerate) = enumerate else { missing_entry_point(caller) };

    let mut groups: Vec<vk::PhysicalDeviceGroupProperties<'static>> =
        match collect_array(|count, out| enumerate(session.chain_instance.get(), count, out)) {
            Ok(list) => list,
            Err(res) => return res,
        };
    for group in groups.iter_mut() {
        group.physical_device_count = member_count(group);
        for i in 0..group.physical_device_count as usize {
            match session.physical_devices.wrap_inner(session, group.physical_devices[i]) {
                Ok(handle) => group.physical_devices[i] = handle,
                Err(e) => return e.to_vk_result(),
            }
        }
    }
    write_groups(&groups, p_count, p_groups)
}

#[no_mangle]
pub unsafe extern "system" fn vkEnumeratePhysicalDeviceGroups(
    instance: vk::Instance,
    p_physical_device_group_count: *mut u32,
    p_physical_device_group_properties: *mut vk::PhysicalDeviceGroupProperties<'_>,
) -> vk::Result {
    enumerate_groups_through_chain(
        instance,
        p_physical_device_group_count,
        p_physical_device_group_properties,
        "vkEnumeratePhysicalDeviceGroups",
    )
}

pub unsafe extern "system" fn vkEnumeratePhysicalDeviceGroupsKHR(
    instance: vk::Instance,
    p_physical_device_group_count: *mut u32,
    p_physical_device_group_properties: *mut vk::PhysicalDeviceGroupProperties<'_>,
) -> vk::Result {
    enumerate_groups_through_chain(
        instance,
        p_physical_device_group_count,
        p_physical_device_group_properties,
        "vkEnumeratePhysicalDeviceGroupsKHR",
    )
}

/// The reported member count, capped at what the structure can hold.
fn member_count(group: &vk::PhysicalDeviceGroupProperties<'_>) -> u32 {
    group.physical_device_count.min(vk::MAX_DEVICE_GROUP_SIZE as u32)
}

/// Copy groups into caller-provided structures, leaving their `sType` and
/// `pNext` alone.
unsafe fn write_groups(
    groups: &[vk::PhysicalDeviceGroupProperties<'_>],
    p_count: *mut u32,
    p_out: *mut vk::PhysicalDeviceGroupProperties<'_>,
) -> vk::Result {
    if p_out.is_null() {
        *p_count = groups.len() as u32;
        return vk::Result::SUCCESS;
    }
    let count = std::cmp::min(*p_count as usize, groups.len());
    for (i, group) in groups.iter().take(count).enumerate() {
        let out = &mut *p_out.add(i);
        out.physical_device_count = group.physical_device_count;
        out.physical_devices = group.physical_devices;
        out.subset_allocation = group.subset_allocation;
    }
    *p_count = count as u32;
    if count < groups.len() {
        vk::Result::INCOMPLETE
    } else {
        vk::Result::SUCCESS
    }
}

macro_rules! physical_device_trampolines {
    ($( $name:ident => $getter:ident ( $( $arg:ident : $ty:ty ),* ); )*) => {
        $(
            #[no_mangle]
            pub unsafe extern "system" fn $name(physical_device: vk::PhysicalDevice $(, $arg: $ty)*) {
                let tramp = PhysicalDeviceTramp::from_handle(physical_device, stringify!($name));
                match tramp.session().table().$getter() {
                    Some(f) => f(tramp.inner $(, $arg)*),
                    None => missing_entry_point(stringify!($name)),
                }
            }
        )*
    };
}

physical_device_trampolines! {
    vkGetPhysicalDeviceProperties => get_physical_device_properties(p_properties: *mut vk::PhysicalDeviceProperties);
    vkGetPhysicalDeviceFeatures => get_physical_device_features(p_features: *mut vk::PhysicalDeviceFeatures);
    vkGetPhysicalDeviceMemoryProperties => get_physical_device_memory_properties(p_memory_properties: *mut vk::PhysicalDeviceMemoryProperties);
    vkGetPhysicalDeviceQueueFamilyProperties => get_physical_device_queue_family_properties(
        p_queue_family_property_count: *mut u32,
        p_queue_family_properties: *mut vk::QueueFamilyProperties
    );
    vkGetPhysicalDeviceFormatProperties => get_physical_device_format_properties(
        format: vk::Format,
        p_format_properties: *mut vk::FormatProperties
    );
}

/// Trampolines for queries promoted from `VK_KHR_get_physical_device_properties2`.
/// The core and suffixed names share one body; the session decides which
/// chain slot is live.
macro_rules! promoted_physical_device_trampolines {
    ($( [$core:ident, $khr:ident] => [$core_getter:ident, $khr_getter:ident] ( $arg:ident : $ty:ty ); )*) => {
        $(
            #[no_mangle]
            pub unsafe extern "system" fn $core(physical_device: vk::PhysicalDevice, $arg: $ty) {
                let tramp = PhysicalDeviceTramp::from_handle(physical_device, stringify!($core));
                let session = tramp.session();
                let table = session.table();
                let f = select_promoted(
                    session.api_version >= ApiVersion::V1_1,
                    session.enabled.contains(InstanceExtensions::KHR_GET_PHYSICAL_DEVICE_PROPERTIES2),
                    table.$core_getter(),
                    table.$khr_getter(),
                );
                match f {
                    Some(f) => f(tramp.inner, $arg),
                    None => missing_entry_point(stringify!($core)),
                }
            }

            pub unsafe extern "system" fn $khr(physical_device: vk::PhysicalDevice, $arg: $ty) {
                $core(physical_device, $arg)
            }
        )*
    };
}

promoted_physical_device_trampolines! {
    [vkGetPhysicalDeviceProperties2, vkGetPhysicalDeviceProperties2KHR]
        => [get_physical_device_properties2, get_physical_device_properties2_khr]
        (p_properties: *mut vk::PhysicalDeviceProperties2<'_>);
    [vkGetPhysicalDeviceFeatures2, vkGetPhysicalDeviceFeatures2KHR]
        => [get_physical_device_features2, get_physical_device_features2_khr]
        (p_features: *mut vk::PhysicalDeviceFeatures2<'_>);
    [vkGetPhysicalDeviceMemoryProperties2, vkGetPhysicalDeviceMemoryProperties2KHR]
        => [get_physical_device_memory_properties2, get_physical_device_memory_properties2_khr]
        (p_memory_properties: *mut vk::PhysicalDeviceMemoryProperties2<'_>);
}

#[no_mangle]
pub unsafe extern "system" fn vkEnumerateDeviceExtensionProperties(
    physical_device: vk::PhysicalDevice,
    p_layer_name: *const c_char,
    p_property_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    require(p_property_count, "vkEnumerateDeviceExtensionProperties: pPropertyCount");
    let tramp = PhysicalDeviceTramp::from_handle(physical_device, "vkEnumerateDeviceExtensionProperties");
    let session = tramp.session();

    if let Some(name) = read_optional_str(p_layer_name) {
        return match session.layers.iter().find(|l| l.name() == name) {
            Some(layer) => write_extension_properties(&layer.entry.device_extensions, p_property_count, p_properties),
            None => vk::Result::ERROR_LAYER_NOT_PRESENT,
        };
    }

    match session.table().enumerate_device_extension_properties() {
        Some(f) => f(tramp.inner, std::ptr::null(), p_property_count, p_properties),
        None => missing_entry_point("vkEnumerateDeviceExtensionProperties"),
    }
}

#[no_mangle]
pub unsafe extern "system" fn vkEnumerateDeviceLayerProperties(
    physical_device: vk::PhysicalDevice,
    p_property_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    require(p_property_count, "vkEnumerateDeviceLayerProperties: pPropertyCount");
    let tramp = PhysicalDeviceTramp::from_handle(physical_device, "vkEnumerateDeviceLayerProperties");
    app_layer_properties(tramp.session(), p_property_count, p_properties)
}

unsafe fn app_layer_properties(
    session: &Session,
    p_property_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    let props: Vec<vk::LayerProperties> = session.app_layers.iter().map(layer_properties).collect();
    fill_array(&props, p_property_count, p_properties)
}

// ── Terminators ─────────────────────────────────────────────

/// Every backend's physical devices, as terminator identities.
unsafe fn enumerate_terms(session: &Session) -> std::result::Result<Vec<vk::PhysicalDevice>, vk::Result> {
    let mut out = Vec::new();
    for backend in session.backends.borrow().iter() {
        let Some(enumerate) = backend.dispatch.enumerate_physical_devices() else {
            continue;
        };
        let natives = collect_array(|count, list| enumerate(backend.instance, count, list))?;
        for native in natives {
            let handle = session
                .physical_devices
                .wrap_native(session, backend, native)
                .map_err(|e| e.to_vk_result())?;
            out.push(handle);
        }
    }
    Ok(out)
}

pub(crate) unsafe extern "system" fn terminator_enumerate_physical_devices(
    instance: vk::Instance,
    p_physical_device_count: *mut u32,
    p_physical_devices: *mut vk::PhysicalDevice,
) -> vk::Result {
    require(p_physical_device_count, "vkEnumeratePhysicalDevices: pPhysicalDeviceCount");
    let session = Session::from_chain_handle(instance, "terminator vkEnumeratePhysicalDevices");
    match enumerate_terms(session) {
        Ok(list) => fill_array(&list, p_physical_device_count, p_physical_devices),
        Err(res) => res,
    }
}

pub(crate) unsafe extern "system" fn terminator_enumerate_physical_device_groups(
    instance: vk::Instance,
    p_physical_device_group_count: *mut u32,
    p_physical_device_group_properties: *mut vk::PhysicalDeviceGroupProperties<'_>,
) -> vk::Result {
    require(p_physical_device_group_count, "vkEnumeratePhysicalDeviceGroups: pPhysicalDeviceGroupCount");
    let session = Session::from_chain_handle(instance, "terminator vkEnumeratePhysicalDeviceGroups");
    match collect_groups(session) {
        Ok(groups) => write_groups(&groups, p_physical_device_group_count, p_physical_device_group_properties),
        Err(e) => e.to_vk_result(),
    }
}

/// Groups across all backends. A backend without group support contributes
/// one single-device group per physical device.
unsafe fn collect_groups(session: &Session) -> Result<Vec<vk::PhysicalDeviceGroupProperties<'static>>> {
    let mut groups = Vec::new();
    for backend in session.backends.borrow().iter() {
        let native_groups = match backend
            .dispatch
            .enumerate_physical_device_groups()
            .or(backend.dispatch.enumerate_physical_device_groups_khr())
        {
            Some(enumerate) => collect_array(|count, out| enumerate(backend.instance, count, out))
                .map_err(LoaderError::Chain)?,
            None => {
                let Some(enumerate) = backend.dispatch.enumerate_physical_devices() else {
                    continue;
                };
                collect_array(|count, out| enumerate(backend.instance, count, out))
                    .map_err(LoaderError::Chain)?
                    .into_iter()
                    .map(|native| {
                        let mut group = vk::PhysicalDeviceGroupProperties::default();
                        group.physical_device_count = 1;
                        group.physical_devices[0] = native;
                        group.subset_allocation = vk::FALSE;
                        group
                    })
                    .collect()
            }
        };

        for mut group in native_groups {
            group.physical_device_count = member_count(&group);
            for i in 0..group.physical_device_count as usize {
                group.physical_devices[i] =
                    session.physical_devices.wrap_native(session, backend, group.physical_devices[i])?;
            }
            group.p_next = std::ptr::null_mut();
            groups.push(group);
        }
    }
    Ok(groups)
}

macro_rules! physical_device_terminators {
    ($( $name:ident => $getter:ident ( $( $arg:ident : $ty:ty ),* ); )*) => {
        $(
            pub(crate) unsafe extern "system" fn $name(physical_device: vk::PhysicalDevice $(, $arg: $ty)*) {
                let term = PhysicalDeviceTerm::from_handle(physical_device, stringify!($name));
                match term.backend().dispatch.$getter() {
                    Some(f) => f(term.native $(, $arg)*),
                    None => missing_entry_point(stringify!($getter)),
                }
            }
        )*
    };
}

physical_device_terminators! {
    terminator_get_physical_device_properties => get_physical_device_properties(p_properties: *mut vk::PhysicalDeviceProperties);
    terminator_get_physical_device_features => get_physical_device_features(p_features: *mut vk::PhysicalDeviceFeatures);
    terminator_get_physical_device_memory_properties => get_physical_device_memory_properties(
        p_memory_properties: *mut vk::PhysicalDeviceMemoryProperties
    );
    terminator_get_physical_device_queue_family_properties => get_physical_device_queue_family_properties(
        p_queue_family_property_count: *mut u32,
        p_queue_family_properties: *mut vk::QueueFamilyProperties
    );
    terminator_get_physical_device_format_properties => get_physical_device_format_properties(
        format: vk::Format,
        p_format_properties: *mut vk::FormatProperties
    );
}

/// Terminators for the promoted queries. Backends without either form get
/// the 1.0 query written into the embedded base structure.
macro_rules! promoted_physical_device_terminators {
    ($( $name:ident => [$core:ident, $khr:ident] or $base:ident . $field:ident ( $arg:ident : $ty:ty ); )*) => {
        $(
            pub(crate) unsafe extern "system" fn $name(physical_device: vk::PhysicalDevice, $arg: $ty) {
                let term = PhysicalDeviceTerm::from_handle(physical_device, stringify!($name));
                let table = &term.backend().dispatch;
                if let Some(f) = table.$core().or(table.$khr()) {
                    return f(term.native, $arg);
                }
                match table.$base() {
                    Some(f) => f(term.native, &mut (*$arg).$field),
                    None => missing_entry_point(stringify!($base)),
                }
            }
        )*
    };
}

promoted_physical_device_terminators! {
    terminator_get_physical_device_properties2
        => [get_physical_device_properties2, get_physical_device_properties2_khr]
        or get_physical_device_properties.properties
        (p_properties: *mut vk::PhysicalDeviceProperties2<'_>);
    terminator_get_physical_device_features2
        => [get_physical_device_features2, get_physical_device_features2_khr]
        or get_physical_device_features.features
        (p_features: *mut vk::PhysicalDeviceFeatures2<'_>);
    terminator_get_physical_device_memory_properties2
        => [get_physical_device_memory_properties2, get_physical_device_memory_properties2_khr]
        or get_physical_device_memory_properties.memory_properties
        (p_memory_properties: *mut vk::PhysicalDeviceMemoryProperties2<'_>);
}

pub(crate) unsafe extern "system" fn terminator_enumerate_device_extension_properties(
    physical_device: vk::PhysicalDevice,
    p_layer_name: *const c_char,
    p_property_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    require(p_property_count, "vkEnumerateDeviceExtensionProperties: pPropertyCount");
    let term = PhysicalDeviceTerm::from_handle(physical_device, "terminator vkEnumerateDeviceExtensionProperties");

    if let Some(name) = read_optional_str(p_layer_name) {
        return match term.session().layers.iter().find(|l| l.name() == name) {
            Some(layer) => write_extension_properties(&layer.entry.device_extensions, p_property_count, p_properties),
            None => vk::Result::ERROR_LAYER_NOT_PRESENT,
        };
    }

    match term.backend().dispatch.enumerate_device_extension_properties() {
        Some(f) => f(term.native, std::ptr::null(), p_property_count, p_properties),
        None => fill_array::<vk::ExtensionProperties>(&[], p_property_count, p_properties),
    }
}

pub(crate) unsafe extern "system" fn terminator_enumerate_device_layer_properties(
    physical_device: vk::PhysicalDevice,
    p_property_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    require(p_property_count, "vkEnumerateDeviceLayerProperties: pPropertyCount");
    let term = PhysicalDeviceTerm::from_handle(physical_device, "terminator vkEnumerateDeviceLayerProperties");
    app_layer_properties(term.session(), p_property_count, p_properties)
}
