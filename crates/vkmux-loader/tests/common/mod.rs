//! Shared fixtures for the loader integration tests.
//!
//! Nothing here touches the real dynamic loader. A [`MockBridge`] hands out
//! in-memory "libraries" whose symbols are plain Rust functions: two
//! working backends, one backend whose instance creation always fails, and
//! three pass-through layers that record every call they see.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use ash::vk;
use ash::vk::Handle;
use vkmux_core::config::{BackendEntry, LayerEntry, LayerFunctions, LayerKind, PreInstanceFunctions};
use vkmux_core::{ApiVersion, ExtensionProperty, LoaderError, LoaderSettings};
use vkmux_loader::chain::{
    find_loader_info, EnumerateInstanceExtensionPropertiesChain, EnumerateInstanceLayerPropertiesChain,
    EnumerateInstanceVersionChain, LayerDeviceCreateInfo, LayerFunction, LayerInstanceCreateInfo,
    NegotiateLayerInterface, LOADER_DEVICE_CREATE_INFO, LOADER_INSTANCE_CREATE_INFO,
};
use vkmux_loader::ffi::{fill_array, read_string_array};
use vkmux_loader::{Environment, LibraryBridge, Loader, NativeLibrary, ICD_LOADER_MAGIC};

pub const BACKEND_PRIMARY: u32 = 0;
pub const BACKEND_SECONDARY: u32 = 1;
/// Scans fine but refuses to create an instance.
pub const BACKEND_BROKEN: u32 = 2;
/// Reports its one device as an oversized group.
pub const BACKEND_GROUPED: u32 = 3;

pub const LAYER_A: usize = 0;
pub const LAYER_B: usize = 1;
pub const LAYER_C: usize = 2;
pub const LAYER_NAMES: [&str; 3] = ["VK_LAYER_VKMUX_test_a", "VK_LAYER_VKMUX_test_b", "VK_LAYER_VKMUX_test_c"];

type Symbols = Vec<(&'static str, vk::PFN_vkVoidFunction)>;

fn void_fn(f: *const ()) -> vk::PFN_vkVoidFunction {
    Some(unsafe { std::mem::transmute::<*const (), unsafe extern "system" fn()>(f) })
}

unsafe fn cast<F: Copy>(f: unsafe extern "system" fn()) -> F {
    std::mem::transmute_copy(&f)
}

// ── Call recording ──────────────────────────────────────────

thread_local! {
    static CALLS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    static BACKEND_INSTANCES: Cell<isize> = const { Cell::new(0) };
    static BACKEND_DEVICES: Cell<isize> = const { Cell::new(0) };
    static LAST_DEVICE_EXTENSIONS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    static REJECT_CREATED_DEVICES: Cell<bool> = const { Cell::new(false) };
}

fn record(who: &str, what: &str) {
    CALLS.with(|c| c.borrow_mut().push(format!("{}:{}", who, what)));
}

/// Everything recorded on this thread since the last call.
pub fn take_calls() -> Vec<String> {
    CALLS.with(|c| std::mem::take(&mut *c.borrow_mut()))
}

/// Native backend instances created on this thread and not yet destroyed.
pub fn live_backend_instances() -> isize {
    BACKEND_INSTANCES.with(|c| c.get())
}

pub fn live_backend_devices() -> isize {
    BACKEND_DEVICES.with(|c| c.get())
}

/// Make layers on this thread fail vkCreateDevice after the call below
/// them has already succeeded.
pub fn reject_created_devices(on: bool) {
    REJECT_CREATED_DEVICES.with(|c| c.set(on));
}

/// Extensions the most recent backend device was created with.
pub fn last_device_extensions() -> Vec<String> {
    LAST_DEVICE_EXTENSIONS.with(|c| c.borrow().clone())
}

// ── Library bridge ──────────────────────────────────────────

#[derive(Default)]
pub struct MockBridge {
    libraries: Mutex<HashMap<String, Arc<Symbols>>>,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

struct MockLibrary {
    path: String,
    symbols: Arc<Symbols>,
    closes: Arc<AtomicUsize>,
}

impl MockBridge {
    pub fn new() -> Arc<Self> {
        let bridge = Self::default();
        for id in [BACKEND_PRIMARY, BACKEND_SECONDARY, BACKEND_BROKEN, BACKEND_GROUPED] {
            bridge.add_library(&backend_library(id), backend_symbols(id));
        }
        for id in [LAYER_A, LAYER_B, LAYER_C] {
            bridge.add_library(&layer_library(id), layer_symbols(id));
        }
        Arc::new(bridge)
    }

    fn add_library(&self, path: &str, symbols: Symbols) {
        self.libraries
            .lock()
            .expect("bridge poisoned")
            .insert(path.to_string(), Arc::new(symbols));
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Libraries currently held open by the loader.
    pub fn open_now(&self) -> usize {
        self.opens() - self.closes()
    }
}

impl LibraryBridge for MockBridge {
    fn open(&self, path: &str) -> vkmux_core::Result<Arc<dyn NativeLibrary>> {
        let symbols = self
            .libraries
            .lock()
            .expect("bridge poisoned")
            .get(path)
            .cloned()
            .ok_or_else(|| LoaderError::Library {
                path: path.to_string(),
                reason: "no such mock library".to_string(),
            })?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockLibrary {
            path: path.to_string(),
            symbols,
            closes: self.closes.clone(),
        }))
    }
}

impl NativeLibrary for MockLibrary {
    fn path(&self) -> &str {
        &self.path
    }

    fn symbol(&self, name: &CStr) -> vk::PFN_vkVoidFunction {
        let name = name.to_str().ok()?;
        self.symbols.iter().find(|(n, _)| *n == name).and_then(|(_, f)| *f)
    }
}

impl Drop for MockLibrary {
    fn drop(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Settings and loader construction ────────────────────────

pub fn backend_library(id: u32) -> String {
    format!("mock_backend_{}", id)
}

pub fn layer_library(id: usize) -> String {
    format!("mock_layer_{}", id)
}

pub fn backend_entry(id: u32) -> BackendEntry {
    BackendEntry {
        name: format!("mock-{}", id),
        library: backend_library(id),
        api_version: ApiVersion::V1_3,
    }
}

pub fn layer_entry(id: usize, kind: LayerKind) -> LayerEntry {
    LayerEntry {
        name: LAYER_NAMES[id].to_string(),
        library: layer_library(id),
        kind,
        description: format!("test layer {}", id),
        spec_version: ApiVersion::V1_3,
        implementation_version: 1,
        enable_environment: None,
        disable_environment: None,
        instance_extensions: Vec::new(),
        device_extensions: Vec::new(),
        functions: LayerFunctions::default(),
        pre_instance_functions: PreInstanceFunctions::default(),
    }
}

/// Name the layer's pre-session overrides in its entry.
pub fn with_pre_instance_overrides(mut entry: LayerEntry, id: usize) -> LayerEntry {
    let tag = layer_tag(id);
    entry.pre_instance_functions = PreInstanceFunctions {
        enumerate_instance_extension_properties: Some(format!("{}_EnumerateInstanceExtensionProperties", tag)),
        enumerate_instance_layer_properties: Some(format!("{}_EnumerateInstanceLayerProperties", tag)),
        enumerate_instance_version: Some(format!("{}_EnumerateInstanceVersion", tag)),
    };
    entry
}

pub struct Harness {
    pub bridge: Arc<MockBridge>,
    pub loader: Loader,
}

pub fn settings(backends: &[u32], layers: Vec<LayerEntry>) -> LoaderSettings {
    LoaderSettings {
        backends: backends.iter().map(|&id| backend_entry(id)).collect(),
        layers,
        ..Default::default()
    }
}

pub fn harness(backends: &[u32], layers: Vec<LayerEntry>) -> Harness {
    harness_with(settings(backends, layers), HashMap::new())
}

pub fn harness_with(settings: LoaderSettings, env: HashMap<String, String>) -> Harness {
    let bridge = MockBridge::new();
    let loader = Loader::builder()
        .settings(settings)
        .bridge(bridge.clone())
        .environment(Environment::Overrides(env))
        .build();
    Harness { bridge, loader }
}

// ── Application-side helpers ────────────────────────────────

pub fn api_version(minor: u32) -> u32 {
    vk::make_api_version(0, 1, minor, 0)
}

pub fn create_session(
    loader: &Loader,
    layers: &[&str],
    extensions: &[&str],
    api_version: u32,
    allocator: Option<&vk::AllocationCallbacks<'_>>,
) -> Result<vk::Instance, vk::Result> {
    let layer_names: Vec<CString> = layers.iter().map(|n| CString::new(*n).expect("layer name")).collect();
    let extension_names: Vec<CString> = extensions.iter().map(|n| CString::new(*n).expect("extension name")).collect();
    let layer_ptrs: Vec<*const c_char> = layer_names.iter().map(|n| n.as_ptr()).collect();
    let extension_ptrs: Vec<*const c_char> = extension_names.iter().map(|n| n.as_ptr()).collect();

    let app_info = vk::ApplicationInfo::default()
        .application_name(c"vkmux-test")
        .api_version(api_version);
    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_layer_names(&layer_ptrs)
        .enabled_extension_names(&extension_ptrs);

    let p_allocator = allocator.map_or(std::ptr::null(), |a| a as *const vk::AllocationCallbacks<'_>);
    let mut instance = vk::Instance::null();
    let res = unsafe { loader.create_instance(&create_info, p_allocator, &mut instance) };
    if res == vk::Result::SUCCESS {
        Ok(instance)
    } else {
        Err(res)
    }
}

pub fn destroy_session(instance: vk::Instance) {
    unsafe { vkmux_loader::instance::vkDestroyInstance(instance, std::ptr::null()) };
}

pub fn physical_devices(instance: vk::Instance) -> Vec<vk::PhysicalDevice> {
    use vkmux_loader::physical_device::vkEnumeratePhysicalDevices;
    let mut count = 0u32;
    let res = unsafe { vkEnumeratePhysicalDevices(instance, &mut count, std::ptr::null_mut()) };
    assert_eq!(res, vk::Result::SUCCESS, "count query failed");
    let mut list = vec![vk::PhysicalDevice::null(); count as usize];
    let res = unsafe { vkEnumeratePhysicalDevices(instance, &mut count, list.as_mut_ptr()) };
    assert_eq!(res, vk::Result::SUCCESS, "fill query failed");
    list.truncate(count as usize);
    list
}

pub fn properties(physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
    let mut props = vk::PhysicalDeviceProperties::default();
    unsafe { vkmux_loader::physical_device::vkGetPhysicalDeviceProperties(physical_device, &mut props) };
    props
}

pub fn create_device(
    physical_device: vk::PhysicalDevice,
    extensions: &[&str],
    allocator: Option<&vk::AllocationCallbacks<'_>>,
) -> Result<vk::Device, vk::Result> {
    let extension_names: Vec<CString> = extensions.iter().map(|n| CString::new(*n).expect("extension name")).collect();
    let extension_ptrs: Vec<*const c_char> = extension_names.iter().map(|n| n.as_ptr()).collect();
    let priorities = [1.0f32];
    let queue_info = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(0)
        .queue_priorities(&priorities)];
    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_info)
        .enabled_extension_names(&extension_ptrs);

    let p_allocator = allocator.map_or(std::ptr::null(), |a| a as *const vk::AllocationCallbacks<'_>);
    let mut device = vk::Device::null();
    let res = unsafe { vkmux_loader::device::vkCreateDevice(physical_device, &create_info, p_allocator, &mut device) };
    if res == vk::Result::SUCCESS {
        Ok(device)
    } else {
        Err(res)
    }
}

pub fn destroy_device(device: vk::Device) {
    unsafe { vkmux_loader::device::vkDestroyDevice(device, std::ptr::null()) };
}

/// The first pointer-sized word of a dispatchable object.
pub fn dispatch_word(raw: u64) -> usize {
    unsafe { *(raw as usize as *const usize) }
}

// ── Mock backends ───────────────────────────────────────────

/// A backend-side dispatchable object: the loader word, then an id.
#[repr(C)]
pub struct MockObject {
    loader_data: usize,
    local_id: u64,
}

impl MockObject {
    pub fn new(local_id: u64) -> *mut Self {
        Box::into_raw(Box::new(Self { loader_data: ICD_LOADER_MAGIC, local_id }))
    }

    pub unsafe fn get_id(ptr: *const Self) -> u64 {
        (*ptr).local_id
    }

    pub unsafe fn destroy(ptr: *mut Self) {
        drop(Box::from_raw(ptr));
    }
}

#[repr(C)]
struct MockInstance {
    loader_data: usize,
    backend: u32,
    physical_devices: Vec<*mut MockObject>,
}

#[repr(C)]
struct MockDevice {
    loader_data: usize,
    queue: *mut MockObject,
}

pub fn backend_device_count(id: u32) -> usize {
    if id == BACKEND_PRIMARY {
        2
    } else {
        1
    }
}

/// Vendor ID reported by every physical device of a backend.
pub fn backend_vendor_id(id: u32) -> u32 {
    0x1000 + id
}

fn backend_instance_extensions(id: u32) -> Vec<ExtensionProperty> {
    match id {
        BACKEND_PRIMARY => vec![
            ExtensionProperty::new("VK_KHR_get_physical_device_properties2", 2),
            ExtensionProperty::new("VK_EXT_debug_utils", 2),
        ],
        _ => vec![
            ExtensionProperty::new("VK_KHR_get_physical_device_properties2", 1),
            ExtensionProperty::new("VK_KHR_surface", 25),
        ],
    }
}

fn backend_symbols(id: u32) -> Symbols {
    let gipa = match id {
        BACKEND_PRIMARY => void_fn(backend_gipa::<BACKEND_PRIMARY> as *const ()),
        BACKEND_SECONDARY => void_fn(backend_gipa::<BACKEND_SECONDARY> as *const ()),
        BACKEND_GROUPED => void_fn(backend_gipa::<BACKEND_GROUPED> as *const ()),
        _ => void_fn(backend_gipa::<BACKEND_BROKEN> as *const ()),
    };
    vec![
        ("vk_icdNegotiateLoaderICDInterfaceVersion", void_fn(backend_negotiate as *const ())),
        ("vk_icdGetInstanceProcAddr", gipa),
    ]
}

unsafe extern "system" fn backend_negotiate(p_version: *mut u32) -> vk::Result {
    *p_version = (*p_version).min(5);
    vk::Result::SUCCESS
}

unsafe extern "system" fn backend_gipa<const ID: u32>(
    _instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    match CStr::from_ptr(p_name).to_bytes() {
        b"vkCreateInstance" => void_fn(backend_create_instance::<ID> as *const ()),
        b"vkEnumerateInstanceExtensionProperties" => {
            void_fn(backend_enumerate_instance_extensions::<ID> as *const ())
        }
        b"vkDestroyInstance" => void_fn(backend_destroy_instance as *const ()),
        b"vkEnumeratePhysicalDevices" => void_fn(backend_enumerate_physical_devices as *const ()),
        b"vkEnumeratePhysicalDeviceGroups" if ID == BACKEND_GROUPED => {
            void_fn(backend_enumerate_oversized_groups as *const ())
        }
        b"vkGetPhysicalDeviceProperties" => void_fn(backend_get_physical_device_properties::<ID> as *const ()),
        b"vkEnumerateDeviceExtensionProperties" => void_fn(backend_enumerate_device_extensions as *const ()),
        b"vkCreateDevice" => void_fn(backend_create_device as *const ()),
        b"vkGetDeviceProcAddr" => void_fn(backend_gdpa as *const ()),
        _ => None,
    }
}

unsafe extern "system" fn backend_enumerate_instance_extensions<const ID: u32>(
    _p_layer_name: *const c_char,
    p_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    let list: Vec<vk::ExtensionProperties> = backend_instance_extensions(ID).iter().map(|e| e.to_vk()).collect();
    fill_array(&list, p_count, p_properties)
}

unsafe extern "system" fn backend_create_instance<const ID: u32>(
    _p_create_info: *const vk::InstanceCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    if ID == BACKEND_BROKEN {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }
    let physical_devices = (0..backend_device_count(ID))
        .map(|i| MockObject::new(((ID as u64) << 8) | i as u64))
        .collect();
    let instance = Box::into_raw(Box::new(MockInstance {
        loader_data: ICD_LOADER_MAGIC,
        backend: ID,
        physical_devices,
    }));
    BACKEND_INSTANCES.with(|c| c.set(c.get() + 1));
    *p_instance = vk::Instance::from_raw(instance as u64);
    vk::Result::SUCCESS
}

unsafe extern "system" fn backend_destroy_instance(instance: vk::Instance, _p_allocator: *const vk::AllocationCallbacks<'_>) {
    let instance = Box::from_raw(instance.as_raw() as usize as *mut MockInstance);
    for pd in instance.physical_devices.iter() {
        MockObject::destroy(*pd);
    }
    BACKEND_INSTANCES.with(|c| c.set(c.get() - 1));
}

unsafe extern "system" fn backend_enumerate_physical_devices(
    instance: vk::Instance,
    p_count: *mut u32,
    p_physical_devices: *mut vk::PhysicalDevice,
) -> vk::Result {
    let instance = &*(instance.as_raw() as usize as *const MockInstance);
    let list: Vec<vk::PhysicalDevice> = instance
        .physical_devices
        .iter()
        .map(|pd| vk::PhysicalDevice::from_raw(*pd as u64))
        .collect();
    fill_array(&list, p_count, p_physical_devices)
}

/// One group claiming more members than the structure holds; every slot
/// names the same device.
pub const OVERSIZED_GROUP_COUNT: u32 = 40;

unsafe extern "system" fn backend_enumerate_oversized_groups(
    instance: vk::Instance,
    p_count: *mut u32,
    p_groups: *mut vk::PhysicalDeviceGroupProperties<'_>,
) -> vk::Result {
    if p_groups.is_null() {
        *p_count = 1;
        return vk::Result::SUCCESS;
    }
    if *p_count == 0 {
        return vk::Result::INCOMPLETE;
    }
    let instance = &*(instance.as_raw() as usize as *const MockInstance);
    let member = vk::PhysicalDevice::from_raw(instance.physical_devices[0] as u64);
    let group = &mut *p_groups;
    group.physical_device_count = OVERSIZED_GROUP_COUNT;
    group.physical_devices = [member; vk::MAX_DEVICE_GROUP_SIZE];
    group.subset_allocation = vk::FALSE;
    *p_count = 1;
    vk::Result::SUCCESS
}

unsafe extern "system" fn backend_get_physical_device_properties<const ID: u32>(
    physical_device: vk::PhysicalDevice,
    p_properties: *mut vk::PhysicalDeviceProperties,
) {
    let local_id = MockObject::get_id(physical_device.as_raw() as usize as *const MockObject);
    let mut props = vk::PhysicalDeviceProperties {
        api_version: vk::API_VERSION_1_3,
        vendor_id: backend_vendor_id(ID),
        device_id: local_id as u32,
        device_type: vk::PhysicalDeviceType::VIRTUAL_GPU,
        ..Default::default()
    };
    vkmux_core::extension::write_c_array(
        &format!("mock backend {} gpu {}", ID, local_id & 0xFF),
        &mut props.device_name,
    );
    *p_properties = props;
}

unsafe extern "system" fn backend_enumerate_device_extensions(
    _physical_device: vk::PhysicalDevice,
    _p_layer_name: *const c_char,
    p_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    let list = [
        ExtensionProperty::new("VK_KHR_swapchain", 70).to_vk(),
        ExtensionProperty::new("VK_KHR_maintenance1", 2).to_vk(),
    ];
    fill_array(&list, p_count, p_properties)
}

unsafe extern "system" fn backend_create_device(
    _physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_device: *mut vk::Device,
) -> vk::Result {
    let create_info = &*p_create_info;
    let names = read_string_array(create_info.pp_enabled_extension_names, create_info.enabled_extension_count);
    LAST_DEVICE_EXTENSIONS.with(|c| *c.borrow_mut() = names);

    let device = Box::into_raw(Box::new(MockDevice {
        loader_data: ICD_LOADER_MAGIC,
        queue: MockObject::new(0),
    }));
    BACKEND_DEVICES.with(|c| c.set(c.get() + 1));
    *p_device = vk::Device::from_raw(device as u64);
    vk::Result::SUCCESS
}

unsafe extern "system" fn backend_gdpa(_device: vk::Device, p_name: *const c_char) -> vk::PFN_vkVoidFunction {
    match CStr::from_ptr(p_name).to_bytes() {
        b"vkGetDeviceProcAddr" => void_fn(backend_gdpa as *const ()),
        b"vkDestroyDevice" => void_fn(backend_destroy_device as *const ()),
        b"vkGetDeviceQueue" => void_fn(backend_get_device_queue as *const ()),
        b"vkDeviceWaitIdle" => void_fn(backend_device_wait_idle as *const ()),
        b"vkAllocateCommandBuffers" => void_fn(backend_allocate_command_buffers as *const ()),
        b"vkFreeCommandBuffers" => void_fn(backend_free_command_buffers as *const ()),
        _ => None,
    }
}

unsafe extern "system" fn backend_destroy_device(device: vk::Device, _p_allocator: *const vk::AllocationCallbacks<'_>) {
    let device = Box::from_raw(device.as_raw() as usize as *mut MockDevice);
    MockObject::destroy(device.queue);
    BACKEND_DEVICES.with(|c| c.set(c.get() - 1));
}

unsafe extern "system" fn backend_get_device_queue(
    device: vk::Device,
    _queue_family_index: u32,
    _queue_index: u32,
    p_queue: *mut vk::Queue,
) {
    let device = &*(device.as_raw() as usize as *const MockDevice);
    record("backend", "vkGetDeviceQueue");
    *p_queue = vk::Queue::from_raw(device.queue as u64);
}

unsafe extern "system" fn backend_device_wait_idle(_device: vk::Device) -> vk::Result {
    record("backend", "vkDeviceWaitIdle");
    vk::Result::SUCCESS
}

unsafe extern "system" fn backend_allocate_command_buffers(
    _device: vk::Device,
    p_allocate_info: *const vk::CommandBufferAllocateInfo<'_>,
    p_command_buffers: *mut vk::CommandBuffer,
) -> vk::Result {
    for i in 0..(*p_allocate_info).command_buffer_count as usize {
        *p_command_buffers.add(i) = vk::CommandBuffer::from_raw(MockObject::new(i as u64) as u64);
    }
    vk::Result::SUCCESS
}

unsafe extern "system" fn backend_free_command_buffers(
    _device: vk::Device,
    _command_pool: vk::CommandPool,
    command_buffer_count: u32,
    p_command_buffers: *const vk::CommandBuffer,
) {
    for i in 0..command_buffer_count as usize {
        let cb = *p_command_buffers.add(i);
        if cb != vk::CommandBuffer::null() {
            MockObject::destroy(cb.as_raw() as usize as *mut MockObject);
        }
    }
}

// ── Pass-through layers ─────────────────────────────────────

#[derive(Clone, Copy)]
struct LayerInstance {
    next_gipa: vk::PFN_vkGetInstanceProcAddr,
    instance: vk::Instance,
}

#[derive(Clone, Copy)]
struct LayerDevice {
    next_gdpa: vk::PFN_vkGetDeviceProcAddr,
}

/// Per (layer, dispatch key) state, the way a real layer keys its maps.
fn layer_instances() -> &'static Mutex<HashMap<(usize, usize), LayerInstance>> {
    static MAP: OnceLock<Mutex<HashMap<(usize, usize), LayerInstance>>> = OnceLock::new();
    MAP.get_or_init(Default::default)
}

fn layer_devices() -> &'static Mutex<HashMap<(usize, usize), LayerDevice>> {
    static MAP: OnceLock<Mutex<HashMap<(usize, usize), LayerDevice>>> = OnceLock::new();
    MAP.get_or_init(Default::default)
}

fn instance_state(id: usize, key: usize) -> Option<LayerInstance> {
    layer_instances().lock().expect("layer state poisoned").get(&(id, key)).copied()
}

fn device_state(id: usize, key: usize) -> Option<LayerDevice> {
    layer_devices().lock().expect("layer state poisoned").get(&(id, key)).copied()
}

fn layer_tag(id: usize) -> &'static str {
    ["test_a", "test_b", "test_c"][id]
}

fn layer_symbols(id: usize) -> Symbols {
    match id {
        LAYER_A => layer_symbols_for::<LAYER_A>(true),
        LAYER_B => layer_symbols_for::<LAYER_B>(false),
        _ => layer_symbols_for::<LAYER_C>(false),
    }
}

fn layer_symbols_for<const ID: usize>(negotiates: bool) -> Symbols {
    let tag = layer_tag(ID);
    let leak = |s: String| -> &'static str { Box::leak(s.into_boxed_str()) };
    let mut symbols: Symbols = vec![
        ("vkGetInstanceProcAddr", void_fn(layer_gipa::<ID> as *const ())),
        ("vkGetDeviceProcAddr", void_fn(layer_gdpa::<ID> as *const ())),
        (
            leak(format!("{}_EnumerateInstanceExtensionProperties", tag)),
            void_fn(layer_pre_enumerate_extensions::<ID> as *const ()),
        ),
        (
            leak(format!("{}_EnumerateInstanceLayerProperties", tag)),
            void_fn(layer_pre_enumerate_layers::<ID> as *const ()),
        ),
        (
            leak(format!("{}_EnumerateInstanceVersion", tag)),
            void_fn(layer_pre_enumerate_version::<ID> as *const ()),
        ),
    ];
    if negotiates {
        symbols.push(("vkNegotiateLoaderLayerInterfaceVersion", void_fn(layer_negotiate::<ID> as *const ())));
    }
    symbols
}

unsafe extern "system" fn layer_negotiate<const ID: usize>(p_request: *mut NegotiateLayerInterface) -> vk::Result {
    let request = &mut *p_request;
    request.loader_layer_interface_version = request.loader_layer_interface_version.min(2);
    request.pfn_get_instance_proc_addr = Some(layer_gipa::<ID>);
    request.pfn_get_device_proc_addr = Some(layer_gdpa::<ID>);
    vk::Result::SUCCESS
}

unsafe extern "system" fn layer_gipa<const ID: usize>(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    match CStr::from_ptr(p_name).to_bytes() {
        b"vkGetInstanceProcAddr" => void_fn(layer_gipa::<ID> as *const ()),
        b"vkCreateInstance" => void_fn(layer_create_instance::<ID> as *const ()),
        b"vkDestroyInstance" => void_fn(layer_destroy_instance::<ID> as *const ()),
        b"vkEnumeratePhysicalDevices" => void_fn(layer_enumerate_physical_devices::<ID> as *const ()),
        b"vkCreateDevice" => void_fn(layer_create_device::<ID> as *const ()),
        b"vkGetDeviceProcAddr" => void_fn(layer_gdpa::<ID> as *const ()),
        _ => {
            if instance == vk::Instance::null() {
                return None;
            }
            let state = instance_state(ID, dispatch_word(instance.as_raw()))?;
            (state.next_gipa)(state.instance, p_name)
        }
    }
}

unsafe extern "system" fn layer_create_instance<const ID: usize>(
    p_create_info: *const vk::InstanceCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    let info = find_loader_info::<LayerInstanceCreateInfo>(
        (*p_create_info).p_next,
        LOADER_INSTANCE_CREATE_INFO,
        LayerFunction::LINK_INFO,
    );
    if info.is_null() {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }
    let link = (*info).u.p_layer_info;
    let next_gipa = (*link).pfn_next_get_instance_proc_addr;
    (*info).u.p_layer_info = (*link).p_next;

    let Some(create) = next_gipa(vk::Instance::null(), c"vkCreateInstance".as_ptr()) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let create: vk::PFN_vkCreateInstance = cast(create);
    record(LAYER_NAMES[ID], "vkCreateInstance");
    let res = create(p_create_info, p_allocator, p_instance);
    if res == vk::Result::SUCCESS {
        let instance = *p_instance;
        layer_instances()
            .lock()
            .expect("layer state poisoned")
            .insert((ID, dispatch_word(instance.as_raw())), LayerInstance { next_gipa, instance });
    }
    res
}

unsafe extern "system" fn layer_destroy_instance<const ID: usize>(
    instance: vk::Instance,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    let state = layer_instances()
        .lock()
        .expect("layer state poisoned")
        .remove(&(ID, dispatch_word(instance.as_raw())));
    record(LAYER_NAMES[ID], "vkDestroyInstance");
    let Some(state) = state else { return };
    if let Some(f) = (state.next_gipa)(state.instance, c"vkDestroyInstance".as_ptr()) {
        let destroy: vk::PFN_vkDestroyInstance = cast(f);
        destroy(instance, p_allocator);
    }
}

unsafe extern "system" fn layer_enumerate_physical_devices<const ID: usize>(
    instance: vk::Instance,
    p_count: *mut u32,
    p_physical_devices: *mut vk::PhysicalDevice,
) -> vk::Result {
    record(LAYER_NAMES[ID], "vkEnumeratePhysicalDevices");
    let Some(state) = instance_state(ID, dispatch_word(instance.as_raw())) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    match (state.next_gipa)(state.instance, c"vkEnumeratePhysicalDevices".as_ptr()) {
        Some(f) => {
            let enumerate: vk::PFN_vkEnumeratePhysicalDevices = cast(f);
            enumerate(instance, p_count, p_physical_devices)
        }
        None => vk::Result::ERROR_INITIALIZATION_FAILED,
    }
}

unsafe extern "system" fn layer_create_device<const ID: usize>(
    physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_device: *mut vk::Device,
) -> vk::Result {
    let info = find_loader_info::<LayerDeviceCreateInfo>(
        (*p_create_info).p_next,
        LOADER_DEVICE_CREATE_INFO,
        LayerFunction::LINK_INFO,
    );
    if info.is_null() {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }
    let link = (*info).u.p_layer_info;
    let next_gipa = (*link).pfn_next_get_instance_proc_addr;
    let next_gdpa = (*link).pfn_next_get_device_proc_addr;
    (*info).u.p_layer_info = (*link).p_next;

    let Some(state) = instance_state(ID, dispatch_word(physical_device.as_raw())) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let Some(create) = next_gipa(state.instance, c"vkCreateDevice".as_ptr()) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let create: vk::PFN_vkCreateDevice = cast(create);
    record(LAYER_NAMES[ID], "vkCreateDevice");
    let res = create(physical_device, p_create_info, p_allocator, p_device);
    if res == vk::Result::SUCCESS && REJECT_CREATED_DEVICES.with(|c| c.get()) {
        record(LAYER_NAMES[ID], "reject vkCreateDevice");
        return vk::Result::ERROR_FEATURE_NOT_PRESENT;
    }
    if res == vk::Result::SUCCESS {
        layer_devices()
            .lock()
            .expect("layer state poisoned")
            .insert((ID, dispatch_word((*p_device).as_raw())), LayerDevice { next_gdpa });
    }
    res
}

unsafe extern "system" fn layer_gdpa<const ID: usize>(device: vk::Device, p_name: *const c_char) -> vk::PFN_vkVoidFunction {
    match CStr::from_ptr(p_name).to_bytes() {
        b"vkGetDeviceProcAddr" => void_fn(layer_gdpa::<ID> as *const ()),
        b"vkDestroyDevice" => void_fn(layer_destroy_device::<ID> as *const ()),
        b"vkDeviceWaitIdle" => void_fn(layer_device_wait_idle::<ID> as *const ()),
        _ => {
            let state = device_state(ID, dispatch_word(device.as_raw()))?;
            (state.next_gdpa)(device, p_name)
        }
    }
}

unsafe extern "system" fn layer_destroy_device<const ID: usize>(
    device: vk::Device,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    let state = layer_devices()
        .lock()
        .expect("layer state poisoned")
        .remove(&(ID, dispatch_word(device.as_raw())));
    record(LAYER_NAMES[ID], "vkDestroyDevice");
    let Some(state) = state else { return };
    if let Some(f) = (state.next_gdpa)(device, c"vkDestroyDevice".as_ptr()) {
        let destroy: vk::PFN_vkDestroyDevice = cast(f);
        destroy(device, p_allocator);
    }
}

unsafe extern "system" fn layer_device_wait_idle<const ID: usize>(device: vk::Device) -> vk::Result {
    record(LAYER_NAMES[ID], "vkDeviceWaitIdle");
    let Some(state) = device_state(ID, dispatch_word(device.as_raw())) else {
        return vk::Result::ERROR_DEVICE_LOST;
    };
    match (state.next_gdpa)(device, c"vkDeviceWaitIdle".as_ptr()) {
        Some(f) => {
            let wait: vk::PFN_vkDeviceWaitIdle = cast(f);
            wait(device)
        }
        None => vk::Result::ERROR_DEVICE_LOST,
    }
}

unsafe extern "system" fn layer_pre_enumerate_extensions<const ID: usize>(
    chain: *const EnumerateInstanceExtensionPropertiesChain,
    p_layer_name: *const c_char,
    p_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    record(LAYER_NAMES[ID], "enter vkEnumerateInstanceExtensionProperties");
    let link = &*chain;
    let res = (link.pfn_next_layer)(link.p_next_link, p_layer_name, p_count, p_properties);
    record(LAYER_NAMES[ID], "leave vkEnumerateInstanceExtensionProperties");
    res
}

unsafe extern "system" fn layer_pre_enumerate_layers<const ID: usize>(
    chain: *const EnumerateInstanceLayerPropertiesChain,
    p_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    record(LAYER_NAMES[ID], "enter vkEnumerateInstanceLayerProperties");
    let link = &*chain;
    let res = (link.pfn_next_layer)(link.p_next_link, p_count, p_properties);
    record(LAYER_NAMES[ID], "leave vkEnumerateInstanceLayerProperties");
    res
}

unsafe extern "system" fn layer_pre_enumerate_version<const ID: usize>(
    chain: *const EnumerateInstanceVersionChain,
    p_api_version: *mut u32,
) -> vk::Result {
    record(LAYER_NAMES[ID], "enter vkEnumerateInstanceVersion");
    let link = &*chain;
    let res = (link.pfn_next_layer)(link.p_next_link, p_api_version);
    record(LAYER_NAMES[ID], "leave vkEnumerateInstanceVersion");
    res
}

// ── Counting host allocator ─────────────────────────────────

/// Host allocation callbacks that count live blocks and can be told to
/// fail every allocation after the first `n`.
#[derive(Default)]
pub struct CountingAllocator {
    fail_after: Cell<Option<usize>>,
    allocations: Cell<usize>,
    live: RefCell<HashMap<usize, std::alloc::Layout>>,
}

impl CountingAllocator {
    pub fn new() -> Box<Self> {
        Box::default()
    }

    pub fn fail_after(&self, n: Option<usize>) {
        self.fail_after.set(n);
        self.allocations.set(0);
    }

    /// Successful allocations since the last `fail_after`.
    pub fn allocations(&self) -> usize {
        self.allocations.get()
    }

    pub fn live(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn callbacks(&self) -> vk::AllocationCallbacks<'_> {
        vk::AllocationCallbacks::default()
            .user_data(self as *const Self as *mut c_void)
            .pfn_allocation(Some(counting_alloc))
            .pfn_reallocation(None)
            .pfn_free(Some(counting_free))
    }
}

unsafe extern "system" fn counting_alloc(
    p_user_data: *mut c_void,
    size: usize,
    alignment: usize,
    _scope: vk::SystemAllocationScope,
) -> *mut c_void {
    let this = &*(p_user_data as *const CountingAllocator);
    if let Some(limit) = this.fail_after.get() {
        if this.allocations.get() >= limit {
            return std::ptr::null_mut();
        }
    }
    let Ok(layout) = std::alloc::Layout::from_size_align(size, alignment) else {
        return std::ptr::null_mut();
    };
    let ptr = std::alloc::alloc(layout);
    if ptr.is_null() {
        return std::ptr::null_mut();
    }
    this.allocations.set(this.allocations.get() + 1);
    this.live.borrow_mut().insert(ptr as usize, layout);
    ptr.cast()
}

unsafe extern "system" fn counting_free(p_user_data: *mut c_void, p_memory: *mut c_void) {
    if p_memory.is_null() {
        return;
    }
    let this = &*(p_user_data as *const CountingAllocator);
    let layout = this.live.borrow_mut().remove(&(p_memory as usize));
    match layout {
        Some(layout) => std::alloc::dealloc(p_memory.cast(), layout),
        None => panic!("freeing {:p}, which this allocator never handed out", p_memory),
    }
}
