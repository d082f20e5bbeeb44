//! Sessions: creation through the layer chain, and destruction.

use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use tracing::{debug, info, warn};
use vkmux_core::config::LayerEntry;
use vkmux_core::{contract_violation, ApiVersion, ExtensionProperty, LoaderError, Result};

use crate::alloc::{HostAllocator, HostBox};
use crate::backend::{scan_backends, BackendInstance, ScannedBackend};
use crate::chain::{Chain, LayerInstanceCreateInfo, LayerInstanceLink};
use crate::device::LoaderDevice;
use crate::dispatch::{loader_data, set_loader_data};
use crate::dispatch_table::InstanceDispatchTable;
use crate::extensions::{merged, validate_requested, InstanceExtensions};
use crate::ffi::{cast_fn, read_string_array, require};
use crate::layer::ActivatedLayer;
use crate::loader::Loader;
use crate::physical_device::PhysicalDeviceRegistry;
use crate::state::{self, LoaderLock};
use crate::terminator;
use crate::tracker::{ResourceKind, Tracked};

/// Identity tag of a session.
pub const SESSION_MAGIC: u64 = 0x10AD_ED01_0110_ADED;

/// The loader object behind a `VkInstance` handed to the application.
#[repr(C)]
pub struct Session {
    /// Must stay the first field: dispatchable handles start with it.
    dispatch: *const InstanceDispatchTable,
    magic: u64,

    pub(crate) api_version: ApiVersion,
    pub(crate) enabled: InstanceExtensions,
    pub(crate) allocator: HostAllocator,
    pub(crate) loader: Loader,
    /// Instance handle at the top of the chain, as returned by the first layer.
    pub(crate) chain_instance: Cell<vk::Instance>,
    /// Set by the device trampoline for the terminator to pick up.
    pub(crate) pending_device: Cell<*mut LoaderDevice>,

    // The fields below are declared in teardown order.
    pub(crate) devices: RefCell<Vec<HostBox<LoaderDevice>>>,
    pub(crate) physical_devices: PhysicalDeviceRegistry,
    pub(crate) backends: RefCell<Vec<Box<BackendInstance>>>,
    instance_chain: Option<Chain<LayerInstanceLink>>,
    table: Option<HostBox<InstanceDispatchTable>>,
    pub(crate) extensions: Vec<ExtensionProperty>,
    pub(crate) scanned: Vec<ScannedBackend>,
    pub(crate) layers: Vec<ActivatedLayer>,
    pub(crate) app_layers: Vec<LayerEntry>,
    _tracked: Tracked,
}

impl Session {
    fn new(loader: &Loader, allocator: HostAllocator, api_version: ApiVersion) -> Self {
        Self {
            dispatch: std::ptr::null(),
            magic: SESSION_MAGIC,
            api_version,
            enabled: InstanceExtensions::empty(),
            allocator,
            loader: loader.clone(),
            chain_instance: Cell::new(vk::Instance::null()),
            pending_device: Cell::new(std::ptr::null_mut()),
            devices: RefCell::new(Vec::new()),
            physical_devices: PhysicalDeviceRegistry::new(),
            backends: RefCell::new(Vec::new()),
            instance_chain: None,
            table: None,
            extensions: Vec::new(),
            scanned: Vec::new(),
            layers: Vec::new(),
            app_layers: Vec::new(),
            _tracked: loader.inner.tracker.track(ResourceKind::Session),
        }
    }

    pub fn handle(&self) -> vk::Instance {
        vk::Instance::from_raw(self as *const Session as u64)
    }

    #[inline(always)]
    pub(crate) fn table(&self) -> &InstanceDispatchTable {
        unsafe { &*self.dispatch }
    }

    pub(crate) fn dispatch_ptr(&self) -> *const InstanceDispatchTable {
        self.dispatch
    }

    pub fn api_version(&self) -> ApiVersion {
        self.api_version
    }

    pub fn enabled_extensions(&self) -> InstanceExtensions {
        self.enabled
    }

    pub fn layer_names(&self) -> Vec<String> {
        self.layers.iter().map(|l| l.name().to_string()).collect()
    }

    /// Resolve an application handle that must name a live session.
    /// Anything else is a contract violation.
    pub(crate) unsafe fn from_live_handle<'a>(lock: &LoaderLock, instance: vk::Instance, caller: &str) -> &'a Session {
        let addr = instance.as_raw() as usize;
        if addr == 0 || !lock.is_live_session(addr) {
            contract_violation(&format!("{}: invalid instance {:#x}", caller, addr));
        }
        let session = &*(addr as *const Session);
        if session.magic != SESSION_MAGIC {
            contract_violation(&format!("{}: instance {:#x} has a corrupted identity tag", caller, addr));
        }
        session
    }

    /// Like [`Session::from_live_handle`] but without consulting the live
    /// list, for handles that arrive from inside the chain.
    pub(crate) unsafe fn from_chain_handle<'a>(instance: vk::Instance, caller: &str) -> &'a Session {
        let addr = instance.as_raw() as usize;
        if addr == 0 || (*(addr as *const Session)).magic != SESSION_MAGIC {
            contract_violation(&format!("{}: {:#x} is not a loader instance", caller, addr));
        }
        &*(addr as *const Session)
    }

    /// Activate the layers for this session, outermost first.
    fn activate_layers(&mut self, requested: &[String]) -> Result<()> {
        let loader = self.loader.clone();
        let (order, app_layers) = loader.layers().activation_order(requested)?;
        self.app_layers = app_layers.into_iter().cloned().collect();

        for entry in order {
            match ActivatedLayer::activate(&*loader.inner.bridge, entry) {
                Ok(layer) => self.layers.push(layer),
                Err(e) if requested.iter().any(|r| *r == entry.name) => {
                    warn!("requested layer {} failed to load: {}", entry.name, e);
                    return Err(LoaderError::LayerNotPresent(entry.name.clone()));
                }
                Err(e) => warn!("skipping layer {}: {}", entry.name, e),
            }
        }
        Ok(())
    }

    /// Build the session chain and send the create call down it. On
    /// success the dispatch table is refilled from the top of the chain.
    unsafe fn create_through_chain(
        this: *mut Session,
        create_info: &vk::InstanceCreateInfo<'_>,
        p_allocator: *const vk::AllocationCallbacks<'_>,
    ) -> Result<()> {
        let session = &*this;
        let mut chain: Chain<LayerInstanceLink> =
            Chain::new(session.allocator, session.loader.inner.tracker.clone());

        // Link i is consumed by layer i-1 and leads to layer i; the
        // terminal link leads to the loader's terminators.
        if !session.layers.is_empty() {
            chain.prepend(LayerInstanceLink {
                p_next: std::ptr::null_mut(),
                pfn_next_get_instance_proc_addr: terminator::get_instance_proc_addr,
                pfn_next_get_physical_device_proc_addr: Some(terminator::get_physical_device_proc_addr),
            })?;
            for layer in session.layers.iter().skip(1).rev() {
                chain.prepend(LayerInstanceLink {
                    p_next: std::ptr::null_mut(),
                    pfn_next_get_instance_proc_addr: layer.get_instance_proc_addr,
                    pfn_next_get_physical_device_proc_addr: layer.get_physical_device_proc_addr,
                })?;
            }
        }

        let first_gipa: vk::PFN_vkGetInstanceProcAddr = match session.layers.first() {
            Some(layer) => layer.get_instance_proc_addr,
            None => terminator::get_instance_proc_addr,
        };

        // Layers advance the link record in place.
        let mut loader_data_info = LayerInstanceCreateInfo::loader_data_callback(set_instance_loader_data);
        loader_data_info.p_next = create_info.p_next;
        let mut link_info = LayerInstanceCreateInfo::link_info(chain.head_ptr() as *mut LayerInstanceLink);
        link_info.p_next = &loader_data_info as *const LayerInstanceCreateInfo as *const c_void;

        let mut ci = *create_info;
        ci.p_next = &mut link_info as *mut LayerInstanceCreateInfo as *const c_void;

        let create: vk::PFN_vkCreateInstance = match first_gipa(vk::Instance::null(), c"vkCreateInstance".as_ptr()) {
            Some(f) => cast_fn(f),
            None => {
                return Err(LoaderError::InitializationFailed(
                    "first layer does not provide vkCreateInstance".to_string(),
                ))
            }
        };

        let mut created = session.handle();
        LoaderError::check(create(&ci, p_allocator, &mut created))?;

        let session = &mut *this;
        session.chain_instance.set(created);
        session.instance_chain = Some(chain);
        if let Some(table) = session.table.as_mut() {
            table.fill_with(|name| first_gipa(created, name.as_ptr()));
        }
        Ok(())
    }
}

impl Loader {
    /// Create a session.
    ///
    /// # Safety
    /// Arguments must follow `vkCreateInstance`.
    pub unsafe fn create_instance(
        &self,
        p_create_info: *const vk::InstanceCreateInfo<'_>,
        p_allocator: *const vk::AllocationCallbacks<'_>,
        p_instance: *mut vk::Instance,
    ) -> vk::Result {
        require(p_create_info, "vkCreateInstance: pCreateInfo");
        require(p_instance, "vkCreateInstance: pInstance");

        let lock = state::lock();
        match self.create_session(&lock, &*p_create_info, p_allocator) {
            Ok(instance) => {
                *p_instance = instance;
                vk::Result::SUCCESS
            }
            Err(e) => {
                debug!("vkCreateInstance failed: {}", e);
                e.to_vk_result()
            }
        }
    }

    unsafe fn create_session(
        &self,
        lock: &LoaderLock,
        create_info: &vk::InstanceCreateInfo<'_>,
        p_allocator: *const vk::AllocationCallbacks<'_>,
    ) -> Result<vk::Instance> {
        let allocator = HostAllocator::from_callbacks(p_allocator);
        let api_version = if create_info.p_application_info.is_null() {
            ApiVersion::V1_0
        } else {
            ApiVersion::from_packed((*create_info.p_application_info).api_version)
        };

        let mut session = allocator.alloc(
            vk::SystemAllocationScope::INSTANCE,
            Session::new(self, allocator, api_version),
        )?;

        let requested_layers = read_string_array(create_info.pp_enabled_layer_names, create_info.enabled_layer_count);
        session.activate_layers(&requested_layers)?;

        session.scanned = scan_backends(&self.inner);
        if session.scanned.is_empty() {
            warn!("vkCreateInstance: found no backends");
            return Err(LoaderError::IncompatibleDriver);
        }

        let backend_lists: Vec<&[ExtensionProperty]> =
            session.scanned.iter().map(|b| b.extensions.as_slice()).collect();
        session.extensions = merged(&backend_lists);

        let requested: Vec<String> =
            read_string_array(create_info.pp_enabled_extension_names, create_info.enabled_extension_count);
        {
            let layer_lists: Vec<&[ExtensionProperty]> =
                session.layers.iter().map(|l| l.entry.instance_extensions.as_slice()).collect();
            validate_requested(&requested, &session.extensions, &layer_lists)?;
        }

        let mut table = allocator.alloc(vk::SystemAllocationScope::INSTANCE, InstanceDispatchTable::empty())?;
        table.fill_with(terminator::instance_proc);
        session.dispatch = table.as_ptr();
        session.table = Some(table);

        let ptr = session.as_mut_ptr();
        lock.register_session(ptr as usize);

        if let Err(e) = Session::create_through_chain(ptr, create_info, p_allocator) {
            lock.unregister_session(ptr as usize);
            return Err(e);
        }

        session.enabled = InstanceExtensions::from_names(&requested);
        info!(
            "created instance {:#x}: api {}, {} layers, {} backends",
            ptr as usize,
            session.api_version,
            session.layers.len(),
            session.backends.borrow().len()
        );
        Ok(vk::Instance::from_raw(HostBox::into_raw(session) as u64))
    }
}

impl Loader {
    /// Sessions created through this loader that are still live.
    pub fn live_sessions(&self) -> usize {
        let lock = state::lock();
        lock.sessions()
            .into_iter()
            .filter(|&addr| {
                let session = unsafe { &*(addr as *const Session) };
                Arc::ptr_eq(&session.loader.inner, &self.inner)
            })
            .count()
    }
}

/// `vkDestroyInstance`
///
/// # Safety
/// `instance` must be null or a handle returned by `vkCreateInstance`.
#[no_mangle]
pub unsafe extern "system" fn vkDestroyInstance(instance: vk::Instance, p_allocator: *const vk::AllocationCallbacks<'_>) {
    if instance == vk::Instance::null() {
        return;
    }
    let lock = state::lock();
    let session = Session::from_live_handle(&lock, instance, "vkDestroyInstance");

    if !session.devices.borrow().is_empty() {
        warn!("vkDestroyInstance: {} devices were not destroyed", session.devices.borrow().len());
    }

    if let Some(destroy) = session.table().destroy_instance() {
        destroy(session.chain_instance.get(), p_allocator);
    }

    let ptr = session as *const Session as *mut Session;
    lock.unregister_session(ptr as usize);
    let allocator = session.allocator;
    drop(HostBox::from_raw(ptr, allocator));
    debug!("destroyed instance {:#x}", ptr as usize);
}

/// Handed to layers so objects they create get the session's dispatch word.
unsafe extern "system" fn set_instance_loader_data(instance: vk::Instance, object: *mut c_void) -> vk::Result {
    if instance == vk::Instance::null() || object.is_null() {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }
    set_loader_data(object, loader_data(instance.as_raw() as *const c_void));
    vk::Result::SUCCESS
}
