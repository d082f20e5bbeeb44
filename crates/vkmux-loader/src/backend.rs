//! Backend registry: negotiating with backend libraries and the
//! per-session backend instances.

use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use tracing::{debug, warn};
use vkmux_core::config::BackendEntry;
use vkmux_core::{ExtensionProperty, LoaderError, Result};

use crate::chain::PfnGetPhysicalDeviceProcAddr;
use crate::dispatch_table::InstanceDispatchTable;
use crate::extensions;
use crate::ffi::cast_fn;
use crate::layer::resolve;
use crate::library::{LibraryBridge, NativeLibrary};
use crate::loader::LoaderInner;

/// Highest backend interface version this loader speaks.
pub const LOADER_MAX_ICD_INTERFACE_VERSION: u32 = 6;

type PfnNegotiateLoaderIcdInterfaceVersion = unsafe extern "system" fn(p_supported_version: *mut u32) -> vk::Result;

/// A backend library that has been opened and negotiated with.
pub struct ScannedBackend {
    pub entry: BackendEntry,
    pub interface_version: u32,
    pub get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub get_physical_device_proc_addr: Option<PfnGetPhysicalDeviceProcAddr>,
    pub extensions: Vec<ExtensionProperty>,
    library: Arc<dyn NativeLibrary>,
}

impl ScannedBackend {
    pub fn load(bridge: &dyn LibraryBridge, entry: &BackendEntry) -> Result<Self> {
        let library = bridge.open(&entry.library)?;

        let mut interface_version = 1;
        if let Some(negotiate) = resolve::<PfnNegotiateLoaderIcdInterfaceVersion>(
            &*library,
            "vk_icdNegotiateLoaderICDInterfaceVersion",
        )? {
            let mut version = LOADER_MAX_ICD_INTERFACE_VERSION;
            let res = unsafe { negotiate(&mut version) };
            if res != vk::Result::SUCCESS {
                return Err(LoaderError::IncompatibleDriver);
            }
            interface_version = version;
        }

        let gipa = match resolve::<vk::PFN_vkGetInstanceProcAddr>(&*library, "vk_icdGetInstanceProcAddr")? {
            Some(f) => f,
            None => resolve::<vk::PFN_vkGetInstanceProcAddr>(&*library, "vkGetInstanceProcAddr")?.ok_or_else(|| {
                LoaderError::Library {
                    path: entry.library.clone(),
                    reason: "missing vk_icdGetInstanceProcAddr".to_string(),
                }
            })?,
        };
        let gpdpa = resolve::<PfnGetPhysicalDeviceProcAddr>(&*library, "vk_icdGetPhysicalDeviceProcAddr")?;

        let mut backend = Self {
            entry: entry.clone(),
            interface_version,
            get_instance_proc_addr: gipa,
            get_physical_device_proc_addr: gpdpa,
            extensions: Vec::new(),
            library,
        };
        backend.extensions = backend.query_instance_extensions()?;
        debug!(
            "backend {} negotiated interface {} with {} instance extensions",
            entry.name,
            interface_version,
            backend.extensions.len()
        );
        Ok(backend)
    }

    /// Resolve a global (instance-less) entry point.
    pub fn global_proc(&self, name: &CStr) -> vk::PFN_vkVoidFunction {
        unsafe { (self.get_instance_proc_addr)(vk::Instance::null(), name.as_ptr()) }
    }

    fn query_instance_extensions(&self) -> Result<Vec<ExtensionProperty>> {
        let Some(f) = self.global_proc(c"vkEnumerateInstanceExtensionProperties") else {
            return Ok(Vec::new());
        };
        let enumerate: vk::PFN_vkEnumerateInstanceExtensionProperties = unsafe { cast_fn(f) };
        unsafe { extensions::query_extension_properties(|count, props| enumerate(std::ptr::null(), count, props)) }
            .map_err(|res| {
                LoaderError::InitializationFailed(format!(
                    "backend {} failed to enumerate extensions: {:?}",
                    self.entry.name, res
                ))
            })
    }

    pub fn library(&self) -> &dyn NativeLibrary {
        &*self.library
    }
}

/// Open and negotiate every configured backend. Backends that fail are
/// logged and left out.
pub(crate) fn scan_backends(inner: &LoaderInner) -> Vec<ScannedBackend> {
    inner
        .settings
        .backends
        .iter()
        .filter_map(|entry| match ScannedBackend::load(&*inner.bridge, entry) {
            Ok(backend) => Some(backend),
            Err(e) => {
                warn!("skipping backend {}: {}", entry.name, e);
                None
            }
        })
        .collect()
}

/// One backend's native instance inside a session.
pub struct BackendInstance {
    pub index: usize,
    pub name: String,
    pub instance: vk::Instance,
    pub dispatch: InstanceDispatchTable,
    pub get_physical_device_proc_addr: Option<PfnGetPhysicalDeviceProcAddr>,
    allocator: *const vk::AllocationCallbacks<'static>,
}

impl BackendInstance {
    /// Create the backend's native instance from the application's create
    /// info, keeping only the extensions this backend reports.
    ///
    /// # Safety
    /// `create_info` must be valid and `allocator` must stay valid for the
    /// life of the returned value.
    pub unsafe fn create(
        index: usize,
        backend: &ScannedBackend,
        create_info: &vk::InstanceCreateInfo<'_>,
        allocator: *const vk::AllocationCallbacks<'static>,
        requested: &[String],
    ) -> Result<Self> {
        let create: vk::PFN_vkCreateInstance = match backend.global_proc(c"vkCreateInstance") {
            Some(f) => cast_fn(f),
            None => {
                return Err(LoaderError::InitializationFailed(format!(
                    "backend {} has no vkCreateInstance",
                    backend.entry.name
                )))
            }
        };

        let names: Vec<CString> = requested
            .iter()
            .filter(|n| vkmux_core::extension::contains_extension(&backend.extensions, n.as_str()))
            .filter_map(|n| CString::new(n.as_str()).ok())
            .collect();
        let name_ptrs: Vec<*const c_char> = names.iter().map(|n| n.as_ptr()).collect();

        let mut ci = *create_info;
        ci.enabled_layer_count = 0;
        ci.pp_enabled_layer_names = std::ptr::null();
        ci.enabled_extension_count = name_ptrs.len() as u32;
        ci.pp_enabled_extension_names = if name_ptrs.is_empty() { std::ptr::null() } else { name_ptrs.as_ptr() };

        let mut instance = vk::Instance::null();
        let res = create(&ci, allocator, &mut instance);
        if res != vk::Result::SUCCESS {
            return Err(LoaderError::Chain(res));
        }

        let gipa = backend.get_instance_proc_addr;
        let mut dispatch = InstanceDispatchTable::empty();
        dispatch.fill_with(|name| gipa(instance, name.as_ptr()));

        debug!("backend {} created instance {:#x}", backend.entry.name, instance.as_raw());
        Ok(Self {
            index,
            name: backend.entry.name.clone(),
            instance,
            dispatch,
            get_physical_device_proc_addr: backend.get_physical_device_proc_addr,
            allocator,
        })
    }
}

impl Drop for BackendInstance {
    fn drop(&mut self) {
        if let Some(destroy) = self.dispatch.destroy_instance() {
            debug!("destroying backend {} instance", self.name);
            unsafe { destroy(self.instance, self.allocator) };
        }
    }
}
