//! The calls that work before any session exists: instance extension,
//! layer and version queries.
//!
//! Each call builds a throwaway chain. The terminal link performs the
//! loader's own behavior; every enabled implicit layer that exports an
//! override of the call is prepended in front of it. The head is invoked
//! once and the chain and the libraries opened for it are released
//! before returning.

use std::ffi::{c_char, c_void};
use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};
use vkmux_core::config::PreInstanceFunctions;
use vkmux_core::extension::merge_extensions;
use vkmux_core::{ExtensionProperty, Result};

use crate::alloc::HostAllocator;
use crate::backend::scan_backends;
use crate::chain::{
    Chain, EnumerateInstanceExtensionPropertiesChain, EnumerateInstanceLayerPropertiesChain,
    EnumerateInstanceVersionChain, PfnLayerEnumerateInstanceExtensionProperties,
    PfnLayerEnumerateInstanceLayerProperties, PfnLayerEnumerateInstanceVersion, PreInstanceLink,
};
use crate::extensions::write_extension_properties;
use crate::ffi::{self, read_optional_str, require};
use crate::layer::resolve;
use crate::library::NativeLibrary;
use crate::loader::{Loader, LoaderInner};
use crate::state;

/// Version reported by the version query.
pub fn loader_api_version() -> u32 {
    vk::make_api_version(0, 1, 3, vk::HEADER_VERSION)
}

impl Loader {
    /// Build the chain for one pre-session call. The terminal link's
    /// `p_next_link` carries the loader context to the terminator.
    fn pre_instance_chain<L: PreInstanceLink>(
        &self,
        terminator: L::Pfn,
        pick: impl Fn(&PreInstanceFunctions) -> Option<&str>,
    ) -> Result<(Chain<L>, Vec<Arc<dyn NativeLibrary>>)> {
        let inner: &LoaderInner = &self.inner;
        let mut chain = Chain::new(HostAllocator::SYSTEM, inner.tracker.clone());
        chain.prepend(L::new(terminator, inner as *const LoaderInner as *const c_void))?;

        let mut libraries = Vec::new();
        for layer in self.layers().enabled_implicit() {
            let Some(symbol) = pick(&layer.pre_instance_functions) else {
                continue;
            };

            let library = match inner.bridge.open(&layer.library) {
                Ok(lib) => lib,
                Err(e) => {
                    warn!("unable to load implicit layer {}: {}", layer.name, e);
                    continue;
                }
            };
            let function = match resolve::<L::Pfn>(&*library, symbol) {
                Ok(Some(f)) => f,
                _ => {
                    warn!("unable to resolve {} in implicit layer {}", symbol, layer.name);
                    libraries.push(library);
                    continue;
                }
            };
            libraries.push(library);

            chain.prepend(L::new(function, std::ptr::null()))?;
            debug!("layer {} intercepts pre-session call via {}", layer.name, symbol);
        }

        Ok((chain, libraries))
    }

    /// Run `call` on the head of a freshly built chain, then tear it down.
    fn run_pre_instance<L: PreInstanceLink>(
        &self,
        terminator: L::Pfn,
        pick: impl Fn(&PreInstanceFunctions) -> Option<&str>,
        call: impl FnOnce(&L) -> vk::Result,
    ) -> vk::Result {
        let _lock = state::lock();
        let (chain, libraries) = match self.pre_instance_chain::<L>(terminator, pick) {
            Ok(built) => built,
            Err(e) => return e.to_vk_result(),
        };
        let res = match chain.head() {
            Some(head) => call(head),
            None => vk::Result::ERROR_INITIALIZATION_FAILED,
        };
        drop(chain);
        drop(libraries);
        res
    }

    /// # Safety
    /// Arguments must follow `vkEnumerateInstanceExtensionProperties`.
    pub unsafe fn enumerate_instance_extension_properties(
        &self,
        p_layer_name: *const c_char,
        p_property_count: *mut u32,
        p_properties: *mut vk::ExtensionProperties,
    ) -> vk::Result {
        require(p_property_count, "vkEnumerateInstanceExtensionProperties: pPropertyCount");
        self.run_pre_instance::<EnumerateInstanceExtensionPropertiesChain>(
            terminator_enumerate_instance_extension_properties as PfnLayerEnumerateInstanceExtensionProperties,
            |f| f.enumerate_instance_extension_properties.as_deref(),
            |head| unsafe {
                (head.pfn_next_layer)(head.p_next_link, p_layer_name, p_property_count, p_properties)
            },
        )
    }

    /// # Safety
    /// Arguments must follow `vkEnumerateInstanceLayerProperties`.
    pub unsafe fn enumerate_instance_layer_properties(
        &self,
        p_property_count: *mut u32,
        p_properties: *mut vk::LayerProperties,
    ) -> vk::Result {
        require(p_property_count, "vkEnumerateInstanceLayerProperties: pPropertyCount");
        self.run_pre_instance::<EnumerateInstanceLayerPropertiesChain>(
            terminator_enumerate_instance_layer_properties as PfnLayerEnumerateInstanceLayerProperties,
            |f| f.enumerate_instance_layer_properties.as_deref(),
            |head| unsafe { (head.pfn_next_layer)(head.p_next_link, p_property_count, p_properties) },
        )
    }

    /// # Safety
    /// Arguments must follow `vkEnumerateInstanceVersion`.
    pub unsafe fn enumerate_instance_version(&self, p_api_version: *mut u32) -> vk::Result {
        require(p_api_version, "vkEnumerateInstanceVersion: pApiVersion");
        self.run_pre_instance::<EnumerateInstanceVersionChain>(
            terminator_enumerate_instance_version as PfnLayerEnumerateInstanceVersion,
            |f| f.enumerate_instance_version.as_deref(),
            |head| unsafe { (head.pfn_next_layer)(head.p_next_link, p_api_version) },
        )
    }
}

impl LoaderInner {
    /// Instance extensions available without naming a layer: every
    /// backend's list plus the enabled implicit layers', merged.
    pub(crate) fn available_instance_extensions(&self) -> Vec<ExtensionProperty> {
        let mut list = Vec::new();
        for backend in scan_backends(self) {
            merge_extensions(&mut list, &backend.extensions);
        }
        for layer in self.layers().enabled_implicit() {
            merge_extensions(&mut list, &layer.instance_extensions);
        }
        list
    }
}

// ── Terminators ─────────────────────────────────────────────

unsafe fn context<'a>(p_next_link: *const c_void) -> &'a LoaderInner {
    &*(p_next_link as *const LoaderInner)
}

unsafe extern "system" fn terminator_enumerate_instance_extension_properties(
    chain: *const EnumerateInstanceExtensionPropertiesChain,
    p_layer_name: *const c_char,
    p_property_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    let inner = context(chain.cast());

    match read_optional_str(p_layer_name) {
        Some(name) => {
            match inner.layers().find(name) {
                Some(layer) => write_extension_properties(&layer.instance_extensions, p_property_count, p_properties),
                None => vk::Result::ERROR_LAYER_NOT_PRESENT,
            }
        }
        None => {
            let list = inner.available_instance_extensions();
            write_extension_properties(&list, p_property_count, p_properties)
        }
    }
}

unsafe extern "system" fn terminator_enumerate_instance_layer_properties(
    chain: *const EnumerateInstanceLayerPropertiesChain,
    p_property_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    let inner = context(chain.cast());
    let props = inner.layers().properties();
    ffi::fill_array(&props, p_property_count, p_properties)
}

unsafe extern "system" fn terminator_enumerate_instance_version(
    _chain: *const EnumerateInstanceVersionChain,
    p_api_version: *mut u32,
) -> vk::Result {
    *p_api_version = loader_api_version();
    vk::Result::SUCCESS
}
