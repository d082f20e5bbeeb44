//! Layer registry and layer activation.

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};
use vkmux_common::platform::{split_list, INSTANCE_LAYERS_ENV};
use vkmux_core::config::LayerEntry;
use vkmux_core::{LoaderError, LoaderSettings, Result};

use crate::chain::{
    NegotiateLayerInterface, PfnGetPhysicalDeviceProcAddr, PfnNegotiateLoaderLayerInterfaceVersion,
    CURRENT_LOADER_LAYER_INTERFACE_VERSION, LAYER_NEGOTIATE_INTERFACE_STRUCT,
};
use crate::extensions::layer_properties;
use crate::ffi::cast_fn;
use crate::library::{LibraryBridge, NativeLibrary};
use crate::loader::Environment;

/// Read-only view over the configured layers.
pub struct LayerRegistry<'a> {
    settings: &'a LoaderSettings,
    environment: &'a Environment,
}

impl<'a> LayerRegistry<'a> {
    pub fn new(settings: &'a LoaderSettings, environment: &'a Environment) -> Self {
        Self { settings, environment }
    }

    pub fn all(&self) -> &'a [LayerEntry] {
        &self.settings.layers
    }

    pub fn find(&self, name: &str) -> Option<&'a LayerEntry> {
        self.settings.find_layer(name)
    }

    /// Implicit layers are on unless their disable variable is set; one
    /// that names an enable variable also needs that variable set.
    pub fn is_implicit_enabled(&self, layer: &LayerEntry) -> bool {
        if !layer.is_implicit() {
            return false;
        }
        if let Some(var) = &layer.disable_environment {
            if self.environment.is_set(var) {
                return false;
            }
        }
        match &layer.enable_environment {
            Some(var) => self.environment.is_set(var),
            None => true,
        }
    }

    pub fn enabled_implicit(&self) -> impl Iterator<Item = &'a LayerEntry> + '_ {
        self.all().iter().filter(move |l| self.is_implicit_enabled(l))
    }

    /// Layers to place on a session chain, outermost first: enabled
    /// implicit layers, then the environment list, then the application's
    /// request. Each layer appears once. The second list is the subset the
    /// application asked for itself.
    pub fn activation_order(&self, requested: &[String]) -> Result<(Vec<&'a LayerEntry>, Vec<&'a LayerEntry>)> {
        let mut order: Vec<&'a LayerEntry> = Vec::new();

        for layer in self.enabled_implicit() {
            push_unique(&mut order, layer);
        }

        if let Some(list) = self.environment.var(INSTANCE_LAYERS_ENV) {
            for name in split_list(&list) {
                match self.find(&name) {
                    Some(layer) => push_unique(&mut order, layer),
                    None => warn!("{} names unknown layer {}", INSTANCE_LAYERS_ENV, name),
                }
            }
        }

        let mut app_layers = Vec::new();
        for name in requested {
            let layer = self
                .find(name)
                .ok_or_else(|| LoaderError::LayerNotPresent(name.clone()))?;
            push_unique(&mut order, layer);
            push_unique(&mut app_layers, layer);
        }

        Ok((order, app_layers))
    }

    pub fn properties(&self) -> Vec<vk::LayerProperties> {
        self.all().iter().map(layer_properties).collect()
    }
}

/// A layer whose library is open and whose entry points are resolved.
pub struct ActivatedLayer {
    pub entry: LayerEntry,
    pub get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub get_device_proc_addr: Option<vk::PFN_vkGetDeviceProcAddr>,
    pub get_physical_device_proc_addr: Option<PfnGetPhysicalDeviceProcAddr>,
    pub interface_version: u32,
    library: Arc<dyn NativeLibrary>,
}

impl ActivatedLayer {
    pub fn activate(bridge: &dyn LibraryBridge, entry: &LayerEntry) -> Result<Self> {
        let library = bridge.open(&entry.library)?;

        let mut gipa = None;
        let mut gdpa = None;
        let mut gpdpa = None;
        let mut interface_version = 1;

        let negotiate = resolve::<PfnNegotiateLoaderLayerInterfaceVersion>(&*library, &entry.functions.negotiate_interface)?;
        if let Some(negotiate) = negotiate {
            let mut request = NegotiateLayerInterface {
                s_type: LAYER_NEGOTIATE_INTERFACE_STRUCT,
                p_next: std::ptr::null_mut(),
                loader_layer_interface_version: CURRENT_LOADER_LAYER_INTERFACE_VERSION,
                pfn_get_instance_proc_addr: None,
                pfn_get_device_proc_addr: None,
                pfn_get_physical_device_proc_addr: None,
            };
            let res = unsafe { negotiate(&mut request) };
            if res != vk::Result::SUCCESS {
                return Err(LoaderError::InitializationFailed(format!(
                    "layer {} rejected interface negotiation: {:?}",
                    entry.name, res
                )));
            }
            interface_version = request.loader_layer_interface_version;
            gipa = request.pfn_get_instance_proc_addr;
            gdpa = request.pfn_get_device_proc_addr;
            gpdpa = request.pfn_get_physical_device_proc_addr;
        }

        if gipa.is_none() {
            gipa = resolve::<vk::PFN_vkGetInstanceProcAddr>(&*library, &entry.functions.get_instance_proc_addr)?;
        }
        if gdpa.is_none() {
            gdpa = resolve::<vk::PFN_vkGetDeviceProcAddr>(&*library, &entry.functions.get_device_proc_addr)?;
        }

        let get_instance_proc_addr = gipa.ok_or_else(|| LoaderError::Library {
            path: entry.library.clone(),
            reason: format!("missing {}", entry.functions.get_instance_proc_addr),
        })?;

        debug!("activated layer {} (interface {})", entry.name, interface_version);
        Ok(Self {
            entry: entry.clone(),
            get_instance_proc_addr,
            get_device_proc_addr: gdpa,
            get_physical_device_proc_addr: gpdpa,
            interface_version,
            library,
        })
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn library(&self) -> &dyn NativeLibrary {
        &*self.library
    }
}

impl Drop for ActivatedLayer {
    fn drop(&mut self) {
        debug!("deactivating layer {}", self.entry.name);
    }
}

/// Resolve a configured symbol name to a typed function pointer.
pub(crate) fn resolve<F: Copy>(library: &dyn NativeLibrary, symbol: &str) -> Result<Option<F>> {
    let name = CString::new(symbol).map_err(|_| LoaderError::Library {
        path: library.path().to_string(),
        reason: format!("invalid symbol name {:?}", symbol),
    })?;
    Ok(library.symbol(&name).map(|f| unsafe { cast_fn::<F>(f) }))
}

fn push_unique<'a>(list: &mut Vec<&'a LayerEntry>, layer: &'a LayerEntry) {
    if !list.iter().any(|l| l.name == layer.name) {
        list.push(layer);
    }
}
