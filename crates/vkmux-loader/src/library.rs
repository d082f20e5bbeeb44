//! Dynamic library bridge.
//!
//! Everything that opens a shared library goes through [`LibraryBridge`],
//! so the rest of the loader only ever sees symbols. A library stays open
//! for as long as any `Arc<dyn NativeLibrary>` to it is alive.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use libloading::{Library, Symbol};
use tracing::{debug, info};
use vkmux_core::{LoaderError, Result};

/// An open shared library.
pub trait NativeLibrary: Send + Sync {
    fn path(&self) -> &str;

    /// Resolve an exported symbol, `None` if it is absent.
    fn symbol(&self, name: &CStr) -> vk::PFN_vkVoidFunction;
}

/// Opens shared libraries by path.
pub trait LibraryBridge: Send + Sync {
    fn open(&self, path: &str) -> Result<Arc<dyn NativeLibrary>>;
}

/// The platform dynamic loader.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLibraries;

struct SystemLibrary {
    path: String,
    lib: Library,
}

impl LibraryBridge for SystemLibraries {
    fn open(&self, path: &str) -> Result<Arc<dyn NativeLibrary>> {
        match unsafe { Library::new(path) } {
            Ok(lib) => {
                info!("loaded library: {}", path);
                Ok(Arc::new(SystemLibrary { path: path.to_string(), lib }))
            }
            Err(e) => {
                debug!("failed to load {}: {}", path, e);
                Err(LoaderError::Library {
                    path: path.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

impl NativeLibrary for SystemLibrary {
    fn path(&self) -> &str {
        &self.path
    }

    fn symbol(&self, name: &CStr) -> vk::PFN_vkVoidFunction {
        unsafe {
            self.lib
                .get(name.to_bytes_with_nul())
                .ok()
                .map(|s: Symbol<unsafe extern "system" fn()>| *s)
        }
    }
}

impl Drop for SystemLibrary {
    fn drop(&mut self) {
        debug!("closing library: {}", self.path);
    }
}
