//! Dispatchable handle layout shared by loader and backends.
//!
//! Every dispatchable object (instance, physical device, device, queue,
//! command buffer) starts with one pointer-sized word. Backends initialize
//! it to [`ICD_LOADER_MAGIC`]; the loader overwrites it with a pointer to
//! the dispatch data that owns the object.

use std::ffi::c_void;

/// The value backends place in the first word of new dispatchable objects.
pub const ICD_LOADER_MAGIC: usize = 0x01CDC0DE;

/// Read the first word of a dispatchable object.
///
/// # Safety
/// `object` must point to at least one readable pointer-sized word.
#[inline(always)]
pub unsafe fn loader_data(object: *const c_void) -> *const c_void {
    *(object as *const *const c_void)
}

/// Overwrite the first word of a dispatchable object.
///
/// # Safety
/// `object` must point to at least one writable pointer-sized word.
#[inline]
pub unsafe fn set_loader_data(object: *mut c_void, data: *const c_void) {
    *(object as *mut *const c_void) = data;
}

/// Whether a freshly created backend object carries the expected marker.
///
/// # Safety
/// `object` must point to at least one readable pointer-sized word.
pub unsafe fn has_icd_magic(object: *const c_void) -> bool {
    (loader_data(object) as usize & 0xFFFF_FFFF) == ICD_LOADER_MAGIC
}
