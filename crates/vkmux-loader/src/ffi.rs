//! Small helpers shared by the exported entry points.

use std::ffi::{c_char, CStr};

use ash::vk;
use vkmux_core::contract_violation;

/// Cast any `extern "system"` function item to the untyped void function
/// pointer handed out by the proc-address resolvers.
macro_rules! void_fn {
    ($f:expr) => {
        Some(unsafe {
            std::mem::transmute::<*const (), unsafe extern "system" fn()>($f as *const ())
        })
    };
}
pub(crate) use void_fn;

/// Reinterpret an untyped pointer returned by a proc-address resolver.
///
/// # Safety
/// `F` must be the function pointer type the symbol was declared with.
pub unsafe fn cast_fn<F: Copy>(f: unsafe extern "system" fn()) -> F {
    debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<unsafe extern "system" fn()>());
    std::mem::transmute_copy(&f)
}

pub unsafe fn read_string_array(ptrs: *const *const c_char, count: u32) -> Vec<String> {
    if ptrs.is_null() || count == 0 {
        return Vec::new();
    }
    (0..count as usize)
        .filter_map(|i| {
            let ptr = *ptrs.add(i);
            if ptr.is_null() {
                None
            } else {
                Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
            }
        })
        .collect()
}

pub unsafe fn read_optional_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        None
    } else {
        CStr::from_ptr(ptr).to_str().ok()
    }
}

/// Abort unless `ptr` is non-null. Used for the output pointers the API
/// requires the caller to pass.
pub fn require<T>(ptr: *const T, what: &str) {
    if ptr.is_null() {
        contract_violation(&format!("{} must not be NULL", what));
    }
}

/// A dispatch slot that nothing down the chain filled was called anyway.
#[cold]
pub fn missing_entry_point(name: &str) -> ! {
    contract_violation(&format!("{} was called but no layer or backend provides it", name))
}

/// The two-call enumeration idiom: with a null output array report the
/// count; otherwise copy as many items as fit and return `INCOMPLETE` when
/// some were left out.
pub unsafe fn fill_array<T: Copy>(items: &[T], p_count: *mut u32, p_out: *mut T) -> vk::Result {
    if p_out.is_null() {
        *p_count = items.len() as u32;
        return vk::Result::SUCCESS;
    }

    let requested = *p_count as usize;
    let count = std::cmp::min(requested, items.len());
    for (i, item) in items.iter().take(count).enumerate() {
        *p_out.add(i) = *item;
    }
    *p_count = count as u32;

    if count < items.len() {
        vk::Result::INCOMPLETE
    } else {
        vk::Result::SUCCESS
    }
}

/// Collect the results of a native two-call enumeration into a Vec.
pub unsafe fn collect_array<T: Copy + Default>(
    mut call: impl FnMut(*mut u32, *mut T) -> vk::Result,
) -> Result<Vec<T>, vk::Result> {
    loop {
        let mut count = 0u32;
        let res = call(&mut count, std::ptr::null_mut());
        if res != vk::Result::SUCCESS {
            return Err(res);
        }
        let mut items = vec![T::default(); count as usize];
        let res = call(&mut count, items.as_mut_ptr());
        match res {
            vk::Result::SUCCESS => {
                items.truncate(count as usize);
                return Ok(items);
            }
            // The set grew between the two calls.
            vk::Result::INCOMPLETE => continue,
            err => return Err(err),
        }
    }
}
