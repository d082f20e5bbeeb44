//! Host memory for loader-owned objects.
//!
//! Every object the loader hands to an application (or keeps on its
//! behalf) is placed through the application's allocation callbacks when
//! it supplied them, so its accounting sees the loader's usage.

use std::alloc::Layout;
use std::ffi::c_void;
use std::ops::Deref;
use std::ptr::NonNull;

use ash::vk;
use vkmux_core::LoaderError;

/// Copy of the application's allocation callbacks, or the global allocator.
#[derive(Clone, Copy)]
pub struct HostAllocator {
    callbacks: Option<vk::AllocationCallbacks<'static>>,
}

// The callbacks are required by the API to be callable from any thread.
unsafe impl Send for HostAllocator {}
unsafe impl Sync for HostAllocator {}

impl HostAllocator {
    pub const SYSTEM: HostAllocator = HostAllocator { callbacks: None };

    /// Build from the optional `pAllocator` argument of a create call.
    ///
    /// # Safety
    /// `callbacks` must be null or point to valid allocation callbacks.
    pub unsafe fn from_callbacks(callbacks: *const vk::AllocationCallbacks<'_>) -> Self {
        if callbacks.is_null() {
            return Self::SYSTEM;
        }
        let cb = std::ptr::read(callbacks.cast::<vk::AllocationCallbacks<'static>>());
        if cb.pfn_allocation.is_none() || cb.pfn_free.is_none() {
            return Self::SYSTEM;
        }
        Self { callbacks: Some(cb) }
    }

    /// Pointer to pass on as `pAllocator`; valid while `self` is.
    pub fn callbacks_ptr(&self) -> *const vk::AllocationCallbacks<'static> {
        match &self.callbacks {
            Some(cb) => cb,
            None => std::ptr::null(),
        }
    }

    /// Allocate storage for `value` and move it in. On allocation failure
    /// `value` is dropped and `OutOfHostMemory` is returned.
    pub fn alloc<T>(&self, scope: vk::SystemAllocationScope, value: T) -> Result<HostBox<T>, LoaderError> {
        let layout = Layout::new::<T>();
        let raw = if layout.size() == 0 {
            NonNull::<T>::dangling().as_ptr().cast::<u8>()
        } else {
            match self.callbacks.as_ref().and_then(|cb| cb.pfn_allocation.map(|f| (f, cb.p_user_data))) {
                Some((allocation, user_data)) => unsafe {
                    allocation(user_data, layout.size(), layout.align(), scope).cast::<u8>()
                },
                None => unsafe { std::alloc::alloc(layout) },
            }
        };

        let Some(ptr) = NonNull::new(raw.cast::<T>()) else {
            tracing::debug!("host allocation of {} bytes failed", layout.size());
            return Err(LoaderError::OutOfHostMemory);
        };
        unsafe { ptr.as_ptr().write(value) };
        Ok(HostBox { ptr, allocator: *self })
    }

    unsafe fn release(&self, ptr: *mut u8, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        match self.callbacks.as_ref().and_then(|cb| cb.pfn_free.map(|f| (f, cb.p_user_data))) {
            Some((free, user_data)) => free(user_data, ptr.cast::<c_void>()),
            None => std::alloc::dealloc(ptr, layout),
        }
    }
}

/// Owning pointer to a value placed by a [`HostAllocator`]. The value never
/// moves, so its address can be handed across the API boundary.
pub struct HostBox<T> {
    ptr: NonNull<T>,
    allocator: HostAllocator,
}

impl<T> HostBox<T> {
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Give up ownership; the value stays where it is until
    /// [`HostBox::from_raw`] takes it back.
    pub fn into_raw(this: Self) -> *mut T {
        let ptr = this.ptr.as_ptr();
        std::mem::forget(this);
        ptr
    }

    /// # Safety
    /// `ptr` must come from [`HostBox::into_raw`] on a box created by an
    /// allocator equivalent to `allocator`, and must not be reclaimed twice.
    pub unsafe fn from_raw(ptr: *mut T, allocator: HostAllocator) -> Self {
        Self { ptr: NonNull::new_unchecked(ptr), allocator }
    }
}

impl<T> Deref for HostBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> std::ops::DerefMut for HostBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for HostBox<T> {
    fn drop(&mut self) {
        unsafe {
            std::ptr::drop_in_place(self.ptr.as_ptr());
            self.allocator.release(self.ptr.as_ptr().cast(), Layout::new::<T>());
        }
    }
}
