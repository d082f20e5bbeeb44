use std::hash::Hash;

use dashmap::DashMap;

/// Bidirectional mapping between loader-issued wrapper addresses and the
/// handles they stand for. Lookups go both ways so enumeration can reuse an
/// identity for a handle it has already seen, and a wrapper can always be
/// traced back to the handle it was issued for.
pub struct IdentityMap<K: Eq + Hash + Copy> {
    /// Wrapper address -> wrapped handle
    wrapper_to_native: DashMap<usize, K>,
    /// Wrapped handle -> wrapper address
    native_to_wrapper: DashMap<K, usize>,
}

impl<K: Eq + Hash + Copy> IdentityMap<K> {
    pub fn new() -> Self {
        Self {
            wrapper_to_native: DashMap::new(),
            native_to_wrapper: DashMap::new(),
        }
    }

    /// Record that `wrapper` was issued for `native`.
    pub fn insert(&self, wrapper: usize, native: K) {
        self.wrapper_to_native.insert(wrapper, native);
        self.native_to_wrapper.insert(native, wrapper);
    }

    /// Look up the handle a wrapper stands for.
    pub fn to_native(&self, wrapper: usize) -> Option<K> {
        self.wrapper_to_native.get(&wrapper).map(|v| *v)
    }

    /// Look up the wrapper previously issued for a handle.
    pub fn to_wrapper(&self, native: &K) -> Option<usize> {
        self.native_to_wrapper.get(native).map(|v| *v)
    }

    /// Remove a pair by wrapper address.
    pub fn remove_by_wrapper(&self, wrapper: usize) -> Option<K> {
        if let Some((_, native)) = self.wrapper_to_native.remove(&wrapper) {
            self.native_to_wrapper.remove(&native);
            Some(native)
        } else {
            None
        }
    }

    pub fn clear(&self) {
        self.wrapper_to_native.clear();
        self.native_to_wrapper.clear();
    }

    /// Return number of issued identities.
    pub fn len(&self) -> usize {
        self.wrapper_to_native.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wrapper_to_native.is_empty()
    }
}

impl<K: Eq + Hash + Copy> Default for IdentityMap<K> {
    fn default() -> Self {
        Self::new()
    }
}
