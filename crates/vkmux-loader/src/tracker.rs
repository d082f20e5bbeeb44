//! Live-object accounting for loader-owned resources.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Session,
    ChainLink,
    PhysicalDevice,
    Device,
}

#[derive(Default)]
struct Counters {
    sessions: AtomicUsize,
    chain_links: AtomicUsize,
    physical_devices: AtomicUsize,
    devices: AtomicUsize,
}

impl Counters {
    fn slot(&self, kind: ResourceKind) -> &AtomicUsize {
        match kind {
            ResourceKind::Session => &self.sessions,
            ResourceKind::ChainLink => &self.chain_links,
            ResourceKind::PhysicalDevice => &self.physical_devices,
            ResourceKind::Device => &self.devices,
        }
    }
}

/// Snapshot of live loader-owned objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    pub sessions: usize,
    pub chain_links: usize,
    pub physical_devices: usize,
    pub devices: usize,
}

#[derive(Clone, Default)]
pub struct ResourceTracker {
    counters: Arc<Counters>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more live object of `kind` until the guard is dropped.
    pub fn track(&self, kind: ResourceKind) -> Tracked {
        self.counters.slot(kind).fetch_add(1, Ordering::Relaxed);
        Tracked { counters: self.counters.clone(), kind }
    }

    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            sessions: self.counters.sessions.load(Ordering::Relaxed),
            chain_links: self.counters.chain_links.load(Ordering::Relaxed),
            physical_devices: self.counters.physical_devices.load(Ordering::Relaxed),
            devices: self.counters.devices.load(Ordering::Relaxed),
        }
    }
}

pub struct Tracked {
    counters: Arc<Counters>,
    kind: ResourceKind,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.counters.slot(self.kind).fetch_sub(1, Ordering::Relaxed);
    }
}
