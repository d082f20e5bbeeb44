//! The loader context: settings, library bridge, environment and
//! accounting shared by every session it creates.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tracing::info;
use vkmux_core::config::default_config_path;
use vkmux_core::LoaderSettings;

use crate::layer::LayerRegistry;
use crate::library::{LibraryBridge, SystemLibraries};
use crate::tracker::{LoaderStats, ResourceTracker};

/// Where environment variables are read from.
#[derive(Debug, Clone, Default)]
pub enum Environment {
    /// The real process environment
    #[default]
    Process,
    /// A fixed set of variables; everything else reads as unset
    Overrides(HashMap<String, String>),
}

impl Environment {
    pub fn var(&self, key: &str) -> Option<String> {
        match self {
            Environment::Process => std::env::var(key).ok(),
            Environment::Overrides(vars) => vars.get(key).cloned(),
        }
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.var(key).is_some_and(|v| !v.is_empty())
    }
}

pub(crate) struct LoaderInner {
    pub settings: LoaderSettings,
    pub bridge: Arc<dyn LibraryBridge>,
    pub environment: Environment,
    pub tracker: ResourceTracker,
}

/// Handle to a loader context. Cheap to clone; every session keeps one.
#[derive(Clone)]
pub struct Loader {
    pub(crate) inner: Arc<LoaderInner>,
}

static GLOBAL: OnceLock<Loader> = OnceLock::new();

impl Loader {
    pub fn builder() -> LoaderBuilder {
        LoaderBuilder::default()
    }

    /// The process-wide loader behind the exported entry points. The first
    /// call initializes logging and reads the settings file.
    pub fn global() -> &'static Loader {
        GLOBAL.get_or_init(|| {
            vkmux_common::logging::init_logging();
            let path = default_config_path();
            let settings = LoaderSettings::load_or_default(&path);
            info!(
                "vkmux loader initialized on {} ({} backends, {} layers from {})",
                vkmux_common::platform::platform_name(),
                settings.backends.len(),
                settings.layers.len(),
                path
            );
            Loader::builder().settings(settings).build()
        })
    }

    pub fn settings(&self) -> &LoaderSettings {
        &self.inner.settings
    }

    pub fn stats(&self) -> LoaderStats {
        self.inner.tracker.stats()
    }

    pub(crate) fn layers(&self) -> LayerRegistry<'_> {
        self.inner.layers()
    }
}

impl LoaderInner {
    pub(crate) fn layers(&self) -> LayerRegistry<'_> {
        LayerRegistry::new(&self.settings, &self.environment)
    }
}

#[derive(Default)]
pub struct LoaderBuilder {
    settings: Option<LoaderSettings>,
    bridge: Option<Arc<dyn LibraryBridge>>,
    environment: Environment,
}

impl LoaderBuilder {
    pub fn settings(mut self, settings: LoaderSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn bridge(mut self, bridge: Arc<dyn LibraryBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn build(self) -> Loader {
        Loader {
            inner: Arc::new(LoaderInner {
                settings: self.settings.unwrap_or_default(),
                bridge: self.bridge.unwrap_or_else(|| Arc::new(SystemLibraries)),
                environment: self.environment,
                tracker: ResourceTracker::new(),
            }),
        }
    }
}
