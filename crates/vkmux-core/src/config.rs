use serde::{Deserialize, Serialize};

use crate::error::LoaderError;
use crate::extension::{ApiVersion, ExtensionProperty};

/// Top-level loader settings, loaded from vkmux.toml.
///
/// This file stands in for driver and layer manifests: it lists the backend
/// libraries the loader may use and the layers it can place on a chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoaderSettings {
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default, rename = "backend")]
    pub backends: Vec<BackendEntry>,
    #[serde(default, rename = "layer")]
    pub layers: Vec<LayerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Sessions declaring this version or newer get "not found" when they
    /// resolve a global entry point through the session-scoped resolver.
    #[serde(default = "default_global_gate")]
    pub global_proc_addr_gate: ApiVersion,
}

/// One installable backend library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendEntry {
    /// Human-readable name used in log output
    pub name: String,
    /// Path handed to the dynamic library bridge
    pub library: String,
    /// Highest API version the backend claims to implement
    #[serde(default)]
    pub api_version: ApiVersion,
}

/// How a layer gets enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerKind {
    /// On unless its disable variable is set (or its enable variable is missing)
    #[serde(rename = "implicit")]
    Implicit,
    /// Only when the application or VKMUX_INSTANCE_LAYERS asks for it
    #[default]
    #[serde(rename = "explicit")]
    Explicit,
}

/// One interceptor library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerEntry {
    pub name: String,
    pub library: String,
    #[serde(default)]
    pub kind: LayerKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub spec_version: ApiVersion,
    #[serde(default = "default_implementation_version")]
    pub implementation_version: u32,
    /// Implicit layers only: variable that must be set for the layer to load
    pub enable_environment: Option<String>,
    /// Implicit layers only: variable that turns the layer off when set
    pub disable_environment: Option<String>,
    #[serde(default)]
    pub instance_extensions: Vec<ExtensionProperty>,
    #[serde(default)]
    pub device_extensions: Vec<ExtensionProperty>,
    #[serde(default)]
    pub functions: LayerFunctions,
    #[serde(default)]
    pub pre_instance_functions: PreInstanceFunctions,
}

/// Exported symbol names of the layer's main entry points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerFunctions {
    #[serde(default = "default_gipa_symbol")]
    pub get_instance_proc_addr: String,
    #[serde(default = "default_gdpa_symbol")]
    pub get_device_proc_addr: String,
    #[serde(default = "default_negotiate_symbol")]
    pub negotiate_interface: String,
}

/// Symbols a layer exports to intercept the calls made before any session
/// exists. Each one is optional; absent means the layer is skipped on that
/// particular chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreInstanceFunctions {
    pub enumerate_instance_extension_properties: Option<String>,
    pub enumerate_instance_layer_properties: Option<String>,
    pub enumerate_instance_version: Option<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            global_proc_addr_gate: default_global_gate(),
        }
    }
}

impl Default for LayerFunctions {
    fn default() -> Self {
        Self {
            get_instance_proc_addr: default_gipa_symbol(),
            get_device_proc_addr: default_gdpa_symbol(),
            negotiate_interface: default_negotiate_symbol(),
        }
    }
}

impl LayerEntry {
    pub fn is_implicit(&self) -> bool {
        self.kind == LayerKind::Implicit
    }
}

impl LoaderSettings {
    /// Parse settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, LoaderError> {
        let settings: LoaderSettings =
            toml::from_str(content).map_err(|e| LoaderError::Settings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file.
    pub fn load(path: &str) -> Result<Self, LoaderError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LoaderError::Settings(format!("{}: {}", path, e)))?;
        Self::from_toml(&content)
    }

    /// Load settings from file if it exists, otherwise return defaults.
    pub fn load_or_default(path: &str) -> Self {
        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!("using default loader settings: {}", e);
                Self::default()
            }
        }
    }

    pub fn find_layer(&self, name: &str) -> Option<&LayerEntry> {
        self.layers.iter().find(|l| l.name == name)
    }

    fn validate(&self) -> Result<(), LoaderError> {
        for (i, layer) in self.layers.iter().enumerate() {
            if self.layers[..i].iter().any(|l| l.name == layer.name) {
                return Err(LoaderError::Settings(format!(
                    "layer '{}' is declared more than once",
                    layer.name
                )));
            }
        }
        Ok(())
    }
}

/// Returns the default settings file path based on platform conventions.
/// Search order:
/// 1. `VKMUX_CONFIG` if set
/// 2. System-wide config: `%PROGRAMDATA%\vkmux\vkmux.toml` (Windows) or `/etc/vkmux/vkmux.toml` (Linux/macOS)
/// 3. Local fallback: `./vkmux.toml`
pub fn default_config_path() -> String {
    if let Ok(path) = std::env::var(vkmux_common::platform::CONFIG_ENV) {
        return path;
    }
    #[cfg(windows)]
    {
        let programdata = std::env::var("PROGRAMDATA")
            .unwrap_or_else(|_| r"C:\ProgramData".to_string());
        let system_path = format!(r"{}\vkmux\vkmux.toml", programdata);
        if std::path::Path::new(&system_path).exists() {
            return system_path;
        }
    }
    #[cfg(not(windows))]
    {
        let system_path = "/etc/vkmux/vkmux.toml";
        if std::path::Path::new(system_path).exists() {
            return system_path.to_string();
        }
    }
    "vkmux.toml".to_string()
}

fn default_global_gate() -> ApiVersion {
    ApiVersion::V1_3
}

fn default_implementation_version() -> u32 {
    1
}

fn default_gipa_symbol() -> String {
    "vkGetInstanceProcAddr".to_string()
}

fn default_gdpa_symbol() -> String {
    "vkGetDeviceProcAddr".to_string()
}

fn default_negotiate_symbol() -> String {
    "vkNegotiateLoaderLayerInterfaceVersion".to_string()
}
