/// Environment variable naming an explicit settings file.
pub const CONFIG_ENV: &str = "VKMUX_CONFIG";

/// Environment variable listing extra layers to force on.
pub const INSTANCE_LAYERS_ENV: &str = "VKMUX_INSTANCE_LAYERS";

/// Separator used by path-list style environment variables.
pub fn list_separator() -> char {
    #[cfg(windows)]
    { ';' }
    #[cfg(not(windows))]
    { ':' }
}

/// Split a separator-delimited environment value into its non-empty parts.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c| c == list_separator() || c == ';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Returns the platform name string.
pub fn platform_name() -> &'static str {
    #[cfg(target_os = "windows")]
    { "windows" }
    #[cfg(target_os = "linux")]
    { "linux" }
    #[cfg(target_os = "macos")]
    { "macos" }
    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    { "unknown" }
}
