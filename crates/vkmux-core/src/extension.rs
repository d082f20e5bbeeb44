use std::ffi::{c_char, CStr};
use std::fmt;

use ash::vk;
use serde::{Deserialize, Serialize};

/// A declared API version, compared on major and minor only.
///
/// Written as `"1.3"` in the settings file. Patch and variant are dropped on
/// conversion from a packed version so comparisons match the way the loader
/// gates behavior on the application's declared version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    pub const V1_0: ApiVersion = ApiVersion::new(1, 0);
    pub const V1_1: ApiVersion = ApiVersion::new(1, 1);
    pub const V1_2: ApiVersion = ApiVersion::new(1, 2);
    pub const V1_3: ApiVersion = ApiVersion::new(1, 3);

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Decode a packed version, treating 0 as 1.0.
    pub fn from_packed(packed: u32) -> Self {
        if packed == 0 {
            return Self::V1_0;
        }
        Self::new(vk::api_version_major(packed), vk::api_version_minor(packed))
    }

    /// Encode with patch and variant set to zero.
    pub fn to_packed(self) -> u32 {
        vk::make_api_version(0, self.major, self.minor, 0)
    }
}

impl Default for ApiVersion {
    fn default() -> Self {
        Self::V1_0
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl TryFrom<String> for ApiVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let mut parts = value.trim().splitn(3, '.');
        let major = parts.next().and_then(|p| p.parse().ok());
        let minor = parts.next().and_then(|p| p.parse().ok());
        match (major, minor) {
            (Some(major), Some(minor)) => Ok(Self::new(major, minor)),
            _ => Err(format!("invalid api version '{}', expected MAJOR.MINOR", value)),
        }
    }
}

impl From<ApiVersion> for String {
    fn from(v: ApiVersion) -> Self {
        v.to_string()
    }
}

/// One extension name plus its revision, as advertised by a backend or layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionProperty {
    pub name: String,
    #[serde(default = "default_spec_version")]
    pub spec_version: u32,
}

impl ExtensionProperty {
    pub fn new(name: impl Into<String>, spec_version: u32) -> Self {
        Self { name: name.into(), spec_version }
    }

    /// Read an API extension record. Returns `None` for an unterminated name.
    pub fn from_vk(props: &vk::ExtensionProperties) -> Option<Self> {
        let name = c_array_to_string(&props.extension_name)?;
        Some(Self::new(name, props.spec_version))
    }

    pub fn to_vk(&self) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        write_c_array(&self.name, &mut props.extension_name);
        props.spec_version = self.spec_version;
        props
    }
}

/// Merge `incoming` into `list`, keeping one entry per name with the highest
/// advertised revision. Insertion order of first appearance is preserved.
pub fn merge_extensions(list: &mut Vec<ExtensionProperty>, incoming: &[ExtensionProperty]) {
    for ext in incoming {
        match list.iter_mut().find(|e| e.name == ext.name) {
            Some(existing) => {
                existing.spec_version = existing.spec_version.max(ext.spec_version);
            }
            None => list.push(ext.clone()),
        }
    }
}

/// Whether `name` appears in `list`.
pub fn contains_extension(list: &[ExtensionProperty], name: &str) -> bool {
    list.iter().any(|e| e.name == name)
}

/// Read a fixed-size, NUL-terminated character array.
pub fn c_array_to_string(src: &[c_char]) -> Option<String> {
    // SAFETY: c_char and u8 have identical layout.
    let bytes: &[u8] = unsafe { std::slice::from_raw_parts(src.as_ptr().cast(), src.len()) };
    CStr::from_bytes_until_nul(bytes)
        .ok()
        .map(|s| s.to_string_lossy().into_owned())
}

/// Copy `src` into a fixed-size character array, truncating and always
/// leaving a terminating NUL.
pub fn write_c_array(src: &str, dst: &mut [c_char]) {
    if dst.is_empty() {
        return;
    }
    let bytes = src.as_bytes();
    let len = std::cmp::min(bytes.len(), dst.len() - 1);
    for i in 0..len {
        dst[i] = bytes[i] as c_char;
    }
    dst[len] = 0;
}

fn default_spec_version() -> u32 {
    1
}
