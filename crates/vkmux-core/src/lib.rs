//! Data model shared by the vkmux loader: settings, errors, extension and
//! version values, and the identity map used for handle translation.

pub mod config;
pub mod error;
pub mod extension;
pub mod identity_map;

pub use config::LoaderSettings;
pub use error::{contract_violation, LoaderError, Result};
pub use extension::{ApiVersion, ExtensionProperty};
pub use identity_map::IdentityMap;
