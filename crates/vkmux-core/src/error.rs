use ash::vk;

pub type Result<T> = std::result::Result<T, LoaderError>;

/// Recoverable loader failures. Every variant is reported to the caller as
/// an API result code; none of them is ever allowed to unwind across FFI.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoaderError {
    #[error("out of host memory")]
    OutOfHostMemory,

    #[error("extension not present: {0}")]
    ExtensionNotPresent(String),

    #[error("layer not present: {0}")]
    LayerNotPresent(String),

    #[error("no compatible backend found")]
    IncompatibleDriver,

    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    #[error("failed to load library {path}: {reason}")]
    Library { path: String, reason: String },

    #[error("settings error: {0}")]
    Settings(String),

    /// A result code returned by a layer or backend, passed through as-is.
    #[error("chain returned {0:?}")]
    Chain(vk::Result),
}

impl LoaderError {
    /// Map the error onto the result code the application sees.
    pub fn to_vk_result(&self) -> vk::Result {
        match self {
            LoaderError::OutOfHostMemory => vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            LoaderError::ExtensionNotPresent(_) => vk::Result::ERROR_EXTENSION_NOT_PRESENT,
            LoaderError::LayerNotPresent(_) => vk::Result::ERROR_LAYER_NOT_PRESENT,
            LoaderError::IncompatibleDriver => vk::Result::ERROR_INCOMPATIBLE_DRIVER,
            LoaderError::InitializationFailed(_)
            | LoaderError::Library { .. }
            | LoaderError::Settings(_) => vk::Result::ERROR_INITIALIZATION_FAILED,
            LoaderError::Chain(code) => *code,
        }
    }

    /// Wrap a non-success result code coming back from a chain call.
    pub fn check(code: vk::Result) -> Result<()> {
        if code == vk::Result::SUCCESS {
            Ok(())
        } else {
            Err(LoaderError::Chain(code))
        }
    }
}

impl From<LoaderError> for vk::Result {
    fn from(err: LoaderError) -> Self {
        err.to_vk_result()
    }
}

/// Terminate the process because the application broke a precondition the
/// loader cannot recover from (foreign handle, missing output pointer,
/// corrupted identity tag).
#[cold]
pub fn contract_violation(message: &str) -> ! {
    tracing::error!("contract violation: {}", message);
    eprintln!("vkmux: contract violation: {}", message);
    std::process::abort()
}
