use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy of the host bridge.
///
/// Only [`HostError::EngineNotFound`] is recoverable: the caller may fix
/// its paths or install a runtime and start again. Every other variant
/// aborts the operation that raised it. No operation retries internally.
#[derive(Debug, Error)]
pub enum HostError {
    /// No engine runtime was found in any probed location.
    #[error("{message}")]
    EngineNotFound { message: String },

    /// The engine's native library exists but could not be loaded.
    #[error("failed to load engine library {path}: {reason}")]
    LibraryLoadFailure { path: PathBuf, reason: String },

    /// A bootstrap entry point is missing from the engine library.
    #[error("engine library is missing the {symbol} entry point")]
    BootstrapEntryPointMissing { symbol: &'static str },

    /// The engine's initialize entry point returned a negative status.
    #[error("engine initialization failed - status: {status:#010x}")]
    EngineInitializationFailure { status: i32 },

    /// A managed entry point could not be resolved into a delegate.
    #[error("failed to resolve managed entry point {entry_point} - status: {status:#010x}")]
    DelegateResolutionFailure {
        entry_point: &'static str,
        status: i32,
    },

    /// A bridge operation was invoked without a successfully started engine.
    #[error("engine host is not started")]
    HostNotStarted,

    /// The request itself is malformed and was rejected before reaching the
    /// engine.
    #[error("malformed request: {message}")]
    RequestShapeError { message: String },

    /// The engine executed the request and reported failure.
    #[error("{message}")]
    EngineCallFailure { message: String },
}

impl HostError {
    /// True for failures a caller can recover from by adjusting its inputs
    /// and starting again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, HostError::EngineNotFound { .. })
    }
}
