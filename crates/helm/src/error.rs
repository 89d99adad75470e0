//! Error types for the governor.

use helm_config::ConfigError;
use helm_kernel::KernelError;
use helm_types::ImplementationRef;
use thiserror::Error;

use crate::implementation::CallError;

/// Result type for governor operations.
pub type Result<T> = std::result::Result<T, HelmError>;

/// Errors that can occur during governor operations.
#[derive(Debug, Error)]
pub enum HelmError {
    /// The kernel rejected the command. State is unchanged.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// No code has been deployed under this handle.
    #[error("implementation {0} is not deployed")]
    UnknownImplementation(ImplementationRef),

    /// Deployed code is immutable; a handle can only be deployed once.
    #[error("implementation {0} is already deployed")]
    AlreadyDeployed(ImplementationRef),

    /// A forwarded call tried to re-enter the governor.
    #[error("cannot {action} while a forwarded call is in flight")]
    ReentrantCall { action: &'static str },

    /// The implementation returned an error. Nothing was committed.
    #[error("call to {method} on {implementation} failed: {source}")]
    Call {
        implementation: ImplementationRef,
        method: String,
        #[source]
        source: CallError,
    },

    /// Configuration could not be turned into governance parameters.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Internal error (lock poisoning, missing effect).
    #[error("internal error: {0}")]
    Internal(String),
}

impl HelmError {
    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the kernel error, if this is one.
    pub fn as_kernel(&self) -> Option<&KernelError> {
        match self {
            HelmError::Kernel(err) => Some(err),
            _ => None,
        }
    }
}
