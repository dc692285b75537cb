use crate::wire::FormatError;

/// Machine-readable failure categories returned to REST clients alongside
/// the long message, so tooling can branch without parsing prose.
pub mod short {
    pub const NO_TARGET: &str = "NOTARGET";
    pub const NO_KERNELS: &str = "NOKERNELS";
    pub const KERNEL_START: &str = "KERNELSTART";
    pub const BACKEND: &str = "BACKEND";
    pub const NOT_FOUND: &str = "NOTFOUND";
    pub const UNSUPPORTED: &str = "UNSUPPORTED";
    pub const BAD_FORMAT: &str = "BADFORMAT";
    pub const EXECUTION: &str = "EXECUTION";
}

/// Error taxonomy shared by every layer of the gateway.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    /// Namespace string malformed or server identity unknown.
    #[error("target unresolved: {0}")]
    TargetUnresolved(String),

    /// Cannot reach the backend, or it lacks the support class.
    #[error("{message}")]
    BackendUnavailable { short: &'static str, message: String },

    #[error("kernel not found: {0}")]
    KernelNotFound(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// The backend ran the code and reported a non-ok result.
    #[error("{0}")]
    ExecutionFailure(String),
}

impl GatewayError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            short: short::BACKEND,
            message: message.into(),
        }
    }

    pub fn no_kernels(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            short: short::NO_KERNELS,
            message: message.into(),
        }
    }

    pub fn kernel_start(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            short: short::KERNEL_START,
            message: message.into(),
        }
    }

    pub fn short_message(&self) -> &'static str {
        match self {
            Self::TargetUnresolved(_) => short::NO_TARGET,
            Self::BackendUnavailable { short, .. } => short,
            Self::KernelNotFound(_) => short::NOT_FOUND,
            Self::Unsupported(_) => short::UNSUPPORTED,
            Self::Format(_) => short::BAD_FORMAT,
            Self::ExecutionFailure(_) => short::EXECUTION,
        }
    }

    /// HTTP status the REST surface reports for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::TargetUnresolved(_) | Self::Format(_) => 400,
            Self::KernelNotFound(_) => 404,
            Self::Unsupported(_) => 501,
            Self::BackendUnavailable { .. } | Self::ExecutionFailure(_) => 500,
        }
    }

    /// Message shown to REST clients.
    pub fn detail(&self) -> String {
        match self {
            Self::TargetUnresolved(message) => message.clone(),
            other => other.to_string(),
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::TargetUnresolved(_) => "target_unresolved",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::KernelNotFound(_) => "kernel_not_found",
            Self::Unsupported(_) => "unsupported",
            Self::Format(_) => "format_error",
            Self::ExecutionFailure(_) => "execution_failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_constructors_carry_short_codes() {
        assert_eq!(GatewayError::no_kernels("x").short_message(), "NOKERNELS");
        assert_eq!(GatewayError::kernel_start("x").short_message(), "KERNELSTART");
        assert_eq!(GatewayError::backend("x").short_message(), "BACKEND");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(GatewayError::TargetUnresolved("bad".into()).http_status(), 400);
        assert_eq!(GatewayError::KernelNotFound("k".into()).http_status(), 404);
        assert_eq!(GatewayError::Unsupported("interrupt".into()).http_status(), 501);
        assert_eq!(GatewayError::no_kernels("none").http_status(), 500);
        assert_eq!(
            GatewayError::Format(FormatError::TooFewSegments(2)).http_status(),
            400
        );
    }

    #[test]
    fn backend_unavailable_displays_message_only() {
        let err = GatewayError::kernel_start("connection refused");
        assert_eq!(err.to_string(), "connection refused");
    }

    #[test]
    fn detail_drops_unresolved_prefix() {
        let err = GatewayError::TargetUnresolved("Server 'x' not defined.".into());
        assert_eq!(err.detail(), "Server 'x' not defined.");
        assert_eq!(GatewayError::KernelNotFound("k1".into()).detail(), "kernel not found: k1");
    }

    #[test]
    fn format_error_converts() {
        let err: GatewayError = FormatError::UnknownChannel("bogus".into()).into();
        assert!(matches!(err, GatewayError::Format(_)));
        assert_eq!(err.error_kind(), "format_error");
        assert_eq!(err.short_message(), "BADFORMAT");
    }
}
