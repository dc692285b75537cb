//! Seams between the gateway core and the outside world: resolving a
//! namespace, preparing the backend, and running code on it.

use async_trait::async_trait;

use crate::errors::GatewayError;
use crate::kernel::BackendLanguage;
use crate::namespace::{NamespaceKey, Target};

/// A live connection to one remote interpreter process.
///
/// Owned by exactly one worker task, so methods take `&mut self`.
#[async_trait]
pub trait ExecutionBackend: Send {
    /// Run `code` and return its textual output.
    ///
    /// A backend that ran the code but reported failure returns
    /// [`GatewayError::ExecutionFailure`] carrying the failure text.
    async fn evaluate(&mut self, code: &str, language: BackendLanguage) -> Result<String, GatewayError>;

    fn supports_interrupt(&self) -> bool {
        false
    }

    /// Ask the backend to abandon the current evaluation.
    async fn interrupt(&mut self) -> Result<(), GatewayError> {
        Err(GatewayError::Unsupported("interrupt".into()))
    }

    /// Release the connection. Must be safe to call more than once.
    async fn terminate(&mut self);
}

/// Opens backends against a resolved target.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(&self, target: &Target) -> Result<Box<dyn ExecutionBackend>, GatewayError>;
}

/// Maps a namespace key to connection parameters.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve(&self, key: &NamespaceKey) -> Result<Target, GatewayError>;
}

/// Makes sure the remote side has whatever the execution backend needs.
#[async_trait]
pub trait Bootstrapper: Send + Sync {
    async fn ensure_support(&self, target: &Target) -> Result<(), GatewayError>;
}

/// Bootstrapper for backends that need no preparation.
pub struct NoBootstrap;

#[async_trait]
impl Bootstrapper for NoBootstrap {
    async fn ensure_support(&self, _target: &Target) -> Result<(), GatewayError> {
        Ok(())
    }
}
