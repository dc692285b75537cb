pub mod backend;
pub mod content;
pub mod errors;
pub mod ids;
pub mod kernel;
pub mod message;
pub mod namespace;
pub mod wire;

pub use errors::GatewayError;
pub use message::{Channel, Envelope, Header};
pub use namespace::{NamespaceKey, ServerSpec, Target};
