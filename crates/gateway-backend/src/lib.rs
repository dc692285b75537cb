pub mod bootstrap;
pub mod error;
pub mod mock;
pub mod native;
pub mod resolver;
pub mod rest;

pub use bootstrap::AtelierBootstrapper;
pub use error::BackendError;
pub use native::NativeConnector;
pub use resolver::SettingsResolver;
pub use rest::{AtelierEndpoint, RestClient, RestResponse};
