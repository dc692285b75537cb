pub mod api;
pub mod channels;
pub mod server;

pub use channels::{ChannelOptions, ChannelStats};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
