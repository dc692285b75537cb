//! Kernel runtime: per-namespace registries, backend workers and the
//! message router that turns Jupyter requests into backend calls.

pub mod directory;
pub mod magic;
pub mod output;
pub mod process;
pub mod registry;
pub mod router;

pub use directory::NamespaceDirectory;
pub use process::{Process, Published};
pub use registry::NamespaceRegistry;
pub use router::{ChannelContext, MessageRouter, Outbox};
