mod error;
mod handler;
mod registry;
mod watcher;

pub use error::{BoxError, Error, HandlerError};
pub use handler::{Handler, HandlerResult};
pub use registry::{Event, Registry};
pub use watcher::EndpointWatcher;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Matches every network plugin when listed in `Handler::network_plugins`.
pub const ANY_NETWORK_PLUGIN: &str = "*";
