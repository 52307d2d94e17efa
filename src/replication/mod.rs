//! Synchronizing a shelve with remote stores.

mod endpoint;
mod replicator;

pub use endpoint::{sanitize, RemoteEndpoint};
pub use replicator::{FetchReport, PushReport, Replicator};
