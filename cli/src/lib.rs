pub mod host;
pub mod logging;

pub use host::{SharedWriter, serve, spawn_notifier};
