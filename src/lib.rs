pub mod chronicle;
pub mod config;
pub mod diff;
pub mod outline;
pub mod snapshot;
pub mod store;
