//! Sync layer: pulls raw contract listings from the public registry search.

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{REGISTRY_FIELDS, RegistryClient, RegistryConfig, SyncError};
