//! Persistence adapters for the provider configuration service.
//!
//! Implements the [`ConfigStore`](sophia_core::service::store::ConfigStore)
//! port from `sophia-core` over plain JSON files.

pub mod json;

pub use json::JsonFileStore;
