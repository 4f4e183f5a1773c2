//! Provider configuration service and its persistence port.

pub mod provider_config;
pub mod store;
