//! Business logic and port definitions for Sophia's LLM access layer.
//!
//! This crate defines the provider contract, orchestration, health
//! monitoring and the configuration service, plus the "ports" (the provider
//! factory and the configuration store) that the infrastructure layer
//! implements. It depends only on `sophia-types` -- never on `sophia-infra`
//! or any HTTP/filesystem crate.

pub mod llm;
pub mod service;
