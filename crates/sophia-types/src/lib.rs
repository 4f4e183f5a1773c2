//! Shared domain types for Sophia's LLM access layer.
//!
//! Messages, responses, the LLM error taxonomy, provider configuration and
//! health records, and the global config document.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod config;
pub mod error;
pub mod llm;
pub mod provider;
