//! Infrastructure layer for Sophia.
//!
//! Implements the ports defined in `sophia-core`: HTTP adapters for each LLM
//! vendor behind [`llm::HttpProviderFactory`], and [`store::JsonFileStore`]
//! for configuration, health, the active selection and backups. Also loads
//! `config.toml` and resolves the data directory.

pub mod config;
pub mod filesystem;
pub mod llm;
pub mod store;
