//! Observability for Sophia: tracing subscriber setup and the OTel GenAI
//! attribute names used on generation spans.

pub mod genai_attrs;
pub mod tracing_setup;
