//! Analysis pipeline core: shared state, the budgeted invoker, response
//! normalization, deterministic fallbacks, merging and the orchestrator.

pub mod fallback;
pub mod invoker;
pub mod merge;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod remote;
pub mod sink;
