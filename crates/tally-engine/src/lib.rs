//! # tally-engine
//!
//! Run orchestration for Tally.
//!
//! - [`Orchestrator`]: bounded worker pool over `(tenant, endpoint)` pairs
//!   with failure isolation, a per-tenant auth gate, and cancellation
//! - [`Engine`]: builds the token manager, provider client and destination
//!   from a [`TallyConfig`](tally_config::TallyConfig) and runs them

mod engine;
mod error;
mod orchestrator;

pub use engine::Engine;
pub use error::EngineError;
pub use orchestrator::Orchestrator;
