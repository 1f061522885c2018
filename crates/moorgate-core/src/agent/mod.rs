//! Bounded agentic conversation loop

mod engine;

pub use engine::{ChatEngine, ChatOutcome, EngineConfig, PendingAuthorization};
