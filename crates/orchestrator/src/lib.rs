//! Execution engine, transparency envelope, and learning scheduler.
//!
//! The engine interprets plans produced by the router: single calls with
//! local retries, ensemble fan-out with quorum and synthesis, and staged
//! validation loops. Every provider attempt reports health and appends an
//! outcome; every accepted plan yields exactly one envelope.

pub mod context;
pub mod engine;
pub mod envelope;
pub mod scheduler;
pub mod scorer;
pub mod sink;

pub use context::CoreContext;
pub use engine::ExecutionEngine;
pub use scheduler::LearningScheduler;
pub use scorer::HeuristicScorer;
pub use sink::BufferingSink;
