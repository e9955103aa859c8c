//! Provider registry: per-provider capability, cost, and health tracking.
//!
//! The registry answers "which providers can serve this request right now"
//! and absorbs health reports from the execution engine. Provider HTTP
//! clients themselves live outside the core behind
//! [`domain::ProviderAdapter`].

pub mod registry;
pub mod testing;

pub use registry::{HealthEvent, ProviderDescriptor, ProviderRegistry, RegistryStatistics};
