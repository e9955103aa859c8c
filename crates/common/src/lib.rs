//! Shared plumbing for the switchboard workspace: error taxonomy, control
//! event bus, versioned configuration, and clock/rng abstractions.

pub mod clock;
pub mod config;
pub mod errors;
pub mod event_bus;
pub mod events;
pub mod logging;
pub mod topics;

pub use clock::{Clock, ManualClock, RngSource, SeededRng, SystemClock, ThreadRngSource};
pub use config::{ConfigChange, ConfigStore, CoreConfig};
pub use errors::{CoreError, OutcomeErrorKind, ProviderError, ProviderErrorKind};
pub use event_bus::{BusEnvelope, ControlBus};
pub use events::ControlEvent;
pub use topics::Topics;
