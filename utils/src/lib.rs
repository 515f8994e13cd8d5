//! Shared utilities for the PrivateSend mixing core.

pub mod events;
pub mod logging;
pub mod stats;
pub mod time;

pub use events::{EventBus, Subscription};
pub use logging::init_tracing;
pub use stats::StatsCounter;
pub use time::format_duration;
