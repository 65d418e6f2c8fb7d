pub mod clock;
pub mod config;
pub mod error;
pub mod notify;
pub mod protocol;
pub mod registry;
pub mod slots;
pub mod status;

// Re-exports for convenience
pub use clock::{ClockSource, ExpiryCallback, ScheduleHandle, TokioClock};
pub use config::{RegistryConfig, RegistryConfigExt};
pub use error::{ConfigError, ProtocolError, RegistryError};
pub use ktimer_types::{
    KTIMER_MAX, KTIMER_MSG_MAX, MAX_DURATION_SECS, MIN_DURATION_SECS, Owner, ResetTarget,
    SetOutcome, TimerEntry,
};
pub use notify::{Expiration, NotificationChannel, Subscription};
pub use protocol::{Command, Response};
pub use registry::Registry;
pub use status::{StatusEntry, StatusReport};
