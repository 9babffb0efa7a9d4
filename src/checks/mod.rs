//! Health checks: configuration, probing, state tracking and scheduling

pub mod config;
pub mod probe;
pub mod runner;
pub mod scheduler;
pub mod tracker;

pub use config::{parse_target, CheckConfig, CheckState, CheckStatus, CheckType, HealthCheck};
pub use probe::{
    FailureKind, NetworkProber, PingCommand, ProbeFailure, ProbeOutcome, ProbeRecord, ProbeResult,
    Prober, ProberError, DEFAULT_SSL_EXPIRY_DAYS, PING_FALLBACK_PORT,
};
pub use runner::{CheckRunner, InFlightGuard};
pub use scheduler::{Scheduler, DEFAULT_MAX_JITTER};
pub use tracker::{status_for, HealthChanged, HealthTracker, DEFAULT_DOWN_THRESHOLD};
