//! Notification channels, events, provider adapters and the dispatcher

pub mod channel;
pub mod dispatcher;
pub mod event;
pub mod log;
pub mod providers;

pub use channel::{ChannelConfig, Destination, NotificationChannel, Provider, ALL_EVENTS};
pub use dispatcher::{DispatchError, Dispatcher, RetryPolicy};
pub use event::{event_types, Event, Severity};
pub use log::{DeliveryOutcome, LogPayload, LogStatus, NotificationLog};
pub use providers::{
    DeliveryError, ProviderAdapter, ProviderRegistry, ProviderSettings, RenderedPayload,
    SmtpSettings,
};
