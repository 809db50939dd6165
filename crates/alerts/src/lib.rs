pub mod discord;
pub mod dispatcher;

pub use discord::{format_alert, AlertSink, DiscordAlertService, DiscordConfig};
pub use dispatcher::{AlertDispatcher, AlertDispatcherConfig, AlertEvent};
