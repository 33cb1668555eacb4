pub mod clients;
pub mod config;
pub mod models;
pub mod presence;
pub mod services;

pub use clients::profile_client::{ProfileClient, ProfileResponse};
pub use config::Config;
pub use models::{ParticipantRecord, PresenceEvent};
pub use presence::aggregator::{PresenceAggregator, PresenceViews};
pub use presence::room_id::room_id;
pub use presence::session::PresenceSession;
pub use presence::tracker::PresenceTracker;
pub use presence::transport::{
    ChannelMessage, ChannelStatus, ChannelTransport, LocalChannelHub, TransportError,
};
pub use services::profile_resolver::{Profile, ProfileResolver};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing for hosts that don't install their own subscriber.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our crate
            "dash_presence=debug,info".into()
        }))
        .init();
}
