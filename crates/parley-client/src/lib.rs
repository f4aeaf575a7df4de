//! # parley-client
//!
//! Client core of the storefront support chat: the message store, the
//! session facade that wires it to the realtime hub and the REST API, and
//! the configuration they are built from.

pub mod cli;
pub mod config;
pub mod events;
pub mod session;
pub mod state;
pub mod store;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::{ChatConfig, DatabaseLocation, SessionIdentity};
pub use events::ChatEvent;
pub use session::ChatSession;
pub use store::MessageStore;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("parley=info,parley_client=info,parley_net=info,parley_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}
