// Network layer: the realtime hub connection and the REST chat client.

pub mod backoff;
pub mod connector;
pub mod error;
pub mod hub;
pub mod rest;
pub mod ws;

pub use backoff::{ConnectBackoff, ReconnectSchedule};
pub use connector::{HubConnector, HubLink};
pub use error::NetError;
pub use hub::{spawn_hub, ConnectionHandle, HubConfig, HubStatus, MessageListener};
pub use rest::{ChatApi, RestChatClient};
pub use ws::WsConnector;
