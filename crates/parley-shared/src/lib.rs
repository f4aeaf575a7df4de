//! Types shared by every Parley crate: identifiers, chat messages, the REST
//! and hub wire formats, and the error taxonomy surfaced to the UI.

pub mod constants;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod types;

pub use error::{ChatError, ValidationError};
pub use types::{ChatMessage, ConnectionState, DeliveryStatus, DirectoryUser, Role, UserId};
