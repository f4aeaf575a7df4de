use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "Parley";

/// Maximum message body length in characters
pub const MAX_BODY_LEN: usize = 4000;

/// Hub protocol name and version sent in the handshake
pub const HUB_PROTOCOL: &str = "json";
pub const HUB_PROTOCOL_VERSION: u32 = 1;

/// Record separator terminating every hub protocol message
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Hub method invoked after the handshake to register the local user
pub const HUB_METHOD_CONNECT: &str = "Connect";

/// Hub method used to push a message over the realtime channel
pub const HUB_METHOD_SEND: &str = "SendMessage";

/// Server-to-client event carrying a chat message
pub const HUB_EVENT_MESSAGES: &str = "Messages";

/// REST endpoints, relative to the API base URL
pub const PATH_GET_CHATS: &str = "Chat/GetChats";
pub const PATH_GET_USERS: &str = "Chat/GetUsers";
pub const PATH_GET_SUPPORT: &str = "Chat/GetSupport";
pub const PATH_SEND_MESSAGE: &str = "Chat/SendMessage";

/// Upper bound for one connect attempt (transport + handshake + registration)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for one REST request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Consecutive failed connect attempts before giving up
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 5;

/// First retry delay after a failed connect; doubled per failure
pub const CONNECT_RETRY_BASE: Duration = Duration::from_secs(5);

/// Ceiling for the connect retry delay
pub const CONNECT_RETRY_MAX: Duration = Duration::from_secs(60);

/// Delays between automatic reconnect attempts after a dropped link
pub const RECONNECT_DELAYS: [Duration; 4] = [
    Duration::from_secs(0),
    Duration::from_secs(2),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

/// Interval between client pings while connected
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Window within which an echoed message may match an optimistic one (seconds)
pub const ECHO_MATCH_WINDOW_SECS: i64 = 120;

/// Prefix for client-assigned message ids
pub const TEMP_ID_PREFIX: &str = "tmp-";
