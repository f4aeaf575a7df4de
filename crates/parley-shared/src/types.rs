use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::TEMP_ID_PREFIX;

/// Opaque user identifier assigned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Role of the local user, resolved once at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    User,
    Support,
    Admin,
}

impl Role {
    /// Resolve a role from the claims carried by the access token.
    ///
    /// Matching is case-insensitive and the most privileged recognised claim
    /// wins. Unknown claims are ignored; no claims at all means `User`.
    pub fn from_claims<S: AsRef<str>>(claims: &[S]) -> Self {
        claims
            .iter()
            .filter_map(|c| Self::parse(c.as_ref()))
            .max()
            .unwrap_or(Role::User)
    }

    fn parse(claim: &str) -> Option<Self> {
        match claim.trim().to_ascii_lowercase().as_str() {
            "user" | "customer" => Some(Role::User),
            "support" => Some(Role::Support),
            "admin" | "administrator" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Support agents and admins see every user; customers only see agents.
    pub fn sees_all_users(self) -> bool {
        matches!(self, Role::Support | Role::Admin)
    }
}

/// Lifecycle of the realtime hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    /// `connect` is a no-op in these states.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Delivery state of a message as seen by the local client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Shown optimistically, REST send still in flight.
    Pending,
    /// Accepted by the REST endpoint, not yet echoed back.
    Sent,
    /// REST send failed; kept visible so the user can retry.
    Failed,
    /// Known to the server (history fetch, hub delivery or echo).
    Confirmed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Confirmed => "confirmed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "sent" => Some(DeliveryStatus::Sent),
            "failed" => Some(DeliveryStatus::Failed),
            "confirmed" => Some(DeliveryStatus::Confirmed),
            _ => None,
        }
    }

    /// Messages in these states may still be matched by a server echo.
    pub fn awaits_echo(self) -> bool {
        matches!(self, DeliveryStatus::Pending | DeliveryStatus::Sent)
    }
}

/// A chat message held by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Server id, or `tmp-<uuid>` for client-assigned entries.
    pub id: String,
    /// Set on optimistic messages so echoes can be matched back.
    pub correlation_id: Option<Uuid>,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub status: DeliveryStatus,
}

impl ChatMessage {
    /// Build an optimistic outgoing message stamped with local time.
    pub fn optimistic(sender_id: UserId, recipient_id: UserId, body: String) -> Self {
        let correlation = Uuid::new_v4();
        Self {
            id: temp_id(correlation),
            correlation_id: Some(correlation),
            sender_id,
            recipient_id,
            body,
            sent_at: Utc::now(),
            status: DeliveryStatus::Pending,
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }

    /// The other participant, from the point of view of `local`.
    ///
    /// Returns `None` when `local` is neither the sender nor the recipient.
    pub fn counterpart(&self, local: &UserId) -> Option<&UserId> {
        if &self.sender_id == local {
            Some(&self.recipient_id)
        } else if &self.recipient_id == local {
            Some(&self.sender_id)
        } else {
            None
        }
    }
}

/// Client-assigned message id.
pub fn temp_id(uuid: Uuid) -> String {
    format!("{TEMP_ID_PREFIX}{uuid}")
}

/// Entry of the support / user directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    pub id: UserId,
    #[serde(default)]
    pub full_name: String,
}
