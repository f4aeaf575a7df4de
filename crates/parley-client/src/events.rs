use serde::Serialize;
use uuid::Uuid;

use parley_shared::types::UserId;

pub const EVENT_PEER_SELECTED: &str = "peer-selected";
pub const EVENT_CONVERSATION_LOADED: &str = "conversation-loaded";
pub const EVENT_MESSAGE_APPENDED: &str = "message-appended";
pub const EVENT_MESSAGE_CONFIRMED: &str = "message-confirmed";
pub const EVENT_DELIVERY_FAILED: &str = "delivery-failed";
pub const EVENT_UNREAD_CHANGED: &str = "unread-changed";

/// Store change notifications for UI consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChatEvent {
    PeerSelected {
        peer: UserId,
    },
    /// History for `peer` replaced the local list. `active` is false when
    /// the selection moved on while the fetch was in flight.
    ConversationLoaded {
        peer: UserId,
        active: bool,
    },
    MessageAppended {
        peer: UserId,
        message_id: String,
    },
    MessageConfirmed {
        peer: UserId,
        correlation_id: Uuid,
    },
    DeliveryFailed {
        peer: UserId,
        correlation_id: Uuid,
        error: String,
    },
    UnreadChanged {
        peer: UserId,
        count: u32,
        total: u32,
    },
}

impl ChatEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::PeerSelected { .. } => EVENT_PEER_SELECTED,
            ChatEvent::ConversationLoaded { .. } => EVENT_CONVERSATION_LOADED,
            ChatEvent::MessageAppended { .. } => EVENT_MESSAGE_APPENDED,
            ChatEvent::MessageConfirmed { .. } => EVENT_MESSAGE_CONFIRMED,
            ChatEvent::DeliveryFailed { .. } => EVENT_DELIVERY_FAILED,
            ChatEvent::UnreadChanged { .. } => EVENT_UNREAD_CHANGED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let event = ChatEvent::UnreadChanged {
            peer: "s2".into(),
            count: 3,
            total: 4,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.name());
        assert_eq!(json["peer"], "s2");
        assert_eq!(json["count"], 3);
    }
}
