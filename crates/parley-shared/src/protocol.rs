//! Payloads exchanged with the backend, both over REST and over the hub.
//!
//! Field names follow the backend's camelCase JSON. Conversions into
//! [`ChatMessage`] live here so the REST client and the hub share them.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::types::{temp_id, ChatMessage, DeliveryStatus, UserId};

/// One row of `GET /Chat/GetChats`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub user_id: UserId,
    pub to_user_id: UserId,
    pub message: String,
    pub created_date: String,
}

impl ChatRecord {
    /// History rows are server-authoritative, hence `Confirmed`.
    ///
    /// An unparsable `createdDate` falls back to the current time rather than
    /// dropping the row.
    pub fn into_message(self) -> ChatMessage {
        let sent_at = parse_timestamp(&self.created_date).unwrap_or_else(Utc::now);
        ChatMessage {
            id: self.id,
            correlation_id: None,
            sender_id: self.user_id,
            recipient_id: self.to_user_id,
            body: self.message,
            sent_at,
            status: DeliveryStatus::Confirmed,
        }
    }
}

/// Body of `POST /Chat/SendMessage`, also the argument of the hub's
/// `SendMessage` invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub user_id: UserId,
    pub to_user_id: UserId,
    pub message: String,
}

/// Payload of the hub's `Messages` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HubMessage {
    pub user_id: UserId,
    pub to_user_id: UserId,
    pub message: String,
    #[serde(default)]
    pub date: Option<String>,
}

/// A message pushed by the hub, decoded but not yet placed in a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

impl From<HubMessage> for InboundMessage {
    fn from(m: HubMessage) -> Self {
        let sent_at = m
            .date
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);
        Self {
            sender_id: m.user_id,
            recipient_id: m.to_user_id,
            body: m.message,
            sent_at,
        }
    }
}

impl InboundMessage {
    /// The hub payload carries no durable id, so every delivery gets a fresh
    /// temporary one.
    pub fn into_message(self) -> ChatMessage {
        ChatMessage {
            id: temp_id(Uuid::new_v4()),
            correlation_id: None,
            sender_id: self.sender_id,
            recipient_id: self.recipient_id,
            body: self.body,
            sent_at: self.sent_at,
            status: DeliveryStatus::Confirmed,
        }
    }
}

/// Parse a backend timestamp.
///
/// Accepts RFC 3339 and the zone-less `YYYY-MM-DDTHH:MM:SS[.fff]` form the
/// backend emits for UTC values.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Num(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_record_from_backend_json() {
        let json = r#"[{"id":"m1","userId":"support-1","toUserId":"u1","message":"hi","createdDate":"2024-01-01T10:00:00Z"}]"#;
        let records: Vec<ChatRecord> = serde_json::from_str(json).unwrap();
        let msg = records.into_iter().next().unwrap().into_message();

        assert_eq!(msg.id, "m1");
        assert_eq!(msg.sender_id, UserId::from("support-1"));
        assert_eq!(msg.recipient_id, UserId::from("u1"));
        assert_eq!(msg.body, "hi");
        assert_eq!(msg.sent_at.to_rfc3339(), "2024-01-01T10:00:00+00:00");
        assert_eq!(msg.status, DeliveryStatus::Confirmed);
    }

    #[test]
    fn test_numeric_record_id() {
        let json = r#"{"id":42,"userId":"a","toUserId":"b","message":"x","createdDate":"2024-01-01T10:00:00"}"#;
        let record: ChatRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, "42");
    }

    #[test]
    fn test_parse_timestamp_without_zone() {
        let ts = parse_timestamp("2024-03-05T08:09:10.123").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-05T08:09:10.123+00:00");
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_send_request_serializes_camel_case() {
        let req = SendMessageRequest {
            user_id: "u1".into(),
            to_user_id: "s1".into(),
            message: "need help".into(),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"userId": "u1", "toUserId": "s1", "message": "need help"})
        );
    }

    #[test]
    fn test_hub_message_gets_temporary_id() {
        let hub: HubMessage = serde_json::from_str(
            r#"{"userId":"support-2","toUserId":"u1","message":"ping","date":"2024-01-01T10:00:00Z"}"#,
        )
        .unwrap();
        let msg = InboundMessage::from(hub).into_message();
        assert!(msg.is_temporary());
        assert_eq!(msg.body, "ping");
    }
}
