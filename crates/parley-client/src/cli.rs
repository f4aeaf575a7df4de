//! Line commands and output formatting for the `parley` terminal client.

use uuid::Uuid;

use parley_net::HubStatus;
use parley_shared::types::{ChatMessage, DeliveryStatus, DirectoryUser, UserId};

use crate::events::ChatEvent;

pub const HELP: &str = "\
/peer <id>          select a conversation and load its history
/users              list users you can talk to
/unread             show unread counts
/status             show the hub connection status
/reconnect          connect the hub again after it gave up
/retry <id>         resend a failed message
/quit               leave
anything else       send to the selected peer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SelectPeer(UserId),
    Users,
    Unread,
    Status,
    Reconnect,
    Retry(Uuid),
    Help,
    Quit,
    Send(String),
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Command>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if !trimmed.starts_with('/') {
        return Ok(Some(Command::Send(trimmed.to_string())));
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());

    let command = match (name, arg) {
        ("/peer", Some(id)) => Command::SelectPeer(UserId::new(id)),
        ("/peer", None) => return Err("usage: /peer <id>".to_string()),
        ("/users", _) => Command::Users,
        ("/unread", _) => Command::Unread,
        ("/status", _) => Command::Status,
        ("/reconnect", _) => Command::Reconnect,
        ("/retry", Some(id)) => {
            let id = Uuid::parse_str(id).map_err(|e| format!("invalid message id: {e}"))?;
            Command::Retry(id)
        }
        ("/retry", None) => return Err("usage: /retry <id>".to_string()),
        ("/help", _) => Command::Help,
        ("/quit" | "/exit", _) => Command::Quit,
        (other, _) => return Err(format!("unknown command {other}, try /help")),
    };
    Ok(Some(command))
}

pub fn format_message(message: &ChatMessage, local: Option<&UserId>) -> String {
    let who = if Some(&message.sender_id) == local {
        "you".to_string()
    } else {
        message.sender_id.to_string()
    };
    let marker = match message.status {
        DeliveryStatus::Pending => " …",
        DeliveryStatus::Failed => " (failed)",
        DeliveryStatus::Sent | DeliveryStatus::Confirmed => "",
    };
    format!(
        "[{}] {}: {}{}",
        message.sent_at.format("%H:%M"),
        who,
        message.body,
        marker
    )
}

pub fn format_user(user: &DirectoryUser) -> String {
    if user.full_name.is_empty() {
        user.id.to_string()
    } else {
        format!("{} ({})", user.id, user.full_name)
    }
}

pub fn format_status(status: &HubStatus) -> String {
    let mut line = format!("hub: {}", status.state);
    if status.failed_attempts > 0 {
        line.push_str(&format!(", {} failed attempt(s)", status.failed_attempts));
    }
    if let Some(error) = &status.last_error {
        line.push_str(&format!(", last error: {error}"));
    }
    if status.gave_up {
        line.push_str(", gave up (use /reconnect)");
    }
    line
}

/// One-line description of a store event, or `None` for events the terminal
/// does not show.
pub fn describe_event(event: &ChatEvent) -> Option<String> {
    match event {
        ChatEvent::DeliveryFailed {
            peer,
            correlation_id,
            error,
        } => Some(format!(
            "! message to {peer} failed: {error} (retry with /retry {correlation_id})"
        )),
        ChatEvent::UnreadChanged { peer, count, total } if *count > 0 => {
            Some(format!("* {count} unread from {peer} ({total} total)"))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(
            parse_line("/peer support-1"),
            Ok(Some(Command::SelectPeer("support-1".into())))
        );
        assert_eq!(parse_line("/users"), Ok(Some(Command::Users)));
        assert_eq!(parse_line("/exit"), Ok(Some(Command::Quit)));
        assert_eq!(
            parse_line("  hello there "),
            Ok(Some(Command::Send("hello there".into())))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_line("/peer").is_err());
        assert!(parse_line("/retry nope").is_err());
        assert!(parse_line("/dance").is_err());

        let id = Uuid::new_v4();
        assert_eq!(
            parse_line(&format!("/retry {id}")),
            Ok(Some(Command::Retry(id)))
        );
    }

    #[test]
    fn test_format_own_failed_message() {
        let mut m = ChatMessage::optimistic("u1".into(), "s1".into(), "hi".into());
        m.status = DeliveryStatus::Failed;
        let line = format_message(&m, Some(&"u1".into()));
        assert!(line.ends_with("you: hi (failed)"));
    }

    #[test]
    fn test_describe_unread_event() {
        let event = ChatEvent::UnreadChanged {
            peer: "s2".into(),
            count: 2,
            total: 3,
        };
        assert_eq!(
            describe_event(&event).as_deref(),
            Some("* 2 unread from s2 (3 total)")
        );
        let cleared = ChatEvent::UnreadChanged {
            peer: "s2".into(),
            count: 0,
            total: 0,
        };
        assert!(describe_event(&cleared).is_none());
    }
}
