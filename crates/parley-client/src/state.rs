//! Conversation state owned by the [`MessageStore`](crate::store::MessageStore).
//!
//! [`ChatState`] holds the plain data plus the synchronous rules that act on
//! it (selection, unread counting, echo reconciliation, history merging). The
//! store wraps it in `Arc<Mutex<>>` and adds the network side. When a
//! database is attached every change is written through; write failures are
//! logged and never interrupt the chat flow.

use std::collections::{HashMap, HashSet};

use tracing::{debug, error};
use uuid::Uuid;

use parley_shared::constants::ECHO_MATCH_WINDOW_SECS;
use parley_shared::types::{ChatMessage, DeliveryStatus, UserId};
use parley_store::Database;

/// What happened to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Neither sender nor recipient is the local user.
    Ignored,
    /// Echo of a local optimistic message, which is now confirmed.
    Confirmed { peer: UserId, correlation_id: Uuid },
    /// Repeated echo of a message that is already confirmed.
    Duplicate { peer: UserId },
    /// Appended to the conversation with `peer`.
    Appended {
        peer: UserId,
        message_id: String,
        /// New unread count when it changed.
        unread: Option<u32>,
    },
}

#[derive(Default)]
pub struct ChatState {
    /// The signed-in user. Sending is rejected while unset.
    pub local_user: Option<UserId>,
    pub conversations: HashMap<UserId, Vec<ChatMessage>>,
    pub unread: HashMap<UserId, u32>,
    pub selected_peer: Option<UserId>,
    /// Peers whose history fetch is in flight.
    pub loading: HashSet<UserId>,
    pub database: Option<Database>,
}

impl ChatState {
    pub fn new(local_user: Option<UserId>, database: Option<Database>) -> Self {
        Self {
            local_user,
            database,
            ..Self::default()
        }
    }

    /// Rehydrate from the attached database, if any.
    pub fn restore(&mut self) {
        let Some(db) = self.database.as_ref() else {
            return;
        };

        match db.all_conversations() {
            Ok(conversations) => self.conversations = conversations.into_iter().collect(),
            Err(e) => error!(error = %e, "Failed to restore conversations"),
        }
        match db.unread_counts() {
            Ok(unread) => self.unread = unread,
            Err(e) => error!(error = %e, "Failed to restore unread counts"),
        }
        match db.selected_peer() {
            Ok(selected) => self.selected_peer = selected,
            Err(e) => error!(error = %e, "Failed to restore selected peer"),
        }

        if let Some(peer) = self.selected_peer.clone() {
            self.set_unread(&peer, 0);
        }

        debug!(
            conversations = self.conversations.len(),
            unread = self.total_unread(),
            "Restored chat state"
        );
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn messages(&self, peer: &UserId) -> Vec<ChatMessage> {
        self.conversations.get(peer).cloned().unwrap_or_default()
    }

    pub fn unread_count(&self, peer: &UserId) -> u32 {
        self.unread.get(peer).copied().unwrap_or(0)
    }

    pub fn total_unread(&self) -> u32 {
        self.unread.values().sum()
    }

    pub fn is_selected(&self, peer: &UserId) -> bool {
        self.selected_peer.as_ref() == Some(peer)
    }

    /// Locate a message by correlation id across all conversations.
    pub fn find_by_correlation(&self, correlation_id: Uuid) -> Option<(&UserId, &ChatMessage)> {
        self.conversations.iter().find_map(|(peer, messages)| {
            messages
                .iter()
                .find(|m| m.correlation_id == Some(correlation_id))
                .map(|m| (peer, m))
        })
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Make `peer` the active conversation and clear its unread count.
    pub fn select(&mut self, peer: &UserId) {
        self.selected_peer = Some(peer.clone());
        self.set_unread(peer, 0);
        if let Some(db) = self.database.as_ref() {
            if let Err(e) = db.set_selected_peer(Some(peer)) {
                error!(error = %e, "Failed to persist selected peer");
            }
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected_peer = None;
        if let Some(db) = self.database.as_ref() {
            if let Err(e) = db.set_selected_peer(None) {
                error!(error = %e, "Failed to persist selected peer");
            }
        }
    }

    pub fn set_unread(&mut self, peer: &UserId, count: u32) {
        if count == 0 {
            self.unread.remove(peer);
        } else {
            self.unread.insert(peer.clone(), count);
        }
        if let Some(db) = self.database.as_ref() {
            if let Err(e) = db.set_unread(peer, count) {
                error!(error = %e, peer = %peer, "Failed to persist unread count");
            }
        }
    }

    pub fn append(&mut self, peer: &UserId, message: ChatMessage) {
        if let Some(db) = self.database.as_ref() {
            if let Err(e) = db.append_message(peer, &message) {
                error!(error = %e, peer = %peer, "Failed to persist message");
            }
        }
        self.conversations
            .entry(peer.clone())
            .or_default()
            .push(message);
    }

    /// Move a message from `from` to `to`. Returns `false` when the message
    /// is missing or in another state, so an echo that already confirmed
    /// the message is never downgraded.
    pub fn transition(
        &mut self,
        peer: &UserId,
        correlation_id: Uuid,
        from: DeliveryStatus,
        to: DeliveryStatus,
    ) -> bool {
        let Some(message) = self
            .conversations
            .get_mut(peer)
            .and_then(|ms| ms.iter_mut().find(|m| m.correlation_id == Some(correlation_id)))
        else {
            return false;
        };
        if message.status != from {
            return false;
        }
        message.status = to;
        self.persist_conversation(peer);
        true
    }

    /// Replace the conversation with `peer` by freshly fetched history.
    ///
    /// Local optimistic messages that the history does not contain yet are
    /// kept after it, so a fetch racing a send never loses the send.
    pub fn apply_history(&mut self, peer: &UserId, history: Vec<ChatMessage>) {
        let previous = self.conversations.remove(peer).unwrap_or_default();
        let unconfirmed: Vec<ChatMessage> = previous
            .into_iter()
            .filter(|m| m.correlation_id.is_some() && m.status != DeliveryStatus::Confirmed)
            .filter(|m| !history.iter().any(|h| same_message(m, h)))
            .collect();

        let mut merged = history;
        merged.extend(unconfirmed);
        self.conversations.insert(peer.clone(), merged);
        self.persist_conversation(peer);
    }

    /// Place an inbound message.
    pub fn receive(&mut self, message: ChatMessage) -> InboundOutcome {
        let Some(local) = self.local_user.clone() else {
            return InboundOutcome::Ignored;
        };
        let Some(peer) = message.counterpart(&local).cloned() else {
            return InboundOutcome::Ignored;
        };

        if message.sender_id == local {
            if let Some(correlation_id) = self.reconcile_echo(&peer, &message) {
                return InboundOutcome::Confirmed {
                    peer,
                    correlation_id,
                };
            }
            if self.has_confirmed_copy(&peer, &message) {
                return InboundOutcome::Duplicate { peer };
            }
        }

        let from_peer = message.sender_id != local;
        let message_id = message.id.clone();
        self.append(&peer, message);

        let unread = if from_peer && !self.is_selected(&peer) {
            let count = self.unread_count(&peer) + 1;
            self.set_unread(&peer, count);
            Some(count)
        } else {
            None
        };

        InboundOutcome::Appended {
            peer,
            message_id,
            unread,
        }
    }

    /// Match an echo of our own message against the newest optimistic entry
    /// with the same route and body inside the time window, and confirm it
    /// in place.
    fn reconcile_echo(&mut self, peer: &UserId, echo: &ChatMessage) -> Option<Uuid> {
        let messages = self.conversations.get_mut(peer)?;
        let pending = messages.iter_mut().rev().find(|m| {
            m.correlation_id.is_some() && m.status.awaits_echo() && same_message(m, echo)
        })?;

        pending.status = DeliveryStatus::Confirmed;
        pending.sent_at = echo.sent_at;
        let correlation_id = pending.correlation_id;
        self.persist_conversation(peer);
        correlation_id
    }

    /// An echo may arrive once per delivery path, and history rows replace
    /// optimistic entries without keeping their correlation id.
    fn has_confirmed_copy(&self, peer: &UserId, echo: &ChatMessage) -> bool {
        self.conversations.get(peer).is_some_and(|messages| {
            messages
                .iter()
                .any(|m| m.status == DeliveryStatus::Confirmed && same_message(m, echo))
        })
    }

    fn persist_conversation(&mut self, peer: &UserId) {
        let Some(db) = self.database.as_mut() else {
            return;
        };
        let messages = self.conversations.get(peer).map(Vec::as_slice).unwrap_or(&[]);
        if let Err(e) = db.replace_conversation(peer, messages) {
            error!(error = %e, peer = %peer, "Failed to persist conversation");
        }
    }
}

/// Heuristic identity of a message without a shared id: same route, same
/// body, timestamps close enough.
fn same_message(a: &ChatMessage, b: &ChatMessage) -> bool {
    a.sender_id == b.sender_id
        && a.recipient_id == b.recipient_id
        && a.body == b.body
        && (a.sent_at - b.sent_at).num_seconds().abs() <= ECHO_MATCH_WINDOW_SECS
}
