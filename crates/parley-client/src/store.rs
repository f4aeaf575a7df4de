//! The message store: conversations, unread counts and the selected peer,
//! plus the network operations that change them.
//!
//! State sits behind a single `std::sync::Mutex` which is never held across
//! an await point. Every visible change is announced as a [`ChatEvent`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_net::{ChatApi, ConnectionHandle};
use parley_shared::constants::MAX_BODY_LEN;
use parley_shared::protocol::{InboundMessage, SendMessageRequest};
use parley_shared::types::{ChatMessage, DeliveryStatus, UserId};
use parley_shared::{ChatError, ValidationError};
use parley_store::Database;

use crate::events::ChatEvent;
use crate::state::{ChatState, InboundOutcome};

const EVENT_BUFFER: usize = 256;

/// An optimistic message that has been placed locally but not delivered.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub peer: UserId,
    pub correlation_id: Uuid,
    pub request: SendMessageRequest,
}

/// Shared, cloneable handle to the chat state.
#[derive(Clone)]
pub struct MessageStore {
    state: Arc<Mutex<ChatState>>,
    api: Arc<dyn ChatApi>,
    hub: Option<ConnectionHandle>,
    events: broadcast::Sender<ChatEvent>,
    realtime_push: bool,
}

impl MessageStore {
    pub fn new(api: Arc<dyn ChatApi>, local_user: Option<UserId>, database: Option<Database>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            state: Arc::new(Mutex::new(ChatState::new(local_user, database))),
            api,
            hub: None,
            events,
            realtime_push: true,
        }
    }

    /// Attach the hub used for best-effort realtime pushes after a send.
    pub fn with_hub(mut self, hub: ConnectionHandle) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn with_realtime_push(mut self, enabled: bool) -> Self {
        self.realtime_push = enabled;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ChatEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Rehydrate from the attached database. No-op without one.
    pub fn restore(&self) {
        self.lock().restore();
    }

    // -----------------------------------------------------------------------
    // Selection & history
    // -----------------------------------------------------------------------

    /// Select `peer`, clear its unread count and load its history.
    ///
    /// Selection and the unread reset stick even when the fetch fails.
    pub async fn select_peer(&self, peer: &UserId) -> Result<(), ChatError> {
        if peer.is_empty() {
            return Err(ValidationError::NoPeer.into());
        }

        let (had_unread, total) = {
            let mut state = self.lock();
            let had_unread = state.unread_count(peer) > 0;
            state.select(peer);
            state.loading.insert(peer.clone());
            (had_unread, state.total_unread())
        };
        self.emit(ChatEvent::PeerSelected { peer: peer.clone() });
        if had_unread {
            self.emit(ChatEvent::UnreadChanged {
                peer: peer.clone(),
                count: 0,
                total,
            });
        }

        let result = self.api.load_messages(peer).await;

        let mut state = self.lock();
        state.loading.remove(peer);
        match result {
            Ok(records) => {
                let history: Vec<ChatMessage> =
                    records.into_iter().map(|r| r.into_message()).collect();
                debug!(peer = %peer, count = history.len(), "Loaded conversation");
                state.apply_history(peer, history);
                let active = state.is_selected(peer);
                drop(state);
                self.emit(ChatEvent::ConversationLoaded {
                    peer: peer.clone(),
                    active,
                });
                Ok(())
            }
            Err(e) => {
                drop(state);
                warn!(peer = %peer, error = %e, "Failed to load conversation");
                Err(e.into())
            }
        }
    }

    /// Deselect without touching unread counts or conversations.
    pub fn clear_selection(&self) {
        self.lock().clear_selection();
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Validate and place an optimistic `Pending` message. Returns what
    /// [`MessageStore::deliver`] needs to send it.
    pub fn prepare_send(&self, peer: &UserId, body: &str) -> Result<OutgoingMessage, ChatError> {
        if body.trim().is_empty() {
            return Err(ValidationError::EmptyBody.into());
        }
        let len = body.chars().count();
        if len > MAX_BODY_LEN {
            return Err(ValidationError::BodyTooLong {
                len,
                max: MAX_BODY_LEN,
            }
            .into());
        }
        if peer.is_empty() {
            return Err(ValidationError::NoPeer.into());
        }

        let mut state = self.lock();
        let local = state
            .local_user
            .clone()
            .ok_or(ValidationError::NoLocalUser)?;

        let message = ChatMessage::optimistic(local.clone(), peer.clone(), body.to_string());
        let correlation_id = message.correlation_id.unwrap_or_else(Uuid::new_v4);
        let message_id = message.id.clone();
        state.append(peer, message);
        drop(state);

        self.emit(ChatEvent::MessageAppended {
            peer: peer.clone(),
            message_id,
        });

        Ok(OutgoingMessage {
            peer: peer.clone(),
            correlation_id,
            request: SendMessageRequest {
                user_id: local,
                to_user_id: peer.clone(),
                message: body.to_string(),
            },
        })
    }

    /// Send a prepared message over REST. On failure the message is marked
    /// `Failed` and stays in the conversation.
    pub async fn deliver(&self, outgoing: OutgoingMessage) -> Result<Uuid, ChatError> {
        let OutgoingMessage {
            peer,
            correlation_id,
            request,
        } = outgoing;

        match self.api.send(&request).await {
            Ok(()) => {
                self.lock().transition(
                    &peer,
                    correlation_id,
                    DeliveryStatus::Pending,
                    DeliveryStatus::Sent,
                );
                debug!(peer = %peer, correlation = %correlation_id, "Message sent");
                self.push_realtime(request).await;
                Ok(correlation_id)
            }
            Err(e) => {
                self.lock().transition(
                    &peer,
                    correlation_id,
                    DeliveryStatus::Pending,
                    DeliveryStatus::Failed,
                );
                warn!(peer = %peer, correlation = %correlation_id, error = %e, "Message delivery failed");
                let error = ChatError::from(e);
                self.emit(ChatEvent::DeliveryFailed {
                    peer,
                    correlation_id,
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    /// Place an optimistic message and deliver it. Returns the message's
    /// correlation id.
    pub async fn send_message(&self, peer: &UserId, body: &str) -> Result<Uuid, ChatError> {
        let outgoing = self.prepare_send(peer, body)?;
        self.deliver(outgoing).await
    }

    /// Resend a message that previously failed.
    pub async fn retry_failed(&self, correlation_id: Uuid) -> Result<Uuid, ChatError> {
        let outgoing = {
            let mut state = self.lock();
            let (peer, message) = state
                .find_by_correlation(correlation_id)
                .filter(|(_, m)| m.status == DeliveryStatus::Failed)
                .map(|(peer, m)| (peer.clone(), m.clone()))
                .ok_or_else(|| ValidationError::UnknownMessage(correlation_id.to_string()))?;
            state.transition(
                &peer,
                correlation_id,
                DeliveryStatus::Failed,
                DeliveryStatus::Pending,
            );
            OutgoingMessage {
                peer,
                correlation_id,
                request: SendMessageRequest {
                    user_id: message.sender_id,
                    to_user_id: message.recipient_id,
                    message: message.body,
                },
            }
        };
        info!(correlation = %correlation_id, "Retrying failed message");
        self.deliver(outgoing).await
    }

    async fn push_realtime(&self, request: SendMessageRequest) {
        if !self.realtime_push {
            return;
        }
        let Some(hub) = self.hub.as_ref() else {
            return;
        };
        if !hub.is_connected() {
            debug!("Hub not connected, skipping realtime push");
            return;
        }
        if let Err(e) = hub.send_realtime(request).await {
            warn!(error = %e, "Realtime push failed");
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Place a message pushed by the hub.
    pub fn handle_inbound(&self, inbound: InboundMessage) {
        let message = inbound.into_message();
        let (outcome, total) = {
            let mut state = self.lock();
            let outcome = state.receive(message);
            (outcome, state.total_unread())
        };

        match outcome {
            InboundOutcome::Ignored => {
                debug!("Ignoring message not addressed to the local user");
            }
            InboundOutcome::Duplicate { peer } => {
                debug!(peer = %peer, "Dropping repeated echo of a confirmed message");
            }
            InboundOutcome::Confirmed {
                peer,
                correlation_id,
            } => {
                self.emit(ChatEvent::MessageConfirmed {
                    peer,
                    correlation_id,
                });
            }
            InboundOutcome::Appended {
                peer,
                message_id,
                unread,
            } => {
                self.emit(ChatEvent::MessageAppended {
                    peer: peer.clone(),
                    message_id,
                });
                if let Some(count) = unread {
                    self.emit(ChatEvent::UnreadChanged { peer, count, total });
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn messages(&self, peer: &UserId) -> Vec<ChatMessage> {
        self.lock().messages(peer)
    }

    /// Unread counts per peer. Peers without unread messages are absent.
    pub fn unread_messages(&self) -> HashMap<UserId, u32> {
        self.lock().unread.clone()
    }

    pub fn unread_count(&self, peer: &UserId) -> u32 {
        self.lock().unread_count(peer)
    }

    pub fn total_unread(&self) -> u32 {
        self.lock().total_unread()
    }

    pub fn selected_peer(&self) -> Option<UserId> {
        self.lock().selected_peer.clone()
    }

    pub fn local_user(&self) -> Option<UserId> {
        self.lock().local_user.clone()
    }

    pub fn is_loading(&self, peer: &UserId) -> bool {
        self.lock().loading.contains(peer)
    }
}
