//! Realtime hub connection manager.
//!
//! A single actor task owns the hub link and the [`ConnectionState`]. The rest
//! of the application talks to it through a cloneable [`ConnectionHandle`]:
//! commands go in over an mpsc channel, state comes out over a watch channel
//! and inbound chat messages over a broadcast channel.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

use parley_shared::constants::{
    CONNECT_RETRY_BASE, CONNECT_RETRY_MAX, DEFAULT_CONNECT_TIMEOUT, DEFAULT_KEEP_ALIVE,
    DEFAULT_MAX_CONNECT_ATTEMPTS, HUB_EVENT_MESSAGES, HUB_METHOD_CONNECT, HUB_METHOD_SEND,
    RECONNECT_DELAYS,
};
use parley_shared::frame::HubFrame;
use parley_shared::protocol::{HubMessage, InboundMessage, SendMessageRequest};
use parley_shared::types::{ConnectionState, UserId};

use crate::backoff::{ConnectBackoff, ReconnectSchedule};
use crate::connector::{HubConnector, HubLink};
use crate::error::NetError;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Timing knobs for the connection actor.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Upper bound for open + handshake + registration.
    pub connect_timeout: Duration,
    /// Consecutive connect failures before the terminal error state.
    pub max_connect_attempts: u32,
    pub connect_retry_base: Duration,
    pub connect_retry_max: Duration,
    /// Delays between attempts to recover a dropped link.
    pub reconnect_delays: Vec<Duration>,
    pub keep_alive: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_connect_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            connect_retry_base: CONNECT_RETRY_BASE,
            connect_retry_max: CONNECT_RETRY_MAX,
            reconnect_delays: RECONNECT_DELAYS.to_vec(),
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }
}

/// Snapshot of the connection published to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubStatus {
    pub state: ConnectionState,
    /// Failed attempts in the current connect or reconnect cycle.
    pub failed_attempts: u32,
    pub last_error: Option<String>,
    /// Retries are exhausted; only an explicit `connect` starts over.
    pub gave_up: bool,
}

impl Default for HubStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            failed_attempts: 0,
            last_error: None,
            gave_up: false,
        }
    }
}

#[derive(Debug)]
enum HubCommand {
    Connect(UserId),
    Disconnect,
    Send {
        message: SendMessageRequest,
        reply: oneshot::Sender<Result<(), NetError>>,
    },
    Shutdown,
}

/// Handle to the connection actor. Cheap to clone; the actor stops once every
/// handle is dropped or [`ConnectionHandle::shutdown`] is called.
#[derive(Clone)]
pub struct ConnectionHandle {
    cmd_tx: mpsc::Sender<HubCommand>,
    status_rx: watch::Receiver<HubStatus>,
    inbound_tx: broadcast::Sender<InboundMessage>,
}

/// Listener registered with [`ConnectionHandle::on_message`]. Dropping it
/// stops delivery.
pub struct MessageListener {
    task: JoinHandle<()>,
}

impl Drop for MessageListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl ConnectionHandle {
    /// Connect and register `user` with the hub.
    ///
    /// Returns once the command is queued. Connection failures are retried by
    /// the actor and only show up in [`ConnectionHandle::status`].
    pub async fn connect(&self, user: UserId) -> Result<(), NetError> {
        self.command(HubCommand::Connect(user)).await
    }

    pub async fn disconnect(&self) -> Result<(), NetError> {
        self.command(HubCommand::Disconnect).await
    }

    /// Push a message over the realtime channel.
    pub async fn send_realtime(&self, message: SendMessageRequest) -> Result<(), NetError> {
        let (reply, rx) = oneshot::channel();
        self.command(HubCommand::Send { message, reply }).await?;
        rx.await.map_err(|_| NetError::HubStopped)?
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(HubCommand::Shutdown).await;
    }

    pub fn state(&self) -> ConnectionState {
        self.status_rx.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn status(&self) -> HubStatus {
        self.status_rx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<HubStatus> {
        self.status_rx.clone()
    }

    /// Raw stream of inbound chat messages.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound_tx.subscribe()
    }

    /// Invoke `callback` once per inbound chat message until the returned
    /// listener is dropped.
    pub fn on_message<F>(&self, callback: F) -> MessageListener
    where
        F: Fn(InboundMessage) + Send + 'static,
    {
        let mut rx = self.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => callback(message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Message listener lagged behind hub");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        MessageListener { task }
    }

    async fn command(&self, cmd: HubCommand) -> Result<(), NetError> {
        self.cmd_tx.send(cmd).await.map_err(|_| NetError::HubStopped)
    }
}

/// Spawn the connection actor on the current tokio runtime.
pub fn spawn_hub<C: HubConnector>(connector: C, config: HubConfig) -> ConnectionHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (status_tx, status_rx) = watch::channel(HubStatus::default());
    let (inbound_tx, _) = broadcast::channel(256);

    let actor = HubActor {
        connector: Arc::new(connector),
        backoff: ConnectBackoff::with_delays(
            config.max_connect_attempts,
            config.connect_retry_base,
            config.connect_retry_max,
        ),
        schedule: ReconnectSchedule::new(config.reconnect_delays.clone()),
        config,
        status_tx,
        inbound_tx: inbound_tx.clone(),
        user: None,
        link: None,
        attempt: None,
        retry: None,
        keep_alive: None,
    };
    tokio::spawn(actor.run(cmd_rx));

    ConnectionHandle {
        cmd_tx,
        status_rx,
        inbound_tx,
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

type Attempt = BoxFuture<'static, Result<HubLink, NetError>>;

struct HubActor {
    connector: Arc<dyn HubConnector>,
    config: HubConfig,
    backoff: ConnectBackoff,
    schedule: ReconnectSchedule,
    status_tx: watch::Sender<HubStatus>,
    inbound_tx: broadcast::Sender<InboundMessage>,
    user: Option<UserId>,
    link: Option<HubLink>,
    attempt: Option<Attempt>,
    retry: Option<Pin<Box<Sleep>>>,
    keep_alive: Option<Interval>,
}

impl HubActor {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<HubCommand>) {
        info!("Hub connection actor started");

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(HubCommand::Connect(user)) => self.on_connect(user),
                        Some(HubCommand::Disconnect) => self.on_disconnect(),
                        Some(HubCommand::Send { message, reply }) => {
                            let _ = reply.send(self.on_send(message));
                        }
                        Some(HubCommand::Shutdown) => {
                            info!("Hub shutdown requested");
                            break;
                        }
                        None => {
                            info!("All hub handles dropped, shutting down");
                            break;
                        }
                    }
                }

                result = poll_attempt(&mut self.attempt) => {
                    self.attempt = None;
                    match result {
                        Ok(link) => self.on_attempt_succeeded(link),
                        Err(e) => self.on_attempt_failed(e),
                    }
                }

                () = poll_retry(&mut self.retry) => {
                    self.retry = None;
                    self.on_retry_due();
                }

                frame = poll_link(&mut self.link) => {
                    match frame {
                        Some(frame) => self.on_frame(frame),
                        None => self.on_link_lost("hub link closed".to_string()),
                    }
                }

                () = poll_keep_alive(&mut self.keep_alive) => {
                    self.on_keep_alive();
                }
            }
        }

        self.on_disconnect();
        info!("Hub connection actor terminated");
    }

    fn state(&self) -> ConnectionState {
        self.status_tx.borrow().state
    }

    fn transition(
        &self,
        state: ConnectionState,
        failed_attempts: u32,
        last_error: Option<String>,
        gave_up: bool,
    ) {
        let previous = self.state();
        self.status_tx.send_replace(HubStatus {
            state,
            failed_attempts,
            last_error,
            gave_up,
        });
        if previous != state {
            info!(from = %previous, to = %state, "Hub connection state changed");
        }
    }

    fn on_connect(&mut self, user: UserId) {
        let state = self.state();
        if state.is_active() {
            if self.user.as_ref() != Some(&user) {
                warn!(
                    user = %user,
                    state = %state,
                    "Connect for a different user ignored; disconnect first"
                );
            } else {
                debug!(user = %user, state = %state, "Connect ignored, already active");
            }
            return;
        }

        info!(user = %user, "Connecting to hub");
        self.user = Some(user);
        self.backoff.reset();
        self.schedule.reset();
        self.retry = None;
        self.transition(ConnectionState::Connecting, 0, None, false);
        self.start_attempt();
    }

    fn on_disconnect(&mut self) {
        self.attempt = None;
        self.retry = None;
        self.keep_alive = None;
        self.user = None;
        if let Some(link) = self.link.take() {
            // Best effort; the writer closes the socket once the link drops.
            let _ = link.outbound.try_send(HubFrame::Close {
                error: None,
                allow_reconnect: false,
            });
            info!("Hub link closed by client");
        }
        if self.state() != ConnectionState::Disconnected {
            self.transition(ConnectionState::Disconnected, 0, None, false);
        }
    }

    fn on_send(&mut self, message: SendMessageRequest) -> Result<(), NetError> {
        let outbound = match (&self.link, self.state()) {
            (Some(link), ConnectionState::Connected) => link.outbound.clone(),
            _ => return Err(NetError::NotConnected),
        };
        let frame = HubFrame::invocation(HUB_METHOD_SEND, vec![serde_json::to_value(&message)?]);
        // Never wait on the writer here; a stalled socket would block the actor.
        match outbound.try_send(frame) {
            Ok(()) => {
                debug!(to = %message.to_user_id, "Message pushed over hub");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(to = %message.to_user_id, "Hub outbound queue full, dropping realtime push");
                Err(NetError::Backpressure)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(NetError::LinkClosed),
        }
    }

    fn start_attempt(&mut self) {
        let Some(user) = self.user.clone() else {
            return;
        };
        let connector = Arc::clone(&self.connector);
        let timeout = self.config.connect_timeout;

        self.attempt = Some(Box::pin(async move {
            match tokio::time::timeout(timeout, open_and_register(connector, user)).await {
                Ok(result) => result,
                Err(_) => Err(NetError::Timeout(timeout)),
            }
        }));
    }

    fn on_attempt_succeeded(&mut self, link: HubLink) {
        self.link = Some(link);
        self.backoff.reset();
        self.schedule.reset();

        let period = self.config.keep_alive;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.keep_alive = Some(interval);

        if let Some(user) = &self.user {
            info!(user = %user, "Registered with hub");
        }
        self.transition(ConnectionState::Connected, 0, None, false);
    }

    fn on_attempt_failed(&mut self, error: NetError) {
        let message = error.to_string();

        if self.state() == ConnectionState::Reconnecting {
            let failed = self.schedule.attempts() as u32;
            match self.schedule.next_delay() {
                Some(delay) => {
                    warn!(error = %message, attempt = failed, retry_in = ?delay, "Hub reconnect failed");
                    self.retry = Some(Box::pin(tokio::time::sleep(delay)));
                    self.transition(ConnectionState::Reconnecting, failed, Some(message), false);
                }
                None => {
                    warn!(error = %message, attempts = failed, "Hub reconnect exhausted, giving up");
                    self.user = None;
                    self.transition(ConnectionState::Disconnected, failed, Some(message), true);
                }
            }
            return;
        }

        match self.backoff.on_failure() {
            Some(delay) => {
                warn!(
                    error = %message,
                    attempt = self.backoff.failures,
                    retry_in = ?delay,
                    "Hub connect failed"
                );
                self.retry = Some(Box::pin(tokio::time::sleep(delay)));
                self.transition(ConnectionState::Error, self.backoff.failures, Some(message), false);
            }
            None => {
                warn!(
                    error = %message,
                    attempts = self.backoff.failures,
                    "Hub connect failed too many times, giving up"
                );
                self.transition(ConnectionState::Error, self.backoff.failures, Some(message), true);
            }
        }
    }

    fn on_retry_due(&mut self) {
        match self.state() {
            ConnectionState::Error => {
                let status = self.status_tx.borrow().clone();
                self.transition(
                    ConnectionState::Connecting,
                    status.failed_attempts,
                    status.last_error,
                    false,
                );
                self.start_attempt();
            }
            ConnectionState::Reconnecting => {
                debug!(attempt = self.schedule.attempts(), "Attempting hub reconnect");
                self.start_attempt();
            }
            other => debug!(state = %other, "Stale retry timer ignored"),
        }
    }

    fn on_link_lost(&mut self, reason: String) {
        self.link = None;
        self.keep_alive = None;

        if self.user.is_none() {
            self.transition(ConnectionState::Disconnected, 0, Some(reason), false);
            return;
        }

        warn!(reason = %reason, "Hub link dropped, reconnecting");
        self.schedule.reset();
        let delay = self.schedule.next_delay().unwrap_or(Duration::ZERO);
        self.retry = Some(Box::pin(tokio::time::sleep(delay)));
        self.transition(ConnectionState::Reconnecting, 0, Some(reason), false);
    }

    /// The server refused further reconnects; only an explicit `connect`
    /// starts over.
    fn on_closed_for_good(&mut self, reason: String) {
        warn!(reason = %reason, "Hub closed the connection and disallowed reconnect");
        self.link = None;
        self.keep_alive = None;
        self.retry = None;
        self.attempt = None;
        self.user = None;
        self.transition(ConnectionState::Disconnected, 0, Some(reason), true);
    }

    fn on_frame(&mut self, frame: HubFrame) {
        match frame {
            HubFrame::Invocation {
                target, arguments, ..
            } if target == HUB_EVENT_MESSAGES => match decode_hub_message(arguments) {
                Some(message) => {
                    debug!(from = %message.sender_id, to = %message.recipient_id, "Hub message received");
                    // No receivers is fine; nobody is listening yet.
                    let _ = self.inbound_tx.send(message);
                }
                None => warn!("Malformed Messages event from hub"),
            },
            HubFrame::Invocation { target, .. } => {
                debug!(target = %target, "Unhandled hub invocation");
            }
            HubFrame::Completion {
                invocation_id,
                error: Some(error),
                ..
            } => {
                warn!(invocation = %invocation_id, error = %error, "Hub invocation failed");
            }
            HubFrame::Completion { invocation_id, .. } => {
                debug!(invocation = %invocation_id, "Hub invocation completed");
            }
            HubFrame::Ping => debug!("Hub ping"),
            HubFrame::Close {
                error,
                allow_reconnect,
            } => {
                let reason = error.unwrap_or_else(|| "server closed the connection".to_string());
                if allow_reconnect {
                    self.on_link_lost(reason);
                } else {
                    self.on_closed_for_good(reason);
                }
            }
        }
    }

    fn on_keep_alive(&mut self) {
        let closed = match &self.link {
            Some(link) => matches!(
                link.outbound.try_send(HubFrame::Ping),
                Err(mpsc::error::TrySendError::Closed(_))
            ),
            None => false,
        };
        if closed {
            self.on_link_lost("hub link closed during keep-alive".to_string());
        }
    }
}

async fn open_and_register(
    connector: Arc<dyn HubConnector>,
    user: UserId,
) -> Result<HubLink, NetError> {
    let link = connector.open().await?;
    let register = HubFrame::invocation(HUB_METHOD_CONNECT, vec![Value::from(user.as_str())]);
    link.outbound
        .send(register)
        .await
        .map_err(|_| NetError::LinkClosed)?;
    Ok(link)
}

fn decode_hub_message(arguments: Vec<Value>) -> Option<InboundMessage> {
    let payload = arguments.into_iter().next()?;
    serde_json::from_value::<HubMessage>(payload)
        .ok()
        .map(InboundMessage::from)
}

async fn poll_attempt(attempt: &mut Option<Attempt>) -> Result<HubLink, NetError> {
    match attempt {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn poll_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

async fn poll_link(link: &mut Option<HubLink>) -> Option<HubFrame> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => std::future::pending().await,
    }
}

async fn poll_keep_alive(keep_alive: &mut Option<Interval>) {
    match keep_alive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    /// Server-side ends of a link handed out by [`MockConnector`].
    struct ServerEnd {
        from_client: mpsc::Receiver<HubFrame>,
        to_client: mpsc::Sender<HubFrame>,
    }

    struct MockConnector {
        opens: Arc<AtomicU32>,
        fail_first: AtomicU32,
        server_tx: mpsc::UnboundedSender<ServerEnd>,
    }

    #[async_trait]
    impl HubConnector for MockConnector {
        async fn open(&self) -> Result<HubLink, NetError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let remaining = self.fail_first.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_first.store(remaining - 1, Ordering::SeqCst);
                return Err(NetError::Transport("refused".into()));
            }
            let (out_tx, out_rx) = mpsc::channel(16);
            let (in_tx, in_rx) = mpsc::channel(16);
            let _ = self.server_tx.send(ServerEnd {
                from_client: out_rx,
                to_client: in_tx,
            });
            Ok(HubLink {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
    }

    fn spawn_mock(
        fail_first: u32,
        config: HubConfig,
    ) -> (ConnectionHandle, Arc<AtomicU32>, mpsc::UnboundedReceiver<ServerEnd>) {
        let opens = Arc::new(AtomicU32::new(0));
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let handle = spawn_hub(
            MockConnector {
                opens: opens.clone(),
                fail_first: AtomicU32::new(fail_first),
                server_tx,
            },
            config,
        );
        (handle, opens, server_rx)
    }

    async fn wait_for_state(handle: &ConnectionHandle, state: ConnectionState) -> HubStatus {
        let mut rx = handle.watch_status();
        let status = rx.wait_for(|s| s.state == state).await.unwrap().clone();
        status
    }

    fn assert_register(frame: HubFrame, user: &str) {
        match frame {
            HubFrame::Invocation {
                target, arguments, ..
            } => {
                assert_eq!(target, HUB_METHOD_CONNECT);
                assert_eq!(arguments, vec![Value::from(user)]);
            }
            other => panic!("expected registration, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_registers_user() {
        let (handle, _, mut servers) = spawn_mock(0, HubConfig::default());
        assert_eq!(handle.state(), ConnectionState::Disconnected);

        handle.connect("u1".into()).await.unwrap();
        let mut server = servers.recv().await.unwrap();
        assert_register(server.from_client.recv().await.unwrap(), "u1");
        wait_for_state(&handle, ConnectionState::Connected).await;
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let (handle, opens, mut servers) = spawn_mock(0, HubConfig::default());

        handle.connect("u1".into()).await.unwrap();
        handle.connect("u1".into()).await.unwrap();
        wait_for_state(&handle, ConnectionState::Connected).await;
        handle.connect("u1".into()).await.unwrap();

        let mut server = servers.recv().await.unwrap();
        assert_register(server.from_client.recv().await.unwrap(), "u1");

        // Round-trip a command so every queued connect has been processed.
        assert!(matches!(
            handle
                .send_realtime(SendMessageRequest {
                    user_id: "u1".into(),
                    to_user_id: "s1".into(),
                    message: "x".into(),
                })
                .await,
            Ok(())
        ));
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(servers.try_recv().is_err());

        // Only the SendMessage invocation follows the single registration.
        match server.from_client.recv().await.unwrap() {
            HubFrame::Invocation { target, .. } => assert_eq!(target, HUB_METHOD_SEND),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reconnect_replays_registration() {
        let (handle, opens, mut servers) = spawn_mock(0, HubConfig::default());
        handle.connect("u1".into()).await.unwrap();

        let mut first = servers.recv().await.unwrap();
        assert_register(first.from_client.recv().await.unwrap(), "u1");
        wait_for_state(&handle, ConnectionState::Connected).await;

        // Simulate the socket dropping.
        drop(first);

        let mut second = servers.recv().await.unwrap();
        assert_register(second.from_client.recv().await.unwrap(), "u1");
        let status = wait_for_state(&handle, ConnectionState::Connected).await;
        assert!(!status.gave_up);
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert!(second.from_client.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_retries_then_connects() {
        let (handle, opens, mut servers) = spawn_mock(2, HubConfig::default());
        handle.connect("u1".into()).await.unwrap();

        let mut server = servers.recv().await.unwrap();
        assert_register(server.from_client.recv().await.unwrap(), "u1");
        wait_for_state(&handle, ConnectionState::Connected).await;
        assert_eq!(opens.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_after_max_attempts() {
        let config = HubConfig {
            max_connect_attempts: 3,
            ..HubConfig::default()
        };
        let (handle, opens, _servers) = spawn_mock(u32::MAX, config);
        handle.connect("u1".into()).await.unwrap();

        let mut rx = handle.watch_status();
        let status = rx.wait_for(|s| s.gave_up).await.unwrap().clone();
        assert_eq!(status.state, ConnectionState::Error);
        assert_eq!(status.failed_attempts, 3);
        assert!(status.last_error.is_some());

        // No further retries once terminal.
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(opens.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_connect_after_give_up_starts_over() {
        let config = HubConfig {
            max_connect_attempts: 1,
            ..HubConfig::default()
        };
        let (handle, opens, mut servers) = spawn_mock(1, config);
        handle.connect("u1".into()).await.unwrap();
        handle.watch_status().wait_for(|s| s.gave_up).await.unwrap();

        handle.connect("u1".into()).await.unwrap();
        let mut server = servers.recv().await.unwrap();
        assert_register(server.from_client.recv().await.unwrap(), "u1");
        wait_for_state(&handle, ConnectionState::Connected).await;
        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (handle, _, mut servers) = spawn_mock(0, HubConfig::default());
        handle.connect("u1".into()).await.unwrap();
        let mut server = servers.recv().await.unwrap();
        wait_for_state(&handle, ConnectionState::Connected).await;

        handle.disconnect().await.unwrap();
        handle.disconnect().await.unwrap();
        wait_for_state(&handle, ConnectionState::Disconnected).await;

        // Registration, then a close frame, then the link is gone.
        assert_register(server.from_client.recv().await.unwrap(), "u1");
        assert!(matches!(
            server.from_client.recv().await,
            Some(HubFrame::Close { .. })
        ));
        assert!(server.from_client.recv().await.is_none());
        assert!(matches!(
            handle
                .send_realtime(SendMessageRequest {
                    user_id: "u1".into(),
                    to_user_id: "s1".into(),
                    message: "x".into(),
                })
                .await,
            Err(NetError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_inbound_messages_reach_listeners() {
        let (handle, _, mut servers) = spawn_mock(0, HubConfig::default());
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let _listener = handle.on_message(move |m| {
            let _ = seen_tx.send(m);
        });

        handle.connect("u1".into()).await.unwrap();
        let server = servers.recv().await.unwrap();
        server
            .to_client
            .send(HubFrame::invocation(
                HUB_EVENT_MESSAGES,
                vec![serde_json::json!({
                    "userId": "support-2",
                    "toUserId": "u1",
                    "message": "ping",
                    "date": "2024-01-01T10:00:00Z"
                })],
            ))
            .await
            .unwrap();

        let message = seen_rx.recv().await.unwrap();
        assert_eq!(message.sender_id, UserId::from("support-2"));
        assert_eq!(message.recipient_id, UserId::from("u1"));
        assert_eq!(message.body, "ping");
    }

    #[tokio::test]
    async fn test_dropped_listener_stops_delivery() {
        let (handle, _, _servers) = spawn_mock(0, HubConfig::default());
        let listener = handle.on_message(|_| {});
        assert_eq!(handle.inbound_tx.receiver_count(), 1);
        drop(listener);
        for _ in 0..10 {
            if handle.inbound_tx.receiver_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(handle.inbound_tx.receiver_count(), 0);
    }

    struct HangingConnector;

    #[async_trait]
    impl HubConnector for HangingConnector {
        async fn open(&self) -> Result<HubLink, NetError> {
            std::future::pending().await
        }
    }

    /// Opens one working link, then refuses every later attempt.
    struct SingleUseConnector {
        opens: Arc<AtomicU32>,
        server_tx: mpsc::UnboundedSender<ServerEnd>,
    }

    #[async_trait]
    impl HubConnector for SingleUseConnector {
        async fn open(&self) -> Result<HubLink, NetError> {
            if self.opens.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(NetError::Transport("refused".into()));
            }
            let (out_tx, out_rx) = mpsc::channel(16);
            let (in_tx, in_rx) = mpsc::channel(16);
            let _ = self.server_tx.send(ServerEnd {
                from_client: out_rx,
                to_client: in_tx,
            });
            Ok(HubLink {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
    }

    fn realtime(body: &str) -> SendMessageRequest {
        SendMessageRequest {
            user_id: "u1".into(),
            to_user_id: "s1".into(),
            message: body.into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_counts_as_failure() {
        let handle = spawn_hub(HangingConnector, HubConfig::default());
        handle.connect("u1".into()).await.unwrap();

        let status = wait_for_state(&handle, ConnectionState::Error).await;
        assert_eq!(status.failed_attempts, 1);
        assert!(!status.gave_up);
        assert!(status.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_retry() {
        let (handle, opens, _servers) = spawn_mock(u32::MAX, HubConfig::default());
        handle.connect("u1".into()).await.unwrap();
        wait_for_state(&handle, ConnectionState::Error).await;
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        handle.disconnect().await.unwrap();
        wait_for_state(&handle, ConnectionState::Disconnected).await;

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up_after_schedule() {
        let opens = Arc::new(AtomicU32::new(0));
        let (server_tx, mut servers) = mpsc::unbounded_channel();
        let handle = spawn_hub(
            SingleUseConnector {
                opens: opens.clone(),
                server_tx,
            },
            HubConfig::default(),
        );
        handle.connect("u1".into()).await.unwrap();
        let server = servers.recv().await.unwrap();
        wait_for_state(&handle, ConnectionState::Connected).await;

        drop(server);

        let mut rx = handle.watch_status();
        let status = rx.wait_for(|s| s.gave_up).await.unwrap().clone();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(opens.load(Ordering::SeqCst), 1 + RECONNECT_DELAYS.len() as u32);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(opens.load(Ordering::SeqCst), 1 + RECONNECT_DELAYS.len() as u32);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_without_reconnect_stops() {
        let (handle, opens, mut servers) = spawn_mock(0, HubConfig::default());
        handle.connect("u1".into()).await.unwrap();
        let server = servers.recv().await.unwrap();
        wait_for_state(&handle, ConnectionState::Connected).await;

        server
            .to_client
            .send(HubFrame::Close {
                error: Some("session revoked".into()),
                allow_reconnect: false,
            })
            .await
            .unwrap();

        let mut rx = handle.watch_status();
        let status = rx.wait_for(|s| s.gave_up).await.unwrap().clone();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.last_error.as_deref(), Some("session revoked"));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stalled_writer_does_not_block_actor() {
        let (handle, _, mut servers) = spawn_mock(0, HubConfig::default());
        handle.connect("u1".into()).await.unwrap();
        // Keep the link open but never read from it.
        let _server = servers.recv().await.unwrap();
        wait_for_state(&handle, ConnectionState::Connected).await;

        let mut accepted = 0;
        let rejected = loop {
            match handle.send_realtime(realtime("x")).await {
                Ok(()) => accepted += 1,
                Err(e) => break e,
            }
            assert!(accepted <= 16, "outbound queue never filled");
        };
        assert!(matches!(rejected, NetError::Backpressure));

        handle.disconnect().await.unwrap();
        wait_for_state(&handle, ConnectionState::Disconnected).await;
    }
}
