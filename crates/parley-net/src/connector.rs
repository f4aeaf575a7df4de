//! Transport seam between the connection actor and the wire.

use async_trait::async_trait;
use tokio::sync::mpsc;

use parley_shared::frame::HubFrame;

use crate::error::NetError;

/// An open, handshaken hub connection seen as two frame channels.
///
/// The link is considered dropped once `inbound` yields `None`. Dropping the
/// link closes the underlying transport.
#[derive(Debug)]
pub struct HubLink {
    pub outbound: mpsc::Sender<HubFrame>,
    pub inbound: mpsc::Receiver<HubFrame>,
}

/// Opens hub links. Implemented by [`crate::WsConnector`] for real
/// WebSocket connections.
#[async_trait]
pub trait HubConnector: Send + Sync + 'static {
    /// Open the transport and complete the hub protocol handshake.
    async fn open(&self) -> Result<HubLink, NetError>;
}
