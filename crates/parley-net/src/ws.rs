//! WebSocket transport for the hub.
//!
//! Connects straight to the hub endpoint (no negotiate round-trip), performs
//! the JSON protocol handshake, then pumps frames between the socket and the
//! [`HubLink`] channels in two background tasks.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use parley_shared::frame::{handshake_request, parse_handshake_response, HubFrame};

use crate::connector::{HubConnector, HubLink};
use crate::error::NetError;

const LINK_BUFFER: usize = 64;

/// Opens hub links over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    hub_url: Url,
    access_token: Option<String>,
}

impl WsConnector {
    /// `hub_url` may use `http(s)` or `ws(s)`; HTTP schemes are rewritten.
    pub fn new(hub_url: &str, access_token: Option<String>) -> Result<Self, NetError> {
        let mut url = Url::parse(hub_url)?;
        let scheme = match url.scheme() {
            "http" => Some("ws"),
            "https" => Some("wss"),
            _ => None,
        };
        if let Some(scheme) = scheme {
            url.set_scheme(scheme)
                .map_err(|_| NetError::Transport(format!("cannot use scheme {scheme}")))?;
        }
        Ok(Self {
            hub_url: url,
            access_token,
        })
    }

    /// Browsers cannot set headers on WebSocket upgrades, so hubs also
    /// accept the token as a query parameter. Both are sent.
    fn endpoint(&self) -> Url {
        let mut url = self.hub_url.clone();
        if let Some(token) = &self.access_token {
            url.query_pairs_mut().append_pair("access_token", token);
        }
        url
    }
}

#[async_trait]
impl HubConnector for WsConnector {
    async fn open(&self) -> Result<HubLink, NetError> {
        let endpoint = self.endpoint();
        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| NetError::Transport(e.to_string()))?;
        if let Some(token) = &self.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| NetError::Transport(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| NetError::Transport(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        sink.send(Message::Text(handshake_request().into()))
            .await
            .map_err(|e| NetError::Transport(e.to_string()))?;

        // The handshake response may share a text frame with the first
        // regular messages.
        let leftover = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    break parse_handshake_response(text.as_str())?.to_string();
                }
                Some(Ok(Message::Close(_))) | None => return Err(NetError::LinkClosed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(NetError::Transport(e.to_string())),
            }
        };
        info!(hub = %self.hub_url, "Hub handshake complete");

        let (out_tx, mut out_rx) = mpsc::channel::<HubFrame>(LINK_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<HubFrame>(LINK_BUFFER);

        for frame in HubFrame::decode_all(&leftover)? {
            let _ = in_tx.send(frame).await;
        }

        // Writer: ends when the link's outbound sender is dropped.
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let text = match frame.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode hub frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!(error = %e, "Hub socket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
            debug!("Hub writer finished");
        });

        // Reader: ends on socket close or when the link is dropped.
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(frame)) => {
                        debug!(frame = ?frame, "Hub socket closed by server");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "Hub socket read failed");
                        break;
                    }
                };
                match HubFrame::decode_all(text.as_str()) {
                    Ok(frames) => {
                        for frame in frames {
                            if in_tx.send(frame).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "Dropping malformed hub payload"),
                }
            }
            debug!("Hub reader finished");
        });

        Ok(HubLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_scheme_is_rewritten() {
        let c = WsConnector::new("https://shop.example/chatHub", None).unwrap();
        assert_eq!(c.endpoint().as_str(), "wss://shop.example/chatHub");

        let c = WsConnector::new("http://localhost:5000/chatHub", None).unwrap();
        assert_eq!(c.endpoint().scheme(), "ws");
    }

    #[test]
    fn test_token_in_query() {
        let c = WsConnector::new("ws://localhost/chatHub", Some("abc".into())).unwrap();
        assert_eq!(c.endpoint().as_str(), "ws://localhost/chatHub?access_token=abc");
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            WsConnector::new("not a url", None),
            Err(NetError::Url(_))
        ));
    }
}
