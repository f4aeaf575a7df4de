//! Stateless HTTP calls backing chat history, the user directory and message
//! delivery.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use parley_shared::constants::{
    DEFAULT_REQUEST_TIMEOUT, PATH_GET_CHATS, PATH_GET_SUPPORT, PATH_GET_USERS, PATH_SEND_MESSAGE,
};
use parley_shared::protocol::{ChatRecord, SendMessageRequest};
use parley_shared::types::{DirectoryUser, UserId};

use crate::error::NetError;

/// The chat REST surface. [`RestChatClient`] is the HTTP implementation;
/// tests substitute their own.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Full history between the local user and `peer`.
    async fn load_messages(&self, peer: &UserId) -> Result<Vec<ChatRecord>, NetError>;

    /// Support agents; callable by regular users only.
    async fn list_support_users(&self) -> Result<Vec<DirectoryUser>, NetError>;

    /// Every user; callable by support and admin only.
    async fn list_all_users(&self) -> Result<Vec<DirectoryUser>, NetError>;

    /// Persist a message. Independent of the hub connection.
    async fn send(&self, request: &SendMessageRequest) -> Result<(), NetError>;
}

/// reqwest-backed [`ChatApi`].
#[derive(Debug, Clone)]
pub struct RestChatClient {
    http: Client,
    base_url: Url,
    access_token: Option<String>,
}

impl RestChatClient {
    pub fn new(base_url: &str, access_token: Option<String>) -> Result<Self, NetError> {
        Self::with_timeout(base_url, access_token, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, NetError> {
        let mut base_url = Url::parse(base_url)?;
        // Url::join drops the last segment unless the base ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            access_token,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, NetError> {
        Ok(self.base_url.join(path)?)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, NetError> {
        debug!(url = %url, "GET");
        let response = self.authorize(self.http.get(url)).send().await?;
        let body = check_status(response).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

async fn check_status(response: Response) -> Result<Response, NetError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    warn!(status = status.as_u16(), url = %response.url(), "Chat API request rejected");
    match status {
        StatusCode::UNAUTHORIZED => Err(NetError::Unauthorized),
        StatusCode::FORBIDDEN => Err(NetError::Forbidden),
        _ => Err(NetError::Status {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        }),
    }
}

#[async_trait]
impl ChatApi for RestChatClient {
    async fn load_messages(&self, peer: &UserId) -> Result<Vec<ChatRecord>, NetError> {
        let mut url = self.endpoint(PATH_GET_CHATS)?;
        url.query_pairs_mut().append_pair("toUserId", peer.as_str());
        self.get_json(url).await
    }

    async fn list_support_users(&self) -> Result<Vec<DirectoryUser>, NetError> {
        self.get_json(self.endpoint(PATH_GET_SUPPORT)?).await
    }

    async fn list_all_users(&self) -> Result<Vec<DirectoryUser>, NetError> {
        self.get_json(self.endpoint(PATH_GET_USERS)?).await
    }

    async fn send(&self, request: &SendMessageRequest) -> Result<(), NetError> {
        let url = self.endpoint(PATH_SEND_MESSAGE)?;
        debug!(url = %url, to = %request.to_user_id, "POST");
        let response = self
            .authorize(self.http.post(url))
            .json(request)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = RestChatClient::new("https://shop.example/api", None).unwrap();
        assert_eq!(
            client.endpoint(PATH_GET_CHATS).unwrap().as_str(),
            "https://shop.example/api/Chat/GetChats"
        );

        let client = RestChatClient::new("https://shop.example/api/", None).unwrap();
        assert_eq!(
            client.endpoint(PATH_SEND_MESSAGE).unwrap().as_str(),
            "https://shop.example/api/Chat/SendMessage"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            RestChatClient::new("::nope::", None),
            Err(NetError::Url(_))
        ));
    }

    #[test]
    fn test_bearer_header_attached() {
        let client = RestChatClient::new("http://localhost/api", Some("tok".into())).unwrap();
        let request = client
            .authorize(client.http.get("http://localhost/api/x"))
            .build()
            .unwrap();
        assert_eq!(
            request.headers().get(reqwest::header::AUTHORIZATION).unwrap(),
            "Bearer tok"
        );
    }

    #[test]
    fn test_net_errors_map_to_chat_errors() {
        use parley_shared::ChatError;

        assert!(matches!(
            ChatError::from(NetError::Forbidden),
            ChatError::Authorization(_)
        ));
        assert!(matches!(
            ChatError::from(NetError::Status {
                status: 500,
                body: String::new()
            }),
            ChatError::Network(_)
        ));
        assert!(matches!(
            ChatError::from(NetError::NotConnected),
            ChatError::Connection(_)
        ));
    }
}
