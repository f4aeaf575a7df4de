//! Session facade: one store and one hub connection per signed-in user,
//! created at login and torn down at logout.

use std::sync::Arc;

use tracing::{error, info, warn};

use parley_net::{
    spawn_hub, ChatApi, ConnectionHandle, HubConfig, HubConnector, HubStatus, MessageListener,
    RestChatClient, WsConnector,
};
use parley_shared::types::{DirectoryUser, Role};
use parley_shared::ChatError;
use parley_store::Database;

use crate::config::{ChatConfig, DatabaseLocation, SessionIdentity};
use crate::store::MessageStore;

pub struct ChatSession {
    identity: SessionIdentity,
    api: Arc<dyn ChatApi>,
    hub: ConnectionHandle,
    store: MessageStore,
    bridge: Option<MessageListener>,
}

impl ChatSession {
    /// Build the REST client, spawn the hub actor, open the database and
    /// restore the previous state. Must run inside a tokio runtime.
    ///
    /// The hub is not connected yet; call [`ChatSession::connect`].
    pub fn start(config: &ChatConfig, identity: SessionIdentity) -> Result<Self, ChatError> {
        let api = RestChatClient::with_timeout(
            &config.api_url,
            config.access_token.clone(),
            config.request_timeout,
        )?;
        let connector = WsConnector::new(&config.hub_url, config.access_token.clone())?;
        let database = open_database(&config.database, &identity);

        Ok(Self::from_parts(
            identity,
            Arc::new(api),
            connector,
            config.hub_config(),
            database,
            config.realtime_push,
        ))
    }

    /// Assemble a session from explicit parts.
    pub fn from_parts<C: HubConnector>(
        identity: SessionIdentity,
        api: Arc<dyn ChatApi>,
        connector: C,
        hub_config: HubConfig,
        database: Option<Database>,
        realtime_push: bool,
    ) -> Self {
        let hub = spawn_hub(connector, hub_config);
        let store = MessageStore::new(api.clone(), Some(identity.user_id.clone()), database)
            .with_hub(hub.clone())
            .with_realtime_push(realtime_push);
        store.restore();

        let bridge = {
            let store = store.clone();
            hub.on_message(move |message| store.handle_inbound(message))
        };

        info!(user = %identity.user_id, role = ?identity.role, "Chat session started");

        Self {
            identity,
            api,
            hub,
            store,
            bridge: Some(bridge),
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn role(&self) -> Role {
        self.identity.role
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn hub(&self) -> &ConnectionHandle {
        &self.hub
    }

    /// Connect the hub as the session user. Idempotent while connecting or
    /// connected.
    pub async fn connect(&self) -> Result<(), ChatError> {
        self.hub.connect(self.identity.user_id.clone()).await?;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), ChatError> {
        self.hub.disconnect().await?;
        Ok(())
    }

    pub fn connection_status(&self) -> HubStatus {
        self.hub.status()
    }

    pub fn is_connected(&self) -> bool {
        self.hub.is_connected()
    }

    /// Users the session user may start a conversation with.
    pub async fn directory(&self) -> Result<Vec<DirectoryUser>, ChatError> {
        list_directory(self.api.as_ref(), self.identity.role).await
    }

    /// Logout teardown: disconnect, stop the inbound bridge, stop the actor.
    pub async fn dispose(mut self) {
        if let Err(e) = self.hub.disconnect().await {
            warn!(error = %e, "Disconnect during dispose failed");
        }
        drop(self.bridge.take());
        self.hub.shutdown().await;
        info!(user = %self.identity.user_id, "Chat session disposed");
    }
}

/// Customers see support agents; support and admins see everyone.
pub async fn list_directory(api: &dyn ChatApi, role: Role) -> Result<Vec<DirectoryUser>, ChatError> {
    let users = if role.sees_all_users() {
        api.list_all_users().await?
    } else {
        api.list_support_users().await?
    };
    Ok(users)
}

fn open_database(location: &DatabaseLocation, identity: &SessionIdentity) -> Option<Database> {
    let dir = match location {
        DatabaseLocation::Disabled => return None,
        DatabaseLocation::Dir(dir) => dir.clone(),
        DatabaseLocation::Default => match Database::default_dir() {
            Ok(dir) => dir,
            Err(e) => {
                error!(error = %e, "No data directory, running without persistence");
                return None;
            }
        },
    };

    match Database::open_for_user(&dir, identity.user_id.as_str()) {
        Ok(db) => Some(db),
        Err(e) => {
            error!(error = %e, dir = %dir.display(), "Failed to open database, running without persistence");
            None
        }
    }
}
