//! External collaborators shared by the session manager and its accounts.

use std::sync::Arc;

use mailbridge_api::ClientManager;

use crate::account::CredentialStore;
use crate::events::Listener;
use crate::store::StoreFactory;

/// Handles to the collaborators the session layer drives.
#[derive(Clone)]
pub struct Services {
    /// Event bus.
    pub events: Arc<dyn Listener>,
    /// Persistent credential storage.
    pub credentials: Arc<dyn CredentialStore>,
    /// Source of API clients and session events.
    pub clients: Arc<dyn ClientManager>,
    /// Mail store lifecycle.
    pub stores: Arc<dyn StoreFactory>,
}

impl Services {
    /// Bundles the collaborators.
    #[must_use]
    pub fn new(
        events: Arc<dyn Listener>,
        credentials: Arc<dyn CredentialStore>,
        clients: Arc<dyn ClientManager>,
        stores: Arc<dyn StoreFactory>,
    ) -> Self {
        Self {
            events,
            credentials,
            clients,
            stores,
        }
    }
}
