//! Application state shared across handlers.

use crate::auth::{AuthEvent, AuthService};
use crate::catalog::CatalogAggregator;
use crate::collection::CollectionManager;
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

/// Shared application state.
///
/// Every service is built once at startup and handed to the router.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Authentication service.
    pub auth: Arc<AuthService>,
    /// Collection manager.
    pub collection: Arc<CollectionManager>,
}

impl AppState {
    /// Create state from already constructed services.
    pub fn new(
        config: Config,
        auth: AuthService,
        collection: CollectionManager,
    ) -> Self {
        Self {
            config: Arc::new(config),
            auth: Arc::new(auth),
            collection: Arc::new(collection),
        }
    }

    /// Wire the default services for a configuration and database.
    pub fn from_config(config: Config, db: Database) -> Result<Self> {
        let auth = AuthService::new(
            db.clone(),
            config.auth.session_days,
            config.auth.registration_enabled(),
            config.auth.allowed_origins.clone(),
        );
        let catalog = CatalogAggregator::from_config(&config.catalog)?;
        let collection = CollectionManager::new(Arc::new(db), catalog);

        Ok(Self::new(config, auth, collection))
    }

    /// Follow auth events: drop cached collections of users who signed out.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_auth_listener(&self) -> tokio::task::JoinHandle<()> {
        let events = self.auth.subscribe();
        let collection = self.collection.clone();
        tokio::spawn(follow_auth_events(events, collection))
    }
}

async fn follow_auth_events(
    mut events: broadcast::Receiver<AuthEvent>,
    collection: Arc<CollectionManager>,
) {
    loop {
        match events.recv().await {
            Ok(AuthEvent::SignedIn(user)) => {
                tracing::debug!(user_id = %user.id, "Current user changed");
            }
            Ok(AuthEvent::SignedOut { user_id }) => {
                collection.forget_user(&user_id);
                tracing::debug!(%user_id, "Dropped cached collection");
            }
            Ok(AuthEvent::ProfileUpdated(user)) => {
                tracing::debug!(user_id = %user.id, "Profile changed");
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Auth listener lagged behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
