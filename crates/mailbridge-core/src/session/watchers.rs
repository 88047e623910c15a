//! Background tasks reacting to application-wide signals.
//!
//! Both watchers hold only a weak reference to the manager and exit when
//! it is dropped, when their source closes, or when stop is signalled.

use std::sync::Weak;

use mailbridge_api::AuthEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::SessionManager;

/// Marks the application outdated and drops every protocol connection on
/// the first upgrade-required event.
pub(super) async fn watch_app_outdated(
    manager: Weak<SessionManager>,
    mut events: broadcast::Receiver<String>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let received = tokio::select! {
            received = events.recv() => received,
            _ = stop.wait_for(|stopped| *stopped) => break,
        };

        match received {
            // A lagged receiver still means at least one upgrade event arrived.
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }

        let Some(manager) = manager.upgrade() else {
            break;
        };

        manager.config.mark_application_outdated();
        manager.close_all_connections();
    }

    debug!("Application outdated watcher stopped");
}

/// Applies refreshed sessions and logs out accounts whose session the API
/// invalidated.
pub(super) async fn watch_api_auths(
    manager: Weak<SessionManager>,
    mut auths: broadcast::Receiver<AuthEvent>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let received = tokio::select! {
            received = auths.recv() => received,
            _ = stop.wait_for(|stopped| *stopped) => break,
        };

        let event = match received {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "Auth watcher lagged behind, events dropped");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let Some(manager) = manager.upgrade() else {
            break;
        };

        manager.handle_auth_event(event).await;
    }

    debug!("API auth watcher stopped");
}

impl SessionManager {
    async fn handle_auth_event(&self, event: AuthEvent) {
        debug!(user = %event.user_id, "Received auth event");

        let Some(account) = self.find_by_id(&event.user_id) else {
            info!(user = %event.user_id, "User not available for auth update");
            return;
        };

        match event.auth {
            Some(auth) => account.update_auth_token(&auth),
            None => {
                if let Err(e) = account.logout().await {
                    error!(user = %event.user_id, error = %e, "User logout failed while watching API auths");
                }
            }
        }
    }
}
