//! Account resolution
//!
//! Every component picks the account process to act on through
//! [`AccountResolver::resolve`]: explicit pid, then the selected account,
//! then the first logged-in account the facade reports.

use crate::facade::ChatClient;
use chatpilot_common::types::Pid;
use chatpilot_common::{Error, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Resolves which account process an operation should use
#[derive(Clone)]
pub struct AccountResolver {
    client: Arc<dyn ChatClient>,
    selected: Arc<watch::Sender<Option<Pid>>>,
}

impl AccountResolver {
    pub fn new(client: Arc<dyn ChatClient>) -> Self {
        let (selected, _) = watch::channel(None);
        Self {
            client,
            selected: Arc::new(selected),
        }
    }

    /// Set or clear the currently selected account
    pub fn select(&self, pid: Option<Pid>) {
        self.selected.send_replace(pid);
        debug!(?pid, "Selected account changed");
    }

    pub fn selected(&self) -> Option<Pid> {
        *self.selected.borrow()
    }

    /// Resolve with precedence explicit > selected > first discovered
    pub async fn resolve(&self, explicit: Option<Pid>) -> Result<Pid> {
        if let Some(pid) = explicit {
            return Ok(pid);
        }
        if let Some(pid) = self.selected() {
            return Ok(pid);
        }
        let accounts = self.client.list_logged_in_accounts().await?;
        accounts.first().map(|a| a.pid).ok_or(Error::NoAccount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChatClient;

    #[tokio::test]
    async fn test_resolution_precedence() {
        let mock = Arc::new(MockChatClient::with_accounts(&[7, 8]));
        let resolver = AccountResolver::new(mock.clone());

        assert_eq!(resolver.resolve(None).await.unwrap(), 7);

        resolver.select(Some(8));
        assert_eq!(resolver.resolve(None).await.unwrap(), 8);
        assert_eq!(resolver.resolve(Some(3)).await.unwrap(), 3);

        // Explicit and selected never hit the facade
        assert_eq!(mock.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_no_account() {
        let resolver = AccountResolver::new(Arc::new(MockChatClient::new()));
        let err = resolver.resolve(None).await.unwrap_err();
        assert!(matches!(err, Error::NoAccount));
    }
}
