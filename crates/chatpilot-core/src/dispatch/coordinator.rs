//! Delayed dispatch coordinator
//!
//! Each scheduled directive gets its own timer task guarded by a
//! cancellation token. When the timer fires the directive is resolved to an
//! account, classified and sent through the facade. Failures go to the
//! status bus and are never retried.

use super::{Directive, Payload};
use crate::facade::ChatClient;
use crate::resolver::AccountResolver;
use crate::status::StatusBus;
use chatpilot_common::types::{DirectiveId, Pid};
use chatpilot_common::Error;
use chatpilot_storage::models::{OutgoingKind, OutgoingMessage};
use chatpilot_storage::OutgoingLog;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error as ThisError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why a send did not go out
#[derive(Debug, ThisError)]
pub enum DispatchError {
    #[error("no logged-in account available")]
    NoAccount,

    #[error("client refused message to {0}")]
    Rejected(String),

    #[error(transparent)]
    Facade(#[from] Error),
}

impl From<DispatchError> for Error {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::NoAccount => Error::NoAccount,
            DispatchError::Rejected(receiver) => {
                Error::Automation(format!("client refused message to {}", receiver))
            }
            DispatchError::Facade(e) => e,
        }
    }
}

struct Pending {
    kind: OutgoingKind,
    token: CancellationToken,
}

struct Inner {
    client: Arc<dyn ChatClient>,
    resolver: AccountResolver,
    log: OutgoingLog,
    status: StatusBus,
    image_extensions: Vec<String>,
    pending: Mutex<HashMap<DirectiveId, Pending>>,
    shutdown: CancellationToken,
}

/// Delay queue for outgoing directives
#[derive(Clone)]
pub struct DispatchCoordinator {
    inner: Arc<Inner>,
}

impl DispatchCoordinator {
    pub fn new(
        client: Arc<dyn ChatClient>,
        resolver: AccountResolver,
        log: OutgoingLog,
        status: StatusBus,
        image_extensions: Vec<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                resolver,
                log,
                status,
                image_extensions,
                pending: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<DirectiveId, Pending>> {
        self.inner.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arm a one-shot timer for the directive
    pub fn schedule(&self, directive: Directive) -> DirectiveId {
        let id = directive.id;
        let token = self.inner.shutdown.child_token();
        self.pending().insert(
            id,
            Pending {
                kind: directive.kind,
                token: token.clone(),
            },
        );
        debug!(
            directive = %id,
            receiver = %directive.receiver,
            delay_secs = directive.delay.as_secs(),
            "Directive scheduled"
        );

        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    this.pending().remove(&id);
                    debug!(directive = %id, "Directive cancelled before firing");
                    return;
                }
                _ = tokio::time::sleep(directive.delay) => {}
            }

            // Once fired the directive can no longer be cancelled
            let armed = this.pending().remove(&id).is_some();
            if !armed {
                return;
            }
            if let Err(e) = this.send_now(&directive).await {
                this.inner.status.warning(format!(
                    "Failed to send {} to {}: {}",
                    directive.kind, directive.receiver, e
                ));
            }
        });

        id
    }

    /// Drop a directive that has not fired yet
    pub fn cancel(&self, id: DirectiveId) -> bool {
        match self.pending().remove(&id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop every pending directive of one kind; returns how many were dropped
    pub fn cancel_kind(&self, kind: OutgoingKind) -> usize {
        let mut pending = self.pending();
        let ids: Vec<DirectiveId> = pending
            .iter()
            .filter(|(_, p)| p.kind == kind)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some(entry) = pending.remove(id) {
                entry.token.cancel();
            }
        }
        if !ids.is_empty() {
            info!(count = ids.len(), %kind, "Cancelled pending directives");
        }
        ids.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Cancel all pending timers
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.pending().clear();
    }

    /// Resolve, classify and send a directive right away
    pub async fn send_now(&self, directive: &Directive) -> Result<(), DispatchError> {
        let pid = self
            .inner
            .resolver
            .resolve(directive.pid)
            .await
            .map_err(|e| match e {
                Error::NoAccount => DispatchError::NoAccount,
                other => DispatchError::Facade(other),
            })?;
        let payload = Payload::classify(&directive.content, &self.inner.image_extensions).await;
        self.send_payload(pid, &directive.receiver, payload, directive.kind)
            .await
    }

    /// Send an already classified payload from a known account.
    ///
    /// Group receivers get the content as is, without an `@` marker.
    pub async fn send_payload(
        &self,
        pid: Pid,
        receiver: &str,
        payload: Payload,
        kind: OutgoingKind,
    ) -> Result<(), DispatchError> {
        let client = &self.inner.client;
        let delivered = match &payload {
            Payload::Text(text) => client.send_text(pid, receiver, text).await?,
            Payload::Media(path) => client.send_media(pid, receiver, path).await?,
            Payload::File(path) => client.send_file(pid, receiver, path).await?,
        };
        if !delivered {
            warn!(pid, receiver, %kind, "Send rejected by client");
            return Err(DispatchError::Rejected(receiver.to_string()));
        }

        let entry = OutgoingMessage::new(receiver, payload.describe(), kind);
        if let Err(e) = self.inner.log.append(&entry).await {
            error!(error = %e, "Failed to record outgoing message");
        }
        debug!(pid, receiver, %kind, "Message sent");
        Ok(())
    }

    pub fn image_extensions(&self) -> &[String] {
        &self.inner.image_extensions
    }
}
