//! Client interface for the session registry.
//!
//! The `RegistryHandle` is cheap to clone and shared by every tool call.
//! Table operations go through the actor; starting, running and stopping
//! debuggers happen here, in the calling task, under the slot's
//! `create_lock`.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wdbg_core::{SessionKey, SessionSummary, Target};

use super::commands::{RegistryCommand, RegistryError, RemovalReason, SessionEvent};
use super::slot::{SessionSlot, SlotState};
use crate::session::{OpenParams, Session};

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// # Usage
///
/// ```ignore
/// let session = handle.get_or_create(Target::dump("crash.dmp")?).await?;
/// let result = session.run("kb", Duration::from_secs(30)).await?;
///
/// let sessions = handle.list().await?;
/// handle.close_session(session.key()).await?;
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<SessionEvent>,

    /// How new sessions are started
    open_params: Arc<OpenParams>,

    /// Stops background tasks (the reaper) on shutdown
    cancel: CancellationToken,
}

impl RegistryHandle {
    /// Create a new registry handle.
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<SessionEvent>,
        open_params: Arc<OpenParams>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sender,
            event_sender,
            open_params,
            cancel,
        }
    }

    /// Returns the session for `target`, starting a debugger if needed.
    ///
    /// Concurrent calls for the same target start at most one debugger;
    /// the others wait and share it. A session whose debugger died is
    /// replaced.
    ///
    /// # Errors
    ///
    /// - `RegistryError::RegistryFull` if a new session would exceed capacity
    /// - `RegistryError::Session` if the debugger failed to start
    /// - `RegistryError::ChannelClosed` if the registry has shut down
    pub async fn get_or_create(&self, target: Target) -> Result<Arc<Session>, RegistryError> {
        let key = target.key();

        loop {
            let slot = self.acquire(key.clone()).await?;
            let _creating = slot.create_lock.lock().await;

            if slot.is_detached() {
                debug!(%key, "Slot removed while waiting, retrying");
                continue;
            }

            if let Some(session) = slot.live() {
                if session.is_usable() {
                    return Ok(session);
                }
                info!(%key, state = %session.state(), "Replacing dead session");
                slot.take();
                session.close().await;
                self.publish(SessionEvent::Closed {
                    key: key.clone(),
                    reason: RemovalReason::ProcessExited,
                });
            }

            slot.set(SlotState::Starting { since: Utc::now() });
            return match Session::open(target, &self.open_params).await {
                Ok(session) => {
                    let session = Arc::new(session);
                    slot.set(SlotState::Live(Arc::clone(&session)));
                    self.publish(SessionEvent::Opened {
                        key: key.clone(),
                        pid: session.pid(),
                    });
                    Ok(session)
                }
                Err(e) => {
                    warn!(%key, error = %e, "Failed to open session");
                    slot.set(SlotState::Empty);
                    Err(RegistryError::Session(e))
                }
            };
        }
    }

    /// Returns the open session for a key, if any. Never starts one.
    pub async fn get(&self, key: &SessionKey) -> Result<Option<Arc<Session>>, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCommand::Lookup {
            key: key.clone(),
            respond_to: tx,
        })
        .await?;
        let slot = rx.await.map_err(|_| RegistryError::ChannelClosed)?;
        Ok(slot.and_then(|slot| slot.live()))
    }

    /// Closes the session for a key.
    ///
    /// Returns `Ok(false)` if no session was open; closing twice is not an
    /// error. Waits for an in-progress open of the same key to finish first.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the registry has shut down
    pub async fn close_session(&self, key: &SessionKey) -> Result<bool, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCommand::Detach {
            key: key.clone(),
            respond_to: tx,
        })
        .await?;
        let Some(slot) = rx.await.map_err(|_| RegistryError::ChannelClosed)? else {
            debug!(%key, "No session to close");
            return Ok(false);
        };

        Ok(self.close_slot(&slot, RemovalReason::Explicit).await)
    }

    /// Lists sessions, sorted by key. Never waits on running commands.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the registry has shut down
    pub async fn list(&self) -> Result<Vec<SessionSummary>, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCommand::List { respond_to: tx }).await?;
        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Closes sessions idle for at least `idle_threshold` and releases
    /// sessions whose debugger died. Busy sessions are never touched.
    ///
    /// Returns the number of sessions removed.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the registry has shut down
    pub async fn reap_idle(&self, idle_threshold: Duration) -> Result<usize, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCommand::Reap {
            idle_threshold,
            respond_to: tx,
        })
        .await?;
        let removed = rx.await.map_err(|_| RegistryError::ChannelClosed)?;
        let count = removed.len();

        for (session, reason) in removed {
            match reason {
                RemovalReason::ProcessExited => session.mark_dead().await,
                _ => session.finish_close().await,
            }
            self.publish(SessionEvent::Closed {
                key: session.key().clone(),
                reason,
            });
        }

        if count > 0 {
            info!(count, "Reaped sessions");
        }
        Ok(count)
    }

    /// Closes every session and stops the actor and the reaper.
    ///
    /// Safe to call more than once; later calls find nothing to close.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let (tx, rx) = oneshot::channel();
        if self
            .send(RegistryCommand::Shutdown { respond_to: tx })
            .await
            .is_err()
        {
            debug!("Registry already stopped");
            return;
        }
        let Ok(slots) = rx.await else {
            return;
        };

        for slot in slots {
            self.close_slot(&slot, RemovalReason::Shutdown).await;
        }
        info!("All sessions closed");
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_sender.subscribe()
    }

    /// Check if the registry actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }

    async fn acquire(&self, key: SessionKey) -> Result<Arc<SessionSlot>, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCommand::Acquire { key, respond_to: tx })
            .await?;
        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    async fn close_slot(&self, slot: &SessionSlot, reason: RemovalReason) -> bool {
        let _creating = slot.create_lock.lock().await;
        let Some(session) = slot.take() else {
            return false;
        };
        session.close().await;
        self.publish(SessionEvent::Closed {
            key: slot.key().clone(),
            reason,
        });
        true
    }

    async fn send(&self, cmd: RegistryCommand) -> Result<(), RegistryError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| RegistryError::ChannelClosed)
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.event_sender.send(event);
    }
}
