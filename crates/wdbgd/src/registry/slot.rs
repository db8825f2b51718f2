//! Per-key session slot.
//!
//! The actor hands out `Arc<SessionSlot>`; callers serialize creation and
//! closing on `create_lock`, so at most one debugger per key is ever being
//! started, and a close never races a half-finished open.
//!
//! A slot removed from the table is marked `detached`. A caller that was
//! waiting on its lock sees the flag and goes back to the actor for a
//! fresh slot instead of reviving a removed one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;

use wdbg_core::{SessionKey, SessionState, SessionSummary};

use crate::session::Session;

/// What a slot currently holds.
#[derive(Debug, Clone)]
pub(crate) enum SlotState {
    Empty,
    Starting { since: DateTime<Utc> },
    Live(Arc<Session>),
}

/// Table entry for one session key.
#[derive(Debug)]
pub struct SessionSlot {
    key: SessionKey,
    pub(crate) create_lock: AsyncMutex<()>,
    current: Mutex<SlotState>,
    detached: AtomicBool,
}

impl SessionSlot {
    pub(crate) fn new(key: SessionKey) -> Self {
        Self {
            key,
            create_lock: AsyncMutex::new(()),
            current: Mutex::new(SlotState::Empty),
            detached: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// The session, if one is open.
    pub fn live(&self) -> Option<Arc<Session>> {
        match &*self.lock() {
            SlotState::Live(session) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    pub(crate) fn set(&self, state: SlotState) {
        *self.lock() = state;
    }

    /// Empties the slot, returning the session it held.
    pub(crate) fn take(&self) -> Option<Arc<Session>> {
        match std::mem::replace(&mut *self.lock(), SlotState::Empty) {
            SlotState::Live(session) => Some(session),
            _ => None,
        }
    }

    /// True if nothing is open or being opened.
    pub(crate) fn is_empty(&self) -> bool {
        matches!(&*self.lock(), SlotState::Empty)
    }

    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Listing entry. `None` for an empty slot.
    pub fn summary(&self) -> Option<SessionSummary> {
        match &*self.lock() {
            SlotState::Empty => None,
            SlotState::Starting { since } => Some(SessionSummary {
                key: self.key.clone(),
                state: SessionState::Starting,
                pid: None,
                created_at: *since,
                last_activity: *since,
            }),
            SlotState::Live(session) => Some(session.summary()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
