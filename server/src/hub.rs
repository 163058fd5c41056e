use std::collections::HashMap;

use bell_protocol::{ServerEvent, SessionId};
use parking_lot::Mutex;
use tokio::sync::mpsc::{error::TrySendError, Sender};
use tracing::{trace, warn};

/// Events a session may have queued before new ones are dropped.
pub const OUTBOUND_QUEUE: usize = 256;

/// Outbound channels of every live connection.
#[derive(Default)]
pub struct SessionHub {
    senders: Mutex<HashMap<SessionId, Sender<ServerEvent>>>,
}

/// Queue one event. Returns false when the receiver is gone and the entry should go.
fn deliver(session: &SessionId, tx: &Sender<ServerEvent>, event: ServerEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(session = %session, "outbound queue full; event dropped");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: SessionId, tx: Sender<ServerEvent>) {
        self.senders.lock().insert(session, tx);
    }

    pub fn remove(&self, session: &SessionId) {
        self.senders.lock().remove(session);
    }

    pub fn count(&self) -> usize {
        self.senders.lock().len()
    }

    /// Deliver to one session. Returns false if it is gone.
    ///
    /// A session whose queue is full keeps its entry but loses the event.
    pub fn send(&self, session: &SessionId, event: ServerEvent) -> bool {
        let mut guard = self.senders.lock();
        let Some(tx) = guard.get(session) else {
            return false;
        };
        if deliver(session, tx, event) {
            return true;
        }
        trace!(session = %session, "dropping closed session");
        guard.remove(session);
        false
    }

    /// Deliver the same event to many sessions. Lost deliveries are not reported.
    pub fn broadcast<'a>(&self, sessions: impl IntoIterator<Item = &'a SessionId>, event: &ServerEvent) {
        let mut guard = self.senders.lock();
        for session in sessions {
            let open = guard
                .get(session)
                .is_some_and(|tx| deliver(session, tx, event.clone()));
            if !open {
                guard.remove(session);
            }
        }
    }
}
