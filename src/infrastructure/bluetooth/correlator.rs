//! Request Correlator
//!
//! Matches synchronous requests (status query, memory read) with the replies
//! the receive loop decodes. One slot per request kind: starting a second
//! request of the same kind supersedes the first, whose waiter then fails
//! with [`DriverError::Superseded`].

use crate::domain::models::StatusFlags;
use crate::error::DriverError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    StatusQuery,
    MemoryRead,
}

/// Value delivered to a waiting request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Status(StatusFlags),
    Memory(Vec<u8>),
}

type ReplySender = oneshot::Sender<Result<Reply, DriverError>>;

struct Slot {
    ticket: u64,
    sender: ReplySender,
}

/// Handle held by the caller between `begin_wait` and `wait`
#[derive(Debug)]
pub struct PendingRequest {
    kind: RequestKind,
    ticket: u64,
    deadline: Instant,
    receiver: oneshot::Receiver<Result<Reply, DriverError>>,
}

impl PendingRequest {
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

pub struct RequestCorrelator {
    slots: Mutex<HashMap<RequestKind, Slot>>,
    next_ticket: AtomicU64,
    timeout: Duration,
}

impl RequestCorrelator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a waiter for `kind` with a deadline of now + timeout.
    ///
    /// Must be called before the request frame is sent so a fast reply
    /// cannot slip past.
    pub fn begin_wait(&self, kind: RequestKind) -> PendingRequest {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();

        let previous = self.slots.lock().insert(kind, Slot { ticket, sender });
        if let Some(previous) = previous {
            warn!("{:?} request {} superseded by {}", kind, previous.ticket, ticket);
            let _ = previous.sender.send(Err(DriverError::Superseded));
        }

        PendingRequest {
            kind,
            ticket,
            deadline: Instant::now() + self.timeout,
            receiver,
        }
    }

    /// Deliver a reply. Returns `false` when nobody was waiting.
    pub fn resolve(&self, kind: RequestKind, reply: Reply) -> bool {
        self.complete(kind, Ok(reply))
    }

    /// Fail the waiter for `kind`. Returns `false` when nobody was waiting.
    pub fn fail(&self, kind: RequestKind, error: DriverError) -> bool {
        self.complete(kind, Err(error))
    }

    fn complete(&self, kind: RequestKind, result: Result<Reply, DriverError>) -> bool {
        let Some(slot) = self.slots.lock().remove(&kind) else {
            debug!("No pending {:?} request, dropping reply", kind);
            return false;
        };
        // The waiter may have timed out between removal and send
        slot.sender.send(result).is_ok()
    }

    /// Fail every outstanding request, used when the connection goes down
    pub fn fail_all(&self, error: impl Fn() -> DriverError) {
        let slots: Vec<_> = self.slots.lock().drain().collect();
        for (kind, slot) in slots {
            debug!("Failing pending {:?} request {}", kind, slot.ticket);
            let _ = slot.sender.send(Err(error()));
        }
    }

    pub fn is_pending(&self, kind: RequestKind) -> bool {
        self.slots.lock().contains_key(&kind)
    }

    /// Drop the waiter without delivering anything (e.g. the request frame
    /// could not be sent). A newer request of the same kind is left alone.
    pub fn cancel(&self, pending: PendingRequest) {
        self.remove_if_current(pending.kind, pending.ticket);
    }

    /// Wait for the reply or the deadline, whichever comes first.
    ///
    /// On timeout the slot is cleared so no pending state outlives the call.
    pub async fn wait(&self, pending: PendingRequest) -> Result<Reply, DriverError> {
        let PendingRequest {
            kind,
            ticket,
            deadline,
            receiver,
        } = pending;

        match tokio::time::timeout_at(deadline, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_closed)) => Err(DriverError::Disconnected),
            Err(_elapsed) => {
                self.remove_if_current(kind, ticket);
                warn!("{:?} request {} timed out after {:?}", kind, ticket, self.timeout);
                Err(DriverError::Timeout)
            }
        }
    }

    fn remove_if_current(&self, kind: RequestKind, ticket: u64) {
        let mut slots = self.slots.lock();
        if slots.get(&kind).is_some_and(|slot| slot.ticket == ticket) {
            slots.remove(&kind);
        }
    }
}
