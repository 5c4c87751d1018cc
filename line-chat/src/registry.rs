use std::collections::HashMap;

use tokio::sync::{
    Mutex,
    mpsc::{self, error::TrySendError},
};
use tracing::{debug, warn};

use crate::protocol::ServerToClient;

pub type ParticipantId = u64;

/// Messages a participant may have queued before further broadcasts to it are dropped.
pub const OUTBOX_CAPACITY: usize = 256;

/// Sending half of a participant's outbound queue. The participant's handler owns
/// the receiving half and writes whatever arrives to its connection.
pub type Outbox = mpsc::Sender<ServerToClient>;
pub type Inbox = mpsc::Receiver<ServerToClient>;

pub fn outbox() -> (Outbox, Inbox) {
    mpsc::channel(OUTBOX_CAPACITY)
}

struct Member {
    name: String,
    outbox: Outbox,
}

#[derive(Default)]
struct Members {
    by_id: HashMap<ParticipantId, Member>,
    next_id: ParticipantId,
}

/// The set of live participants and the fan-out point for broadcasts.
///
/// Every operation runs under the same lock, so a broadcast always iterates a
/// consistent membership and never interleaves with an insert or removal.
#[derive(Default)]
pub struct Registry {
    members: Mutex<Members>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a participant and returns its freshly allocated id.
    pub async fn register(&self, name: impl Into<String>, outbox: Outbox) -> ParticipantId {
        let mut members = self.members.lock().await;
        members.next_id += 1;
        let id = members.next_id;
        members.by_id.insert(
            id,
            Member {
                name: name.into(),
                outbox,
            },
        );
        id
    }

    /// Removes a participant. Returns its name only on the call that removed it.
    pub async fn unregister(&self, id: ParticipantId) -> Option<String> {
        let mut members = self.members.lock().await;
        members.by_id.remove(&id).map(|member| member.name)
    }

    /// Sends `message` to every registered participant.
    pub async fn broadcast(&self, message: ServerToClient) -> usize {
        self.fan_out(None, message).await
    }

    /// Sends `message` to every registered participant except `origin`.
    pub async fn broadcast_from(&self, origin: ParticipantId, message: ServerToClient) -> usize {
        self.fan_out(Some(origin), message).await
    }

    pub async fn contains(&self, id: ParticipantId) -> bool {
        self.members.lock().await.by_id.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn fan_out(&self, origin: Option<ParticipantId>, message: ServerToClient) -> usize {
        let members = self.members.lock().await;
        let mut delivered = 0;

        for (id, member) in &members.by_id {
            if Some(*id) == origin {
                continue;
            }
            // A closed outbox means the handler is tearing down; it unregisters itself.
            match member.outbox.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(id, name = %member.name, "participant is not keeping up, dropping message")
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(id, name = %member.name, "skipping participant with closed outbox")
                }
            }
        }

        delivered
    }
}
