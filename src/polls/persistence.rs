//! Persistence Bridge
//!
//! Queues store reads and writes for remote polls and runs them on a single
//! worker task. The worker preserves submission order, so a read never sees
//! a record older than a write queued before it. Read results come back to
//! the engine as [`LoadCompletion`]s.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::record::encode_poll;
use super::store::PollStore;
use super::types::{Poll, PollId};

/// Store key for a remote poll
pub fn get_poll_database_key(poll_id: PollId) -> String {
    format!("poll{}", poll_id.get())
}

/// Work item for the store worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreRequest {
    Load { poll_id: PollId, key: String },
    Save { poll_id: PollId, key: String, value: Vec<u8> },
}

/// Result of a store read, delivered back to the engine.
///
/// `value` is `None` both when the key is missing and when the read failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadCompletion {
    pub poll_id: PollId,
    pub value: Option<Vec<u8>>,
}

/// Engine-side handle to the store worker
#[derive(Debug, Clone)]
pub struct PersistenceBridge {
    requests: mpsc::UnboundedSender<StoreRequest>,
    enabled: bool,
}

impl PersistenceBridge {
    /// Create a bridge and the receiving end for [`run_store_worker`]
    pub fn new(enabled: bool) -> (Self, mpsc::UnboundedReceiver<StoreRequest>) {
        let (requests, receiver) = mpsc::unbounded_channel();
        (Self { requests, enabled }, receiver)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Queue a write of `poll` under its store key. Fire-and-forget.
    pub fn save_poll(&self, poll: &Poll, poll_id: PollId) {
        if !self.enabled || !poll_id.is_remote() {
            return;
        }
        let request = StoreRequest::Save {
            poll_id,
            key: get_poll_database_key(poll_id),
            value: encode_poll(poll),
        };
        if self.requests.send(request).is_err() {
            debug!(poll_id = %poll_id, "store worker gone, dropping poll write");
        }
    }

    /// Queue a read for `poll_id`. Returns `false` when nothing was queued,
    /// in which case no completion will ever arrive.
    pub fn request_load(&self, poll_id: PollId) -> bool {
        if !self.enabled || !poll_id.is_remote() {
            return false;
        }
        let request = StoreRequest::Load {
            poll_id,
            key: get_poll_database_key(poll_id),
        };
        self.requests.send(request).is_ok()
    }
}

/// Drain store requests until the bridge is dropped.
///
/// Store failures are logged and never reported back as errors: a failed
/// read completes as a miss, a failed write is forgotten.
pub async fn run_store_worker(
    store: Arc<dyn PollStore>,
    mut requests: mpsc::UnboundedReceiver<StoreRequest>,
    completions: mpsc::UnboundedSender<LoadCompletion>,
) {
    while let Some(request) = requests.recv().await {
        match request {
            StoreRequest::Load { poll_id, key } => {
                let value = match store.get(&key).await {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(poll_id = %poll_id, error = %e, "failed to read poll from store");
                        None
                    }
                };
                if completions.send(LoadCompletion { poll_id, value }).is_err() {
                    debug!(poll_id = %poll_id, "poll engine gone, dropping load completion");
                }
            }
            StoreRequest::Save {
                poll_id,
                key,
                value,
            } => {
                if let Err(e) = store.set(&key, value).await {
                    warn!(poll_id = %poll_id, error = %e, "failed to write poll to store");
                }
            }
        }
    }
    debug!("poll store worker stopped");
}
