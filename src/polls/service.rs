//! Poll Service
//!
//! Runs a [`PollEngine`] on its own task. Callers talk to it through a
//! cloneable [`PollHandle`]; every request is a message on a bounded command
//! channel, answered over a `oneshot` reply channel.
//!
//! Store reads complete on a separate channel that the service loop selects
//! alongside commands and the shutdown signal. On shutdown, or once every
//! handle is dropped, the engine is torn down: pending `have_poll_force`
//! callers get [`PollError::ServiceStopped`] and late store completions are
//! discarded. Writes already queued are still flushed before
//! [`PollHandle::shutdown`] returns, within the configured flush timeout.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::{PollEngine, PollEngineStats, PollPresence};
use super::error::PollError;
use super::persistence::{run_store_worker, LoadCompletion, PersistenceBridge};
use super::propagation::PollObserver;
use super::store::{open_store, PollStore, StoreError};
use super::types::{FullMessageId, Poll, PollId};
use super::view::PollObject;
use super::wire::{InputMediaPoll, PollSnapshot};
use crate::config::{Config, PollsConfig};

/// Requests handled by the service loop
#[derive(Debug)]
enum PollCommand {
    CreatePoll {
        question: String,
        options: Vec<String>,
        reply: oneshot::Sender<Result<PollId, PollError>>,
    },
    RegisterPoll {
        poll_id: PollId,
        full_message_id: FullMessageId,
    },
    UnregisterPoll {
        poll_id: PollId,
        full_message_id: FullMessageId,
    },
    PollMessages {
        poll_id: PollId,
        reply: oneshot::Sender<Vec<FullMessageId>>,
    },
    HavePoll {
        poll_id: PollId,
        reply: oneshot::Sender<bool>,
    },
    HavePollForce {
        poll_id: PollId,
        reply: oneshot::Sender<bool>,
    },
    GetPoll {
        poll_id: PollId,
        reply: oneshot::Sender<Option<Poll>>,
    },
    GetPollForce {
        poll_id: PollId,
        reply: oneshot::Sender<Option<Poll>>,
    },
    PollPresence {
        poll_id: PollId,
        reply: oneshot::Sender<PollPresence>,
    },
    ClosePoll {
        poll_id: PollId,
        reply: oneshot::Sender<bool>,
    },
    GetInputMedia {
        poll_id: PollId,
        reply: oneshot::Sender<Option<InputMediaPoll>>,
    },
    OnGetPoll {
        poll_id: Option<PollId>,
        snapshot: PollSnapshot,
        reply: oneshot::Sender<Option<PollId>>,
    },
    ResolvePollId {
        poll_id: PollId,
        reply: oneshot::Sender<Option<PollId>>,
    },
    GetPollObject {
        poll_id: PollId,
        reply: oneshot::Sender<Option<PollObject>>,
    },
    StorePollReference {
        poll_id: PollId,
        reply: oneshot::Sender<Option<Vec<u8>>>,
    },
    ParsePollReference {
        raw: Vec<u8>,
        reply: oneshot::Sender<Result<PollId, PollError>>,
    },
    Stats {
        reply: oneshot::Sender<PollEngineStats>,
    },
}

/// Handle to a running poll service
#[derive(Clone)]
pub struct PollHandle {
    commands: mpsc::Sender<PollCommand>,
    shutdown: Arc<watch::Sender<bool>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for PollHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollHandle")
            .field("stopped", &self.commands.is_closed())
            .finish()
    }
}

/// Start a poll service backed by `store`. Must be called inside a tokio
/// runtime.
pub fn spawn_poll_service(
    config: PollsConfig,
    store: Arc<dyn PollStore>,
    observer: Arc<dyn PollObserver>,
) -> PollHandle {
    let (persistence, store_requests) = PersistenceBridge::new(config.persistence_enabled);
    let (completions_tx, completions_rx) = mpsc::unbounded_channel();
    let (commands_tx, commands_rx) = mpsc::channel(config.command_buffer.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let flush_timeout = Duration::from_millis(config.shutdown_flush_timeout_ms);
    let worker = tokio::spawn(run_store_worker(store, store_requests, completions_tx));
    let engine = PollEngine::new(config, persistence, observer);

    let task = tokio::spawn(async move {
        run_poll_service(engine, commands_rx, completions_rx, shutdown_rx).await;
        // The engine owned the only request sender, so the worker drains
        // what is left and exits.
        match tokio::time::timeout(flush_timeout, worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "poll store worker failed"),
            Err(_) => warn!(
                timeout_ms = flush_timeout.as_millis() as u64,
                "poll store worker did not drain in time, leaving it detached"
            ),
        }
        info!("poll service stopped");
    });

    PollHandle {
        commands: commands_tx,
        shutdown: Arc::new(shutdown_tx),
        task: Arc::new(Mutex::new(Some(task))),
    }
}

/// Open the configured store and start a poll service on it
pub async fn spawn_poll_service_from_config(
    config: &Config,
    observer: Arc<dyn PollObserver>,
) -> Result<PollHandle, StoreError> {
    let store = open_store(&config.store).await?;
    Ok(spawn_poll_service(config.polls.clone(), store, observer))
}

/// Service loop. Returns after tearing the engine down.
async fn run_poll_service(
    mut engine: PollEngine,
    mut commands: mpsc::Receiver<PollCommand>,
    mut completions: mpsc::UnboundedReceiver<LoadCompletion>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("poll service started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!("poll service shutdown requested");
                break;
            }
            command = commands.recv() => match command {
                Some(command) => handle_command(&mut engine, command),
                None => {
                    debug!("all poll handles dropped");
                    break;
                }
            },
            Some(completion) = completions.recv() => {
                engine.on_load_poll_from_database(completion.poll_id, completion.value);
            }
        }
    }

    engine.tear_down();
    drop(completions);
}

fn handle_command(engine: &mut PollEngine, command: PollCommand) {
    // A dropped reply receiver only means the caller stopped waiting.
    match command {
        PollCommand::CreatePoll {
            question,
            options,
            reply,
        } => {
            let _ = reply.send(engine.create_poll(question, options));
        }
        PollCommand::RegisterPoll {
            poll_id,
            full_message_id,
        } => engine.register_poll(poll_id, full_message_id),
        PollCommand::UnregisterPoll {
            poll_id,
            full_message_id,
        } => engine.unregister_poll(poll_id, full_message_id),
        PollCommand::PollMessages { poll_id, reply } => {
            let _ = reply.send(engine.poll_messages(poll_id));
        }
        PollCommand::HavePoll { poll_id, reply } => {
            let _ = reply.send(engine.have_poll(poll_id));
        }
        PollCommand::HavePollForce { poll_id, reply } => engine.have_poll_force(poll_id, reply),
        PollCommand::GetPoll { poll_id, reply } => {
            let _ = reply.send(engine.get_poll(poll_id).cloned());
        }
        PollCommand::GetPollForce { poll_id, reply } => {
            let _ = reply.send(engine.get_poll_force(poll_id).cloned());
        }
        PollCommand::PollPresence { poll_id, reply } => {
            let _ = reply.send(engine.poll_presence(poll_id));
        }
        PollCommand::ClosePoll { poll_id, reply } => {
            let _ = reply.send(engine.close_poll(poll_id));
        }
        PollCommand::GetInputMedia { poll_id, reply } => {
            let _ = reply.send(engine.get_input_media(poll_id));
        }
        PollCommand::OnGetPoll {
            poll_id,
            snapshot,
            reply,
        } => {
            let _ = reply.send(engine.on_get_poll(poll_id, snapshot));
        }
        PollCommand::ResolvePollId { poll_id, reply } => {
            let _ = reply.send(engine.resolve_poll_id(poll_id));
        }
        PollCommand::GetPollObject { poll_id, reply } => {
            let _ = reply.send(engine.get_poll_object(poll_id));
        }
        PollCommand::StorePollReference { poll_id, reply } => {
            let _ = reply.send(engine.store_poll_reference(poll_id));
        }
        PollCommand::ParsePollReference { raw, reply } => {
            let _ = reply.send(engine.parse_poll_reference(&raw));
        }
        PollCommand::Stats { reply } => {
            let _ = reply.send(engine.stats());
        }
    }
}

impl PollHandle {
    async fn send(&self, command: PollCommand) -> Result<(), PollError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PollError::ServiceStopped)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> PollCommand,
    ) -> Result<T, PollError> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply)).await?;
        response.await.map_err(|_| PollError::ServiceStopped)
    }

    /// Create a local poll. See [`PollEngine::create_poll`].
    pub async fn create_poll(
        &self,
        question: impl Into<String>,
        options: Vec<String>,
    ) -> Result<PollId, PollError> {
        let question = question.into();
        self.request(|reply| PollCommand::CreatePoll {
            question,
            options,
            reply,
        })
        .await?
    }

    pub async fn register_poll(
        &self,
        poll_id: PollId,
        full_message_id: FullMessageId,
    ) -> Result<(), PollError> {
        self.send(PollCommand::RegisterPoll {
            poll_id,
            full_message_id,
        })
        .await
    }

    pub async fn unregister_poll(
        &self,
        poll_id: PollId,
        full_message_id: FullMessageId,
    ) -> Result<(), PollError> {
        self.send(PollCommand::UnregisterPoll {
            poll_id,
            full_message_id,
        })
        .await
    }

    /// Messages currently displaying `poll_id`
    pub async fn poll_messages(&self, poll_id: PollId) -> Result<Vec<FullMessageId>, PollError> {
        self.request(|reply| PollCommand::PollMessages { poll_id, reply })
            .await
    }

    pub async fn have_poll(&self, poll_id: PollId) -> Result<bool, PollError> {
        self.request(|reply| PollCommand::HavePoll { poll_id, reply })
            .await
    }

    /// Whether `poll_id` is known, waiting for store hydration if needed
    pub async fn have_poll_force(&self, poll_id: PollId) -> Result<bool, PollError> {
        self.request(|reply| PollCommand::HavePollForce { poll_id, reply })
            .await
    }

    /// Snapshot of the poll as currently held in memory
    pub async fn get_poll(&self, poll_id: PollId) -> Result<Option<Poll>, PollError> {
        self.request(|reply| PollCommand::GetPoll { poll_id, reply })
            .await
    }

    /// Like [`get_poll`](Self::get_poll), but starts hydration when the poll
    /// is not in memory. Does not wait for it.
    pub async fn get_poll_force(&self, poll_id: PollId) -> Result<Option<Poll>, PollError> {
        self.request(|reply| PollCommand::GetPollForce { poll_id, reply })
            .await
    }

    pub async fn poll_presence(&self, poll_id: PollId) -> Result<PollPresence, PollError> {
        self.request(|reply| PollCommand::PollPresence { poll_id, reply })
            .await
    }

    /// Close a poll. Returns `true` if it was open before.
    pub async fn close_poll(&self, poll_id: PollId) -> Result<bool, PollError> {
        self.request(|reply| PollCommand::ClosePoll { poll_id, reply })
            .await
    }

    pub async fn get_input_media(
        &self,
        poll_id: PollId,
    ) -> Result<Option<InputMediaPoll>, PollError> {
        self.request(|reply| PollCommand::GetInputMedia { poll_id, reply })
            .await
    }

    /// Merge server data. See [`PollEngine::on_get_poll`].
    pub async fn on_get_poll(
        &self,
        poll_id: Option<PollId>,
        snapshot: PollSnapshot,
    ) -> Result<Option<PollId>, PollError> {
        self.request(|reply| PollCommand::OnGetPoll {
            poll_id,
            snapshot,
            reply,
        })
        .await
    }

    pub async fn resolve_poll_id(&self, poll_id: PollId) -> Result<Option<PollId>, PollError> {
        self.request(|reply| PollCommand::ResolvePollId { poll_id, reply })
            .await
    }

    pub async fn get_poll_object(&self, poll_id: PollId) -> Result<Option<PollObject>, PollError> {
        self.request(|reply| PollCommand::GetPollObject { poll_id, reply })
            .await
    }

    pub async fn store_poll_reference(
        &self,
        poll_id: PollId,
    ) -> Result<Option<Vec<u8>>, PollError> {
        self.request(|reply| PollCommand::StorePollReference { poll_id, reply })
            .await
    }

    pub async fn parse_poll_reference(&self, raw: Vec<u8>) -> Result<PollId, PollError> {
        self.request(|reply| PollCommand::ParsePollReference { raw, reply })
            .await?
    }

    pub async fn stats(&self) -> Result<PollEngineStats, PollError> {
        self.request(|reply| PollCommand::Stats { reply }).await
    }

    /// Stop the service and wait for it to finish, including queued store
    /// writes. Safe to call more than once and from any clone.
    ///
    /// Store requests are not cancelled. A store call that never completes
    /// holds shutdown for at most `shutdownFlushTimeoutMs`, after which the
    /// worker is left running detached and its remaining writes may be lost.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "poll service task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polls::propagation::{ChannelObserver, NoopObserver};
    use crate::polls::record::encode_poll;
    use crate::polls::store::MemoryPollStore;
    use crate::polls::types::{ChatId, MessageId};
    use crate::polls::wire::{PollAnswer, ServerPoll};

    fn spawn_with_store(store: Arc<MemoryPollStore>) -> PollHandle {
        spawn_poll_service(PollsConfig::default(), store, Arc::new(NoopObserver))
    }

    fn server_poll(id: i64) -> ServerPoll {
        ServerPoll {
            id,
            closed: false,
            question: "Lunch?".to_string(),
            answers: vec![
                PollAnswer {
                    text: "Pizza".to_string(),
                    option: b"0".to_vec(),
                },
                PollAnswer {
                    text: "Sushi".to_string(),
                    option: b"1".to_vec(),
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_create_and_promote() {
        let (observer, mut updates) = ChannelObserver::new();
        let handle = spawn_poll_service(
            PollsConfig::default(),
            Arc::new(MemoryPollStore::new()),
            Arc::new(observer),
        );
        let message = FullMessageId::new(ChatId(1), MessageId(10));

        let local_id = handle
            .create_poll("Lunch?", vec!["Pizza".to_string(), "Sushi".to_string()])
            .await
            .unwrap();
        handle.register_poll(local_id, message).await.unwrap();

        let media = handle.get_input_media(local_id).await.unwrap().unwrap();
        assert_eq!(media.poll.answers.len(), 2);

        let poll_id = handle
            .on_get_poll(Some(local_id), PollSnapshot::Definition(server_poll(42)))
            .await
            .unwrap();
        assert_eq!(poll_id, Some(PollId::new(42)));

        let update = updates.recv().await.unwrap();
        assert_eq!(update.full_message_id, message);
        assert_eq!(update.poll_id, PollId::new(42));

        assert!(!handle.have_poll(local_id).await.unwrap());
        assert_eq!(
            handle.resolve_poll_id(local_id).await.unwrap(),
            Some(PollId::new(42))
        );
        assert_eq!(
            handle.poll_messages(PollId::new(42)).await.unwrap(),
            vec![message]
        );

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_have_poll_force_hydrates_from_store() {
        let store = Arc::new(MemoryPollStore::new());
        let stored = Poll::from_draft("Stored?".to_string(), vec!["Yes".to_string()]);
        store.set("poll99", encode_poll(&stored)).await.unwrap();
        let handle = spawn_with_store(store);

        assert!(handle.have_poll_force(PollId::new(99)).await.unwrap());
        assert_eq!(handle.get_poll(PollId::new(99)).await.unwrap(), Some(stored));
        assert!(!handle.have_poll_force(PollId::new(100)).await.unwrap());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_flushes_writes() {
        let store = Arc::new(MemoryPollStore::new());
        let handle = spawn_with_store(store.clone());

        handle
            .on_get_poll(None, PollSnapshot::Definition(server_poll(7)))
            .await
            .unwrap();
        handle.shutdown().await;
        assert!(store.get("poll7").await.unwrap().is_some());

        let handle = spawn_with_store(store);
        assert!(handle.have_poll_force(PollId::new(7)).await.unwrap());
        let poll = handle.get_poll(PollId::new(7)).await.unwrap().unwrap();
        assert_eq!(poll.question, "Lunch?");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_fail() {
        let handle = spawn_with_store(Arc::new(MemoryPollStore::new()));
        let clone = handle.clone();

        handle.shutdown().await;
        clone.shutdown().await;

        assert!(matches!(
            clone.have_poll(PollId::new(1)).await,
            Err(PollError::ServiceStopped)
        ));
        assert!(matches!(
            clone.create_poll("Q?", vec!["A".to_string()]).await,
            Err(PollError::ServiceStopped)
        ));
    }

    #[tokio::test]
    async fn test_validation_errors_reach_the_caller() {
        let handle = spawn_with_store(Arc::new(MemoryPollStore::new()));
        assert!(matches!(
            handle.create_poll("  ", vec!["A".to_string()]).await,
            Err(PollError::EmptyQuestion)
        ));
        assert!(matches!(
            handle.parse_poll_reference(vec![9, 9]).await,
            Err(PollError::Record(_))
        ));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_spawn_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_json5(&format!(
            r#"{{ store: {{ kind: "file", dir: {:?} }} }}"#,
            dir.path().join("polls").display().to_string()
        ))
        .unwrap();

        let handle = spawn_poll_service_from_config(&config, Arc::new(NoopObserver))
            .await
            .unwrap();
        handle
            .on_get_poll(None, PollSnapshot::Definition(server_poll(5)))
            .await
            .unwrap();
        handle.shutdown().await;

        let handle = spawn_poll_service_from_config(&config, Arc::new(NoopObserver))
            .await
            .unwrap();
        assert!(handle.have_poll_force(PollId::new(5)).await.unwrap());
        handle.shutdown().await;
    }
}
