//! Polling Module
//!
//! Poll registry and reconciliation for chat messages.
//!
//! - [`engine`]: registry, identifier allocation, server merges, hydration
//! - [`wire`]: server-facing poll structures
//! - [`record`]: binary record format for persisted polls
//! - [`store`] / [`persistence`]: key-value backends and the store worker
//! - [`propagation`]: update notifications to displaying messages
//! - [`view`]: presentation shape
//! - [`service`]: the engine's task and its async handle

pub mod engine;
pub mod error;
pub mod persistence;
pub mod propagation;
pub mod record;
pub mod service;
pub mod store;
pub mod types;
pub mod view;
pub mod wire;

pub use engine::{PollEngine, PollEngineStats, PollPresence};
pub use error::PollError;
pub use persistence::{get_poll_database_key, LoadCompletion, PersistenceBridge, StoreRequest};
pub use propagation::{ChannelObserver, NoopObserver, PollObserver, PollUpdateEvent};
pub use record::{
    decode_poll, decode_poll_reference, encode_poll, encode_poll_reference, PollReference,
    RecordError,
};
pub use service::{spawn_poll_service, spawn_poll_service_from_config, PollHandle};
pub use store::{open_store, FilePollStore, MemoryPollStore, PollStore, StoreError};
pub use types::{validate_draft, ChatId, FullMessageId, MessageId, Poll, PollId, PollOption};
pub use view::{get_poll_object, vote_percentages, PollObject, PollOptionObject};
pub use wire::{
    get_input_poll_option, get_poll_options, InputMediaPoll, PollAnswer, PollAnswerVoters,
    PollSnapshot, ServerPoll, ServerPollResults,
};
