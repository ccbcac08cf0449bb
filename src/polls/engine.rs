//! Poll Engine
//!
//! Owns every poll held in memory, the identifier allocator, and the
//! association between polls and the messages that display them.
//!
//! The engine is a plain single-owner state machine: it is only ever touched
//! from the poll service task, so none of its state is locked. Store reads
//! are queued through the [`PersistenceBridge`] and their results come back
//! later through [`PollEngine::on_load_poll_from_database`].
//!
//! Polls live in an arena of slots addressed by index, with a map from
//! [`PollId`] to slot. Promoting a local poll to the identifier the server
//! assigned only rewrites that map.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::error::PollError;
use super::persistence::PersistenceBridge;
use super::propagation::PollObserver;
use super::record::{decode_poll, decode_poll_reference, encode_poll_reference, PollReference};
use super::types::{validate_draft, FullMessageId, Poll, PollId};
use super::view::{get_poll_object, PollObject};
use super::wire::{
    get_input_poll_option, get_poll_options, InputMediaPoll, PollAnswerVoters, PollSnapshot,
    ServerPoll, ServerPollResults,
};
use crate::config::PollsConfig;

/// Hydration status of a poll identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPresence {
    /// Not in memory and no store read pending
    Absent,
    /// A store read has been issued and has not completed
    Loading,
    /// In memory
    Present,
}

/// Engine statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollEngineStats {
    pub local_polls: usize,
    pub remote_polls: usize,
    /// Messages currently associated with some poll
    pub tracked_messages: usize,
    pub loads_in_flight: usize,
}

#[derive(Debug)]
enum LoadState {
    /// Read issued; callers of `have_poll_force` wait here
    InFlight(Vec<oneshot::Sender<bool>>),
    /// Read completed, failed, or was never possible
    Settled,
}

/// Poll registry and reconciliation engine
pub struct PollEngine {
    config: PollsConfig,
    slots: Vec<Option<Poll>>,
    free_slots: Vec<usize>,
    poll_slots: HashMap<PollId, usize>,
    poll_messages: HashMap<PollId, HashSet<FullMessageId>>,
    /// Retired local identifier -> identifier the server assigned
    promoted: HashMap<PollId, PollId>,
    current_local_poll_id: i64,
    loads: HashMap<PollId, LoadState>,
    persistence: PersistenceBridge,
    observer: Arc<dyn PollObserver>,
    torn_down: bool,
}

impl PollEngine {
    pub fn new(
        config: PollsConfig,
        persistence: PersistenceBridge,
        observer: Arc<dyn PollObserver>,
    ) -> Self {
        Self {
            config,
            slots: Vec::new(),
            free_slots: Vec::new(),
            poll_slots: HashMap::new(),
            poll_messages: HashMap::new(),
            promoted: HashMap::new(),
            current_local_poll_id: 0,
            loads: HashMap::new(),
            persistence,
            observer,
            torn_down: false,
        }
    }

    /// Create a poll authored on this client.
    ///
    /// The poll lives in memory only, under a fresh local identifier, until
    /// the server confirms it through [`on_get_poll`](Self::on_get_poll).
    pub fn create_poll(
        &mut self,
        question: String,
        options: Vec<String>,
    ) -> Result<PollId, PollError> {
        validate_draft(&question, &options, &self.config)?;
        let poll_id = self.allocate_local_poll_id()?;
        self.insert_poll(poll_id, Poll::from_draft(question, options));
        debug!(poll_id = %poll_id, "created local poll");
        Ok(poll_id)
    }

    fn allocate_local_poll_id(&mut self) -> Result<PollId, PollError> {
        let next = self
            .current_local_poll_id
            .checked_sub(1)
            .ok_or(PollError::IdSpaceExhausted)?;
        self.current_local_poll_id = next;
        Ok(PollId::new(next))
    }

    fn insert_poll(&mut self, poll_id: PollId, poll: Poll) {
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.slots[slot] = Some(poll);
                slot
            }
            None => {
                self.slots.push(Some(poll));
                self.slots.len() - 1
            }
        };
        self.poll_slots.insert(poll_id, slot);
    }

    fn release_slot(&mut self, slot: usize) {
        self.slots[slot] = None;
        self.free_slots.push(slot);
    }

    /// Record that `full_message_id` displays `poll_id`. Idempotent.
    pub fn register_poll(&mut self, poll_id: PollId, full_message_id: FullMessageId) {
        if self.torn_down || !poll_id.is_valid() {
            return;
        }
        let inserted = self
            .poll_messages
            .entry(poll_id)
            .or_default()
            .insert(full_message_id);
        if inserted {
            debug!(poll_id = %poll_id, message = %full_message_id, "registered poll message");
        }
    }

    /// Stop tracking `full_message_id` for `poll_id`. Unknown pairs are ignored.
    pub fn unregister_poll(&mut self, poll_id: PollId, full_message_id: FullMessageId) {
        let Some(messages) = self.poll_messages.get_mut(&poll_id) else {
            return;
        };
        if messages.remove(&full_message_id) {
            debug!(poll_id = %poll_id, message = %full_message_id, "unregistered poll message");
        }
        if messages.is_empty() {
            self.poll_messages.remove(&poll_id);
        }
    }

    /// Messages currently displaying `poll_id`
    pub fn poll_messages(&self, poll_id: PollId) -> Vec<FullMessageId> {
        let mut messages: Vec<FullMessageId> = self
            .poll_messages
            .get(&poll_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        messages.sort();
        messages
    }

    /// In-memory presence check, never touches the store
    pub fn have_poll(&self, poll_id: PollId) -> bool {
        self.poll_slots.contains_key(&poll_id)
    }

    pub fn get_poll(&self, poll_id: PollId) -> Option<&Poll> {
        let slot = *self.poll_slots.get(&poll_id)?;
        self.slots.get(slot)?.as_ref()
    }

    /// The only path through which poll state is mutated
    fn get_poll_editable(&mut self, poll_id: PollId) -> Option<&mut Poll> {
        let slot = *self.poll_slots.get(&poll_id)?;
        self.slots.get_mut(slot)?.as_mut()
    }

    /// Current hydration status of `poll_id`
    pub fn poll_presence(&self, poll_id: PollId) -> PollPresence {
        if self.have_poll(poll_id) {
            return PollPresence::Present;
        }
        match self.loads.get(&poll_id) {
            Some(LoadState::InFlight(_)) => PollPresence::Loading,
            _ => PollPresence::Absent,
        }
    }

    /// Return the poll, starting hydration from the store if it has never
    /// been attempted. Returns `None` while the read is in flight.
    pub fn get_poll_force(&mut self, poll_id: PollId) -> Option<&Poll> {
        if !self.have_poll(poll_id) {
            self.start_load(poll_id);
        }
        self.get_poll(poll_id)
    }

    /// Answer whether `poll_id` is known, hydrating it first if needed.
    ///
    /// The answer is sent on `reply` right away when it is already decided.
    /// Otherwise `reply` waits for the single pending store read of this
    /// identifier and receives the outcome when it completes.
    pub fn have_poll_force(&mut self, poll_id: PollId, reply: oneshot::Sender<bool>) {
        if !self.have_poll(poll_id) {
            self.start_load(poll_id);
        }
        let found = self.have_poll(poll_id);
        match self.loads.get_mut(&poll_id) {
            Some(LoadState::InFlight(waiters)) if !found => waiters.push(reply),
            _ => {
                let _ = reply.send(found);
            }
        }
    }

    fn start_load(&mut self, poll_id: PollId) {
        if self.torn_down || !poll_id.is_remote() || self.loads.contains_key(&poll_id) {
            return;
        }
        // The marker is set before the read completes so repeated requests
        // for the same poll never issue a second read.
        let state = if self.persistence.request_load(poll_id) {
            debug!(poll_id = %poll_id, "loading poll from store");
            LoadState::InFlight(Vec::new())
        } else {
            LoadState::Settled
        };
        self.loads.insert(poll_id, state);
    }

    /// Completion of a store read issued by [`get_poll_force`](Self::get_poll_force).
    ///
    /// A record that fails to decode counts as a miss. If the poll was
    /// populated by a live update in the meantime, the stored record is
    /// discarded. Observers are not notified: this is the first population
    /// of the poll.
    pub fn on_load_poll_from_database(&mut self, poll_id: PollId, value: Option<Vec<u8>>) {
        if self.torn_down {
            return;
        }
        let waiters = match self.loads.get_mut(&poll_id) {
            Some(LoadState::InFlight(waiters)) => std::mem::take(waiters),
            _ => {
                debug!(poll_id = %poll_id, "ignoring unexpected poll load completion");
                return;
            }
        };
        self.loads.insert(poll_id, LoadState::Settled);

        if self.have_poll(poll_id) {
            debug!(poll_id = %poll_id, "poll already updated, discarding stored copy");
        } else {
            match value.filter(|raw| !raw.is_empty()).map(|raw| decode_poll(&raw)) {
                Some(Ok(poll)) => {
                    debug!(poll_id = %poll_id, "loaded poll from store");
                    self.insert_poll(poll_id, poll);
                }
                Some(Err(e)) => {
                    warn!(poll_id = %poll_id, error = %e, "discarding unreadable stored poll");
                }
                None => {
                    debug!(poll_id = %poll_id, "poll not found in store");
                }
            }
        }

        let found = self.have_poll(poll_id);
        for waiter in waiters {
            let _ = waiter.send(found);
        }
    }

    /// Close a poll. Returns `true` if it was open before.
    pub fn close_poll(&mut self, poll_id: PollId) -> bool {
        let Some(poll) = self.get_poll_editable(poll_id) else {
            debug!(poll_id = %poll_id, "cannot close unknown poll");
            return false;
        };
        if poll.is_closed {
            return false;
        }
        poll.is_closed = true;
        self.notify_on_poll_update(poll_id);
        self.save_poll(poll_id);
        true
    }

    /// Payload asking the server to create `poll_id`
    pub fn get_input_media(&self, poll_id: PollId) -> Option<InputMediaPoll> {
        let poll = self.get_poll(poll_id)?;
        if poll_id.is_remote() {
            debug!(poll_id = %poll_id, "building creation payload for a confirmed poll");
        }
        Some(InputMediaPoll {
            poll: ServerPoll {
                id: 0,
                closed: false,
                question: poll.question.clone(),
                answers: poll.options.iter().map(get_input_poll_option).collect(),
            },
        })
    }

    /// Merge server data into the poll and return its authoritative id.
    ///
    /// `poll_id` is the identifier the caller knows the poll by, if any. When
    /// it is local and the snapshot carries the server definition, the poll
    /// is re-keyed to the server identifier and its message associations
    /// follow. Callers must switch to the returned id. `None` means the
    /// snapshot was rejected or refers to a poll with no known data.
    pub fn on_get_poll(
        &mut self,
        poll_id: Option<PollId>,
        snapshot: PollSnapshot,
    ) -> Option<PollId> {
        if self.torn_down {
            return None;
        }
        let requested = poll_id.filter(|id| id.is_valid());
        let server_id = snapshot.server_poll_id();

        let (poll_id, promoted_from) = match (requested, server_id) {
            (_, Some(server_id)) if !server_id.is_remote() => {
                warn!(poll_id = %server_id, "server sent a poll with a non-server identifier");
                return None;
            }
            (Some(requested), Some(server_id)) if requested.is_local() => {
                (server_id, Some(requested))
            }
            (Some(requested), Some(server_id)) if requested != server_id => {
                warn!(
                    poll_id = %requested,
                    server_poll_id = %server_id,
                    "server poll does not match the requested poll"
                );
                return None;
            }
            (_, Some(server_id)) => (server_id, None),
            (Some(requested), None) if requested.is_local() => {
                warn!(poll_id = %requested, "received results for a poll the server has not confirmed");
                return None;
            }
            (Some(requested), None) => (requested, None),
            (None, None) => {
                warn!("received poll results without an identifier");
                return None;
            }
        };

        let mut is_changed = false;
        if let Some(local_id) = promoted_from {
            is_changed |= self.promote_local_poll(local_id, poll_id);
        }

        let (definition, results) = match snapshot {
            PollSnapshot::Definition(poll) => (Some(poll), None),
            PollSnapshot::Results(results) => (None, Some(results)),
            PollSnapshot::Full { poll, results } => (Some(poll), Some(results)),
        };

        if !self.have_poll(poll_id) {
            if definition.is_none() {
                // Nothing to merge into; make sure a cached copy gets loaded.
                self.start_load(poll_id);
                debug!(poll_id = %poll_id, "ignoring results for a poll with no data");
                return None;
            }
            self.insert_poll(poll_id, Poll::default());
            is_changed = true;
        }

        let poll = self.get_poll_editable(poll_id)?;
        if let Some(definition) = definition {
            is_changed |= merge_definition(poll_id, poll, definition);
        }
        if let Some(results) = results {
            is_changed |= merge_results(poll_id, poll, results);
        }

        if is_changed {
            self.notify_on_poll_update(poll_id);
            self.save_poll(poll_id);
        }
        Some(poll_id)
    }

    /// Move a local poll and its message associations to `remote_id`.
    ///
    /// If the remote poll is already in memory it wins and the local copy
    /// is dropped; the following merge brings it up to date either way.
    fn promote_local_poll(&mut self, local_id: PollId, remote_id: PollId) -> bool {
        if self.promoted.get(&local_id) == Some(&remote_id) {
            return false;
        }
        let mut moved = false;

        if let Some(slot) = self.poll_slots.remove(&local_id) {
            if self.poll_slots.contains_key(&remote_id) {
                self.release_slot(slot);
            } else {
                self.poll_slots.insert(remote_id, slot);
            }
            moved = true;
        }
        if let Some(messages) = self.poll_messages.remove(&local_id) {
            self.poll_messages
                .entry(remote_id)
                .or_default()
                .extend(messages);
            moved = true;
        }

        self.promoted.insert(local_id, remote_id);
        debug!(local_poll_id = %local_id, poll_id = %remote_id, "promoted local poll");
        moved
    }

    /// Identifier to use for `poll_id` now: the server identifier for a
    /// promoted local poll, the identifier itself for a known poll.
    pub fn resolve_poll_id(&self, poll_id: PollId) -> Option<PollId> {
        self.promoted
            .get(&poll_id)
            .copied()
            .or_else(|| self.have_poll(poll_id).then_some(poll_id))
    }

    /// Notify every message displaying `poll_id`
    fn notify_on_poll_update(&self, poll_id: PollId) {
        let Some(messages) = self.poll_messages.get(&poll_id) else {
            return;
        };
        debug!(poll_id = %poll_id, messages = messages.len(), "propagating poll update");
        for full_message_id in messages {
            self.observer.on_poll_updated(*full_message_id, poll_id);
        }
    }

    /// Queue a store write for a remote poll
    fn save_poll(&self, poll_id: PollId) {
        if !poll_id.is_remote() {
            return;
        }
        if let Some(poll) = self.get_poll(poll_id) {
            self.persistence.save_poll(poll, poll_id);
        }
    }

    /// Presentation view of `poll_id`
    pub fn get_poll_object(&self, poll_id: PollId) -> Option<PollObject> {
        self.get_poll(poll_id)
            .map(|poll| get_poll_object(poll_id, poll))
    }

    /// Encode the poll a message embeds, for the message layer's own records.
    ///
    /// Returns `None` for an unknown local poll, which cannot be restored.
    pub fn store_poll_reference(&self, poll_id: PollId) -> Option<Vec<u8>> {
        if poll_id.is_remote() {
            return Some(encode_poll_reference(poll_id, None));
        }
        let poll = self.get_poll(poll_id)?;
        Some(encode_poll_reference(poll_id, Some(poll)))
    }

    /// Restore a poll reference written by [`store_poll_reference`](Self::store_poll_reference).
    ///
    /// Remote polls start hydrating from the store. A local poll is
    /// re-created under a fresh local identifier, which is returned.
    pub fn parse_poll_reference(&mut self, raw: &[u8]) -> Result<PollId, PollError> {
        match decode_poll_reference(raw)? {
            PollReference::Remote(poll_id) => {
                self.get_poll_force(poll_id);
                Ok(poll_id)
            }
            PollReference::Local { previous_id, poll } => {
                let poll_id = self.allocate_local_poll_id()?;
                self.insert_poll(poll_id, poll);
                debug!(previous_poll_id = %previous_id, poll_id = %poll_id, "restored local poll");
                Ok(poll_id)
            }
        }
    }

    pub fn stats(&self) -> PollEngineStats {
        let local_polls = self.poll_slots.keys().filter(|id| id.is_local()).count();
        PollEngineStats {
            local_polls,
            remote_polls: self.poll_slots.len() - local_polls,
            tracked_messages: self.poll_messages.values().map(HashSet::len).sum(),
            loads_in_flight: self
                .loads
                .values()
                .filter(|state| matches!(state, LoadState::InFlight(_)))
                .count(),
        }
    }

    /// Release every poll. Pending `have_poll_force` callers are dropped and
    /// later store completions are ignored.
    pub fn tear_down(&mut self) {
        self.torn_down = true;
        self.slots.clear();
        self.free_slots.clear();
        self.poll_slots.clear();
        self.poll_messages.clear();
        self.promoted.clear();
        self.loads.clear();
        debug!("poll engine torn down");
    }
}

/// Apply a server definition. Returns `true` if anything changed.
fn merge_definition(poll_id: PollId, poll: &mut Poll, definition: ServerPoll) -> bool {
    let mut is_changed = false;
    if poll.question != definition.question {
        poll.question = definition.question;
        is_changed = true;
    }
    if poll.options.len() != definition.answers.len() {
        poll.options = get_poll_options(definition.answers);
        is_changed = true;
    } else {
        for (option, answer) in poll.options.iter_mut().zip(definition.answers) {
            if option.text != answer.text {
                option.text = answer.text;
                is_changed = true;
            }
            if option.data != answer.option {
                // Votes recorded under the old token no longer apply
                option.data = answer.option;
                option.voter_count = 0;
                option.is_chosen = false;
                is_changed = true;
            }
        }
    }
    if definition.closed && !poll.is_closed {
        poll.is_closed = true;
        is_changed = true;
    } else if !definition.closed && poll.is_closed {
        debug!(poll_id = %poll_id, "ignoring open state for a closed poll");
    }
    is_changed
}

/// Apply server results. Returns `true` if anything changed.
fn merge_results(poll_id: PollId, poll: &mut Poll, results: ServerPollResults) -> bool {
    let mut is_changed = false;
    if let Some(total_voters) = results.total_voters {
        let total_voters = total_voters.max(0);
        if poll.total_voter_count != total_voters {
            poll.total_voter_count = total_voters;
            is_changed = true;
        }
    }
    // A token repeated in one result set counts once, with its last entry
    let mut latest: Vec<PollAnswerVoters> = Vec::with_capacity(results.results.len());
    for result in results.results {
        match latest.iter_mut().find(|entry| entry.option == result.option) {
            Some(entry) => *entry = result,
            None => latest.push(result),
        }
    }
    for result in latest {
        let voters = result.voters.max(0);
        let mut matched = false;
        for option in poll.options.iter_mut().filter(|o| o.data == result.option) {
            matched = true;
            if !results.min && option.is_chosen != result.chosen {
                option.is_chosen = result.chosen;
                is_changed = true;
            }
            if option.voter_count != voters {
                option.voter_count = voters;
                is_changed = true;
            }
        }
        if !matched {
            debug!(poll_id = %poll_id, "ignoring result for unknown poll option");
        }
    }
    if poll
        .options
        .iter()
        .any(|option| option.voter_count > poll.total_voter_count)
    {
        warn!(
            poll_id = %poll_id,
            total_voter_count = poll.total_voter_count,
            "poll option has more voters than the poll"
        );
    }
    is_changed
}
