#![no_main]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use libfuzzer_sys::fuzz_target;

use chatpoll::config::PollsConfig;
use chatpoll::polls::{
    ChatId, FullMessageId, MessageId, PersistenceBridge, PollEngine, PollId, PollObserver,
    PollSnapshot,
};

#[derive(Default)]
struct CountingObserver {
    updates: AtomicUsize,
}

impl PollObserver for CountingObserver {
    fn on_poll_updated(&self, _full_message_id: FullMessageId, _poll_id: PollId) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }
}

// Feeds arbitrary server snapshots through the merge path twice. Merging the
// same data again must leave the poll unchanged, notify nobody and queue no
// store write.
fuzz_target!(|data: &[u8]| {
    let snapshot: PollSnapshot = match serde_json::from_slice(data) {
        Ok(snapshot) => snapshot,
        Err(_) => return,
    };

    let (persistence, mut requests) = PersistenceBridge::new(true);
    let observer = Arc::new(CountingObserver::default());
    let mut engine = PollEngine::new(PollsConfig::default(), persistence, observer.clone());
    let local_id = match engine.create_poll("Q?".to_string(), vec!["A".into(), "B".into()]) {
        Ok(poll_id) => poll_id,
        Err(_) => return,
    };

    let requested = match snapshot.server_poll_id() {
        Some(_) => local_id,
        None => PollId::new(1),
    };
    engine.register_poll(requested, FullMessageId::new(ChatId(1), MessageId(1)));

    let Some(poll_id) = engine.on_get_poll(Some(requested), snapshot.clone()) else {
        return;
    };
    let first = engine.get_poll(poll_id).cloned();
    while requests.try_recv().is_ok() {}
    let updates = observer.updates.load(Ordering::SeqCst);

    assert_eq!(engine.on_get_poll(Some(poll_id), snapshot), Some(poll_id));
    assert_eq!(engine.get_poll(poll_id).cloned(), first);
    assert_eq!(observer.updates.load(Ordering::SeqCst), updates);
    assert!(requests.try_recv().is_err());
});
