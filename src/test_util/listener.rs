use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::peer::listener::ResourceListener;
use crate::resource::delta::{Delta, Record};
use crate::resource::link::LinkState;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ListenerEvent {
    Snapshot { name: String, seq: u64, records: Vec<Record> },
    Delta { name: String, seq: u64, delta: Delta },
    LinkState { name: String, state: LinkState },
}

/// A [ResourceListener] that forwards every callback into a channel, so tests can await them
pub struct RecordingListener {
    events: mpsc::UnboundedSender<ListenerEvent>,
}

impl RecordingListener {
    pub fn new() -> (Arc<RecordingListener>, ListenerEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        (Arc::new(RecordingListener { events }), ListenerEvents { rx })
    }

    fn record(&self, evt: ListenerEvent) {
        // the test may have stopped listening
        let _ = self.events.send(evt);
    }
}

impl ResourceListener for RecordingListener {
    fn on_snapshot(&self, name: &str, seq: u64, records: &[Record]) {
        self.record(ListenerEvent::Snapshot { name: name.to_string(), seq, records: records.to_vec() });
    }

    fn on_delta(&self, name: &str, seq: u64, delta: &Delta) {
        self.record(ListenerEvent::Delta { name: name.to_string(), seq, delta: delta.clone() });
    }

    fn on_link_state(&self, name: &str, state: LinkState) {
        self.record(ListenerEvent::LinkState { name: name.to_string(), state });
    }
}

pub struct ListenerEvents {
    rx: mpsc::UnboundedReceiver<ListenerEvent>,
}

impl ListenerEvents {
    /// the next event, panicking if there is none within a few seconds
    pub async fn next(&mut self) -> ListenerEvent {
        match tokio::time::timeout(Duration::from_secs(5), self.rx.recv()).await {
            Ok(Some(evt)) => evt,
            Ok(None) => panic!("listener was dropped"),
            Err(_) => panic!("timeout waiting for a listener event"),
        }
    }

    /// skips events until one matches the predicate
    pub async fn next_matching(&mut self, pred: impl Fn(&ListenerEvent) -> bool) -> ListenerEvent {
        loop {
            let evt = self.next().await;
            if pred(&evt) {
                return evt;
            }
        }
    }

    /// skips events until the link reaches the given state
    pub async fn await_link_state(&mut self, state: LinkState) {
        self.next_matching(|evt| matches!(evt, ListenerEvent::LinkState { state: s, .. } if *s == state)).await;
    }

    pub fn try_next(&mut self) -> Option<ListenerEvent> {
        self.rx.try_recv().ok()
    }
}
