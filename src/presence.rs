//! Presence tracker (spec §3 PresenceMap, §4.9, C10).
//!
//! Tracks the set of subscriber handles currently attached to the
//! publisher transport per minion id. Mutated only from the presence
//! callback (spec §5: "mutated only from the presence callback thread");
//! the publisher reads it under a short critical section.

use std::collections::{HashMap, HashSet};

use crate::events::{emit_presence_change, emit_presence_present, EventSink};

pub type SubscriberHandle = u64;

#[derive(Default)]
pub struct PresenceMap {
    subscribers: HashMap<String, HashSet<SubscriberHandle>>,
}

impl PresenceMap {
    pub fn new() -> Self {
        PresenceMap { subscribers: HashMap::new() }
    }

    /// Registers `handle` as subscribed for `id`. Emits `salt/presence/change`
    /// and `salt/presence/present` when this is the id's first subscriber.
    pub fn subscribe(&mut self, id: &str, handle: SubscriberHandle, sink: &dyn EventSink) {
        let set = self.subscribers.entry(id.to_string()).or_default();
        let was_empty = set.is_empty();
        set.insert(handle);
        if was_empty {
            let present = self.present_ids();
            emit_presence_change(sink, &present);
            emit_presence_present(sink, &present);
        }
    }

    /// Removes `handle` from `id`'s subscriber set. Emits
    /// `salt/presence/change` when the last subscriber for `id` disconnects.
    pub fn unsubscribe(&mut self, id: &str, handle: SubscriberHandle, sink: &dyn EventSink) {
        let Some(set) = self.subscribers.get_mut(id) else { return };
        set.remove(&handle);
        if set.is_empty() {
            self.subscribers.remove(id);
            emit_presence_change(sink, &self.present_ids());
        }
    }

    pub fn is_present(&self, id: &str) -> bool {
        self.subscribers.get(id).map(|s| !s.is_empty()).unwrap_or(false)
    }

    pub fn present_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.subscribers.keys().cloned().collect();
        ids.sort();
        ids
    }
}
