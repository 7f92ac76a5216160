//! Abstract, publish-only event bus adapter (spec §4.10, C11).
//!
//! The core emits but never consumes events. Any sink that accepts
//! `(tag, payload)` pairs suffices — production wiring might forward to a
//! pub/sub bus, a log, or both; tests use [`ChannelEventSink`]. This keeps
//! the auth engine and presence tracker free of any module-level mutable
//! state (spec §9 DESIGN NOTES: pass an explicit dependency instead).

use serde_json::Value;

pub trait EventSink: Send + Sync {
    fn emit(&self, tag: &str, payload: Value);
}

/// `act` values used on `salt/auth` events (spec §4.4, §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAct {
    Accept,
    Pend,
    Reject,
    Denied,
    Full,
}

impl AuthAct {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthAct::Accept => "accept",
            AuthAct::Pend => "pend",
            AuthAct::Reject => "reject",
            AuthAct::Denied => "denied",
            AuthAct::Full => "full",
        }
    }
}

pub fn emit_auth_event(sink: &dyn EventSink, result: bool, act: Option<AuthAct>, id: &str, pub_pem: &str) {
    sink.emit(
        "salt/auth",
        serde_json::json!({
            "result": result,
            "act": act.map(AuthAct::as_str),
            "id": id,
            "pub": pub_pem,
        }),
    );
}

pub fn emit_presence_change(sink: &dyn EventSink, present: &[String]) {
    sink.emit("salt/presence/change", serde_json::json!({ "present": present }));
}

pub fn emit_presence_present(sink: &dyn EventSink, present: &[String]) {
    sink.emit("salt/presence/present", serde_json::json!({ "present": present }));
}

/// A no-op sink for configurations with no event consumer wired up.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _tag: &str, _payload: Value) {}
}

/// An in-memory sink useful for tests and for any caller that wants to
/// observe emitted events synchronously.
pub struct ChannelEventSink {
    sender: std::sync::Mutex<Vec<(String, Value)>>,
}

impl ChannelEventSink {
    pub fn new() -> Self {
        ChannelEventSink { sender: std::sync::Mutex::new(Vec::new()) }
    }

    pub fn drain(&self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.sender.lock().expect("event sink lock poisoned"))
    }
}

impl Default for ChannelEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, tag: &str, payload: Value) {
        self.sender.lock().expect("event sink lock poisoned").push((tag.to_string(), payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_records_emitted_events() {
        let sink = ChannelEventSink::new();
        emit_auth_event(&sink, true, Some(AuthAct::Accept), "m1", "PEM");
        let events = sink.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "salt/auth");
        assert_eq!(events[0].1["act"], "accept");
    }
}
