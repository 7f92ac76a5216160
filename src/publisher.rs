//! Publisher channel (spec §4.9, C9): encrypts published loads, performs
//! target matching, and forwards framed messages to an abstract
//! topic-capable transport. Also owns the presence callback wiring onto
//! [`PresenceMap`].
//!
//! Grounded on `examples/original_source/salt/channel/server.py`'s
//! `_encrypt_private`/crypticle usage for the encrypt-then-sign envelope
//! shape, and on `estuary-flow`'s axum-router-as-sidecar pattern for
//! treating the transport as an injected, testable dependency rather than
//! a concrete socket type.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::auth::MasterKeys;
use crate::crypto::{self, derive_session_key, Crypticle};
use crate::error::{CoreError, Result};
use crate::events::EventSink;
use crate::keystore::KeyStore;
use crate::presence::{PresenceMap, SubscriberHandle};
use crate::target::TargetSpec;
use crate::vault::SecretVault;
use crate::wire::PRESENCE_SENTINEL;

/// One outbound, transport-ready publish frame (spec §6 publish envelope).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishFrame {
    pub payload: Vec<u8>,
    pub topic_lst: Option<Vec<String>>,
}

/// The abstract outbound transport (spec §1: "networking libraries ...
/// treated as abstract transports"). `supports_topics` gates the
/// `topic_lst` targeting optimization (spec §4.9 step 5).
#[async_trait]
pub trait PublishTransport: Send + Sync {
    fn supports_topics(&self) -> bool;
    async fn publish(&self, frame: PublishFrame) -> Result<()>;
}

/// Records every frame it was handed; used by tests and by any caller
/// that wants to observe outbound publishes synchronously.
#[derive(Default)]
pub struct RecordingTransport {
    topics_enabled: bool,
    sent: Mutex<Vec<PublishFrame>>,
}

impl RecordingTransport {
    pub fn new(topics_enabled: bool) -> Self {
        RecordingTransport { topics_enabled, sent: Mutex::new(Vec::new()) }
    }

    pub fn sent(&self) -> Vec<PublishFrame> {
        self.sent.lock().expect("recording transport lock poisoned").clone()
    }
}

#[async_trait]
impl PublishTransport for RecordingTransport {
    fn supports_topics(&self) -> bool {
        self.topics_enabled
    }

    async fn publish(&self, frame: PublishFrame) -> Result<()> {
        self.sent.lock().expect("recording transport lock poisoned").push(frame);
        Ok(())
    }
}

pub struct PublisherChannel {
    vault: Arc<SecretVault>,
    master_keys: Arc<MasterKeys>,
    keystore: KeyStore,
    sign_pub_messages: bool,
    transport: Arc<dyn PublishTransport>,
    presence: Mutex<PresenceMap>,
    sink: Arc<dyn EventSink>,
}

impl PublisherChannel {
    pub fn new(
        vault: Arc<SecretVault>,
        master_keys: Arc<MasterKeys>,
        keystore: KeyStore,
        sign_pub_messages: bool,
        transport: Arc<dyn PublishTransport>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        PublisherChannel {
            vault,
            master_keys,
            keystore,
            sign_pub_messages,
            transport,
            presence: Mutex::new(PresenceMap::new()),
            sink,
        }
    }

    /// `publish(load)` (spec §4.9 steps 1-6). `universe` is the known set
    /// of minion IDs the target matcher resolves `glob`/`pcre` targets
    /// against; callers typically supply the presence map's or the key
    /// store's accepted IDs.
    pub async fn publish(&self, mut load: Value, universe: &[String]) -> Result<()> {
        let serial = self.vault.next_serial();
        if let Value::Object(map) = &mut load {
            map.insert("serial".to_string(), json!(serial));
        }

        let topic_lst = self.resolve_topics(&load, universe)?;

        let secret = self.vault.snapshot();
        let crypticle = Crypticle::new(&secret.aes);
        let ciphertext = crypticle.dumps(&load, None)?;

        let mut outer = json!({ "enc": "aes", "load": base64_encode(&ciphertext) });
        if self.sign_pub_messages {
            let sig = crypto::sign_message(&self.master_keys.signing_private_key, &ciphertext)?;
            outer["sig"] = json!(base64_encode(&sig));
        }
        let outer_bytes = rmp_serde::to_vec_named(&outer)
            .map_err(|e| CoreError::Internal(format!("framing publish envelope: {e}")))?;

        let framed = rmp_serde::to_vec_named(&json!({ "payload": base64_encode(&outer_bytes) }))
            .map_err(|e| CoreError::Internal(format!("framing publish envelope: {e}")))?;

        let frame = PublishFrame { payload: framed, topic_lst };
        self.transport.publish(frame).await
    }

    fn resolve_topics(&self, load: &Value, universe: &[String]) -> Result<Option<Vec<String>>> {
        if !self.transport.supports_topics() {
            return Ok(None);
        }
        let (Some(tgt_type), Some(tgt)) = (load.get("tgt_type").and_then(Value::as_str), load.get("tgt")) else {
            return Ok(None);
        };
        if !matches!(tgt_type, "glob" | "pcre" | "list") {
            return Ok(None);
        }
        let spec = TargetSpec::from_type_and_value(tgt_type, tgt)?;
        let matched = spec.matches(universe.iter().map(String::as_str))?;
        Ok(Some(matched))
    }

    /// Presence subscribe: the subscriber must prove it holds the cluster
    /// secret for `id` by AES-wrapping [`PRESENCE_SENTINEL`] under its
    /// session key (spec §4.9 presence callback).
    pub fn subscribe(&self, id: &str, handle: SubscriberHandle, proof: &[u8]) -> bool {
        let session_key = derive_session_key(&self.vault.snapshot().aes, id);
        let crypticle = Crypticle::new(&session_key);
        let Ok(plaintext) = crypticle.loads(proof) else { return false };
        if plaintext.as_str() != Some(PRESENCE_SENTINEL) {
            return false;
        }
        self.presence.lock().expect("presence lock poisoned").subscribe(id, handle, self.sink.as_ref());
        true
    }

    pub fn unsubscribe(&self, id: &str, handle: SubscriberHandle) {
        self.presence.lock().expect("presence lock poisoned").unsubscribe(id, handle, self.sink.as_ref());
    }

    pub fn is_present(&self, id: &str) -> bool {
        self.presence.lock().expect("presence lock poisoned").is_present(id)
    }

    /// Accepted minion IDs, the natural `universe` for glob/pcre
    /// targeting when the caller has no narrower set in mind.
    pub fn accepted_universe(&self) -> Vec<String> {
        let dir = self.keystore.pki_dir().join("minions");
        let Ok(entries) = std::fs::read_dir(dir) else { return Vec::new() };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect()
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
}

fn base64_decode(s: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, s)
}
