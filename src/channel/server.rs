//! Request-server channel (spec §4.5, C5).
//!
//! `handle_message` implements the nine-step contract literally: decode,
//! decrypt (AES path only, picking cluster secret vs. per-minion session
//! key by envelope version), enforce structural invariants, enforce the
//! version downgrade gate, check freshness and token for v3+, hand `_auth`
//! loads to the auth engine on the clear channel, dispatch everything else
//! to the registered handler, and package the reply per its `ReplyMode`.
//!
//! Grounded on `estuary-flow/crates/dekaf`'s "decode -> version-check ->
//! decrypt -> dispatch -> encode reply" session shape and on
//! `examples/original_source/salt/channel/server.py::ReqServerChannel`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::auth::{AuthEngine, MasterKeys};
use crate::crypto::{self, Crypticle};
use crate::events::EventSink;
use crate::keystore::{KeyDir, KeyStore};
use crate::vault::SecretVault;
use crate::wire::{AuthLoad, EncMode, Envelope, ReplyMode, RequestFields, TOKEN_SENTINEL};

/// The command registry seam (spec §9 DESIGN NOTES: "explicit registry
/// mapping command -> function" in place of dynamic dispatch).
#[async_trait]
pub trait PayloadHandler: Send + Sync {
    async fn handle(&self, id: &str, load: Value) -> (Value, ReplyMode);
}

/// A handler that always reports an unknown command, useful as a
/// placeholder until a real command registry or pool dispatcher is wired
/// in front of this channel.
pub struct UnknownCommandHandler;

#[async_trait]
impl PayloadHandler for UnknownCommandHandler {
    async fn handle(&self, _id: &str, _load: Value) -> (Value, ReplyMode) {
        (json!({"ret": Value::Null}), ReplyMode::Send { nonce: None })
    }
}

pub struct RequestServerChannel {
    keystore: KeyStore,
    vault: Arc<SecretVault>,
    auth: AuthEngine,
    master_keys: Arc<MasterKeys>,
    handler: Box<dyn PayloadHandler>,
    sink: Arc<dyn EventSink>,
    connected: Mutex<HashSet<String>>,
    minimum_auth_version: u32,
    request_server_ttl: Duration,
    sign_pub_messages: bool,
}

impl RequestServerChannel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        keystore: KeyStore,
        vault: Arc<SecretVault>,
        auth: AuthEngine,
        master_keys: Arc<MasterKeys>,
        handler: Box<dyn PayloadHandler>,
        sink: Arc<dyn EventSink>,
        minimum_auth_version: u32,
        request_server_ttl: Duration,
        sign_pub_messages: bool,
    ) -> Self {
        RequestServerChannel {
            keystore,
            vault,
            auth,
            master_keys,
            handler,
            sink,
            connected: Mutex::new(HashSet::new()),
            minimum_auth_version,
            request_server_ttl,
            sign_pub_messages,
        }
    }

    /// Decodes, authenticates, dispatches, and replies to one inbound
    /// frame. `now` is the caller-supplied unix timestamp (v3+ freshness
    /// checks never call a clock themselves, which keeps this testable).
    pub async fn handle_message(&self, raw: &[u8], now: i64) -> Vec<u8> {
        let envelope = match Envelope::decode(raw) {
            Ok(e) => e,
            Err(_) => return self.bad_load(),
        };

        match envelope.enc {
            EncMode::Clear => self.handle_clear(&envelope).await,
            EncMode::Aes => self.handle_aes(&envelope, now).await,
        }
    }

    async fn handle_clear(&self, envelope: &Envelope) -> Vec<u8> {
        let load = match envelope.clear_load() {
            Ok(v) => v,
            Err(_) => return self.bad_load(),
        };
        let fields = match RequestFields::from_value(load) {
            Ok(f) => f,
            Err(_) => return self.bad_load(),
        };
        if fields.cmd != "_auth" {
            // Requests on the clear channel other than the handshake are
            // always rejected (spec §4.5 step 6).
            return self.bad_load();
        }
        let auth_load = match AuthLoad::from_value(load) {
            Ok(a) => a,
            Err(_) => return self.bad_load(),
        };

        let (already_connected, active_count) = {
            let connected = self.connected.lock().expect("connected set lock poisoned");
            (connected.contains(&auth_load.id), connected.len())
        };

        let reply =
            self.auth.authenticate(envelope.version, &auth_load, already_connected, active_count, self.sink.as_ref());

        if reply.get("enc").and_then(Value::as_str) == Some("pub") {
            self.connected.lock().expect("connected set lock poisoned").insert(auth_load.id.clone());
        }

        encode_value(&reply)
    }

    async fn handle_aes(&self, envelope: &Envelope, now: i64) -> Vec<u8> {
        let cipher = match envelope.cipher_bytes() {
            Ok(b) => b,
            Err(_) => return self.bad_load(),
        };

        let load = match self.decrypt_with_retry(envelope, cipher) {
            Ok(v) => v,
            Err(_) => return self.bad_load(),
        };

        if !load.is_object() {
            return self.bad_load();
        }

        let fields = match RequestFields::from_value(&load) {
            Ok(f) => f,
            Err(_) => return self.bad_load(),
        };

        if let Some(inner_id) = &fields.id {
            if inner_id.contains('\0') {
                return self.bad_load();
            }
            if envelope.version >= 3 && envelope.id.as_deref() != Some(inner_id.as_str()) {
                return self.bad_load();
            }
        } else if envelope.version >= 3 {
            return self.bad_load();
        }

        if envelope.version < self.minimum_auth_version {
            return self.bad_load();
        }

        if envelope.version >= 3 {
            match fields.ts {
                Some(ts) if now.saturating_sub(ts) <= self.request_server_ttl.as_secs() as i64 => {}
                Some(_) => {
                    tracing::warn!(
                        minion_id = %fields.id.clone().unwrap_or_default(),
                        "expired ttl"
                    );
                    return self.bad_load();
                }
                None => return self.bad_load(),
            }

            if let Some(tok_b64) = &fields.tok {
                let id = fields.id.as_deref().unwrap_or_default();
                if !self.verify_token(id, tok_b64) {
                    return self.bad_load();
                }
            }
        }

        let req_nonce = fields.nonce.clone();
        let id = fields.id.clone().unwrap_or_default();
        let (result, mode) = self.handler.handle(&id, load).await;
        self.package_reply(result, mode, req_nonce)
    }

    /// Tries the current secret snapshot; on a decrypt failure, refreshes
    /// the snapshot and retries exactly once before surfacing an error
    /// (spec §4.3, §7 AuthenticationError policy).
    fn decrypt_with_retry(&self, envelope: &Envelope, cipher: &[u8]) -> crate::error::Result<Value> {
        let attempt = |secret: &[u8]| -> crate::error::Result<Value> {
            let key = if envelope.version >= 3 {
                let id = envelope.id.as_deref().ok_or_else(|| {
                    crate::error::CoreError::Decode("v3+ aes envelope missing id".into())
                })?;
                crypto::derive_session_key(secret, id)
            } else {
                secret.to_vec()
            };
            Crypticle::new(&key).loads(cipher)
        };

        let first = self.vault.snapshot();
        match attempt(&first.aes) {
            Ok(v) => Ok(v),
            Err(_) => {
                let refreshed = self.vault.snapshot();
                attempt(&refreshed.aes)
            }
        }
    }

    fn verify_token(&self, id: &str, tok_b64: &str) -> bool {
        let Ok(tok_bytes) = base64_decode(tok_b64) else { return false };
        let Ok(Some(pub_pem)) = self.keystore.load_pub(id, KeyDir::Accepted) else { return false };
        let Ok(pub_key) = crypto::load_public_key_pem(&pub_pem) else { return false };
        crypto::verify_message(&pub_key, TOKEN_SENTINEL, &tok_bytes).is_ok()
    }

    fn package_reply(&self, result: Value, mode: ReplyMode, req_nonce: Option<String>) -> Vec<u8> {
        match mode {
            ReplyMode::SendClear => encode_value(&result),
            ReplyMode::Send { nonce } => {
                let secret = self.vault.snapshot();
                let crypticle = Crypticle::new(&secret.aes);
                match crypticle.dumps(&result, nonce.or(req_nonce).as_deref()) {
                    Ok(bytes) => bytes,
                    Err(_) => encode_value(&json!("Server-side exception handling payload")),
                }
            }
            ReplyMode::SendPrivate { target, nonce } => {
                self.package_send_private(&target, result, nonce.or(req_nonce))
            }
        }
    }

    /// `send_private`: a fresh per-recipient key wrapped to the
    /// recipient's accepted RSA key, signed when `sign_pub_messages` is
    /// on. An unknown recipient never leaks state — it gets back an empty
    /// encrypted payload indistinguishable from a real one on the wire
    /// (spec §4.5).
    fn package_send_private(&self, target: &str, result: Value, nonce: Option<String>) -> Vec<u8> {
        let target_pub = match self
            .keystore
            .load_pub(target, KeyDir::Accepted)
            .ok()
            .flatten()
            .and_then(|pem| crypto::load_public_key_pem(&pem).ok())
        {
            Some(k) => k,
            None => return encode_value(&json!({})),
        };

        let fresh_key = crypto::generate_key_string();
        let wrapped_key = match crypto::oaep_wrap(&target_pub, &fresh_key) {
            Ok(w) => w,
            Err(_) => return encode_value(&json!({})),
        };

        let bundle = json!({ "key": base64_encode(&wrapped_key), "pillar": result, "nonce": nonce });
        let crypticle = Crypticle::new(&fresh_key);

        if self.sign_pub_messages {
            let data = match rmp_serde::to_vec_named(&bundle) {
                Ok(d) => d,
                Err(_) => return encode_value(&json!({})),
            };
            let sig = crypto::sign_message(&self.master_keys.signing_private_key, &data).unwrap_or_default();
            let signed = json!({ "data": base64_encode(&data), "sig": base64_encode(&sig) });
            crypticle.dumps(&signed, None).unwrap_or_else(|_| encode_value(&json!({})))
        } else {
            crypticle.dumps(&bundle, None).unwrap_or_else(|_| encode_value(&json!({})))
        }
    }

    fn bad_load(&self) -> Vec<u8> {
        encode_value(&json!("bad load"))
    }
}

fn encode_value(v: &Value) -> Vec<u8> {
    rmp_serde::to_vec_named(v).unwrap_or_else(|_| rmp_serde::to_vec_named(&json!("bad load")).unwrap_or_default())
}

fn base64_encode(bytes: &[u8]) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
}

fn base64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelEventSink;
    use crate::vault::SecretVault;
    use crate::wire::EnvelopeLoad;

    fn channel(dir: &std::path::Path, min_version: u32, ttl_secs: u64) -> (RequestServerChannel, Arc<SecretVault>) {
        let keystore = KeyStore::open(dir).unwrap();
        let (priv_key, pub_key) = crypto::generate_keypair().unwrap();
        let master_keys = Arc::new(MasterKeys::new(priv_key, pub_key, None).unwrap());
        let vault = Arc::new(SecretVault::new(crypto::generate_key_string()));
        let auth = AuthEngine::new(
            keystore.clone(),
            master_keys.clone(),
            vault.clone(),
            false,
            true,
            0,
            1,
            true,
            min_version,
            false,
        );
        let channel = RequestServerChannel::new(
            keystore,
            vault.clone(),
            auth,
            master_keys,
            Box::new(UnknownCommandHandler),
            Arc::new(ChannelEventSink::new()),
            min_version,
            Duration::from_secs(ttl_secs),
            false,
        );
        (channel, vault)
    }

    fn clear_envelope(version: u32, load: Value) -> Vec<u8> {
        let envelope = Envelope { enc: EncMode::Clear, version, id: None, load: EnvelopeLoad::Clear(load) };
        envelope.encode().unwrap()
    }

    #[tokio::test]
    async fn downgraded_auth_envelope_is_rejected_before_any_state_change() {
        let dir = tempfile::tempdir().unwrap();
        let (channel, _vault) = channel(dir.path(), 3, 300);

        let (_priv, pub_key) = crypto::generate_keypair().unwrap();
        let pem = crypto::public_key_to_pem(&pub_key).unwrap();
        let raw = clear_envelope(2, json!({"cmd": "_auth", "id": "m1", "pub": pem}));

        let reply_bytes = channel.handle_message(&raw, 0).await;
        let reply: Value = rmp_serde::from_slice(&reply_bytes).unwrap();
        assert_eq!(reply, json!("bad load"));
        assert!(!dir.path().join("minions_pre").join("m1").exists());
    }

    #[tokio::test]
    async fn happy_path_auth_over_clear_channel_produces_pub_reply() {
        let dir = tempfile::tempdir().unwrap();
        let (channel, vault) = channel(dir.path(), 3, 300);

        let (minion_priv, minion_pub) = crypto::generate_keypair().unwrap();
        let pem = crypto::public_key_to_pem(&minion_pub).unwrap();
        let raw = clear_envelope(3, json!({"cmd": "_auth", "id": "m1", "pub": pem}));

        let reply_bytes = channel.handle_message(&raw, 0).await;
        let reply: Value = rmp_serde::from_slice(&reply_bytes).unwrap();
        assert_eq!(reply["enc"], "pub");

        let aes_b64 = reply["aes"].as_str().unwrap();
        let aes_bytes = base64_decode(aes_b64).unwrap();
        let secret = crypto::oaep_unwrap(&minion_priv, &aes_bytes).unwrap();
        assert_eq!(secret, *vault.snapshot().aes);
    }

    #[tokio::test]
    async fn expired_ttl_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (channel, vault) = channel(dir.path(), 3, 60);

        let id = "m1";
        let session_key = crypto::derive_session_key(&vault.snapshot().aes, id);
        let crypticle = Crypticle::new(&session_key);
        let cipher = crypticle.dumps(&json!({"cmd": "test.ping", "ts": 0, "id": id}), None).unwrap();
        let envelope =
            Envelope { enc: EncMode::Aes, version: 3, id: Some(id.to_string()), load: EnvelopeLoad::Cipher(cipher) };

        let reply_bytes = channel.handle_message(&envelope.encode().unwrap(), 1000).await;
        let reply: Value = rmp_serde::from_slice(&reply_bytes).unwrap();
        assert_eq!(reply, json!("bad load"));
    }

    #[tokio::test]
    async fn outer_inner_id_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (channel, vault) = channel(dir.path(), 3, 300);

        let session_key = crypto::derive_session_key(&vault.snapshot().aes, "m1");
        let crypticle = Crypticle::new(&session_key);
        let cipher = crypticle.dumps(&json!({"cmd": "test.ping", "ts": 0, "id": "m2"}), None).unwrap();
        let envelope =
            Envelope { enc: EncMode::Aes, version: 3, id: Some("m1".to_string()), load: EnvelopeLoad::Cipher(cipher) };

        let reply_bytes = channel.handle_message(&envelope.encode().unwrap(), 0).await;
        let reply: Value = rmp_serde::from_slice(&reply_bytes).unwrap();
        assert_eq!(reply, json!("bad load"));
        assert!(!dir.path().join("minions_denied").join("m1").exists());
    }

    #[tokio::test]
    async fn well_formed_request_reaches_the_handler_and_is_encrypted_back() {
        let dir = tempfile::tempdir().unwrap();
        let (channel, vault) = channel(dir.path(), 3, 300);

        let id = "m1";
        let session_key = crypto::derive_session_key(&vault.snapshot().aes, id);
        let crypticle = Crypticle::new(&session_key);
        let cipher = crypticle.dumps(&json!({"cmd": "test.ping", "ts": 0, "id": id, "nonce": "abc"}), None).unwrap();
        let envelope =
            Envelope { enc: EncMode::Aes, version: 3, id: Some(id.to_string()), load: EnvelopeLoad::Cipher(cipher) };

        let reply_bytes = channel.handle_message(&envelope.encode().unwrap(), 0).await;
        let reply_load = crypticle.loads(&reply_bytes).unwrap();
        assert_eq!(reply_load["nonce"], "abc");
    }
}
