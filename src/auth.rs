//! Auth engine (spec §4.4, C4): executes the `_auth` handshake state
//! machine, enforces `minimum_auth_version`, and issues auth events.
//!
//! The key-state transition table is implemented literally from spec
//! §4.4; grounded structurally on `examples/original_source/salt/master.py`
//! (`ClearFuncs`'s handling of the `_auth` command) and on
//! `examples/original_source/salt/channel/server.py::_encrypt_private`
//! for the wrap/sign shape of a successful reply.

use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};

use crate::crypto;
use crate::error::{CoreError, Result};
use crate::events::{emit_auth_event, AuthAct, EventSink};
use crate::ids::valid_minion_id;
use crate::keystore::{KeyDir, KeyStore, MinionStatus};
use crate::vault::SecretVault;
use crate::wire::AuthLoad;

/// Long-lived RSA identity of the master (spec §3 MasterKeys).
pub struct MasterKeys {
    pub signing_private_key: RsaPrivateKey,
    pub signing_public_key: RsaPublicKey,
    pub signing_public_key_pem: String,
    /// Signature over `signing_public_key` by a separate offline signing
    /// key, served to minions when `master_sign_pubkey` is enabled.
    pub pubkey_signature: Option<Vec<u8>>,
}

impl MasterKeys {
    pub fn new(
        signing_private_key: RsaPrivateKey,
        signing_public_key: RsaPublicKey,
        pubkey_signature: Option<Vec<u8>>,
    ) -> Result<Self> {
        let signing_public_key_pem = crypto::public_key_to_pem(&signing_public_key)?;
        Ok(MasterKeys {
            signing_private_key,
            signing_public_key,
            signing_public_key_pem,
            pubkey_signature,
        })
    }
}

/// Evaluates an autosign policy against a minion id and its presented
/// grains (spec §4.4 step 4). The default policy always defers to the
/// ordinary `open_mode`/`auto_accept` configuration; production master
/// operators typically plug in a grains-matching or signing-file-based
/// policy here (spec §9: "replace dynamic dispatch ... with an explicit
/// registry").
pub trait AutosignPolicy: Send + Sync {
    fn decide(&self, id: &str, grains: Option<&Value>) -> AutosignDecision;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutosignDecision {
    Defer,
    ForceAccept,
    ForceReject,
}

pub struct DeferAutosignPolicy;

impl AutosignPolicy for DeferAutosignPolicy {
    fn decide(&self, _id: &str, _grains: Option<&Value>) -> AutosignDecision {
        AutosignDecision::Defer
    }
}

#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub success: bool,
    pub act: Option<AuthAct>,
}

pub struct AuthEngine {
    keystore: KeyStore,
    master_keys: std::sync::Arc<MasterKeys>,
    vault: std::sync::Arc<SecretVault>,
    open_mode: bool,
    auto_accept: bool,
    max_minions: usize,
    auth_mode: u32,
    auth_events: bool,
    minimum_auth_version: u32,
    sign_pub_messages: bool,
    autosign: Box<dyn AutosignPolicy>,
}

impl AuthEngine {
    pub fn new(
        keystore: KeyStore,
        master_keys: std::sync::Arc<MasterKeys>,
        vault: std::sync::Arc<SecretVault>,
        open_mode: bool,
        auto_accept: bool,
        max_minions: usize,
        auth_mode: u32,
        auth_events: bool,
        minimum_auth_version: u32,
        sign_pub_messages: bool,
    ) -> Self {
        AuthEngine {
            keystore,
            master_keys,
            vault,
            open_mode,
            auto_accept,
            max_minions,
            auth_mode,
            auth_events,
            minimum_auth_version,
            sign_pub_messages,
            autosign: Box::new(DeferAutosignPolicy),
        }
    }

    pub fn with_autosign_policy(mut self, policy: Box<dyn AutosignPolicy>) -> Self {
        self.autosign = policy;
        self
    }

    /// Runs the full handshake for one `_auth` request and returns the
    /// wire-ready reply value (either `{enc: "pub", ...}` or
    /// `{enc: "clear", load: {...}}`).
    ///
    /// `already_connected`/`active_minion_count` model the capacity check
    /// (spec §4.4 step 3); the request-server session layer supplies
    /// these since connection tracking is outside the auth engine's own
    /// state.
    pub fn authenticate(
        &self,
        envelope_version: u32,
        load: &AuthLoad,
        already_connected: bool,
        active_minion_count: usize,
        sink: &dyn EventSink,
    ) -> Value {
        // Step 1: downgrade gate. Short-circuits before touching the key
        // store so a replayed pre-minimum-version handshake can never
        // move a minion's state.
        if envelope_version < self.minimum_auth_version {
            return self.bad_load_reply(envelope_version);
        }

        // The envelope version is authoritative for which algorithms are
        // in play; a v3+ handshake's own `enc_algo`/`sig_algo` are never
        // consulted. Warn rather than silently accept when a minion still
        // asserts a legacy pair, since that usually means stale minion
        // config drifting from the master's actual negotiated version.
        if envelope_version >= 3 && (load.enc_algo.is_some() || load.sig_algo.is_some()) {
            tracing::warn!(
                id = %load.id,
                enc_algo = ?load.enc_algo,
                sig_algo = ?load.sig_algo,
                "ignoring legacy enc_algo/sig_algo on a v3+ auth handshake"
            );
        }

        // Step 2: id validity.
        if !valid_minion_id(&load.id) {
            return self.bad_load_reply(envelope_version);
        }

        // Step 3: capacity.
        if self.max_minions > 0 && !already_connected && active_minion_count >= self.max_minions {
            if self.auth_events {
                emit_auth_event(sink, false, Some(AuthAct::Full), &load.id, &load.pub_key);
            }
            return self.failure_reply(envelope_version, "full");
        }

        // Step 4: autosign policy.
        let autosign = self.autosign.decide(&load.id, load.autosign_grains.as_ref());

        let outcome = self.transition(&load.id, &load.pub_key, autosign);

        if self.auth_events {
            emit_auth_event(sink, outcome.success, outcome.act, &load.id, &load.pub_key);
        }

        if !outcome.success {
            return self.failure_reply(envelope_version, "false");
        }
        if matches!(outcome.act, Some(AuthAct::Pend)) {
            return self.pending_reply(envelope_version);
        }

        match self.build_accept_reply(load) {
            Ok(reply) => reply,
            Err(_) => self.failure_reply(envelope_version, "false"),
        }
    }

    /// The key-state machine from spec §4.4, table form.
    fn transition(&self, id: &str, presented_pub: &str, autosign: AutosignDecision) -> AuthOutcome {
        if self.open_mode {
            let _ = self.keystore.store_pub(id, KeyDir::Accepted, presented_pub);
            return AuthOutcome { success: true, act: Some(AuthAct::Accept) };
        }

        let auto_reject = autosign == AutosignDecision::ForceReject;
        let auto_sign = autosign == AutosignDecision::ForceAccept || self.auto_accept;

        match self.keystore.status(id) {
            MinionStatus::Rejected => AuthOutcome { success: false, act: Some(AuthAct::Reject) },

            MinionStatus::Accepted => {
                let stored = self.keystore.load_pub(id, KeyDir::Accepted).ok().flatten();
                if stored.as_deref() == Some(presented_pub) {
                    AuthOutcome { success: true, act: Some(AuthAct::Accept) }
                } else {
                    let _ = self.keystore.archive_denied(id, presented_pub);
                    AuthOutcome { success: false, act: Some(AuthAct::Denied) }
                }
            }

            MinionStatus::Absent => {
                if auto_reject {
                    let _ = self.keystore.store_pub(id, KeyDir::Rejected, presented_pub);
                    AuthOutcome { success: false, act: Some(AuthAct::Reject) }
                } else if auto_sign {
                    let _ = self.keystore.store_pub(id, KeyDir::Accepted, presented_pub);
                    AuthOutcome { success: true, act: Some(AuthAct::Accept) }
                } else {
                    let _ = self.keystore.store_pub(id, KeyDir::Pending, presented_pub);
                    AuthOutcome { success: true, act: Some(AuthAct::Pend) }
                }
            }

            MinionStatus::Pending => {
                if auto_reject {
                    let _ = self.keystore.move_key(id, KeyDir::Pending, KeyDir::Rejected);
                    return AuthOutcome { success: false, act: Some(AuthAct::Reject) };
                }
                let stored = self.keystore.load_pub(id, KeyDir::Pending).ok().flatten();
                let matches = stored.as_deref() == Some(presented_pub);

                if auto_sign {
                    if matches {
                        let _ = self.keystore.move_key(id, KeyDir::Pending, KeyDir::Accepted);
                        AuthOutcome { success: true, act: Some(AuthAct::Accept) }
                    } else {
                        let _ = self.keystore.archive_denied(id, presented_pub);
                        AuthOutcome { success: false, act: Some(AuthAct::Denied) }
                    }
                } else if matches {
                    AuthOutcome { success: true, act: Some(AuthAct::Pend) }
                } else {
                    let _ = self.keystore.archive_denied(id, presented_pub);
                    AuthOutcome { success: false, act: Some(AuthAct::Denied) }
                }
            }
        }
    }

    fn build_accept_reply(&self, load: &AuthLoad) -> Result<Value> {
        let minion_pub = crypto::load_public_key_pem(&load.pub_key)?;
        let secret = self.vault.snapshot();

        let decrypted_token = match &load.token {
            Some(token_b64) => {
                let ct = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, token_b64)
                    .map_err(|e| CoreError::Decode(format!("bad token base64: {e}")))?;
                Some(crypto::oaep_unwrap(&self.master_keys.signing_private_key, &ct)?)
            }
            None => None,
        };

        let (aes_wrapped, reply_token) = match (&decrypted_token, self.auth_mode >= 2) {
            (Some(token), true) => {
                let mut combined = secret.aes.as_ref().clone();
                combined.extend_from_slice(token);
                (crypto::oaep_wrap(&minion_pub, &combined)?, None)
            }
            (Some(token), false) => {
                let wrapped_secret = crypto::oaep_wrap(&minion_pub, &secret.aes)?;
                let rewrapped_token = crypto::oaep_wrap(&minion_pub, token)?;
                (wrapped_secret, Some(base64_encode(&rewrapped_token)))
            }
            (None, _) => (crypto::oaep_wrap(&minion_pub, &secret.aes)?, None),
        };

        let sig = crypto::sign_message(&self.master_keys.signing_private_key, &aes_wrapped)?;

        let mut reply = json!({
            "enc": "pub",
            "pub_key": self.master_keys.signing_public_key_pem,
            "aes": base64_encode(&aes_wrapped),
            "sig": base64_encode(&sig),
            "nonce": load.nonce,
        });
        if let Some(tok) = reply_token {
            reply["token"] = Value::String(tok);
        }
        if let Some(pubkey_sig) = &self.master_keys.pubkey_signature {
            reply["pub_sig"] = Value::String(base64_encode(pubkey_sig));
        }
        Ok(reply)
    }

    /// A bare `"bad load"` reply used for the downgrade defense (spec §7:
    /// a replay/downgrade must never trigger a successful operation, not
    /// even the signed-failure path).
    fn bad_load_reply(&self, _version: u32) -> Value {
        json!("bad load")
    }

    /// `{enc: "clear", load: {...}}`, signed for v>=2 so a minion can
    /// distinguish genuine rejections from spoofed ones (spec §4.4).
    fn failure_reply(&self, version: u32, ret: &str) -> Value {
        let ret_value = if ret == "full" {
            Value::String("full".into())
        } else {
            Value::Bool(false)
        };
        if version >= 2 {
            let load = json!({ "ret": ret_value });
            let payload = serde_json::to_vec(&load).unwrap_or_default();
            let sig = crypto::sign_message(&self.master_keys.signing_private_key, &payload)
                .map(|s| base64_encode(&s))
                .unwrap_or_default();
            json!({ "enc": "clear", "load": load, "sig": sig })
        } else {
            json!({ "enc": "clear", "load": { "ret": ret_value } })
        }
    }

    fn pending_reply(&self, version: u32) -> Value {
        if version >= 2 {
            let load = json!({ "ret": true });
            let payload = serde_json::to_vec(&load).unwrap_or_default();
            let sig = crypto::sign_message(&self.master_keys.signing_private_key, &payload)
                .map(|s| base64_encode(&s))
                .unwrap_or_default();
            json!({ "enc": "clear", "load": load, "sig": sig })
        } else {
            json!({ "enc": "clear", "load": { "ret": true } })
        }
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
}
