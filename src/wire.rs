//! Wire protocol types (spec §6): the request envelope, the auth load and
//! reply, and the publish envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Fixed message signed by a minion's private key and carried as `tok` on
/// every v3+ request; the request-server channel verifies it against the
/// minion's accepted public key (spec §4.5 step 5, §6).
pub const TOKEN_SENTINEL: &[u8] = b"salt-token-sentinel-v1";

/// Plaintext a presence subscriber must produce, AES-wrapped under its
/// session key, to prove it holds the cluster secret for its claimed id
/// before the publisher registers it in the presence map (spec §4.9
/// presence callback, distinct from the RSA-based request `tok`).
pub const PRESENCE_SENTINEL: &str = "salt-presence-subscribe-v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncMode {
    Aes,
    Clear,
}

/// The outer request envelope (spec §3 RequestEnvelope, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub enc: EncMode,
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Ciphertext bytes when `enc == Aes`, a clear JSON mapping when
    /// `enc == Clear`.
    pub load: EnvelopeLoad,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvelopeLoad {
    Cipher(#[serde(with = "serde_bytes")] Vec<u8>),
    Clear(Value),
}

impl Envelope {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Decode(format!("malformed envelope: {e}")))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(|e| CoreError::Internal(format!("encoding envelope: {e}")))
    }

    pub fn cipher_bytes(&self) -> Result<&[u8]> {
        match &self.load {
            EnvelopeLoad::Cipher(bytes) => Ok(bytes),
            EnvelopeLoad::Clear(_) => Err(CoreError::Decode("expected an encrypted load".into())),
        }
    }

    pub fn clear_load(&self) -> Result<&Value> {
        match &self.load {
            EnvelopeLoad::Clear(v) => Ok(v),
            EnvelopeLoad::Cipher(_) => Err(CoreError::Decode("expected a clear load".into())),
        }
    }
}

/// The tagged reply-mode variant returned by a payload handler (spec §9
/// DESIGN NOTES: "represent as a tagged variant returned by the handler;
/// the channel dispatches on the tag").
#[derive(Debug, Clone)]
pub enum ReplyMode {
    /// Unencrypted reply, used only for the `_auth` exchange.
    SendClear,
    /// AES reply under the sender's session/cluster key, with the
    /// request's nonce echoed back.
    Send { nonce: Option<String> },
    /// Reply encrypted under a fresh per-recipient key, itself wrapped to
    /// the recipient's accepted RSA public key.
    SendPrivate { target: String, nonce: Option<String> },
}

/// Inner plaintext fields carried by an AES-encrypted request load
/// (spec §6). Command-specific fields live alongside these in the same
/// JSON object; this struct only pulls out the envelope-level ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestFields {
    #[serde(default)]
    pub cmd: String,
    #[serde(default)]
    pub ts: Option<i64>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub tok: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
}

impl RequestFields {
    pub fn from_value(v: &Value) -> Result<Self> {
        serde_json::from_value(v.clone()).map_err(|e| CoreError::Decode(format!("malformed load: {e}")))
    }
}

/// `AuthLoad` (spec §3): the `_auth` handshake request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthLoad {
    pub id: String,
    #[serde(rename = "pub")]
    pub pub_key: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub enc_algo: Option<String>,
    #[serde(default)]
    pub sig_algo: Option<String>,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub autosign_grains: Option<Value>,
}

impl AuthLoad {
    pub fn from_value(v: &Value) -> Result<Self> {
        serde_json::from_value(v.clone()).map_err(|e| CoreError::Decode(format!("malformed auth load: {e}")))
    }
}
