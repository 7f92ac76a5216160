//! Shared test fixtures: a fully-wired [`salt_master_core::Master`] plus
//! frame-building helpers that speak the wire protocol directly, standing
//! in for a real minion client (spec §6 wire protocol, §8 scenarios).

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};

use salt_master_core::auth::MasterKeys;
use salt_master_core::config::MasterConfig;
use salt_master_core::crypto::{self, Crypticle};
use salt_master_core::events::ChannelEventSink;
use salt_master_core::publisher::RecordingTransport;
use salt_master_core::vault::SecretVault;
use salt_master_core::wire::{EncMode, Envelope, EnvelopeLoad};
use salt_master_core::worker::{CommandRegistry, PingHandler};
use salt_master_core::Master;

/// A running master plus the tempdir backing its key store and the
/// in-memory doubles for its event sink and publish transport, all kept
/// alive for the scenario's duration.
pub struct Fixture {
    pub master: Master,
    pub sink: Arc<ChannelEventSink>,
    pub transport: Arc<RecordingTransport>,
    _dir: tempfile::TempDir,
}

/// Builds a fixture with `worker_threads: 1` and every other
/// [`MasterConfig`] field at its default. Callers that need a non-default
/// config should call [`fixture_with`] directly.
pub fn fixture() -> Fixture {
    fixture_with(|_| {})
}

pub fn fixture_with(configure: impl FnOnce(&mut MasterConfig)) -> Fixture {
    let dir = tempfile::tempdir().expect("creating tempdir");
    let mut config = MasterConfig { pki_dir: dir.path().to_path_buf(), worker_threads: Some(1), ..Default::default() };
    configure(&mut config);

    let (priv_key, pub_key) = crypto::generate_keypair().expect("generating master key pair");
    let master_keys = MasterKeys::new(priv_key, pub_key, None).expect("building master keys");

    let registry = CommandRegistry::new().register("test.ping", Arc::new(PingHandler));
    let transport = Arc::new(RecordingTransport::new(true));
    let sink = Arc::new(ChannelEventSink::new());

    let master = Master::build(config, master_keys, registry, transport.clone(), sink.clone())
        .expect("building master component graph");

    Fixture { master, sink, transport, _dir: dir }
}

/// A minion's own RSA identity, as presented in an `_auth` handshake.
pub struct MinionIdentity {
    pub private_key: rsa::RsaPrivateKey,
    pub public_key_pem: String,
}

pub fn minion() -> MinionIdentity {
    let (private_key, public_key) = crypto::generate_keypair().expect("generating minion key pair");
    let public_key_pem = crypto::public_key_to_pem(&public_key).expect("encoding minion public key");
    MinionIdentity { private_key, public_key_pem }
}

/// Builds a clear-channel `_auth` handshake frame (spec §3, §6).
pub fn auth_frame(id: &str, minion: &MinionIdentity, version: u32) -> Vec<u8> {
    let load = json!({
        "cmd": "_auth",
        "id": id,
        "pub": minion.public_key_pem,
        "version": version,
    });
    Envelope { enc: EncMode::Clear, version, id: None, load: EnvelopeLoad::Clear(load) }
        .encode()
        .expect("encoding auth envelope")
}

/// Builds an AES-encrypted request frame. `ts` is the request's claimed
/// unix timestamp; callers pass a stale value to exercise the TTL gate.
/// `tok` is the already-base64-encoded signature over
/// `salt_master_core::wire::TOKEN_SENTINEL`, or `None` to omit it.
#[allow(clippy::too_many_arguments)]
pub fn request_frame(
    vault: &SecretVault,
    version: u32,
    id: &str,
    cmd: &str,
    ts: i64,
    tok: Option<String>,
    extra: Value,
) -> Vec<u8> {
    let secret = vault.snapshot();
    let key = if version >= 3 { crypto::derive_session_key(&secret.aes, id) } else { secret.aes.as_ref().clone() };

    let mut load = json!({ "cmd": cmd, "id": id, "ts": ts });
    if let Some(tok) = tok {
        load["tok"] = Value::String(tok);
    }
    if let Value::Object(extra) = extra {
        if let Value::Object(map) = &mut load {
            map.extend(extra);
        }
    }

    let ciphertext = Crypticle::new(&key).dumps(&load, None).expect("encrypting request load");
    let outer_id = if version >= 3 { Some(id.to_string()) } else { None };
    Envelope { enc: EncMode::Aes, version, id: outer_id, load: EnvelopeLoad::Cipher(ciphertext) }
        .encode()
        .expect("encoding request envelope")
}

/// Signs [`salt_master_core::wire::TOKEN_SENTINEL`] with a minion's
/// private key and base64-encodes it, the form carried as `tok` on a
/// v3+ request (spec §4.5 step 5).
pub fn token_for(minion: &MinionIdentity) -> String {
    let sig = crypto::sign_message(&minion.private_key, salt_master_core::wire::TOKEN_SENTINEL)
        .expect("signing token sentinel");
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, sig)
}

/// Decodes a reply frame back into a `Value` for assertions. Replies on
/// the clear channel are already plain msgpack; AES replies must be
/// decrypted by the caller first.
pub fn decode_reply(bytes: &[u8]) -> Value {
    rmp_serde::from_slice(bytes).expect("decoding reply frame")
}
