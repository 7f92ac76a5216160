//! The Crypticle: the AES-CBC + HMAC container format used for every
//! payload encrypted under the cluster secret or a per-minion session key
//! (spec §4.1, §GLOSSARY).

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::{CoreError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

const IV_LEN: usize = 16;
const MAC_LEN: usize = 32;

/// Fresh random bytes used to seed a [`Crypticle`] / the cluster secret.
/// Length is 32 bytes; both subkeys are derived from it with HKDF, so the
/// seed itself is never used directly as an AES or HMAC key.
pub fn generate_key_string() -> Vec<u8> {
    let mut seed = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed);
    seed
}

/// Derives a per-minion session key from the cluster secret and minion id
/// (spec §3 SessionKey): `HKDF-SHA256(cluster_secret, info = minion_id)`.
/// Both sides compute this independently; it is never transmitted.
pub fn derive_session_key(cluster_secret: &[u8], minion_id: &str) -> Vec<u8> {
    let hk = Hkdf::<Sha256>::new(None, cluster_secret);
    let mut out = vec![0u8; 32];
    hk.expand(minion_id.as_bytes(), &mut out)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    out
}

pub struct Crypticle {
    aes_key: [u8; 32],
    hmac_key: [u8; 32],
}

impl Crypticle {
    pub fn new(secret: &[u8]) -> Self {
        let hk = Hkdf::<Sha256>::new(None, secret);
        let mut aes_key = [0u8; 32];
        let mut hmac_key = [0u8; 32];
        hk.expand(b"salt-crypticle-aes-key", &mut aes_key)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        hk.expand(b"salt-crypticle-hmac-key", &mut hmac_key)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        Crypticle { aes_key, hmac_key }
    }

    /// Serializes `obj`, optionally binding `nonce` into the plaintext,
    /// encrypts with AES-256-CBC under a fresh random IV, and appends an
    /// HMAC-SHA256 over `iv || ciphertext`.
    pub fn dumps(&self, obj: &serde_json::Value, nonce: Option<&str>) -> Result<Vec<u8>> {
        let mut obj = obj.clone();
        if let Some(nonce) = nonce {
            if let serde_json::Value::Object(map) = &mut obj {
                map.insert("nonce".to_string(), serde_json::Value::String(nonce.to_string()));
            }
        }
        let plaintext = rmp_serde::to_vec_named(&obj)
            .map_err(|e| CoreError::Internal(format!("serializing payload: {e}")))?;

        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext =
            Aes256CbcEnc::new(&self.aes_key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

        let mut mac = HmacSha256::new_from_slice(&self.hmac_key)
            .expect("HMAC accepts keys of any length");
        mac.update(&iv);
        mac.update(&ciphertext);
        let tag = mac.finalize().into_bytes();

        let mut out = Vec::with_capacity(IV_LEN + ciphertext.len() + MAC_LEN);
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        out.extend_from_slice(&tag);
        Ok(out)
    }

    /// Verifies the HMAC in constant time, decrypts, and deserializes.
    /// Fails with [`CoreError::Authentication`] on any HMAC mismatch —
    /// never distinguishing "bad key" from "corrupt ciphertext" to an
    /// attacker.
    pub fn loads(&self, blob: &[u8]) -> Result<serde_json::Value> {
        if blob.len() < IV_LEN + MAC_LEN {
            return Err(CoreError::Authentication("ciphertext too short".into()));
        }
        let (iv_and_ct, tag) = blob.split_at(blob.len() - MAC_LEN);
        let (iv, ciphertext) = iv_and_ct.split_at(IV_LEN);

        let mut mac = HmacSha256::new_from_slice(&self.hmac_key)
            .expect("HMAC accepts keys of any length");
        mac.update(iv);
        mac.update(ciphertext);
        mac.verify_slice(tag)
            .map_err(|_| CoreError::Authentication("HMAC verification failed".into()))?;

        let plaintext = Aes256CbcDec::new(&self.aes_key.into(), iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|e| CoreError::Authentication(format!("AES decryption failed: {e}")))?;

        rmp_serde::from_slice(&plaintext)
            .map_err(|e| CoreError::Decode(format!("deserializing payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips() {
        let secret = generate_key_string();
        let c = Crypticle::new(&secret);
        let obj = json!({"cmd": "test.ping", "id": "minion-1"});
        let blob = c.dumps(&obj, None).unwrap();
        let back = c.loads(&blob).unwrap();
        assert_eq!(back, obj);
    }

    #[test]
    fn nonce_is_bound_into_plaintext() {
        let secret = generate_key_string();
        let c = Crypticle::new(&secret);
        let obj = json!({"ret": true});
        let blob = c.dumps(&obj, Some("abc123")).unwrap();
        let back = c.loads(&blob).unwrap();
        assert_eq!(back["nonce"], "abc123");
    }

    #[test]
    fn single_bit_tamper_is_rejected() {
        let secret = generate_key_string();
        let c = Crypticle::new(&secret);
        let mut blob = c.dumps(&json!({"a": 1}), None).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(c.loads(&blob).is_err());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let c1 = Crypticle::new(&generate_key_string());
        let c2 = Crypticle::new(&generate_key_string());
        let blob = c1.dumps(&json!({"a": 1}), None).unwrap();
        assert!(c2.loads(&blob).is_err());
    }

    #[test]
    fn session_key_derivation_is_deterministic_and_id_bound() {
        let secret = generate_key_string();
        let k1 = derive_session_key(&secret, "minion-a");
        let k2 = derive_session_key(&secret, "minion-a");
        let k3 = derive_session_key(&secret, "minion-b");
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
    }
}
