//! RSA key-pair load/generate, OAEP key-wrap, and PKCS#1 v1.5 signing (spec §4.1, C1).
//!
//! Default key size is 4096 bits; OAEP uses SHA-1 for compatibility with
//! legacy minions unless a negotiated `enc_algo` says otherwise (spec §9
//! Open Question: for a v3+ envelope the envelope version is authoritative
//! and legacy algorithm ids are never silently honored).

use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::sha2::Sha256;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;

use crate::error::{CoreError, Result};

pub const DEFAULT_KEY_BITS: usize = 4096;

/// Generates a fresh RSA key pair at [`DEFAULT_KEY_BITS`].
pub fn generate_keypair() -> Result<(RsaPrivateKey, RsaPublicKey)> {
    let private = RsaPrivateKey::new(&mut OsRng, DEFAULT_KEY_BITS)
        .map_err(|e| CoreError::Key(format!("generating RSA key pair: {e}")))?;
    let public = RsaPublicKey::from(&private);
    Ok((private, public))
}

/// Loads a PEM-encoded RSA public key. Malformed files never crash the
/// auth path; they surface as [`CoreError::Key`].
pub fn load_public_key_pem(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_pkcs1_pem(pem)
        .or_else(|_| {
            // Some callers hand us SPKI-wrapped keys; accept both forms.
            use rsa::pkcs8::DecodePublicKey;
            RsaPublicKey::from_public_key_pem(pem)
        })
        .map_err(|e| CoreError::Key(format!("invalid public key: {e}")))
}

pub fn load_private_key_pem(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs1_pem(pem)
        .map_err(|e| CoreError::Key(format!("invalid private key: {e}")))
}

pub fn public_key_to_pem(key: &RsaPublicKey) -> Result<String> {
    key.to_pkcs1_pem(Default::default())
        .map(|s| s.to_string())
        .map_err(|e| CoreError::Key(format!("encoding public key: {e}")))
}

pub fn private_key_to_pem(key: &RsaPrivateKey) -> Result<String> {
    key.to_pkcs1_pem(Default::default())
        .map(|s| s.to_string())
        .map_err(|e| CoreError::Key(format!("encoding private key: {e}")))
}

/// RSA-OAEP(SHA-1) wrap, used for the cluster secret and per-recipient keys.
pub fn oaep_wrap(pub_key: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    pub_key
        .encrypt(&mut OsRng, Oaep::new::<Sha1>(), plaintext)
        .map_err(|e| CoreError::Authentication(format!("RSA-OAEP wrap failed: {e}")))
}

pub fn oaep_unwrap(priv_key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    priv_key
        .decrypt(Oaep::new::<Sha1>(), ciphertext)
        .map_err(|e| CoreError::Authentication(format!("RSA-OAEP unwrap failed: {e}")))
}

/// Signs `bytes` with PKCS#1 v1.5 over SHA-256, the digest used for the
/// wrapped-secret `sig` field (spec §4.4).
pub fn sign_message(priv_key: &RsaPrivateKey, bytes: &[u8]) -> Result<Vec<u8>> {
    let signing_key = SigningKey::<Sha256>::new(priv_key.clone());
    let sig = signing_key.sign_with_rng(&mut OsRng, bytes);
    Ok(sig.to_vec())
}

pub fn verify_message(pub_key: &RsaPublicKey, bytes: &[u8], sig: &[u8]) -> Result<()> {
    let verifying_key = VerifyingKey::<Sha256>::new(pub_key.clone());
    let signature = Signature::try_from(sig)
        .map_err(|e| CoreError::Authentication(format!("malformed signature: {e}")))?;
    verifying_key
        .verify(bytes, &signature)
        .map_err(|e| CoreError::Authentication(format!("signature verification failed: {e}")))
}
