//! Crypto primitives (spec §4.1, C1): RSA key-pair handling, OAEP wrap,
//! PKCS#1 v1.5 signing, and the Crypticle symmetric container.

mod crypticle;
mod keys;

pub use crypticle::{derive_session_key, generate_key_string, Crypticle};
pub use keys::{
    generate_keypair, load_private_key_pem, load_public_key_pem, oaep_unwrap, oaep_wrap,
    private_key_to_pem, public_key_to_pem, sign_message, verify_message, DEFAULT_KEY_BITS,
};
