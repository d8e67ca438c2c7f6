use std::num::NonZeroU32;

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};

use crate::{se, Result};

const PBKDF2_ITERATIONS: u32 = 10_000;
const SALT_LEN: usize = 16;
const STATE_TOKEN_LEN: usize = 32;

/// Encrypted value, all fields hex encoded
#[derive(Debug, Clone, PartialEq)]
pub struct Enc {
    pub value: String,
    pub salt: String,
    pub nonce: String,
}

pub fn rand_bytes(n: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0; n];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| se!("error generating {} random bytes", n))?;
    Ok(buf)
}

/// A url-safe oauth `state` value carrying 256 bits of randomness
pub fn new_state_token() -> Result<String> {
    let b = rand_bytes(STATE_TOKEN_LEN)?;
    Ok(base64::encode_config(&b, base64::URL_SAFE_NO_PAD))
}

fn derive_key(secret: &str, salt: &[u8]) -> Result<LessSafeKey> {
    let iterations =
        NonZeroU32::new(PBKDF2_ITERATIONS).ok_or_else(|| se!("invalid pbkdf2 iterations"))?;
    let mut key = [0; 32];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        secret.as_bytes(),
        &mut key,
    );
    let key = UnboundKey::new(&AES_256_GCM, &key).map_err(|_| se!("invalid encryption key"))?;
    Ok(LessSafeKey::new(key))
}

pub fn encrypt(secret: &str, s: &str) -> Result<Enc> {
    let salt = rand_bytes(SALT_LEN)?;
    let nonce_bytes = rand_bytes(NONCE_LEN)?;
    let key = derive_key(secret, &salt)?;
    let nonce = Nonce::try_assume_unique_for_key(&nonce_bytes).map_err(|_| se!("invalid nonce"))?;
    let mut in_out = s.as_bytes().to_vec();
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| se!("encryption error"))?;
    Ok(Enc {
        value: hex::encode(&in_out),
        salt: hex::encode(&salt),
        nonce: hex::encode(&nonce_bytes),
    })
}

pub fn decrypt(secret: &str, enc: &Enc) -> Result<String> {
    let salt = hex::decode(&enc.salt).map_err(|e| se!("salt hex error {}", e))?;
    let nonce_bytes = hex::decode(&enc.nonce).map_err(|e| se!("nonce hex error {}", e))?;
    let mut in_out = hex::decode(&enc.value).map_err(|e| se!("value hex error {}", e))?;
    let key = derive_key(secret, &salt)?;
    let nonce = Nonce::try_assume_unique_for_key(&nonce_bytes).map_err(|_| se!("invalid nonce"))?;
    let plain = key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| se!("decryption error"))?;
    Ok(String::from_utf8(plain.to_vec()).map_err(|e| se!("decrypted utf8 error {}", e))?)
}
