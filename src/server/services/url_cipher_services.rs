use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::{Key, Nonce, XSalsa20Poly1305};
use rand::RngCore;
use tracing::warn;

use crate::config::CargoEnv;
use crate::server::error::{AppResult, Error};

const NONCE_LEN: usize = 24;

// fixed salt is fine here: the key only ever protects urls we minted ourselves,
// there is no password database to rainbow-table
const KEY_SALT: &[u8] = b"relay-url-cipher-v1";

/// reversible masking of upstream urls. A token is hex(nonce) || hex(ciphertext)
/// with authenticated encryption underneath, so tampered or truncated tokens
/// fail closed instead of decrypting to garbage. Tokens are stateless - their
/// lifetime is however long the embedded upstream url stays valid.
pub struct UrlCipher {
    cipher: XSalsa20Poly1305,
}

impl UrlCipher {
    /// derives the process-lifetime key from the configured secret. Without a
    /// secret, production refuses to start; development gets an ephemeral random
    /// key, which means every previously issued token dies on restart.
    pub fn from_secret(secret: Option<&str>, cargo_env: CargoEnv) -> anyhow::Result<Self> {
        let key_bytes: Vec<u8> = match secret {
            Some(secret) if !secret.is_empty() => {
                argon2::hash_raw(secret.as_bytes(), KEY_SALT, &argon2::Config::default())
                    .map_err(|e| anyhow::anyhow!("key derivation failed: {e}"))?
            }
            _ => match cargo_env {
                CargoEnv::Production => {
                    anyhow::bail!("ENCRYPTION_KEY must be configured in production")
                }
                CargoEnv::Development => {
                    warn!(
                        "no ENCRYPTION_KEY configured - using an ephemeral key, all stream tokens become invalid on restart"
                    );
                    let mut key = vec![0u8; 32];
                    rand::rng().fill_bytes(&mut key);
                    key
                }
            },
        };

        Ok(Self {
            cipher: XSalsa20Poly1305::new(Key::from_slice(&key_bytes)),
        })
    }

    /// encrypts an upstream url into an opaque hex token. Nonce is random per
    /// call, two encryptions of the same url won't match
    pub fn encrypt_url(&self, url: &str) -> String {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, url.as_bytes())
            .expect("secretbox encryption is infallible for in-memory buffers");

        format!("{}{}", hex::encode(nonce_bytes), hex::encode(ciphertext))
    }

    /// recovers the upstream url from a token. Every malformed-input shape
    /// (non-hex, too short, bad auth tag, non-utf8 plaintext) is the same
    /// InvalidToken error - callers never see a partial decode
    pub fn decrypt_token(&self, token: &str) -> AppResult<String> {
        let bytes = hex::decode(token.trim()).map_err(|_| Error::InvalidToken)?;

        if bytes.len() <= NONCE_LEN {
            return Err(Error::InvalidToken);
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::InvalidToken)?;

        String::from_utf8(plaintext).map_err(|_| Error::InvalidToken)
    }
}
