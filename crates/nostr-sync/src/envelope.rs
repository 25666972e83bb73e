// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Multi-recipient envelope
//!
//! The payload is encrypted once with a fresh AES-256-GCM key. That key, as 64 hex chars, is
//! then encrypted for every recipient with the signer ([`KeyWrap`]). The author is always a
//! recipient, so it can read its own payloads back.
//!
//! ```json
//! {
//!     "version": "nip-44-per-message-v1",
//!     "keys": [{ "to": "<pubkey hex>", "enc": "<wrapped key>" }],
//!     "pkg": { "iv": "<base64>", "ct": "<base64>" }
//! }
//! ```

use core::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use nostr::signer::{NostrSigner, SignerError};
use nostr::PublicKey;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Version of envelopes carrying messages
pub const MESSAGE_VERSION: &str = "nip-44-per-message-v1";
/// Version of envelopes carrying interactions
pub const INTERACTION_VERSION: &str = "nip-44-interaction-v1";

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

/// Envelope error
#[derive(Debug, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Symmetric key is neither 64 hex chars nor 32 bytes of base64
    InvalidKey,
    /// Nonce is not 12 bytes
    InvalidNonce,
    /// Base64 decoding failed
    Base64(base64::DecodeError),
    /// Symmetric encryption failed
    Encryption,
    /// Symmetric decryption failed (wrong key or tampered payload)
    Decryption,
    /// Plaintext is not UTF-8
    Utf8,
    /// The key couldn't be wrapped for any recipient
    NoUsableRecipient,
}

impl std::error::Error for EnvelopeError {}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "invalid symmetric key"),
            Self::InvalidNonce => write!(f, "invalid nonce"),
            Self::Base64(e) => write!(f, "{e}"),
            Self::Encryption => write!(f, "encryption failed"),
            Self::Decryption => write!(f, "decryption failed"),
            Self::Utf8 => write!(f, "plaintext is not valid UTF-8"),
            Self::NoUsableRecipient => write!(f, "key wrapping failed for every recipient"),
        }
    }
}

impl From<base64::DecodeError> for EnvelopeError {
    fn from(e: base64::DecodeError) -> Self {
        Self::Base64(e)
    }
}

/// How the symmetric key is encrypted for each recipient
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum KeyWrap {
    /// NIP04
    #[default]
    Nip04,
    /// NIP44
    Nip44,
}

impl KeyWrap {
    async fn encrypt(
        &self,
        signer: &dyn NostrSigner,
        recipient: &PublicKey,
        key: &str,
    ) -> Result<String, SignerError> {
        match self {
            Self::Nip04 => signer.nip04_encrypt(recipient, key).await,
            Self::Nip44 => signer.nip44_encrypt(recipient, key).await,
        }
    }

    async fn decrypt(
        &self,
        signer: &dyn NostrSigner,
        sender: &PublicKey,
        enc: &str,
    ) -> Result<String, SignerError> {
        match self {
            Self::Nip04 => signer.nip04_decrypt(sender, enc).await,
            Self::Nip44 => signer.nip44_decrypt(sender, enc).await,
        }
    }
}

/// Symmetric key encrypted for one recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientKey {
    /// Recipient public key (hex)
    pub to: String,
    /// Wrapped key. Empty if wrapping failed for this recipient.
    pub enc: String,
}

/// Symmetrically encrypted payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPackage {
    /// Nonce (base64)
    pub iv: String,
    /// Ciphertext with tag (base64)
    #[serde(alias = "ciphertext")]
    pub ct: String,
}

/// Multi-recipient envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Version
    pub version: String,
    /// One entry per recipient
    pub keys: Vec<RecipientKey>,
    /// Encrypted payload
    pub pkg: SealedPackage,
}

impl Envelope {
    /// Encrypt `plaintext` for `recipients` and the signer itself
    ///
    /// A recipient whose key wrapping fails gets an empty entry and the envelope is still built
    /// for the others. Fails if no recipient at all can be served.
    pub async fn seal<S>(
        signer: &dyn NostrSigner,
        version: S,
        recipients: &[PublicKey],
        plaintext: &str,
        wrap: KeyWrap,
    ) -> Result<Self, Error>
    where
        S: Into<String>,
    {
        if recipients.is_empty() {
            return Err(Error::EmptyRecipients);
        }

        let author: PublicKey = signer.get_public_key().await?;

        let mut targets: Vec<PublicKey> = Vec::with_capacity(recipients.len() + 1);
        for recipient in recipients.iter().chain([&author]) {
            if !targets.contains(recipient) {
                targets.push(*recipient);
            }
        }

        // Fresh key for every payload
        let sym_key = Aes256Gcm::generate_key(OsRng);
        let sym_hex: String = hex::encode(sym_key);
        let pkg: SealedPackage = seal_package(sym_key.as_slice(), plaintext)?;

        let mut keys: Vec<RecipientKey> = Vec::with_capacity(targets.len());

        for recipient in targets.iter() {
            let enc: String = match wrap.encrypt(signer, recipient, &sym_hex).await {
                Ok(enc) => enc,
                Err(e) => {
                    tracing::warn!(recipient = %recipient, error = %e, "Can't wrap envelope key.");
                    String::new()
                }
            };

            keys.push(RecipientKey {
                to: recipient.to_hex(),
                enc,
            });
        }

        if keys.iter().all(|k| k.enc.is_empty()) {
            return Err(EnvelopeError::NoUsableRecipient.into());
        }

        Ok(Self {
            version: version.into(),
            keys,
            pkg,
        })
    }

    /// Decrypt the payload with the signer key
    ///
    /// `sender` is the author of the envelope (the event author).
    pub async fn open(
        &self,
        signer: &dyn NostrSigner,
        sender: &PublicKey,
        wrap: KeyWrap,
    ) -> Result<String, Error> {
        let me: PublicKey = signer.get_public_key().await?;
        let entry: &RecipientKey = self.entry(&me).ok_or(Error::NotARecipient)?;

        if entry.enc.is_empty() {
            return Err(Error::NotARecipient);
        }

        let sym: String = match wrap.decrypt(signer, sender, &entry.enc).await {
            Ok(sym) => sym,
            // Some signers hand back the raw key
            Err(e) if is_raw_key(&entry.enc) => {
                tracing::warn!(error = %e, "Can't unwrap envelope key, using it verbatim.");
                entry.enc.clone()
            }
            Err(e) => return Err(e.into()),
        };

        let key: [u8; KEY_SIZE] = normalize_sym_key(&sym)?;

        Ok(open_package(&key, &self.pkg)?)
    }

    /// Entry addressed to `public_key`
    pub fn entry(&self, public_key: &PublicKey) -> Option<&RecipientKey> {
        let hex: String = public_key.to_hex();
        self.keys.iter().find(|k| k.to.eq_ignore_ascii_case(&hex))
    }

    /// Check if `public_key` has a usable entry
    #[inline]
    pub fn is_recipient(&self, public_key: &PublicKey) -> bool {
        self.entry(public_key).is_some_and(|k| !k.enc.is_empty())
    }

    /// Deserialize from JSON
    #[inline]
    pub fn from_json<T>(json: T) -> Result<Self, Error>
    where
        T: AsRef<[u8]>,
    {
        Ok(serde_json::from_slice(json.as_ref())?)
    }

    /// Serialize as JSON
    #[inline]
    pub fn as_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

fn is_raw_key(value: &str) -> bool {
    value.len() == KEY_SIZE * 2 && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Accept a 64 hex chars key or a 32 bytes base64 key
fn normalize_sym_key(key: &str) -> Result<[u8; KEY_SIZE], EnvelopeError> {
    let key: &str = key.trim();
    let mut out = [0u8; KEY_SIZE];

    if is_raw_key(key) {
        hex::decode_to_slice(key, &mut out).map_err(|_| EnvelopeError::InvalidKey)?;
        return Ok(out);
    }

    if (40..=48).contains(&key.len()) {
        if let Ok(bytes) = BASE64.decode(key) {
            if bytes.len() == KEY_SIZE {
                out.copy_from_slice(&bytes);
                return Ok(out);
            }
        }
    }

    Err(EnvelopeError::InvalidKey)
}

fn seal_package(key: &[u8], plaintext: &str) -> Result<SealedPackage, EnvelopeError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EnvelopeError::InvalidKey)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ct: Vec<u8> = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| EnvelopeError::Encryption)?;

    Ok(SealedPackage {
        iv: BASE64.encode(nonce),
        ct: BASE64.encode(ct),
    })
}

fn open_package(key: &[u8], pkg: &SealedPackage) -> Result<String, EnvelopeError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EnvelopeError::InvalidKey)?;

    let iv: Vec<u8> = BASE64.decode(&pkg.iv)?;
    if iv.len() != NONCE_SIZE {
        return Err(EnvelopeError::InvalidNonce);
    }

    let ct: Vec<u8> = BASE64.decode(&pkg.ct)?;

    let plaintext: Vec<u8> = cipher
        .decrypt(Nonce::from_slice(&iv), ct.as_ref())
        .map_err(|_| EnvelopeError::Decryption)?;

    String::from_utf8(plaintext).map_err(|_| EnvelopeError::Utf8)
}
