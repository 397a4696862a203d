#![forbid(unsafe_code)]

//! Key derivation from authenticator output and AES-256-GCM sealing of form
//! configurations. Every failure to authenticate is a hard error; there is no
//! fallback key.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use formseal_contracts::form_config::{
    decode_b64url, encode_b64url, ConfigMetadata, EncryptedFormConfig, EncryptedFormData,
    KeyDerivationParams, SecurityEnvelope, AUTH_TAG_LEN, ENCRYPTION_METHOD_AES_256_GCM, IV_LEN,
};
use formseal_contracts::form_payload::DecryptedFormPayload;
use formseal_contracts::processor_wire::KeyMaterial;
use formseal_contracts::{ContractViolation, Validate};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

pub const KEY_LEN: usize = 32;
pub const PBKDF2_ITERATIONS: u32 = 100_000;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("authenticated decryption failed")]
    AuthenticationFailed,
    #[error("malformed encrypted envelope: {0}")]
    MalformedEnvelope(ContractViolation),
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("authenticator assertion bytes are missing")]
    MissingAssertion,
    #[error("key derivation salt is empty")]
    EmptySalt,
    #[error("key derivation iterations {got} below minimum {min}")]
    WeakKeyDerivation { got: u32, min: u32 },
    #[error("key material is not valid base64url")]
    KeyEncoding,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CryptoError {
    /// Errors a caller sees as a decryption failure rather than a usage error.
    pub fn is_decryption_failure(&self) -> bool {
        !matches!(self, Self::EncryptionFailed | Self::Serialization(_))
    }
}

/// 256-bit AES key. Zeroed on drop; never printed.
#[derive(Clone)]
pub struct SymmetricKey(Zeroizing<[u8; KEY_LEN]>);

impl SymmetricKey {
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut bytes[..]);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: bytes.len(),
            });
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_b64url(&self) -> String {
        encode_b64url(self.as_bytes())
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_slice().ct_eq(other.0.as_slice()).into()
    }
}

impl Eq for SymmetricKey {}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

/// Output of a successful platform-authenticator ceremony.
#[derive(Clone, Copy)]
pub struct AssertionInput<'a> {
    pub authenticator_data: &'a [u8],
    pub client_data_hash: &'a [u8],
}

/// Derives with the default parameters: salt is the UTF-8 context id,
/// 100 000 iterations.
pub fn derive_key(
    assertion: AssertionInput<'_>,
    context_id: &str,
) -> Result<SymmetricKey, CryptoError> {
    derive_key_with(assertion, context_id.as_bytes(), PBKDF2_ITERATIONS)
}

/// PBKDF2-HMAC-SHA256 over `authenticator_data || client_data_hash`.
/// Deterministic for identical inputs.
pub fn derive_key_with(
    assertion: AssertionInput<'_>,
    salt: &[u8],
    iterations: u32,
) -> Result<SymmetricKey, CryptoError> {
    if assertion.authenticator_data.is_empty() || assertion.client_data_hash.is_empty() {
        return Err(CryptoError::MissingAssertion);
    }
    if salt.is_empty() {
        return Err(CryptoError::EmptySalt);
    }
    if iterations == 0 {
        return Err(CryptoError::WeakKeyDerivation { got: 0, min: 1 });
    }

    let mut material = Zeroizing::new(Vec::with_capacity(
        assertion.authenticator_data.len() + assertion.client_data_hash.len(),
    ));
    material.extend_from_slice(assertion.authenticator_data);
    material.extend_from_slice(assertion.client_data_hash);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(&material, salt, iterations, &mut key[..]);
    debug!(iterations, salt_len = salt.len(), "derived aes-256-gcm key");
    Ok(SymmetricKey(key))
}

/// Turns wire key material into a key. Assertion material honours the
/// envelope's `keyDerivation` parameters when present, never going below
/// `min_iterations`.
pub fn resolve_key(
    material: &KeyMaterial,
    params: Option<&KeyDerivationParams>,
    min_iterations: u32,
) -> Result<SymmetricKey, CryptoError> {
    match material {
        KeyMaterial::Raw(raw) => {
            let bytes =
                Zeroizing::new(decode_b64url(&raw.raw_key).map_err(|_| CryptoError::KeyEncoding)?);
            SymmetricKey::from_slice(&bytes)
        }
        KeyMaterial::Assertion(material) => {
            let authenticator_data = Zeroizing::new(
                decode_b64url(&material.assertion.authenticator_data)
                    .map_err(|_| CryptoError::KeyEncoding)?,
            );
            let client_data_hash = Zeroizing::new(
                decode_b64url(&material.assertion.client_data_hash)
                    .map_err(|_| CryptoError::KeyEncoding)?,
            );
            let assertion = AssertionInput {
                authenticator_data: &authenticator_data,
                client_data_hash: &client_data_hash,
            };
            match params {
                Some(params) => {
                    params.validate().map_err(CryptoError::MalformedEnvelope)?;
                    if params.iterations < min_iterations {
                        return Err(CryptoError::WeakKeyDerivation {
                            got: params.iterations,
                            min: min_iterations,
                        });
                    }
                    let salt = decode_b64url(&params.salt).map_err(|_| CryptoError::KeyEncoding)?;
                    derive_key_with(assertion, &salt, params.iterations)
                }
                None => derive_key_with(
                    assertion,
                    material.context_id.as_bytes(),
                    PBKDF2_ITERATIONS.max(min_iterations),
                ),
            }
        }
    }
}

/// Ciphertext with its IV and detached GCM tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
    pub auth_tag: [u8; AUTH_TAG_LEN],
}

/// AES-256-GCM with a fresh random 96-bit IV on every call.
pub fn encrypt(plaintext: &[u8], key: &SymmetricKey) -> Result<SealedPayload, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| {
        CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key.as_bytes().len(),
        }
    })?;
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    let mut auth_tag = [0u8; AUTH_TAG_LEN];
    auth_tag.copy_from_slice(tag.as_slice());

    debug!(ciphertext_len = buffer.len(), "aes-256-gcm seal completed");
    Ok(SealedPayload {
        ciphertext: buffer,
        iv,
        auth_tag,
    })
}

/// Fails closed: on tag mismatch no plaintext is returned and the working
/// buffer is zeroed.
pub fn decrypt(
    ciphertext: &[u8],
    key: &SymmetricKey,
    iv: &[u8; IV_LEN],
    auth_tag: &[u8; AUTH_TAG_LEN],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| {
        CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key.as_bytes().len(),
        }
    })?;
    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(iv),
            b"",
            &mut *buffer,
            GenericArray::from_slice(auth_tag.as_slice()),
        )
        .map_err(|_| CryptoError::AuthenticationFailed)?;
    debug!(plaintext_len = buffer.len(), "aes-256-gcm open completed");
    Ok(buffer)
}

pub fn encrypt_payload(
    payload: &DecryptedFormPayload,
    key: &SymmetricKey,
) -> Result<SealedPayload, CryptoError> {
    let plaintext = Zeroizing::new(serde_json::to_vec(payload)?);
    encrypt(&plaintext, key)
}

/// Authoring path: encrypts a payload into a complete at-rest config.
pub fn seal_config(
    payload: &DecryptedFormPayload,
    key: &SymmetricKey,
    metadata: ConfigMetadata,
    key_derivation: Option<KeyDerivationParams>,
) -> Result<EncryptedFormConfig, CryptoError> {
    let sealed = encrypt_payload(payload, key)?;
    EncryptedFormConfig::v1(
        metadata,
        SecurityEnvelope {
            encryption_method: ENCRYPTION_METHOD_AES_256_GCM.to_string(),
            iv: encode_b64url(&sealed.iv),
            auth_tag: encode_b64url(&sealed.auth_tag),
            key_derivation,
        },
        EncryptedFormData {
            encrypted_data: encode_b64url(&sealed.ciphertext),
        },
    )
    .map_err(CryptoError::MalformedEnvelope)
}

/// Checks the envelope, then decrypts. The plaintext is untrusted until it
/// passes the config validator.
pub fn open_config(
    config: &EncryptedFormConfig,
    key: &SymmetricKey,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    config.validate().map_err(CryptoError::MalformedEnvelope)?;
    let iv = config
        .security
        .iv_bytes()
        .map_err(CryptoError::MalformedEnvelope)?;
    let auth_tag = config
        .security
        .auth_tag_bytes()
        .map_err(CryptoError::MalformedEnvelope)?;
    let ciphertext = config
        .form_data
        .ciphertext_bytes()
        .map_err(CryptoError::MalformedEnvelope)?;
    decrypt(&ciphertext, key, &iv, &auth_tag)
}

/// Overwrites a buffer with zero bytes.
pub fn wipe(buffer: &mut [u8]) {
    buffer.zeroize();
}

#[cfg(test)]
mod tests {
    use super::*;
    use formseal_contracts::form_config::KEY_DERIVATION_PBKDF2;
    use formseal_contracts::form_payload::{
        Field, FieldType, FieldValue, FormOptions, MatchRules,
    };
    use formseal_contracts::processor_wire::{
        AssertionBytes, AssertionKeyMaterial, RawKeyMaterial,
    };

    const AUTH_DATA: &[u8] = b"authenticator-data-0001";
    const CLIENT_HASH: &[u8] = b"client-data-hash-0001";

    fn assertion() -> AssertionInput<'static> {
        AssertionInput {
            authenticator_data: AUTH_DATA,
            client_data_hash: CLIENT_HASH,
        }
    }

    fn sample_payload() -> DecryptedFormPayload {
        DecryptedFormPayload::v1(
            vec![Field::v1(
                "symptoms".to_string(),
                FieldValue::Text("persistent cough".to_string()),
                FieldType::Textarea,
                MatchRules::with_labels(&["Symptoms"]),
            )
            .unwrap()],
            FormOptions::default(),
            Vec::new(),
        )
        .unwrap()
    }

    #[test]
    fn at_crypto_01_derivation_is_deterministic_and_salt_bound() {
        let a = derive_key_with(assertion(), b"user-1", 1_000).unwrap();
        let b = derive_key_with(assertion(), b"user-1", 1_000).unwrap();
        let c = derive_key_with(assertion(), b"user-2", 1_000).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn at_crypto_02_missing_assertion_hard_fails() {
        let empty = AssertionInput {
            authenticator_data: b"",
            client_data_hash: CLIENT_HASH,
        };
        assert!(matches!(
            derive_key(empty, "user-1"),
            Err(CryptoError::MissingAssertion)
        ));
        assert!(matches!(
            derive_key_with(assertion(), b"", 10),
            Err(CryptoError::EmptySalt)
        ));
    }

    #[test]
    fn at_crypto_03_encrypt_decrypt_roundtrip() {
        let key = SymmetricKey::generate();
        let sealed = encrypt(br#"{"a":1}"#, &key).unwrap();
        assert_eq!(sealed.ciphertext.len(), 7);
        let opened = decrypt(&sealed.ciphertext, &key, &sealed.iv, &sealed.auth_tag).unwrap();
        assert_eq!(opened.as_slice(), br#"{"a":1}"#);
    }

    #[test]
    fn at_crypto_04_fresh_iv_per_call() {
        let key = SymmetricKey::generate();
        let one = encrypt(b"same", &key).unwrap();
        let two = encrypt(b"same", &key).unwrap();
        assert_ne!(one.iv, two.iv);
        assert_ne!(one.ciphertext, two.ciphertext);
    }

    #[test]
    fn at_crypto_05_wrong_key_is_decryption_error() {
        let sealed = encrypt(br#"{"a":1}"#, &SymmetricKey::generate()).unwrap();
        let out = decrypt(
            &sealed.ciphertext,
            &SymmetricKey::generate(),
            &sealed.iv,
            &sealed.auth_tag,
        );
        assert!(matches!(out, Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn at_crypto_06_tampered_tag_or_iv_fails_closed() {
        let key = SymmetricKey::generate();
        let sealed = encrypt(b"payload bytes", &key).unwrap();

        let mut tag = sealed.auth_tag;
        tag[0] ^= 0x01;
        assert!(decrypt(&sealed.ciphertext, &key, &sealed.iv, &tag).is_err());

        let mut iv = sealed.iv;
        iv[11] ^= 0x80;
        assert!(decrypt(&sealed.ciphertext, &key, &iv, &sealed.auth_tag).is_err());
    }

    #[test]
    fn at_crypto_07_seal_and_open_config() {
        let key = SymmetricKey::generate();
        let config = seal_config(
            &sample_payload(),
            &key,
            ConfigMetadata::v1(
                "intake".to_string(),
                "Intake".to_string(),
                "2026-01-01T00:00:00Z".to_string(),
            )
            .unwrap(),
            None,
        )
        .unwrap();
        assert!(!serde_json::to_string(&config)
            .unwrap()
            .contains("persistent cough"));

        let plaintext = open_config(&config, &key).unwrap();
        let payload: DecryptedFormPayload = serde_json::from_slice(&plaintext).unwrap();
        assert_eq!(payload, sample_payload());
    }

    #[test]
    fn at_crypto_08_malformed_envelope_is_reported_before_decrypting() {
        let key = SymmetricKey::generate();
        let mut config = seal_config(
            &sample_payload(),
            &key,
            ConfigMetadata::v1("f".to_string(), "F".to_string(), "t".to_string()).unwrap(),
            None,
        )
        .unwrap();
        config.security.auth_tag = encode_b64url(&[0u8; 8]);
        let err = open_config(&config, &key).unwrap_err();
        assert!(matches!(err, CryptoError::MalformedEnvelope(_)));
        assert!(err.is_decryption_failure());
    }

    #[test]
    fn at_crypto_09_resolve_key_from_wire_material() {
        let key = SymmetricKey::generate();
        let raw = KeyMaterial::Raw(RawKeyMaterial {
            raw_key: key.to_b64url(),
        });
        assert_eq!(resolve_key(&raw, None, PBKDF2_ITERATIONS).unwrap(), key);

        let short = KeyMaterial::Raw(RawKeyMaterial {
            raw_key: encode_b64url(&[1u8; 16]),
        });
        assert!(matches!(
            resolve_key(&short, None, PBKDF2_ITERATIONS),
            Err(CryptoError::InvalidKeyLength { actual: 16, .. })
        ));

        let material = KeyMaterial::Assertion(AssertionKeyMaterial {
            assertion: AssertionBytes {
                authenticator_data: encode_b64url(AUTH_DATA),
                client_data_hash: encode_b64url(CLIENT_HASH),
            },
            context_id: "user-1".to_string(),
        });
        let params = KeyDerivationParams {
            method: KEY_DERIVATION_PBKDF2.to_string(),
            salt: encode_b64url(b"envelope-salt"),
            iterations: 2_000,
        };
        let derived = resolve_key(&material, Some(&params), 1_000).unwrap();
        assert_eq!(
            derived,
            derive_key_with(assertion(), b"envelope-salt", 2_000).unwrap()
        );
        assert!(matches!(
            resolve_key(&material, Some(&params), 5_000),
            Err(CryptoError::WeakKeyDerivation { got: 2_000, min: 5_000 })
        ));
    }

    #[test]
    fn at_crypto_10_wipe_and_debug_redaction() {
        let mut buffer = *b"sensitive";
        wipe(&mut buffer);
        assert_eq!(buffer, [0u8; 9]);
        let key = SymmetricKey::generate();
        assert_eq!(format!("{key:?}"), "SymmetricKey(<redacted>)");
    }
}
