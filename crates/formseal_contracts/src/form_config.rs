#![forbid(unsafe_code)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::common::validate_required_text;
use crate::{ContractViolation, SchemaVersion, Validate};

pub const FORM_CONFIG_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);
pub const ENCRYPTION_METHOD_AES_256_GCM: &str = "AES-256-GCM";
pub const KEY_DERIVATION_PBKDF2: &str = "PBKDF2";
pub const IV_LEN: usize = 12;
pub const AUTH_TAG_LEN: usize = 16;

/// Encodes bytes with the URL-safe alphabet, without padding.
pub fn encode_b64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decodes URL-safe base64; trailing `=` padding is accepted.
pub fn decode_b64url(raw: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(raw.trim().trim_end_matches('='))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMetadata {
    pub version: String,
    pub form_id: String,
    pub form_name: String,
    pub created_at: String,
}

impl ConfigMetadata {
    pub fn v1(
        form_id: String,
        form_name: String,
        created_at: String,
    ) -> Result<Self, ContractViolation> {
        let metadata = Self {
            version: FORM_CONFIG_CONTRACT_VERSION.0.to_string(),
            form_id,
            form_name,
            created_at,
        };
        metadata.validate()?;
        Ok(metadata)
    }
}

impl Validate for ConfigMetadata {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_required_text("metadata.version", &self.version, 32)?;
        validate_required_text("metadata.form_id", &self.form_id, 256)?;
        validate_required_text("metadata.form_name", &self.form_name, 512)?;
        validate_required_text("metadata.created_at", &self.created_at, 64)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDerivationParams {
    pub method: String,
    pub salt: String,
    pub iterations: u32,
}

impl Validate for KeyDerivationParams {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.method != KEY_DERIVATION_PBKDF2 {
            return Err(ContractViolation::InvalidValue {
                field: "security.key_derivation.method",
                reason: "must be PBKDF2",
            });
        }
        if self.iterations == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "security.key_derivation.iterations",
                reason: "must be > 0",
            });
        }
        match decode_b64url(&self.salt) {
            Ok(salt) if !salt.is_empty() => Ok(()),
            _ => Err(ContractViolation::InvalidValue {
                field: "security.key_derivation.salt",
                reason: "must be non-empty base64url",
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEnvelope {
    pub encryption_method: String,
    pub iv: String,
    pub auth_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_derivation: Option<KeyDerivationParams>,
}

impl SecurityEnvelope {
    pub fn iv_bytes(&self) -> Result<[u8; IV_LEN], ContractViolation> {
        decode_fixed("security.iv", &self.iv)
    }

    pub fn auth_tag_bytes(&self) -> Result<[u8; AUTH_TAG_LEN], ContractViolation> {
        decode_fixed("security.auth_tag", &self.auth_tag)
    }
}

impl Validate for SecurityEnvelope {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.encryption_method != ENCRYPTION_METHOD_AES_256_GCM {
            return Err(ContractViolation::InvalidValue {
                field: "security.encryption_method",
                reason: "must be AES-256-GCM",
            });
        }
        self.iv_bytes()?;
        self.auth_tag_bytes()?;
        if let Some(params) = &self.key_derivation {
            params.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedFormData {
    pub encrypted_data: String,
}

impl EncryptedFormData {
    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>, ContractViolation> {
        let bytes =
            decode_b64url(&self.encrypted_data).map_err(|_| ContractViolation::InvalidValue {
                field: "form_data.encrypted_data",
                reason: "must be base64url",
            })?;
        if bytes.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "form_data.encrypted_data",
                reason: "must not be empty",
            });
        }
        Ok(bytes)
    }
}

/// At-rest form configuration. Built once by the authoring path and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedFormConfig {
    pub metadata: ConfigMetadata,
    pub security: SecurityEnvelope,
    pub form_data: EncryptedFormData,
}

impl EncryptedFormConfig {
    pub fn v1(
        metadata: ConfigMetadata,
        security: SecurityEnvelope,
        form_data: EncryptedFormData,
    ) -> Result<Self, ContractViolation> {
        let config = Self {
            metadata,
            security,
            form_data,
        };
        config.validate()?;
        Ok(config)
    }
}

impl Validate for EncryptedFormConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.metadata.validate()?;
        self.security.validate()?;
        self.form_data.ciphertext_bytes()?;
        Ok(())
    }
}

fn decode_fixed<const N: usize>(
    field: &'static str,
    raw: &str,
) -> Result<[u8; N], ContractViolation> {
    let bytes = decode_b64url(raw).map_err(|_| ContractViolation::InvalidValue {
        field,
        reason: "must be base64url",
    })?;
    bytes
        .try_into()
        .map_err(|_| ContractViolation::InvalidValue {
            field,
            reason: "has the wrong decoded length",
        })
}
