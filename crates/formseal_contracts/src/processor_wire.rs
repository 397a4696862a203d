#![forbid(unsafe_code)]

//! Message shapes crossing the processor boundary. Every request carries a
//! caller-chosen `requestId`; every response echoes it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::Zeroize;

use crate::common::validate_required_text;
use crate::form_config::EncryptedFormConfig;
use crate::form_payload::{Field, FieldType};
use crate::form_structure::{FormStructure, MatchResult};
use crate::{ContractViolation, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessorAction {
    Decrypt,
    ProcessFormData,
    MatchFields,
    ResolveForm,
    Sanitize,
    Wipe,
}

impl ProcessorAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Decrypt => "decrypt",
            Self::ProcessFormData => "process-form-data",
            Self::MatchFields => "match-fields",
            Self::ResolveForm => "resolve-form",
            Self::Sanitize => "sanitize",
            Self::Wipe => "wipe",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "decrypt" => Some(Self::Decrypt),
            "process-form-data" => Some(Self::ProcessFormData),
            "match-fields" => Some(Self::MatchFields),
            "resolve-form" => Some(Self::ResolveForm),
            "sanitize" => Some(Self::Sanitize),
            "wipe" => Some(Self::Wipe),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorRequest {
    pub action: ProcessorAction,
    #[serde(default)]
    pub payload: Value,
    pub request_id: String,
}

impl Validate for ProcessorRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_required_text("processor_request.request_id", &self.request_id, 128)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorName {
    ValidationError,
    DecryptionError,
    WorkerError,
    ProtocolError,
}

impl ErrorName {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "ValidationError",
            Self::DecryptionError => "DecryptionError",
            Self::WorkerError => "WorkerError",
            Self::ProtocolError => "ProtocolError",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub name: ErrorName,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorResponse {
    pub status: ResponseStatus,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ProcessorResponse {
    pub fn success(request_id: String, result: Value) -> Self {
        Self {
            status: ResponseStatus::Success,
            request_id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(request_id: String, error: ErrorBody) -> Self {
        Self {
            status: ResponseStatus::Error,
            request_id,
            result: None,
            error: Some(error),
        }
    }
}

impl Validate for ProcessorResponse {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_required_text("processor_response.request_id", &self.request_id, 128)?;
        match self.status {
            ResponseStatus::Success if self.result.is_none() || self.error.is_some() => {
                Err(ContractViolation::InvalidValue {
                    field: "processor_response",
                    reason: "success must carry result and no error",
                })
            }
            ResponseStatus::Error if self.error.is_none() || self.result.is_some() => {
                Err(ContractViolation::InvalidValue {
                    field: "processor_response",
                    reason: "error must carry error and no result",
                })
            }
            _ => Ok(()),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionBytes {
    pub authenticator_data: String,
    pub client_data_hash: String,
}

impl Drop for AssertionBytes {
    fn drop(&mut self) {
        self.authenticator_data.zeroize();
        self.client_data_hash.zeroize();
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawKeyMaterial {
    pub raw_key: String,
}

impl Drop for RawKeyMaterial {
    fn drop(&mut self) {
        self.raw_key.zeroize();
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionKeyMaterial {
    pub assertion: AssertionBytes,
    pub context_id: String,
}

/// Key input for decryption: an already derived key, or the authenticator
/// output the processor derives from.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyMaterial {
    Raw(RawKeyMaterial),
    Assertion(AssertionKeyMaterial),
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raw(_) => f.write_str("KeyMaterial::Raw(<redacted>)"),
            Self::Assertion(material) => write!(
                f,
                "KeyMaterial::Assertion {{ context_id: {:?}, assertion: <redacted> }}",
                material.context_id
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptRequest {
    pub config: EncryptedFormConfig,
    pub key: KeyMaterial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub phi: bool,
}

impl From<&Field> for FieldSummary {
    fn from(field: &Field) -> Self {
        Self {
            id: field.id.clone(),
            field_type: field.field_type,
            phi: field.phi,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptResult {
    pub payload_handle: String,
    pub form_id: String,
    pub field_count: usize,
    pub fields: Vec<FieldSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessFormDataRequest {
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessFormDataResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub field_count: usize,
    pub phi_field_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchFieldsRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<Field>>,
    pub form_structure: FormStructure,
}

impl Validate for MatchFieldsRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        match (&self.payload_handle, &self.fields) {
            (Some(handle), None) => {
                validate_required_text("match_fields.payload_handle", handle, 128)?;
            }
            (None, Some(fields)) => {
                for field in fields {
                    field.validate()?;
                }
            }
            _ => {
                return Err(ContractViolation::InvalidValue {
                    field: "match_fields",
                    reason: "exactly one of payload_handle or fields is required",
                })
            }
        }
        self.form_structure.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchFieldsResult {
    pub results: Vec<MatchResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveFormRequest {
    pub config: EncryptedFormConfig,
    pub key: KeyMaterial,
    pub form_structure: FormStructure,
}

/// `schema` is either a built-in schema name or an inline schema object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizeRequest {
    pub value: Value,
    pub schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizeResult {
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WipeRequest {
    pub references: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WipeResult {
    pub wiped: usize,
}
