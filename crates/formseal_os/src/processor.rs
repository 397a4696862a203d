#![forbid(unsafe_code)]

//! Request handler of the isolated processor. Owns the retained payloads and
//! turns every inbound envelope into exactly one response, or drops it when no
//! `requestId` can be recovered.

use formseal_contracts::form_config::EncryptedFormConfig;
use formseal_contracts::form_payload::{DecryptedFormPayload, Field};
use formseal_contracts::processor_wire::{
    DecryptRequest, DecryptResult, ErrorBody, ErrorName, FieldSummary, KeyMaterial,
    MatchFieldsRequest, MatchFieldsResult, ProcessFormDataRequest, ProcessFormDataResult,
    ProcessorAction, ProcessorRequest, ProcessorResponse, ResolveFormRequest, SanitizeRequest,
    SanitizeResult, WipeRequest, WipeResult,
};
use formseal_contracts::{ContractViolation, Validate};
use formseal_engines::crypto_gateway::{open_config, resolve_key, CryptoError};
use formseal_engines::field_matcher::FieldMatcher;
use formseal_engines::field_rules::{check_payload, FieldCheckReport};
use formseal_engines::schema::{self, builtin_schema, Schema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::config::ProcessorConfig;
use crate::payload_store::{PayloadStore, StoreFull};

const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Vec<String>,
    },
    #[error("decryption failed: {0}")]
    Decryption(CryptoError),
    #[error("processor failure: {0}")]
    Worker(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl ProcessorError {
    pub fn validation(message: impl Into<String>, details: Vec<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details,
        }
    }

    pub fn name(&self) -> ErrorName {
        match self {
            Self::Validation { .. } => ErrorName::ValidationError,
            Self::Decryption(_) => ErrorName::DecryptionError,
            Self::Worker(_) => ErrorName::WorkerError,
            Self::Protocol(_) => ErrorName::ProtocolError,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        let details = match self {
            Self::Validation { details, .. } => details.clone(),
            _ => Vec::new(),
        };
        ErrorBody {
            name: self.name(),
            message: self.to_string(),
            details,
        }
    }
}

impl From<CryptoError> for ProcessorError {
    fn from(err: CryptoError) -> Self {
        if err.is_decryption_failure() {
            Self::Decryption(err)
        } else {
            Self::Worker(err.to_string())
        }
    }
}

impl From<ContractViolation> for ProcessorError {
    fn from(violation: ContractViolation) -> Self {
        Self::validation("contract violation", vec![violation.to_string()])
    }
}

impl From<StoreFull> for ProcessorError {
    fn from(err: StoreFull) -> Self {
        Self::Worker(err.to_string())
    }
}

pub struct ProcessorRuntime {
    config: ProcessorConfig,
    matcher: FieldMatcher,
    store: PayloadStore,
}

impl std::fmt::Debug for ProcessorRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRuntime")
            .field("config", &self.config)
            .field("retained", &self.store.len())
            .finish()
    }
}

impl ProcessorRuntime {
    pub fn new(config: ProcessorConfig) -> Result<Self, ContractViolation> {
        config.validate()?;
        Ok(Self {
            store: PayloadStore::new(config.max_retained_payloads),
            matcher: FieldMatcher::mvp_v1(),
            config,
        })
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn retained_count(&self) -> usize {
        self.store.len()
    }

    pub fn wipe_all(&mut self) -> usize {
        self.store.wipe_all()
    }

    /// Decodes one serialized envelope and serializes the response. Returns
    /// `None` when the message is dropped.
    pub fn handle_message(&mut self, raw: &str) -> Option<String> {
        let mut envelope = match serde_json::from_str::<Value>(raw) {
            Ok(value) => value,
            Err(_) => {
                warn!(len = raw.len(), "dropping processor message that is not JSON");
                return None;
            }
        };
        let Some(request_id) = recover_request_id(&envelope) else {
            warn!("dropping processor message without a usable requestId");
            wipe_value(&mut envelope);
            return None;
        };

        let response = match ProcessorRequest::deserialize(&envelope) {
            Ok(request) => {
                wipe_value(&mut envelope);
                self.handle_request(request)
            }
            Err(_) => {
                let problem = envelope_problem(&envelope);
                wipe_value(&mut envelope);
                warn!(request_id = %request_id, problem = %problem, "rejecting envelope");
                ProcessorResponse::error(request_id, ProcessorError::Protocol(problem).to_body())
            }
        };

        match serde_json::to_string(&response) {
            Ok(out) => Some(out),
            Err(err) => {
                warn!(
                    request_id = %response.request_id,
                    error = %err,
                    "response serialization failed"
                );
                None
            }
        }
    }

    pub fn handle_request(&mut self, mut request: ProcessorRequest) -> ProcessorResponse {
        let action = request.action;
        let request_id = request.request_id.clone();
        debug!(request_id = %request_id, action = action.as_str(), "processor request received");

        let outcome = match request.validate() {
            Ok(()) => self.dispatch(action, &request.payload),
            Err(violation) => Err(ProcessorError::Protocol(violation.to_string())),
        };
        wipe_value(&mut request.payload);

        match outcome {
            Ok(result) => {
                info!(
                    request_id = %request_id,
                    action = action.as_str(),
                    "processor request completed"
                );
                ProcessorResponse::success(request_id, result)
            }
            Err(err) => {
                warn!(
                    request_id = %request_id,
                    action = action.as_str(),
                    error_name = err.name().as_str(),
                    "processor request failed"
                );
                ProcessorResponse::error(request_id, err.to_body())
            }
        }
    }

    fn dispatch(
        &mut self,
        action: ProcessorAction,
        payload: &Value,
    ) -> Result<Value, ProcessorError> {
        match action {
            ProcessorAction::Decrypt => to_result(self.decrypt(payload)?),
            ProcessorAction::ProcessFormData => to_result(self.process_form_data(payload)?),
            ProcessorAction::MatchFields => to_result(self.match_fields(payload)?),
            ProcessorAction::ResolveForm => to_result(self.resolve_form(payload)?),
            ProcessorAction::Sanitize => to_result(sanitize(payload)?),
            ProcessorAction::Wipe => to_result(self.wipe(payload)?),
        }
    }

    fn decrypt(&mut self, payload: &Value) -> Result<DecryptResult, ProcessorError> {
        check_config_shape(payload)?;
        let request: DecryptRequest = parse_payload(ProcessorAction::Decrypt, payload)?;
        if !self.store.has_room() {
            return Err(StoreFull {
                capacity: self.config.max_retained_payloads,
            }
            .into());
        }

        let decrypted = self.open_payload(&request.config, &request.key)?;
        let fields = decrypted.fields.iter().map(FieldSummary::from).collect::<Vec<_>>();
        let field_count = fields.len();
        let phi_field_count = decrypted.phi_field_count();
        let payload_handle = self.store.insert(decrypted)?;
        info!(
            form_id = %request.config.metadata.form_id,
            field_count,
            phi_field_count,
            retained = self.store.len(),
            "payload decrypted and retained"
        );
        Ok(DecryptResult {
            payload_handle,
            form_id: request.config.metadata.form_id.clone(),
            field_count,
            fields,
        })
    }

    fn process_form_data(
        &mut self,
        payload: &Value,
    ) -> Result<ProcessFormDataResult, ProcessorError> {
        let mut request: ProcessFormDataRequest =
            parse_payload(ProcessorAction::ProcessFormData, payload)?;
        let parsed = parse_form_payload(&request.data);
        wipe_value(&mut request.data);
        let mut decrypted = parsed?;
        let report = check_payload(&decrypted);
        let result = ProcessFormDataResult {
            valid: report.is_clean(),
            field_count: decrypted.fields.len(),
            phi_field_count: decrypted.phi_field_count(),
            errors: report.errors,
            warnings: report.warnings,
        };
        decrypted.wipe();
        Ok(result)
    }

    fn match_fields(&mut self, payload: &Value) -> Result<MatchFieldsResult, ProcessorError> {
        let request: MatchFieldsRequest = parse_payload(ProcessorAction::MatchFields, payload)?;
        request.validate()?;
        let MatchFieldsRequest {
            payload_handle,
            fields,
            form_structure,
        } = request;

        let mut fields = match (payload_handle, fields) {
            (Some(handle), None) => {
                let mut retained = self.store.take(&handle).ok_or_else(|| {
                    ProcessorError::validation("unknown payload handle", Vec::new())
                })?;
                std::mem::take(&mut retained.fields)
            }
            (None, Some(fields)) => fields,
            _ => {
                return Err(ProcessorError::validation(
                    "exactly one of payloadHandle or fields is required",
                    Vec::new(),
                ))
            }
        };
        let results = self.matcher.match_fields(&fields, &form_structure);
        wipe_fields(&mut fields);
        Ok(MatchFieldsResult { results })
    }

    fn resolve_form(&mut self, payload: &Value) -> Result<MatchFieldsResult, ProcessorError> {
        check_config_shape(payload)?;
        let request: ResolveFormRequest = parse_payload(ProcessorAction::ResolveForm, payload)?;
        request.form_structure.validate()?;

        let mut decrypted = self.open_payload(&request.config, &request.key)?;
        let report = check_payload(&decrypted);
        if !report.is_clean() {
            decrypted.wipe();
            return Err(rule_failure(report));
        }
        if !report.warnings.is_empty() {
            debug!(warning_count = report.warnings.len(), "field rules reported warnings");
        }
        let results = self
            .matcher
            .match_fields(&decrypted.fields, &request.form_structure);
        decrypted.wipe();
        Ok(MatchFieldsResult { results })
    }

    fn wipe(&mut self, payload: &Value) -> Result<WipeResult, ProcessorError> {
        let request: WipeRequest = parse_payload(ProcessorAction::Wipe, payload)?;
        let wiped = request
            .references
            .iter()
            .filter(|handle| self.store.wipe(handle))
            .count();
        info!(requested = request.references.len(), wiped, "retained payloads wiped");
        Ok(WipeResult { wiped })
    }

    /// Key resolution, authenticated decryption, then structural and contract
    /// validation of the plaintext.
    fn open_payload(
        &self,
        config: &EncryptedFormConfig,
        key: &KeyMaterial,
    ) -> Result<DecryptedFormPayload, ProcessorError> {
        let key = resolve_key(
            key,
            config.security.key_derivation.as_ref(),
            self.config.min_kdf_iterations,
        )?;
        let plaintext = open_config(config, &key)?;
        let mut value = serde_json::from_slice::<Value>(&plaintext).map_err(|_| {
            ProcessorError::validation("decrypted payload is not a JSON document", Vec::new())
        })?;
        let parsed = parse_form_payload(&value);
        wipe_value(&mut value);
        parsed
    }
}

fn to_result<T: Serialize>(result: T) -> Result<Value, ProcessorError> {
    serde_json::to_value(result).map_err(|err| ProcessorError::Worker(err.to_string()))
}

// serde messages can quote offending input, so they are never forwarded.
fn parse_payload<T: DeserializeOwned>(
    action: ProcessorAction,
    payload: &Value,
) -> Result<T, ProcessorError> {
    T::deserialize(payload).map_err(|_| {
        ProcessorError::validation(format!("malformed {} payload", action.as_str()), Vec::new())
    })
}

fn check_config_shape(payload: &Value) -> Result<(), ProcessorError> {
    let config = payload.get("config").unwrap_or(&Value::Null);
    let report = schema::validate(config, &schema::encrypted_config_schema());
    if report.valid {
        return Ok(());
    }
    Err(ProcessorError::validation(
        "encrypted configuration failed schema validation",
        report.errors,
    ))
}

fn parse_form_payload(data: &Value) -> Result<DecryptedFormPayload, ProcessorError> {
    let report = schema::validate(data, &schema::form_payload_schema());
    if !report.valid {
        return Err(ProcessorError::validation(
            "form payload failed schema validation",
            report.errors,
        ));
    }
    let payload = DecryptedFormPayload::deserialize(data).map_err(|_| {
        ProcessorError::validation("form payload has an unsupported shape", Vec::new())
    })?;
    if let Err(violation) = payload.validate() {
        let mut payload = payload;
        payload.wipe();
        return Err(violation.into());
    }
    Ok(payload)
}

fn rule_failure(report: FieldCheckReport) -> ProcessorError {
    ProcessorError::validation("field values failed validation", report.errors)
}

fn sanitize(payload: &Value) -> Result<SanitizeResult, ProcessorError> {
    let request: SanitizeRequest = parse_payload(ProcessorAction::Sanitize, payload)?;
    let schema = match &request.schema {
        Value::String(name) => builtin_schema(name)
            .ok_or_else(|| ProcessorError::validation("unknown schema name", vec![name.clone()]))?,
        Value::Object(_) => Schema::deserialize(&request.schema)
            .map_err(|_| ProcessorError::validation("schema object is not supported", Vec::new()))?,
        _ => {
            return Err(ProcessorError::validation(
                "schema must be a name or an object",
                Vec::new(),
            ))
        }
    };
    Ok(SanitizeResult {
        value: schema::sanitize(&request.value, &schema),
    })
}

fn recover_request_id(envelope: &Value) -> Option<String> {
    envelope
        .get("requestId")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
}

/// Describes an envelope that failed to deserialize. Only the action name is
/// ever echoed, and only when it is short.
fn envelope_problem(envelope: &Value) -> String {
    let Some(raw) = envelope.get("action").and_then(Value::as_str) else {
        return "request has no action".to_string();
    };
    match ProcessorAction::parse(raw) {
        Some(action) => format!("malformed {} request", action.as_str()),
        None if raw.len() <= 64 => format!("unsupported action: {raw}"),
        None => "unsupported action".to_string(),
    }
}

fn wipe_fields(fields: &mut Vec<Field>) {
    for field in fields.iter_mut() {
        field.value.zeroize();
    }
    fields.clear();
}

/// Zeroes every string in a JSON tree and clears the containers.
pub fn wipe_value(value: &mut Value) {
    match value {
        Value::String(text) => text.zeroize(),
        Value::Array(items) => {
            for item in items.iter_mut() {
                wipe_value(item);
            }
            items.clear();
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                wipe_value(item);
            }
            map.clear();
        }
        Value::Number(_) | Value::Bool(_) | Value::Null => {}
    }
    *value = Value::Null;
}

#[cfg(test)]
mod tests {
    use super::*;
    use formseal_contracts::form_config::{encode_b64url, ConfigMetadata, KeyDerivationParams};
    use formseal_contracts::form_payload::{
        FieldType, FieldValidation, FieldValue, FormOptions, MatchRules, ValidationBehavior,
    };
    use formseal_contracts::form_structure::{Element, FormStructure};
    use formseal_contracts::processor_wire::{
        AssertionBytes, AssertionKeyMaterial, RawKeyMaterial, ResponseStatus,
    };
    use formseal_engines::crypto_gateway::{
        derive_key_with, seal_config, AssertionInput, SymmetricKey,
    };
    use serde_json::json;

    fn runtime() -> ProcessorRuntime {
        ProcessorRuntime::new(ProcessorConfig::mvp_v1()).unwrap()
    }

    fn intake_payload() -> DecryptedFormPayload {
        let mut dob = Field::v1(
            "dob".to_string(),
            FieldValue::Text("1990-02-01".to_string()),
            FieldType::Date,
            MatchRules::with_labels(&["Date of birth"]),
        )
        .unwrap();
        dob.validation = FieldValidation {
            required: Some(true),
            ..FieldValidation::default()
        };
        DecryptedFormPayload::v1(
            vec![
                Field::v1(
                    "symptoms".to_string(),
                    FieldValue::Text("persistent cough".to_string()),
                    FieldType::Textarea,
                    MatchRules::with_labels(&["Symptoms"]),
                )
                .unwrap(),
                dob,
            ],
            FormOptions::default(),
            Vec::new(),
        )
        .unwrap()
    }

    fn sealed(key: &SymmetricKey, payload: &DecryptedFormPayload) -> EncryptedFormConfig {
        seal_config(
            payload,
            key,
            ConfigMetadata::v1(
                "intake".to_string(),
                "Patient Intake".to_string(),
                "2026-01-01T00:00:00Z".to_string(),
            )
            .unwrap(),
            None,
        )
        .unwrap()
    }

    fn raw_key(key: &SymmetricKey) -> KeyMaterial {
        KeyMaterial::Raw(RawKeyMaterial {
            raw_key: key.to_b64url(),
        })
    }

    fn form() -> FormStructure {
        FormStructure::v1(vec![
            Element::tag("INPUT").with_type("date").with_id("dob").with_label("Date of birth"),
            Element::tag("TEXTAREA").with_name("symptoms").with_label("Symptoms"),
        ])
        .unwrap()
    }

    fn request(action: ProcessorAction, payload: Value) -> ProcessorRequest {
        ProcessorRequest {
            action,
            payload,
            request_id: "req-1".to_string(),
        }
    }

    fn error_name(response: &ProcessorResponse) -> Option<ErrorName> {
        response.error.as_ref().map(|error| error.name)
    }

    #[test]
    fn at_processor_01_decrypt_retains_payload_and_returns_only_summary() {
        let key = SymmetricKey::generate();
        let config = sealed(&key, &intake_payload());
        let mut runtime = runtime();
        let out = runtime.handle_request(request(
            ProcessorAction::Decrypt,
            json!({ "config": config, "key": raw_key(&key) }),
        ));
        assert_eq!(out.status, ResponseStatus::Success);
        assert!(out.validate().is_ok());

        let rendered = serde_json::to_string(&out).unwrap();
        assert!(!rendered.contains("persistent cough"));
        let result: DecryptResult = serde_json::from_value(out.result.unwrap()).unwrap();
        assert_eq!(result.form_id, "intake");
        assert_eq!(result.field_count, 2);
        assert_eq!(result.fields[0].id, "symptoms");
        assert_eq!(runtime.retained_count(), 1);
    }

    #[test]
    fn at_processor_02_wrong_key_is_decryption_error() {
        let config = sealed(&SymmetricKey::generate(), &intake_payload());
        let mut runtime = runtime();
        let out = runtime.handle_request(request(
            ProcessorAction::Decrypt,
            json!({ "config": config, "key": raw_key(&SymmetricKey::generate()) }),
        ));
        assert_eq!(error_name(&out), Some(ErrorName::DecryptionError));
        assert_eq!(runtime.retained_count(), 0);
    }

    #[test]
    fn at_processor_03_missing_assertion_bytes_hard_fail() {
        let config = sealed(&SymmetricKey::generate(), &intake_payload());
        let key = KeyMaterial::Assertion(AssertionKeyMaterial {
            assertion: AssertionBytes {
                authenticator_data: String::new(),
                client_data_hash: encode_b64url(b"hash"),
            },
            context_id: "user-1".to_string(),
        });
        let out = runtime().handle_request(request(
            ProcessorAction::Decrypt,
            json!({ "config": config, "key": key }),
        ));
        assert_eq!(error_name(&out), Some(ErrorName::DecryptionError));
    }

    #[test]
    fn at_processor_04_assertion_key_honours_envelope_derivation() {
        let authenticator_data = b"authenticator-data";
        let client_data_hash = b"client-data-hash";
        let key = derive_key_with(
            AssertionInput {
                authenticator_data,
                client_data_hash,
            },
            b"clinic-salt",
            1_000,
        )
        .unwrap();
        let mut config = seal_config(
            &intake_payload(),
            &key,
            ConfigMetadata::v1("intake".to_string(), "Intake".to_string(), "t".to_string())
                .unwrap(),
            Some(KeyDerivationParams {
                method: "PBKDF2".to_string(),
                salt: encode_b64url(b"clinic-salt"),
                iterations: 1_000,
            }),
        )
        .unwrap();
        let material = json!({
            "assertion": {
                "authenticatorData": encode_b64url(authenticator_data),
                "clientDataHash": encode_b64url(client_data_hash)
            },
            "contextId": "user-1"
        });

        let mut relaxed = ProcessorRuntime::new(ProcessorConfig {
            min_kdf_iterations: 1_000,
            ..ProcessorConfig::mvp_v1()
        })
        .unwrap();
        let out = relaxed.handle_request(request(
            ProcessorAction::Decrypt,
            json!({ "config": config.clone(), "key": material.clone() }),
        ));
        assert_eq!(out.status, ResponseStatus::Success);

        if let Some(params) = config.security.key_derivation.as_mut() {
            params.iterations = 999;
        }
        let out = relaxed.handle_request(request(
            ProcessorAction::Decrypt,
            json!({ "config": config, "key": material }),
        ));
        assert_eq!(error_name(&out), Some(ErrorName::DecryptionError));
    }

    #[test]
    fn at_processor_05_match_by_handle_consumes_and_wipes() {
        let key = SymmetricKey::generate();
        let mut runtime = runtime();
        let decrypted = runtime.handle_request(request(
            ProcessorAction::Decrypt,
            json!({ "config": sealed(&key, &intake_payload()), "key": raw_key(&key) }),
        ));
        let handle = decrypted.result.unwrap()["payloadHandle"]
            .as_str()
            .unwrap()
            .to_string();

        let out = runtime.handle_request(request(
            ProcessorAction::MatchFields,
            json!({ "payloadHandle": handle, "formStructure": form() }),
        ));
        let result: MatchFieldsResult = serde_json::from_value(out.result.unwrap()).unwrap();
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.results[0].selector.as_deref(), Some("textarea[name=\"symptoms\"]"));
        assert_eq!(result.results[1].selector.as_deref(), Some("#dob"));
        assert_eq!(runtime.retained_count(), 0);

        let again = runtime.handle_request(request(
            ProcessorAction::MatchFields,
            json!({ "payloadHandle": handle, "formStructure": form() }),
        ));
        assert_eq!(error_name(&again), Some(ErrorName::ValidationError));
    }

    #[test]
    fn at_processor_06_resolve_form_wipes_before_responding() {
        let key = SymmetricKey::generate();
        let mut runtime = runtime();
        let out = runtime.handle_request(request(
            ProcessorAction::ResolveForm,
            json!({
                "config": sealed(&key, &intake_payload()),
                "key": raw_key(&key),
                "formStructure": form()
            }),
        ));
        assert_eq!(out.status, ResponseStatus::Success);
        let result: MatchFieldsResult = serde_json::from_value(out.result.unwrap()).unwrap();
        assert!(result.results.iter().all(|r| r.matched));
        assert_eq!(runtime.retained_count(), 0);
    }

    #[test]
    fn at_processor_07_resolve_form_rejects_strict_rule_failures() {
        let key = SymmetricKey::generate();
        let mut payload = intake_payload();
        payload.fields[1].value = FieldValue::Text(String::new());
        let out = runtime().handle_request(request(
            ProcessorAction::ResolveForm,
            json!({
                "config": sealed(&key, &payload),
                "key": raw_key(&key),
                "formStructure": form()
            }),
        ));
        let error = out.error.unwrap();
        assert_eq!(error.name, ErrorName::ValidationError);
        assert_eq!(error.details, vec!["Field dob is required".to_string()]);
    }

    #[test]
    fn at_processor_08_process_form_data_reports_rules_by_behavior() {
        let mut payload = intake_payload();
        payload.fields[1].value = FieldValue::Text(String::new());
        payload.options.validation_behavior = ValidationBehavior::Lenient;
        let out = runtime().handle_request(request(
            ProcessorAction::ProcessFormData,
            json!({ "data": payload }),
        ));
        let result: ProcessFormDataResult = serde_json::from_value(out.result.unwrap()).unwrap();
        assert!(result.valid);
        assert_eq!(result.warnings, vec!["Field dob is required".to_string()]);
        assert_eq!(result.field_count, 2);
        assert_eq!(result.phi_field_count, 2);
    }

    #[test]
    fn at_processor_09_schema_failures_carry_paths() {
        let out = runtime().handle_request(request(
            ProcessorAction::ProcessFormData,
            json!({ "data": { "fields": [{ "id": "a", "type": 7 }] } }),
        ));
        let error = out.error.unwrap();
        assert_eq!(error.name, ErrorName::ValidationError);
        assert!(error
            .details
            .iter()
            .any(|detail| detail.contains("fields[0].type")));

        let out = runtime().handle_request(request(
            ProcessorAction::Decrypt,
            json!({ "config": {}, "key": { "rawKey": "AAAA" } }),
        ));
        assert_eq!(
            out.error.unwrap().details,
            vec![
                "Missing required property: metadata".to_string(),
                "Missing required property: security".to_string(),
                "Missing required property: formData".to_string(),
            ]
        );
    }

    #[test]
    fn at_processor_10_sanitize_with_builtin_and_inline_schema() {
        let mut runtime = runtime();
        let out = runtime.handle_request(request(
            ProcessorAction::Sanitize,
            json!({
                "value": { "formData": { "encryptedData": "abc", "extra": 1 }, "junk": true },
                "schema": "encryptedConfig"
            }),
        ));
        assert_eq!(
            out.result.unwrap()["value"],
            json!({ "formData": { "encryptedData": "abc" } })
        );

        let out = runtime.handle_request(request(
            ProcessorAction::Sanitize,
            json!({
                "value": { "keep": 1, "drop": 2 },
                "schema": { "type": "object", "properties": { "keep": { "type": "number" } } }
            }),
        ));
        assert_eq!(out.result.unwrap()["value"], json!({ "keep": 1 }));

        let out = runtime.handle_request(request(
            ProcessorAction::Sanitize,
            json!({ "value": 1, "schema": "nope" }),
        ));
        assert_eq!(error_name(&out), Some(ErrorName::ValidationError));
    }

    #[test]
    fn at_processor_11_wipe_counts_only_known_handles() {
        let key = SymmetricKey::generate();
        let mut runtime = runtime();
        let decrypted = runtime.handle_request(request(
            ProcessorAction::Decrypt,
            json!({ "config": sealed(&key, &intake_payload()), "key": raw_key(&key) }),
        ));
        let handle = decrypted.result.unwrap()["payloadHandle"].clone();
        let out = runtime.handle_request(request(
            ProcessorAction::Wipe,
            json!({ "references": [handle, "missing"] }),
        ));
        assert_eq!(out.result.unwrap(), json!({ "wiped": 1 }));
        assert_eq!(runtime.retained_count(), 0);
    }

    #[test]
    fn at_processor_12_retained_limit_is_worker_error() {
        let key = SymmetricKey::generate();
        let mut runtime = ProcessorRuntime::new(ProcessorConfig {
            max_retained_payloads: 1,
            ..ProcessorConfig::mvp_v1()
        })
        .unwrap();
        let payload = json!({ "config": sealed(&key, &intake_payload()), "key": raw_key(&key) });
        let first = runtime.handle_request(request(ProcessorAction::Decrypt, payload.clone()));
        assert_eq!(first.status, ResponseStatus::Success);
        let second = runtime.handle_request(request(ProcessorAction::Decrypt, payload));
        assert_eq!(error_name(&second), Some(ErrorName::WorkerError));
        assert_eq!(runtime.wipe_all(), 1);
    }

    #[test]
    fn at_processor_13_envelope_handling() {
        let mut runtime = runtime();
        assert_eq!(runtime.handle_message("not json"), None);
        assert_eq!(runtime.handle_message(r#"{"action":"wipe","payload":{}}"#), None);

        let out = runtime
            .handle_message(r#"{"action":"explode","payload":{},"requestId":"r-9"}"#)
            .unwrap();
        let response: ProcessorResponse = serde_json::from_str(&out).unwrap();
        assert_eq!(response.request_id, "r-9");
        assert_eq!(error_name(&response), Some(ErrorName::ProtocolError));
        assert_eq!(
            response.error.unwrap().message,
            "protocol violation: unsupported action: explode"
        );

        let out = runtime
            .handle_message(r#"{"action":" decrypt ","payload":{},"requestId":"r-11"}"#)
            .unwrap();
        let response: ProcessorResponse = serde_json::from_str(&out).unwrap();
        assert_eq!(
            response.error.unwrap().message,
            "protocol violation: malformed decrypt request"
        );

        let out = runtime.handle_message(r#"{"payload":{},"requestId":"r-12"}"#).unwrap();
        let response: ProcessorResponse = serde_json::from_str(&out).unwrap();
        assert_eq!(response.error.unwrap().message, "protocol violation: request has no action");

        let out = runtime
            .handle_message(r#"{"action":"wipe","payload":{"references":[]},"requestId":"r-10"}"#)
            .unwrap();
        let response: ProcessorResponse = serde_json::from_str(&out).unwrap();
        assert_eq!(response.status, ResponseStatus::Success);
    }

    #[test]
    fn at_processor_14_malformed_payload_never_echoes_input() {
        let out = runtime().handle_request(request(
            ProcessorAction::Wipe,
            json!({ "references": "123-45-6789" }),
        ));
        let rendered = serde_json::to_string(&out).unwrap();
        assert!(!rendered.contains("123-45-6789"));
        assert_eq!(error_name(&out), Some(ErrorName::ValidationError));
    }

    #[test]
    fn at_processor_15_wipe_value_clears_tree() {
        let mut value = json!({ "a": ["secret", { "b": "secret" }], "n": 1 });
        wipe_value(&mut value);
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn at_processor_16_partial_options_parse_and_bad_numbers_carry_paths() {
        let mut runtime = runtime();
        let out = runtime.handle_request(request(
            ProcessorAction::ProcessFormData,
            json!({ "data": {
                "fields": [{ "id": "a", "type": "text", "value": "x" }],
                "options": { "autoSubmit": true, "errorHandling": { "continueOnError": false } }
            } }),
        ));
        assert_eq!(out.status, ResponseStatus::Success);
        let result: ProcessFormDataResult = serde_json::from_value(out.result.unwrap()).unwrap();
        assert!(result.valid);
        assert_eq!(
            result.warnings,
            vec!["Option autoSubmit is set without submitSelector".to_string()]
        );

        let out = runtime.handle_request(request(
            ProcessorAction::ProcessFormData,
            json!({ "data": {
                "fields": [{ "id": "a", "type": "text", "value": { "nested": 1 } }],
                "options": { "fillDelay": { "min": -1, "max": 2.0 } }
            } }),
        ));
        let error = out.error.unwrap();
        assert_eq!(error.name, ErrorName::ValidationError);
        assert_eq!(
            error.details,
            vec![
                "Invalid type at fields[0].value: expected string or number or boolean or array, \
                 got object"
                    .to_string(),
                "Invalid type at options.fillDelay.max: expected integer, got number".to_string(),
                "Invalid value at options.fillDelay.min: must be >= 0".to_string(),
            ]
        );
    }
}
