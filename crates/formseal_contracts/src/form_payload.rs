#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::common::{validate_required_text, validate_unit_interval};
use crate::{ContractViolation, Validate};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;
pub const MAX_FIELDS_PER_PAYLOAD: usize = 1_024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Select,
    Radio,
    Checkbox,
    Email,
    Phone,
    Ssn,
    Address,
    Name,
    CreditCard,
    Password,
    Textarea,
    File,
    Hidden,
    Custom,
}

impl FieldType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Date => "date",
            Self::Select => "select",
            Self::Radio => "radio",
            Self::Checkbox => "checkbox",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Ssn => "ssn",
            Self::Address => "address",
            Self::Name => "name",
            Self::CreditCard => "creditCard",
            Self::Password => "password",
            Self::Textarea => "textarea",
            Self::File => "file",
            Self::Hidden => "hidden",
            Self::Custom => "custom",
        }
    }

    pub const fn all() -> &'static [Self] {
        &[
            Self::Text,
            Self::Number,
            Self::Date,
            Self::Select,
            Self::Radio,
            Self::Checkbox,
            Self::Email,
            Self::Phone,
            Self::Ssn,
            Self::Address,
            Self::Name,
            Self::CreditCard,
            Self::Password,
            Self::Textarea,
            Self::File,
            Self::Hidden,
            Self::Custom,
        ]
    }
}

/// A field's sensitive value. `Debug` never prints the content.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Flag(bool),
    List(Vec<String>),
}

impl FieldValue {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Number(_) | Self::Flag(_) => false,
            Self::List(items) => items.is_empty(),
        }
    }
}

impl Default for FieldValue {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl Zeroize for FieldValue {
    fn zeroize(&mut self) {
        match self {
            Self::Text(text) => text.zeroize(),
            Self::Number(number) => *number = 0.0,
            Self::Flag(flag) => *flag = false,
            Self::List(items) => items.zeroize(),
        }
    }
}

impl std::fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => write!(f, "Text(<redacted; {} chars>)", text.chars().count()),
            Self::Number(_) => f.write_str("Number(<redacted>)"),
            Self::Flag(_) => f.write_str("Flag(<redacted>)"),
            Self::List(items) => write!(f, "List(<redacted; {} items>)", items.len()),
        }
    }
}

fn default_confidence_threshold() -> f64 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

fn default_phi() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRules {
    #[serde(default)]
    pub selectors: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            selectors: Vec::new(),
            labels: Vec::new(),
            attributes: BTreeMap::new(),
            xpath: None,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl MatchRules {
    pub fn with_labels(labels: &[&str]) -> Self {
        Self {
            labels: labels.iter().map(|label| label.to_string()).collect(),
            ..Self::default()
        }
    }
}

impl Validate for MatchRules {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_unit_interval("match_rules.confidence_threshold", self.confidence_threshold)?;
        // a zero threshold would accept fields with no candidate at all
        if self.confidence_threshold <= 0.0 {
            return Err(ContractViolation::InvalidValue {
                field: "match_rules.confidence_threshold",
                reason: "must be greater than 0",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValidation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl Validate for FieldValidation {
    fn validate(&self) -> Result<(), ContractViolation> {
        if let (Some(min), Some(max)) = (self.min_length, self.max_length) {
            if min > max {
                return Err(ContractViolation::InvalidValue {
                    field: "validation.min_length",
                    reason: "must be <= max_length",
                });
            }
        }
        for (field, bound) in [("validation.min", self.min), ("validation.max", self.max)] {
            if matches!(bound, Some(v) if !v.is_finite()) {
                return Err(ContractViolation::NotFinite { field });
            }
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(ContractViolation::InvalidValue {
                    field: "validation.min",
                    reason: "must be <= max",
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub id: String,
    #[serde(default)]
    pub value: FieldValue,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub match_rules: MatchRules,
    #[serde(default)]
    pub validation: FieldValidation,
    #[serde(default = "default_phi")]
    pub phi: bool,
}

impl Field {
    pub fn v1(
        id: String,
        value: FieldValue,
        field_type: FieldType,
        match_rules: MatchRules,
    ) -> Result<Self, ContractViolation> {
        let field = Self {
            id,
            value,
            field_type,
            match_rules,
            validation: FieldValidation::default(),
            phi: true,
        };
        field.validate()?;
        Ok(field)
    }
}

impl Validate for Field {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_required_text("field.id", &self.id, 256)?;
        self.match_rules.validate()?;
        self.validation.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillDelay {
    pub min: u64,
    pub max: u64,
}

impl Default for FillDelay {
    fn default() -> Self {
        Self { min: 100, max: 300 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorHandling {
    pub retry_count: u32,
    pub continue_on_error: bool,
}

impl Default for ErrorHandling {
    fn default() -> Self {
        Self {
            retry_count: 3,
            continue_on_error: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationBehavior {
    #[default]
    Strict,
    Lenient,
    Ignore,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormOptions {
    #[serde(default)]
    pub fill_delay: FillDelay,
    #[serde(default)]
    pub auto_submit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_selector: Option<String>,
    #[serde(default)]
    pub error_handling: ErrorHandling,
    #[serde(default)]
    pub validation_behavior: ValidationBehavior,
}

impl Validate for FormOptions {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.fill_delay.min > self.fill_delay.max {
            return Err(ContractViolation::InvalidValue {
                field: "options.fill_delay",
                reason: "min must be <= max",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipType {
    Dependency,
    Calculation,
    Copy,
}

/// Declarative link between two fields. Carried through untouched; the caller
/// evaluates `condition`/`formula`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
    pub source_field: String,
    pub target_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

/// Plaintext form configuration. Lives only inside the processor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedFormPayload {
    pub fields: Vec<Field>,
    #[serde(default)]
    pub options: FormOptions,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl DecryptedFormPayload {
    pub fn v1(
        fields: Vec<Field>,
        options: FormOptions,
        relationships: Vec<Relationship>,
    ) -> Result<Self, ContractViolation> {
        let payload = Self {
            fields,
            options,
            relationships,
        };
        payload.validate()?;
        Ok(payload)
    }

    pub fn phi_field_count(&self) -> usize {
        self.fields.iter().filter(|field| field.phi).count()
    }

    /// Zeroes every field value in place and drops the field list.
    pub fn wipe(&mut self) {
        for field in &mut self.fields {
            field.value.zeroize();
        }
        self.fields.clear();
        self.relationships.clear();
    }
}

impl Validate for DecryptedFormPayload {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.fields.len() > MAX_FIELDS_PER_PAYLOAD {
            return Err(ContractViolation::InvalidValue {
                field: "payload.fields",
                reason: "exceeds max field count",
            });
        }
        let mut seen = BTreeSet::new();
        for field in &self.fields {
            field.validate()?;
            if !seen.insert(field.id.as_str()) {
                return Err(ContractViolation::DuplicateId {
                    field: "payload.fields.id",
                    id: field.id.clone(),
                });
            }
        }
        self.options.validate()?;
        for relationship in &self.relationships {
            for endpoint in [&relationship.source_field, &relationship.target_field] {
                if !seen.contains(endpoint.as_str()) {
                    return Err(ContractViolation::UnknownReference {
                        field: "payload.relationships",
                        id: endpoint.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_field(id: &str, value: &str) -> Field {
        Field::v1(
            id.to_string(),
            FieldValue::Text(value.to_string()),
            FieldType::Text,
            MatchRules::with_labels(&["Name"]),
        )
        .unwrap()
    }

    #[test]
    fn at_payload_01_field_defaults_apply_on_deserialize() {
        let field: Field = serde_json::from_value(serde_json::json!({
            "id": "symptoms",
            "value": "cough",
            "type": "textarea",
            "matchRules": { "labels": ["Symptoms"] }
        }))
        .unwrap();
        assert!(field.phi);
        assert_eq!(field.field_type, FieldType::Textarea);
        assert_eq!(
            field.match_rules.confidence_threshold,
            DEFAULT_CONFIDENCE_THRESHOLD
        );
    }

    #[test]
    fn at_payload_02_unknown_field_type_is_rejected() {
        let parsed = serde_json::from_value::<Field>(serde_json::json!({
            "id": "x",
            "type": "hologram"
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn at_payload_03_field_type_names_roundtrip_through_serde() {
        for field_type in FieldType::all() {
            let json = serde_json::to_value(field_type).unwrap();
            assert_eq!(json, serde_json::json!(field_type.as_str()));
        }
    }

    #[test]
    fn at_payload_04_duplicate_field_ids_fail() {
        let out = DecryptedFormPayload::v1(
            vec![text_field("a", "x"), text_field("a", "y")],
            FormOptions::default(),
            Vec::new(),
        );
        assert_eq!(
            out,
            Err(ContractViolation::DuplicateId {
                field: "payload.fields.id",
                id: "a".to_string(),
            })
        );
    }

    #[test]
    fn at_payload_05_relationship_must_reference_known_fields() {
        let out = DecryptedFormPayload::v1(
            vec![text_field("a", "x")],
            FormOptions::default(),
            vec![Relationship {
                relationship_type: RelationshipType::Copy,
                source_field: "a".to_string(),
                target_field: "b".to_string(),
                condition: None,
                formula: None,
            }],
        );
        assert!(matches!(
            out,
            Err(ContractViolation::UnknownReference { .. })
        ));
    }

    #[test]
    fn at_payload_06_debug_output_redacts_values() {
        let field = text_field("ssn", "123-45-6789");
        let rendered = format!("{field:?}");
        assert!(!rendered.contains("123-45-6789"));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn at_payload_07_wipe_zeroes_and_drops_values() {
        let mut payload = DecryptedFormPayload::v1(
            vec![text_field("a", "secret")],
            FormOptions::default(),
            Vec::new(),
        )
        .unwrap();
        payload.wipe();
        assert!(payload.fields.is_empty());

        let mut value = FieldValue::List(vec!["one".to_string()]);
        value.zeroize();
        assert_eq!(value, FieldValue::List(Vec::new()));
    }

    #[test]
    fn at_payload_08_threshold_outside_unit_interval_fails() {
        let mut rules = MatchRules::with_labels(&["Name"]);
        rules.confidence_threshold = 1.5;
        let out = Field::v1(
            "a".to_string(),
            FieldValue::Flag(true),
            FieldType::Checkbox,
            rules,
        );
        assert!(matches!(out, Err(ContractViolation::InvalidRange { .. })));
    }

    #[test]
    fn at_payload_09_partial_options_take_defaults() {
        let payload: DecryptedFormPayload = serde_json::from_value(serde_json::json!({
            "fields": [],
            "options": {
                "autoSubmit": true,
                "errorHandling": { "continueOnError": false }
            }
        }))
        .unwrap();
        assert_eq!(
            payload.options.error_handling,
            ErrorHandling {
                retry_count: 3,
                continue_on_error: false,
            }
        );
        assert_eq!(payload.options.fill_delay, FillDelay::default());
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn at_payload_10_zero_threshold_is_rejected() {
        let mut rules = MatchRules::with_labels(&["Name"]);
        rules.confidence_threshold = 0.0;
        let out = Field::v1(
            "a".to_string(),
            FieldValue::Flag(true),
            FieldType::Checkbox,
            rules,
        );
        assert!(matches!(
            out,
            Err(ContractViolation::InvalidValue {
                field: "match_rules.confidence_threshold",
                ..
            })
        ));

        let parsed: Result<MatchRules, _> =
            serde_json::from_value(serde_json::json!({ "confidenceThreshold": 0.0 }));
        assert!(parsed.unwrap().validate().is_err());
    }
}
