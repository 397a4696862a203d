#![forbid(unsafe_code)]

//! Declarative structural validation for untrusted JSON.
//!
//! `validate` never stops at the first problem: it walks the whole value and
//! reports every violation with a dotted/bracketed path (`security.iv`,
//! `fields[2].type`). `sanitize` shrinks a value to the declared shape so
//! unexpected keys never reach the crypto gateway or the matcher.
//!
//! `integer` accepts only numbers written without a fraction, so anything the
//! built-in schemas pass also deserializes into the contract types.

use std::collections::BTreeMap;

use formseal_contracts::form_payload::FieldType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// Bounds kept well inside f64's exact integer range.
const MAX_FILL_DELAY_MS: u64 = 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Object,
    Array,
    String,
    Number,
    Integer,
    Boolean,
    Null,
}

impl SchemaType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Array => "array",
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Null => "null",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Null => value.is_null(),
        }
    }
}

/// `type` as a single name or a list of alternatives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeSet {
    One(SchemaType),
    AnyOf(Vec<SchemaType>),
}

impl TypeSet {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::One(kind) => kind.accepts(value),
            Self::AnyOf(kinds) => kinds.iter().any(|kind| kind.accepts(value)),
        }
    }

    pub fn includes(&self, kind: SchemaType) -> bool {
        match self {
            Self::One(one) => *one == kind,
            Self::AnyOf(kinds) => kinds.contains(&kind),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::One(kind) => kind.as_str().to_string(),
            Self::AnyOf(kinds) => kinds
                .iter()
                .map(|kind| kind.as_str())
                .collect::<Vec<_>>()
                .join(" or "),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AdditionalProperties {
    Allowed(bool),
    Schema(Box<Schema>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TypeSet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Schema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<AdditionalProperties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
}

impl Schema {
    /// Accepts any value.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn of(kind: SchemaType) -> Self {
        Self {
            kind: Some(TypeSet::One(kind)),
            ..Self::default()
        }
    }

    pub fn one_of_types(kinds: &[SchemaType]) -> Self {
        Self {
            kind: Some(TypeSet::AnyOf(kinds.to_vec())),
            ..Self::default()
        }
    }

    /// Integer within `min..=max`.
    pub fn integer_range(min: u64, max: u64) -> Self {
        Self {
            minimum: Some(min as f64),
            maximum: Some(max as f64),
            ..Self::of(SchemaType::Integer)
        }
    }

    pub fn string() -> Self {
        Self::of(SchemaType::String)
    }

    pub fn string_enum(values: &[&str]) -> Self {
        Self {
            enum_values: Some(values.iter().map(|v| Value::from(*v)).collect()),
            ..Self::string()
        }
    }

    pub fn array(items: Schema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::of(SchemaType::Array)
        }
    }

    pub fn object<'a, I>(properties: I, required: &[&str]) -> Self
    where
        I: IntoIterator<Item = (&'a str, Schema)>,
    {
        Self {
            required: required.iter().map(|key| key.to_string()).collect(),
            properties: properties
                .into_iter()
                .map(|(key, schema)| (key.to_string(), schema))
                .collect(),
            ..Self::of(SchemaType::Object)
        }
    }

    /// An object whose keys are free-form and whose values follow `values`.
    pub fn map(values: Schema) -> Self {
        Self {
            additional_properties: Some(AdditionalProperties::Schema(Box::new(values))),
            ..Self::of(SchemaType::Object)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

pub fn validate(value: &Value, schema: &Schema) -> ValidationReport {
    let mut errors = Vec::new();
    validate_at(value, schema, "", &mut errors);
    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}

fn validate_at(value: &Value, schema: &Schema, path: &str, errors: &mut Vec<String>) {
    if let Some(kind) = &schema.kind {
        if !kind.accepts(value) {
            errors.push(format!(
                "Invalid type at {}: expected {}, got {}",
                display_path(path),
                kind.describe(),
                json_type_name(value)
            ));
            return;
        }
    }

    if let Some(number) = value.as_f64() {
        if let Some(minimum) = schema.minimum.filter(|minimum| number < *minimum) {
            errors.push(format!(
                "Invalid value at {}: must be >= {minimum}",
                display_path(path)
            ));
        }
        if let Some(maximum) = schema.maximum.filter(|maximum| number > *maximum) {
            errors.push(format!(
                "Invalid value at {}: must be <= {maximum}",
                display_path(path)
            ));
        }
    }

    if let Some(allowed) = &schema.enum_values {
        if !allowed.contains(value) {
            let rendered = allowed
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            errors.push(format!(
                "Invalid value at {}: must be one of [{rendered}]",
                display_path(path)
            ));
        }
    }

    match value {
        Value::Object(map) => {
            for key in &schema.required {
                if !map.contains_key(key) {
                    errors.push(format!(
                        "Missing required property: {}",
                        join_key(path, key)
                    ));
                }
            }
            for (key, child) in map {
                if let Some(child_schema) = schema.properties.get(key) {
                    validate_at(child, child_schema, &join_key(path, key), errors);
                } else if let Some(AdditionalProperties::Schema(extra)) =
                    &schema.additional_properties
                {
                    validate_at(child, extra, &join_key(path, key), errors);
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = &schema.items {
                for (index, item) in items.iter().enumerate() {
                    validate_at(item, item_schema, &format!("{path}[{index}]"), errors);
                }
            }
        }
        _ => {}
    }
}

/// Returns a copy of `value` carrying only what `schema` declares.
pub fn sanitize(value: &Value, schema: &Schema) -> Value {
    match value {
        Value::Object(map) => {
            let declares_shape = !schema.properties.is_empty()
                || schema.additional_properties.is_some()
                || schema
                    .kind
                    .as_ref()
                    .is_some_and(|kind| kind.includes(SchemaType::Object));
            if !declares_shape {
                return value.clone();
            }
            let mut out = Map::new();
            for (key, child) in map {
                if let Some(child_schema) = schema.properties.get(key) {
                    out.insert(key.clone(), sanitize(child, child_schema));
                    continue;
                }
                match &schema.additional_properties {
                    Some(AdditionalProperties::Allowed(true)) => {
                        out.insert(key.clone(), child.clone());
                    }
                    Some(AdditionalProperties::Schema(extra)) => {
                        out.insert(key.clone(), sanitize(child, extra));
                    }
                    Some(AdditionalProperties::Allowed(false)) | None => {}
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => match &schema.items {
            Some(item_schema) => Value::Array(
                items
                    .iter()
                    .map(|item| sanitize(item, item_schema))
                    .collect(),
            ),
            None => value.clone(),
        },
        _ => value.clone(),
    }
}

fn join_key(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "(root)"
    } else {
        path
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub fn encrypted_config_schema() -> Schema {
    Schema::object(
        [
            (
                "metadata",
                Schema::object(
                    [
                        ("version", Schema::string()),
                        ("formId", Schema::string()),
                        ("formName", Schema::string()),
                        ("createdAt", Schema::string()),
                    ],
                    &["version", "formId", "formName", "createdAt"],
                ),
            ),
            (
                "security",
                Schema::object(
                    [
                        ("encryptionMethod", Schema::string_enum(&["AES-256-GCM"])),
                        ("iv", Schema::string()),
                        ("authTag", Schema::string()),
                        (
                            "keyDerivation",
                            Schema::object(
                                [
                                    ("method", Schema::string()),
                                    ("salt", Schema::string()),
                                    ("iterations", Schema::integer_range(1, u32::MAX.into())),
                                ],
                                &["method", "salt", "iterations"],
                            ),
                        ),
                    ],
                    &["encryptionMethod", "iv", "authTag"],
                ),
            ),
            (
                "formData",
                Schema::object([("encryptedData", Schema::string())], &["encryptedData"]),
            ),
        ],
        &["metadata", "security", "formData"],
    )
}

// Text, number, flag, or list of strings.
fn field_value_schema() -> Schema {
    Schema {
        items: Some(Box::new(Schema::string())),
        ..Schema::one_of_types(&[
            SchemaType::String,
            SchemaType::Number,
            SchemaType::Boolean,
            SchemaType::Array,
        ])
    }
}

fn field_schema() -> Schema {
    let type_names = FieldType::all()
        .iter()
        .map(|field_type| field_type.as_str())
        .collect::<Vec<_>>();
    Schema::object(
        [
            ("id", Schema::string()),
            ("value", field_value_schema()),
            ("type", Schema::string_enum(&type_names)),
            (
                "matchRules",
                Schema::object(
                    [
                        ("selectors", Schema::array(Schema::string())),
                        ("labels", Schema::array(Schema::string())),
                        ("attributes", Schema::map(Schema::string())),
                        ("xpath", Schema::string()),
                        ("confidenceThreshold", Schema::of(SchemaType::Number)),
                    ],
                    &[],
                ),
            ),
            (
                "validation",
                Schema::object(
                    [
                        ("required", Schema::of(SchemaType::Boolean)),
                        ("pattern", Schema::string()),
                        ("minLength", Schema::integer_range(0, u32::MAX.into())),
                        ("maxLength", Schema::integer_range(0, u32::MAX.into())),
                        ("min", Schema::of(SchemaType::Number)),
                        ("max", Schema::of(SchemaType::Number)),
                    ],
                    &[],
                ),
            ),
            ("phi", Schema::of(SchemaType::Boolean)),
        ],
        &["id", "type"],
    )
}

pub fn form_payload_schema() -> Schema {
    Schema::object(
        [
            ("fields", Schema::array(field_schema())),
            (
                "options",
                Schema::object(
                    [
                        (
                            "fillDelay",
                            Schema::object(
                                [
                                    ("min", Schema::integer_range(0, MAX_FILL_DELAY_MS)),
                                    ("max", Schema::integer_range(0, MAX_FILL_DELAY_MS)),
                                ],
                                &["min", "max"],
                            ),
                        ),
                        ("autoSubmit", Schema::of(SchemaType::Boolean)),
                        ("submitSelector", Schema::string()),
                        (
                            "errorHandling",
                            Schema::object(
                                [
                                    ("retryCount", Schema::integer_range(0, u32::MAX.into())),
                                    ("continueOnError", Schema::of(SchemaType::Boolean)),
                                ],
                                &[],
                            ),
                        ),
                        (
                            "validationBehavior",
                            Schema::string_enum(&["strict", "lenient", "ignore"]),
                        ),
                    ],
                    &[],
                ),
            ),
            (
                "relationships",
                Schema::array(Schema::object(
                    [
                        (
                            "type",
                            Schema::string_enum(&["dependency", "calculation", "copy"]),
                        ),
                        ("sourceField", Schema::string()),
                        ("targetField", Schema::string()),
                        ("condition", Schema::any()),
                        ("formula", Schema::string()),
                    ],
                    &["type", "sourceField", "targetField"],
                )),
            ),
        ],
        &["fields"],
    )
}

/// Resolves a built-in schema name.
pub fn builtin_schema(name: &str) -> Option<Schema> {
    match name.trim() {
        "encryptedConfig" => Some(encrypted_config_schema()),
        "formPayload" => Some(form_payload_schema()),
        _ => None,
    }
}
