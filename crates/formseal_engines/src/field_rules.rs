#![forbid(unsafe_code)]

//! Per-field value checks (`required`, `pattern`, length and numeric bounds).
//! Messages name the field and the rule; they never echo the value.

use formseal_contracts::form_payload::{
    DecryptedFormPayload, Field, FieldValue, FormOptions, ValidationBehavior,
};
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRuleViolation {
    pub field_id: String,
    pub rule: &'static str,
    pub message: String,
}

impl FieldRuleViolation {
    fn new(field: &Field, rule: &'static str, detail: &str) -> Self {
        Self {
            field_id: field.id.clone(),
            rule,
            message: format!("Field {} {detail}", field.id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldCheckReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl FieldCheckReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs every field's rules and files the outcome under
/// `options.validationBehavior`. Option inconsistencies are always warnings.
pub fn check_payload(payload: &DecryptedFormPayload) -> FieldCheckReport {
    let mut report = match payload.options.validation_behavior {
        ValidationBehavior::Ignore => FieldCheckReport::default(),
        behavior => {
            let messages = payload
                .fields
                .iter()
                .flat_map(check_field)
                .map(|violation| violation.message)
                .collect::<Vec<_>>();
            if behavior == ValidationBehavior::Strict {
                FieldCheckReport {
                    errors: messages,
                    warnings: Vec::new(),
                }
            } else {
                FieldCheckReport {
                    errors: Vec::new(),
                    warnings: messages,
                }
            }
        }
    };
    report.warnings.extend(option_warnings(&payload.options));
    report
}

fn option_warnings(options: &FormOptions) -> Vec<String> {
    let mut out = Vec::new();
    let has_selector = options
        .submit_selector
        .as_deref()
        .is_some_and(|selector| !selector.trim().is_empty());
    if options.auto_submit && !has_selector {
        out.push("Option autoSubmit is set without submitSelector".to_string());
    }
    out
}

pub fn check_field(field: &Field) -> Vec<FieldRuleViolation> {
    let rules = &field.validation;
    let mut out = Vec::new();

    if field.value.is_empty() {
        if rules.required == Some(true) {
            out.push(FieldRuleViolation::new(field, "required", "is required"));
        }
        return out;
    }

    if let Some(pattern) = &rules.pattern {
        match Regex::new(pattern) {
            Ok(re) => {
                let ok = match &field.value {
                    FieldValue::Text(text) => re.is_match(text),
                    FieldValue::Number(number) => re.is_match(&number.to_string()),
                    FieldValue::List(items) => items.iter().all(|item| re.is_match(item)),
                    FieldValue::Flag(_) => true,
                };
                if !ok {
                    out.push(FieldRuleViolation::new(
                        field,
                        "pattern",
                        "does not match the required pattern",
                    ));
                }
            }
            Err(_) => out.push(FieldRuleViolation::new(
                field,
                "pattern",
                "declares an invalid pattern",
            )),
        }
    }

    let length = match &field.value {
        FieldValue::Text(text) => Some(text.chars().count()),
        FieldValue::List(items) => Some(items.len()),
        FieldValue::Number(_) | FieldValue::Flag(_) => None,
    };
    if let Some(length) = length {
        if rules.min_length.is_some_and(|min| length < min) {
            out.push(FieldRuleViolation::new(field, "minLength", "is shorter than minLength"));
        }
        if rules.max_length.is_some_and(|max| length > max) {
            out.push(FieldRuleViolation::new(field, "maxLength", "is longer than maxLength"));
        }
    }

    if rules.min.is_some() || rules.max.is_some() {
        let numeric = match &field.value {
            FieldValue::Number(number) => Some(*number),
            FieldValue::Text(text) => text.trim().parse::<f64>().ok(),
            FieldValue::Flag(_) | FieldValue::List(_) => None,
        };
        match numeric {
            Some(number) => {
                if rules.min.is_some_and(|min| number < min) {
                    out.push(FieldRuleViolation::new(field, "min", "is below min"));
                }
                if rules.max.is_some_and(|max| number > max) {
                    out.push(FieldRuleViolation::new(field, "max", "is above max"));
                }
            }
            None => out.push(FieldRuleViolation::new(field, "numeric", "is not numeric")),
        }
    }

    out
}
