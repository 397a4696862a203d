#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::common::validate_required_text;
use crate::{Confidence, ContractViolation, Validate};

pub const MAX_ELEMENTS_PER_FORM: usize = 4_096;

/// One element of a target form as reported by the snapshot collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub tag_name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Element {
    pub fn tag(tag_name: &str) -> Self {
        Self {
            tag_name: tag_name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, input_type: &str) -> Self {
        self.input_type = Some(input_type.to_string());
        self
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_class(mut self, class_name: &str) -> Self {
        self.class_name = Some(class_name.to_string());
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }
}

impl Validate for Element {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_required_text("element.tag_name", &self.tag_name, 64)
    }
}

/// Read-only snapshot of a form's elements, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormStructure {
    pub elements: Vec<Element>,
}

impl FormStructure {
    pub fn v1(elements: Vec<Element>) -> Result<Self, ContractViolation> {
        let form = Self { elements };
        form.validate()?;
        Ok(form)
    }
}

impl Validate for FormStructure {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.elements.len() > MAX_ELEMENTS_PER_FORM {
            return Err(ContractViolation::InvalidValue {
                field: "form_structure.elements",
                reason: "exceeds max element count",
            });
        }
        for element in &self.elements {
            element.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub field_id: String,
    pub matched: bool,
    pub confidence: Confidence,
    pub selector: Option<String>,
}

impl MatchResult {
    pub fn unmatched(field_id: String, confidence: Confidence) -> Self {
        Self {
            field_id,
            matched: false,
            confidence,
            selector: None,
        }
    }
}

impl Validate for MatchResult {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.confidence.validate()?;
        if self.matched && self.selector.is_none() {
            return Err(ContractViolation::InvalidValue {
                field: "match_result.selector",
                reason: "must be present when matched",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_form_structure_01_element_parses_from_snapshot_json() {
        let form: FormStructure = serde_json::from_value(serde_json::json!({
            "elements": [
                { "tagName": "INPUT", "type": "email", "id": "mail", "className": "a b",
                  "attributes": { "autocomplete": "email" }, "label": "Email" },
                { "tagName": "TEXTAREA" }
            ]
        }))
        .unwrap();
        assert!(form.validate().is_ok());
        assert_eq!(form.elements[0].input_type.as_deref(), Some("email"));
        assert!(form.elements[1].attributes.is_empty());
    }

    #[test]
    fn at_form_structure_02_match_result_serializes_null_selector() {
        let out = MatchResult::unmatched("a".to_string(), Confidence::ZERO);
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["fieldId"], "a");
        assert!(json["selector"].is_null());
        assert_eq!(json["matched"], false);
    }

    #[test]
    fn at_form_structure_03_matched_result_requires_selector() {
        let out = MatchResult {
            field_id: "a".to_string(),
            matched: true,
            confidence: Confidence::ONE,
            selector: None,
        };
        assert!(out.validate().is_err());
    }
}
