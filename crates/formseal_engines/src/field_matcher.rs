#![forbid(unsafe_code)]

//! Four-strategy field to element matching with weighted confidence.

use formseal_contracts::common::validate_unit_interval;
use formseal_contracts::form_payload::{Field, FieldType};
use formseal_contracts::form_structure::{Element, FormStructure, MatchResult};
use formseal_contracts::{Confidence, ContractViolation, Validate};
use tracing::debug;

use crate::selector::{
    element_attribute, reported_selector, selector_matches, synthesize_selector,
    xpath_to_selector,
};
use crate::similarity::{best_similarity, similarity};

pub const CANDIDACY_FLOOR: f64 = 0.3;
pub const ATTRIBUTE_SIMILARITY_MIN: f64 = 0.8;

pub const TYPE_EXACT: f64 = 0.9;
pub const TYPE_TEXT_LIKE: f64 = 0.7;
pub const TYPE_FLOOR: f64 = 0.1;

const LABEL_ATTRIBUTES: [&str; 2] = ["aria-label", "placeholder"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatcherConfig {
    pub label_weight: f64,
    pub attribute_weight: f64,
    pub selector_weight: f64,
    pub type_weight: f64,
    pub candidacy_floor: f64,
    pub attribute_similarity_min: f64,
}

impl MatcherConfig {
    pub fn mvp_v1() -> Self {
        Self {
            label_weight: 0.4,
            attribute_weight: 0.3,
            selector_weight: 0.2,
            type_weight: 0.1,
            candidacy_floor: CANDIDACY_FLOOR,
            attribute_similarity_min: ATTRIBUTE_SIMILARITY_MIN,
        }
    }
}

impl Validate for MatcherConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_unit_interval("matcher_config.label_weight", self.label_weight)?;
        validate_unit_interval("matcher_config.attribute_weight", self.attribute_weight)?;
        validate_unit_interval("matcher_config.selector_weight", self.selector_weight)?;
        validate_unit_interval("matcher_config.type_weight", self.type_weight)?;
        validate_unit_interval("matcher_config.candidacy_floor", self.candidacy_floor)?;
        validate_unit_interval(
            "matcher_config.attribute_similarity_min",
            self.attribute_similarity_min,
        )?;
        if self.type_weight == 0.0 {
            return Err(ContractViolation::InvalidValue {
                field: "matcher_config.type_weight",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

/// Per-strategy scores for one field/element pair. `None` marks a strategy
/// with nothing to compare on either side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyScores {
    pub label: Option<f64>,
    pub attribute: Option<f64>,
    pub selector: Option<f64>,
    pub type_compat: f64,
}

impl StrategyScores {
    pub fn has_evidence(&self) -> bool {
        self.label.is_some() || self.attribute.is_some() || self.selector.is_some()
    }

    /// Weighted average over the applicable strategies only. Type
    /// compatibility alone never yields a score.
    pub fn combined(&self, config: &MatcherConfig) -> Option<f64> {
        if !self.has_evidence() {
            return None;
        }
        let mut weighted = config.type_weight * self.type_compat;
        let mut total = config.type_weight;
        for (score, weight) in [
            (self.label, config.label_weight),
            (self.attribute, config.attribute_weight),
            (self.selector, config.selector_weight),
        ] {
            if let Some(score) = score {
                weighted += weight * score;
                total += weight;
            }
        }
        Some((weighted / total).clamp(0.0, 1.0))
    }
}

#[derive(Debug, Clone)]
pub struct FieldMatcher {
    config: MatcherConfig,
}

impl FieldMatcher {
    pub fn new(config: MatcherConfig) -> Result<Self, ContractViolation> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn mvp_v1() -> Self {
        Self {
            config: MatcherConfig::mvp_v1(),
        }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// One result per field, in field order. Pure: no hidden state, no
    /// randomness.
    pub fn match_fields(&self, fields: &[Field], form: &FormStructure) -> Vec<MatchResult> {
        let results = fields
            .iter()
            .map(|field| self.match_field(field, form))
            .collect::<Vec<_>>();
        debug!(
            field_count = fields.len(),
            element_count = form.elements.len(),
            matched_count = results.iter().filter(|result| result.matched).count(),
            "field matching completed"
        );
        results
    }

    pub fn match_field(&self, field: &Field, form: &FormStructure) -> MatchResult {
        let mut best: Option<(usize, f64)> = None;
        for (index, element) in form.elements.iter().enumerate() {
            let Some(confidence) = self.score(field, element).combined(&self.config) else {
                continue;
            };
            if confidence < self.config.candidacy_floor {
                continue;
            }
            // strict comparison keeps the first-seen element on ties
            if best.map_or(true, |(_, top)| confidence > top) {
                best = Some((index, confidence));
            }
        }

        let Some((index, confidence)) = best else {
            return MatchResult::unmatched(field.id.clone(), Confidence::ZERO);
        };
        let confidence = Confidence::saturating(confidence);
        if confidence.value() < field.match_rules.confidence_threshold {
            return MatchResult::unmatched(field.id.clone(), confidence);
        }
        MatchResult {
            field_id: field.id.clone(),
            matched: true,
            confidence,
            selector: reported_selector(form, index),
        }
    }

    pub fn score(&self, field: &Field, element: &Element) -> StrategyScores {
        StrategyScores {
            label: label_score(field, element),
            attribute: attribute_score(field, element, self.config.attribute_similarity_min),
            selector: selector_score(field, element),
            type_compat: type_compatibility(field.field_type, element),
        }
    }
}

/// Matches with the default weights and floors.
pub fn match_fields(fields: &[Field], form: &FormStructure) -> Vec<MatchResult> {
    FieldMatcher::mvp_v1().match_fields(fields, form)
}

fn label_score(field: &Field, element: &Element) -> Option<f64> {
    if field.match_rules.labels.is_empty() {
        return None;
    }
    let texts = element
        .label
        .as_deref()
        .into_iter()
        .chain(
            LABEL_ATTRIBUTES
                .iter()
                .filter_map(|name| element_attribute(element, name)),
        )
        .filter(|text| !text.trim().is_empty())
        .collect::<Vec<_>>();
    if texts.is_empty() {
        return None;
    }
    let best = field
        .match_rules
        .labels
        .iter()
        .map(|label| best_similarity(label, texts.iter().copied()))
        .fold(0.0, f64::max);
    Some(best)
}

fn attribute_score(field: &Field, element: &Element, min_similarity: f64) -> Option<f64> {
    let rules = &field.match_rules.attributes;
    if rules.is_empty() {
        return None;
    }
    let mut present = 0usize;
    let mut agreeing = 0usize;
    for (key, expected) in rules {
        if let Some(actual) = element_attribute(element, key) {
            present += 1;
            if similarity(expected, actual) > min_similarity {
                agreeing += 1;
            }
        }
    }
    if present == 0 {
        return None;
    }
    Some(agreeing as f64 / rules.len() as f64)
}

fn selector_score(field: &Field, element: &Element) -> Option<f64> {
    let mut candidates = field
        .match_rules
        .selectors
        .iter()
        .filter(|selector| !selector.trim().is_empty())
        .cloned()
        .collect::<Vec<_>>();
    if let Some(translated) = field.match_rules.xpath.as_deref().and_then(xpath_to_selector) {
        candidates.push(translated);
    }
    if candidates.is_empty() {
        return None;
    }
    if candidates
        .iter()
        .any(|selector| selector_matches(selector, element))
    {
        return Some(1.0);
    }
    let synthesized = synthesize_selector(element);
    Some(best_similarity(
        &synthesized,
        candidates.iter().map(String::as_str),
    ))
}

/// Fixed lookup from field type to the element shape that carries it.
pub fn type_compatibility(field_type: FieldType, element: &Element) -> f64 {
    let tag = element.tag_name.trim().to_ascii_lowercase();
    let input_type = element
        .input_type
        .as_deref()
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty());
    let is_input = |types: &[&str]| {
        tag == "input" && types.contains(&input_type.as_deref().unwrap_or("text"))
    };
    let plain_text = is_input(&["text", "search"]);

    let (exact, text_like) = match field_type {
        FieldType::Text => (plain_text, tag == "textarea"),
        FieldType::Textarea => (tag == "textarea", plain_text),
        FieldType::Select => (tag == "select", false),
        FieldType::Radio => (is_input(&["radio"]), false),
        FieldType::Checkbox => (is_input(&["checkbox"]), false),
        FieldType::Email => (is_input(&["email"]), plain_text),
        FieldType::Phone => (is_input(&["tel"]), plain_text),
        FieldType::Number => (is_input(&["number", "range"]), plain_text),
        FieldType::Date => (is_input(&["date", "datetime-local", "month"]), plain_text),
        FieldType::Password => (is_input(&["password"]), false),
        FieldType::File => (is_input(&["file"]), false),
        FieldType::Hidden => (is_input(&["hidden"]), false),
        FieldType::Address => (false, plain_text || tag == "textarea"),
        FieldType::Ssn | FieldType::Name | FieldType::CreditCard | FieldType::Custom => {
            (false, plain_text)
        }
    };
    if exact {
        TYPE_EXACT
    } else if text_like {
        TYPE_TEXT_LIKE
    } else {
        TYPE_FLOOR
    }
}
