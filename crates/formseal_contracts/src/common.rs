#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub enum ContractViolation {
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
    InvalidRange {
        field: &'static str,
        min: f64,
        max: f64,
        got: f64,
    },
    NotFinite {
        field: &'static str,
    },
    DuplicateId {
        field: &'static str,
        id: String,
    },
    UnknownReference {
        field: &'static str,
        id: String,
    },
}

impl std::fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { field, reason } => write!(f, "{field}: {reason}"),
            Self::InvalidRange {
                field,
                min,
                max,
                got,
            } => write!(f, "{field}: {got} outside [{min}, {max}]"),
            Self::NotFinite { field } => write!(f, "{field}: must be finite"),
            Self::DuplicateId { field, id } => write!(f, "{field}: duplicate id '{id}'"),
            Self::UnknownReference { field, id } => {
                write!(f, "{field}: references unknown id '{id}'")
            }
        }
    }
}

impl std::error::Error for ContractViolation {}

pub trait Validate {
    fn validate(&self) -> Result<(), ContractViolation>;
}

/// A score in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Confidence(f64);

impl Confidence {
    pub const ZERO: Self = Self(0.0);
    pub const ONE: Self = Self(1.0);

    pub fn new(value: f64) -> Result<Self, ContractViolation> {
        validate_unit_interval("confidence", value)?;
        Ok(Self(value))
    }

    /// Clamps into range; non-finite input collapses to zero.
    pub fn saturating(value: f64) -> Self {
        if !value.is_finite() {
            return Self::ZERO;
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl Validate for Confidence {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_unit_interval("confidence", self.0)
    }
}

pub fn validate_unit_interval(field: &'static str, value: f64) -> Result<(), ContractViolation> {
    if !value.is_finite() {
        return Err(ContractViolation::NotFinite { field });
    }
    if !(0.0..=1.0).contains(&value) {
        return Err(ContractViolation::InvalidRange {
            field,
            min: 0.0,
            max: 1.0,
            got: value,
        });
    }
    Ok(())
}

pub fn validate_required_text(
    field: &'static str,
    value: &str,
    max_len: usize,
) -> Result<(), ContractViolation> {
    if value.trim().is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not be empty",
        });
    }
    if value.len() > max_len {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "exceeds max length",
        });
    }
    Ok(())
}
