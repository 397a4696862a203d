#![forbid(unsafe_code)]

pub mod common;
pub mod form_config;
pub mod form_payload;
pub mod form_structure;
pub mod processor_wire;

pub use common::{Confidence, ContractViolation, SchemaVersion, Validate};
