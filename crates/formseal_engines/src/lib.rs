#![forbid(unsafe_code)]

pub mod crypto_gateway;
pub mod field_matcher;
pub mod field_rules;
pub mod schema;
pub mod selector;
pub mod similarity;
