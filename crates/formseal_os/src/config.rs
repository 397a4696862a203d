#![forbid(unsafe_code)]

use std::env;

use formseal_contracts::{ContractViolation, Validate};
use formseal_engines::crypto_gateway::PBKDF2_ITERATIONS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    pub mailbox_capacity: usize,
    pub max_retained_payloads: usize,
    pub min_kdf_iterations: u32,
}

impl ProcessorConfig {
    pub fn mvp_v1() -> Self {
        Self {
            mailbox_capacity: 64,
            max_retained_payloads: 16,
            min_kdf_iterations: PBKDF2_ITERATIONS,
        }
    }

    /// Reads `FORMSEAL_*` overrides; out-of-range or unparsable values keep
    /// the default.
    pub fn from_env() -> Self {
        let defaults = Self::mvp_v1();
        Self {
            mailbox_capacity: env_parse("FORMSEAL_MAILBOX_CAPACITY", 1..=4_096)
                .unwrap_or(defaults.mailbox_capacity),
            max_retained_payloads: env_parse("FORMSEAL_MAX_RETAINED_PAYLOADS", 1..=1_024)
                .unwrap_or(defaults.max_retained_payloads),
            min_kdf_iterations: env_parse("FORMSEAL_MIN_KDF_ITERATIONS", 1_000..=10_000_000)
                .unwrap_or(defaults.min_kdf_iterations),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::mvp_v1()
    }
}

impl Validate for ProcessorConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if !(1..=4_096).contains(&self.mailbox_capacity) {
            return Err(ContractViolation::InvalidValue {
                field: "processor_config.mailbox_capacity",
                reason: "must be within 1..=4096",
            });
        }
        if !(1..=1_024).contains(&self.max_retained_payloads) {
            return Err(ContractViolation::InvalidValue {
                field: "processor_config.max_retained_payloads",
                reason: "must be within 1..=1024",
            });
        }
        if self.min_kdf_iterations == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "processor_config.min_kdf_iterations",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

pub fn env_parse<T>(key: &str, range: std::ops::RangeInclusive<T>) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<T>().ok())
        .filter(|value| range.contains(value))
}

pub fn env_flag(key: &str) -> Option<bool> {
    match env::var(key)
        .ok()
        .as_deref()
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("1" | "true" | "yes" | "on") => Some(true),
        Some("0" | "false" | "no" | "off") => Some(false),
        _ => None,
    }
}
