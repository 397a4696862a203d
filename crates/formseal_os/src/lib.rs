#![forbid(unsafe_code)]

pub mod config;
pub mod host;
pub mod payload_store;
pub mod processor;
pub mod telemetry;

pub use config::ProcessorConfig;
pub use host::ProcessorHandle;
pub use processor::{ProcessorError, ProcessorRuntime};
