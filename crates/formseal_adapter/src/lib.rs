#![forbid(unsafe_code)]

pub mod secure_channel;

pub use secure_channel::{ChannelConfig, ChannelError, SecureChannel};
