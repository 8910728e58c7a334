//! Configuration for the dialog usage manager
//!
//! [`DumConfig`] carries the local identity, timer constants and advertised
//! capabilities. Build it with [`DumConfig::builder`] or deserialize it from
//! JSON/TOML with serde.

pub mod dum_config;

pub use dum_config::{DumConfig, DumConfigBuilder};
