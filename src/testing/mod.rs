//! Testing utilities and mock implementations
//!
//! Mocks for driving runs without an MQTT broker.

pub mod mocks;

pub use mocks::*;
