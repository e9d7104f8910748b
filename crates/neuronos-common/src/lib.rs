//! Common types for the NeuronOS ternary hardware-abstraction layer
//!
//! This crate provides the foundational pieces shared by the probe and kernel
//! crates: the error hierarchy, the hardware capability bitmask, and the HAL
//! configuration.

pub mod capability;
pub mod config;
pub mod error;

pub use capability::CapabilityMask;
pub use config::{BackendPreference, HalConfig};
pub use error::*;
