//! # Connection registry
//!
//! Optional name → connection table for processes running several
//! connections side by side.

pub mod registry;

pub use registry::{ConnectionRegistry, RegistrationGuard};
