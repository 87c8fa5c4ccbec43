//! Shared types and models for the POS back-office
//!
//! This crate contains the domain rules shared between the backend, the
//! browser front-end (via WASM), and other components of the system.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
