//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod identity;
pub mod telemetry;
