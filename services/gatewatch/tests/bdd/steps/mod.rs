//! BDD step definitions for gatewatch

pub mod lifecycle_steps;
