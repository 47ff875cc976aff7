//! Fuzz harness selection and execution.

pub mod runner;
pub mod targets;
