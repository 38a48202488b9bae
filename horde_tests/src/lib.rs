//! Shared helpers for the integration, scenario, and soak tests.

pub mod harness;
