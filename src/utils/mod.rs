//! Shared utilities.

pub mod bootstrap;
