//! Route definitions.

pub mod relay;
