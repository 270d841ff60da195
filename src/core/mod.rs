//! Core relay logic: audio handling, event translation, the welcome flow,
//! and the upstream bridge.

pub mod audio;
pub mod translate;
pub mod upstream;
pub mod welcome;
