#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod align;
pub mod artifact;
pub mod encode;
pub mod session;

// Offline training subsystem
#[path = "../train/mod.rs"]
pub mod train;
