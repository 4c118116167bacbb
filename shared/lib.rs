#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod artifact;
pub mod config;
pub mod files;
pub mod types;

#[path = "../store/mod.rs"]
pub mod store;

#[path = "../score/mod.rs"]
pub mod score;

#[path = "../matrix/mod.rs"]
pub mod matrix;

#[path = "../stats/mod.rs"]
pub mod stats;

#[path = "../coverage/mod.rs"]
pub mod coverage;

#[path = "../pipeline/mod.rs"]
pub mod pipeline;
