//! Scene assembly: a YAML description of meshes, instances and lights turned
//! into instance pools and light-manager entries.
//!
//! # Invariants
//! - One instance pool per mesh name the scene references.
//! - The map consumes [`Action`]s, never raw input events.
//! - Animation is a pure function of elapsed time and the configured base
//!   placement.

pub mod action;
pub mod config;
mod error;
pub mod map;

pub use action::Action;
pub use config::SceneConfig;
pub use error::SceneError;
pub use map::GameMap;

pub fn crate_info() -> &'static str {
    "lumen-scene v0.1.0"
}
