//! Mesh sources for the render core.
//!
//! Shapes are either generated procedurally or imported from OBJ files, and
//! looked up by name through an explicit [`ShapeRegistry`] built at startup.
//!
//! # Invariants
//! - Procedural shapes fit the unit cube centered on the origin (extent ±0.5).
//! - Triangles wind counter-clockwise seen from outside the shape.
//! - A source that yields no geometry is an error, never an empty mesh.

mod error;
pub mod obj;
pub mod registry;
pub mod shapes;

pub use error::AssetError;
pub use registry::{ShapeRegistry, ShapeSource};
pub use shapes::Shape;

pub fn crate_info() -> &'static str {
    "lumen-assets v0.1.0"
}
