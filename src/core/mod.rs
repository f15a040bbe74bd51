//! Geometry primitives.
//!
//! Vector math and the pure collision module. Nothing in here knows about
//! entities or rooms.

pub mod vec2;
pub mod shape;

// Re-export core types
pub use vec2::Vec2;
pub use shape::{collide, Aabb, Circle, Collision, Contact, Shape};
