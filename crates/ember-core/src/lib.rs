//! Core types and math for the Ember engine.
//!
//! This crate provides the foundational types used throughout the engine:
//! - 2D transforms with deferred-upload dirty tracking
//! - Vertex and color types shared by the scene and GPU layers

pub mod color;
pub mod transform;
pub mod vertex;

pub use color::Color;
pub use transform::{ModelUniform, Transform2d};
pub use vertex::Vertex;
