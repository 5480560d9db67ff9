//! Vertex layout shared by the scene layer and the GPU pipelines.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

use crate::color::Color;

/// Interleaved vertex: position, tint color, texture coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Vertex {
    pub position: Vec3,
    pub color: Color,
    pub texcoord: Vec2,
}

impl Vertex {
    pub const fn new(position: Vec3, color: Color, texcoord: Vec2) -> Self {
        Self {
            position,
            color,
            texcoord,
        }
    }

    /// Byte offset of the color attribute.
    pub const COLOR_OFFSET: u32 = std::mem::size_of::<Vec3>() as u32;
    /// Byte offset of the texcoord attribute.
    pub const TEXCOORD_OFFSET: u32 = Self::COLOR_OFFSET + std::mem::size_of::<Color>() as u32;
    /// Stride of one vertex.
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;
}
