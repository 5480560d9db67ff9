//! Geometry generation for the built-in renderable shapes.

use ember_core::{Color, Vertex};
use glam::{Vec2, Vec3};

/// Geometry of a renderable.
#[derive(Debug, Clone)]
pub enum Shape {
    /// Axis-aligned textured quad.
    Sprite {
        width: f32,
        height: f32,
        color: Color,
    },
    /// Convex polygon, triangulated as a fan around the first point.
    Polygon { points: Vec<Vec2>, color: Color },
    /// Grid of tiles, one textured quad per tile.
    Tilemap {
        columns: u32,
        rows: u32,
        tile_width: f32,
        tile_height: f32,
        color: Color,
    },
}

impl Shape {
    pub fn sprite(width: f32, height: f32, color: Color) -> Self {
        Self::Sprite {
            width,
            height,
            color,
        }
    }

    pub fn polygon(points: Vec<Vec2>, color: Color) -> Self {
        assert!(points.len() >= 3, "a polygon needs at least three points");
        Self::Polygon { points, color }
    }

    pub fn tilemap(columns: u32, rows: u32, tile_width: f32, tile_height: f32, color: Color) -> Self {
        assert!(columns > 0 && rows > 0, "a tilemap needs at least one tile");
        Self::Tilemap {
            columns,
            rows,
            tile_width,
            tile_height,
            color,
        }
    }

    /// Generate interleaved vertices.
    pub fn vertices(&self) -> Vec<Vertex> {
        match self {
            Self::Sprite {
                width,
                height,
                color,
            } => vec![
                Vertex::new(Vec3::new(0.0, 0.0, 0.0), *color, Vec2::new(0.0, 0.0)),
                Vertex::new(Vec3::new(*width, 0.0, 0.0), *color, Vec2::new(1.0, 0.0)),
                Vertex::new(Vec3::new(*width, *height, 0.0), *color, Vec2::new(1.0, 1.0)),
                Vertex::new(Vec3::new(0.0, *height, 0.0), *color, Vec2::new(0.0, 1.0)),
            ],
            Self::Polygon { points, color } => points
                .iter()
                .map(|p| Vertex::new(p.extend(0.0), *color, Vec2::ZERO))
                .collect(),
            Self::Tilemap {
                columns,
                rows,
                tile_width,
                tile_height,
                color,
            } => {
                let mut vertices = Vec::with_capacity((columns * rows * 4) as usize);
                for row in 0..*rows {
                    for col in 0..*columns {
                        let x = col as f32 * tile_width;
                        let y = row as f32 * tile_height;
                        vertices.extend_from_slice(&[
                            Vertex::new(Vec3::new(x, y, 0.0), *color, Vec2::new(0.0, 0.0)),
                            Vertex::new(
                                Vec3::new(x + tile_width, y, 0.0),
                                *color,
                                Vec2::new(1.0, 0.0),
                            ),
                            Vertex::new(
                                Vec3::new(x + tile_width, y + tile_height, 0.0),
                                *color,
                                Vec2::new(1.0, 1.0),
                            ),
                            Vertex::new(
                                Vec3::new(x, y + tile_height, 0.0),
                                *color,
                                Vec2::new(0.0, 1.0),
                            ),
                        ]);
                    }
                }
                vertices
            }
        }
    }

    /// Generate triangle-list indices matching `vertices()`.
    pub fn indices(&self) -> Vec<u32> {
        match self {
            Self::Sprite { .. } => vec![0, 1, 2, 2, 3, 0],
            Self::Polygon { points, .. } => {
                let mut indices = Vec::with_capacity((points.len() - 2) * 3);
                for i in 1..points.len() as u32 - 1 {
                    indices.extend_from_slice(&[0, i, i + 1]);
                }
                indices
            }
            Self::Tilemap { columns, rows, .. } => {
                let mut indices = Vec::with_capacity((columns * rows * 6) as usize);
                for tile in 0..columns * rows {
                    let base = tile * 4;
                    indices.extend_from_slice(&[
                        base,
                        base + 1,
                        base + 2,
                        base + 2,
                        base + 3,
                        base,
                    ]);
                }
                indices
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sprite_is_a_quad() {
        let shape = Shape::sprite(32.0, 16.0, Color::WHITE);
        let vertices = shape.vertices();

        assert_eq!(vertices.len(), 4);
        assert_eq!(vertices[2].position, Vec3::new(32.0, 16.0, 0.0));
        assert_eq!(vertices[2].texcoord, Vec2::new(1.0, 1.0));
        assert_eq!(shape.indices().len(), 6);
    }

    #[test]
    fn polygon_fans_around_first_point() {
        let shape = Shape::polygon(
            vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(1.0, 0.0),
                Vec2::new(1.0, 1.0),
                Vec2::new(0.0, 1.0),
                Vec2::new(-0.5, 0.5),
            ],
            Color::WHITE,
        );

        let indices = shape.indices();
        assert_eq!(indices.len(), 9);
        assert_eq!(&indices[..3], &[0, 1, 2]);
        assert_eq!(&indices[6..], &[0, 3, 4]);
    }

    #[test]
    #[should_panic(expected = "at least three")]
    fn degenerate_polygon_is_rejected() {
        Shape::polygon(vec![Vec2::ZERO, Vec2::ONE], Color::WHITE);
    }

    #[test]
    fn tilemap_emits_one_quad_per_tile() {
        let shape = Shape::tilemap(3, 2, 16.0, 16.0, Color::WHITE);
        let vertices = shape.vertices();
        let indices = shape.indices();

        assert_eq!(vertices.len(), 3 * 2 * 4);
        assert_eq!(indices.len(), 3 * 2 * 6);

        // Second tile of the first row starts one tile width to the right.
        assert_eq!(vertices[4].position, Vec3::new(16.0, 0.0, 0.0));
        // Its indices reference its own four vertices.
        assert_eq!(&indices[6..12], &[4, 5, 6, 6, 7, 4]);
    }

    #[test]
    #[should_panic(expected = "at least one tile")]
    fn empty_tilemap_is_rejected() {
        Shape::tilemap(0, 2, 16.0, 16.0, Color::WHITE);
    }
}
