//! 2D transform state with deferred-upload dirty tracking.
//!
//! Scene mutation may happen on any thread at any rate; the GPU-visible
//! write happens exactly once per change batch on the submission thread.
//! Every mutator only marks the transform dirty, and [`Transform2d::take_upload`]
//! hands out the composed matrix exactly once until the next mutation.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

const TAU: f32 = std::f32::consts::PI * 2.0;

/// Uniform data written to the per-renderable GPU buffer.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct ModelUniform {
    /// Composed model matrix.
    pub model: Mat4,
}

/// Position/origin/scale/rotation of a drawable or a camera.
#[derive(Clone, Copy, Debug)]
pub struct Transform2d {
    position: Vec3,
    origin: Vec3,
    scale: f32,
    rotation: f32,
    needs_upload: bool,
}

impl Default for Transform2d {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            origin: Vec3::ZERO,
            scale: 1.0,
            rotation: 0.0,
            // A fresh transform has never been pushed to the GPU.
            needs_upload: true,
        }
    }
}

impl Transform2d {
    /// Create a transform at the given position.
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Translate by a relative offset.
    pub fn move_by(&mut self, relative: Vec3) {
        self.position += relative;
        self.mark_dirty();
    }

    /// Move to an absolute position.
    pub fn move_to(&mut self, position: Vec3) {
        self.position = position;
        self.mark_dirty();
    }

    /// Set the local origin (pivot for rotation and scaling).
    pub fn set_origin(&mut self, origin: Vec3) {
        self.origin = origin;
        self.mark_dirty();
    }

    /// Translate the local origin by a relative offset.
    pub fn move_origin(&mut self, relative: Vec3) {
        self.origin += relative;
        self.mark_dirty();
    }

    /// Rotate by a relative angle in radians (around Z).
    pub fn rotate(&mut self, angle: f32) {
        self.rotation = (self.rotation + angle) % TAU;
        self.mark_dirty();
    }

    /// Set the absolute rotation in radians (around Z).
    pub fn set_rotation(&mut self, angle: f32) {
        self.rotation = angle % TAU;
        self.mark_dirty();
    }

    /// Add to the uniform scale factor.
    pub fn scale_by(&mut self, scale: f32) {
        self.scale += scale;
        self.mark_dirty();
    }

    /// Set the uniform scale factor.
    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
        self.mark_dirty();
    }

    /// Mark the transform as diverged from its GPU-resident copy.
    pub fn mark_dirty(&mut self) {
        self.needs_upload = true;
    }

    /// Whether the GPU copy is stale.
    pub fn needs_upload(&self) -> bool {
        self.needs_upload
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    /// Compose the model matrix.
    ///
    /// The order is a fixed contract: scale, then translate to the position,
    /// then rotate around Z, then translate by the negated origin. Vertices
    /// are therefore pivoted around `origin` before being placed in the world.
    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_scale(Vec3::splat(self.scale))
            * Mat4::from_translation(self.position)
            * Mat4::from_rotation_z(self.rotation)
            * Mat4::from_translation(-self.origin)
    }

    /// Take the pending upload, if any.
    ///
    /// Returns the composed uniform exactly once after a batch of mutations
    /// and clears the dirty flag; returns `None` until the next mutation.
    pub fn take_upload(&mut self) -> Option<ModelUniform> {
        if std::mem::take(&mut self.needs_upload) {
            Some(ModelUniform {
                model: self.model_matrix(),
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn upload_is_taken_once_per_change_batch() {
        let mut transform = Transform2d::default();

        // Fresh transform needs an initial upload.
        assert!(transform.take_upload().is_some());
        assert!(transform.take_upload().is_none());

        // A batch of mutations yields exactly one upload.
        transform.move_by(Vec3::new(1.0, 0.0, 0.0));
        transform.rotate(0.5);
        transform.set_scale(2.0);
        assert!(transform.take_upload().is_some());
        assert!(transform.take_upload().is_none());
    }

    #[test]
    fn upload_reflects_final_composed_state() {
        let mut transform = Transform2d::default();
        transform.take_upload();

        transform.move_to(Vec3::new(1.0, 1.0, 0.0));
        transform.move_to(Vec3::new(5.0, 5.0, 0.0));

        let uniform = transform.take_upload().unwrap();
        let mapped = uniform.model.transform_point3(Vec3::ZERO);
        assert_relative_eq!(mapped.x, 5.0);
        assert_relative_eq!(mapped.y, 5.0);
        assert_relative_eq!(mapped.z, 0.0);
    }

    #[test]
    fn composition_order_is_fixed() {
        // Origin translation is innermost: a vertex at the origin pivots
        // to zero before rotation and placement.
        let mut transform = Transform2d::default();
        transform.set_origin(Vec3::new(1.0, 0.0, 0.0));
        transform.set_rotation(std::f32::consts::FRAC_PI_2);
        transform.move_to(Vec3::new(10.0, 0.0, 0.0));

        let m = transform.model_matrix();
        // (1,0,0) -> -origin -> (0,0,0) -> rotate -> (0,0,0) -> place -> (10,0,0)
        let pivot = m.transform_point3(Vec3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(pivot.x, 10.0, epsilon = 1e-5);
        assert_relative_eq!(pivot.y, 0.0, epsilon = 1e-5);

        // (2,0,0) -> (1,0,0) -> rotate 90 degrees -> (0,1,0) -> (10,1,0)
        let rotated = m.transform_point3(Vec3::new(2.0, 0.0, 0.0));
        assert_relative_eq!(rotated.x, 10.0, epsilon = 1e-5);
        assert_relative_eq!(rotated.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn scale_is_outermost() {
        // Scale applies after placement, so the translated position scales too.
        let mut transform = Transform2d::default();
        transform.set_scale(2.0);
        transform.move_to(Vec3::new(3.0, 0.0, 0.0));

        let mapped = transform.model_matrix().transform_point3(Vec3::ZERO);
        assert_relative_eq!(mapped.x, 6.0, epsilon = 1e-5);
    }

    #[test]
    fn rotation_wraps_to_full_turn() {
        let mut transform = Transform2d::default();
        transform.set_rotation(TAU + 1.0);
        assert_relative_eq!(transform.rotation(), 1.0, epsilon = 1e-5);
    }
}
