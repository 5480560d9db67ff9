//! `EmberApp` trait definition.

use crate::engine::Engine;
use ember_gpu::FrameContext;
use winit::event::WindowEvent;

/// Trait for Ember applications.
///
/// The framework handles window creation, GPU initialization, the render
/// target and the event loop; the application fills in scene setup,
/// per-frame updates and draw recording.
pub trait EmberApp: Sized {
    /// Initialize the application. Called once after the engine is ready.
    fn init(engine: &mut Engine) -> anyhow::Result<Self>;

    /// Update application state. Called every frame before rendering with
    /// the time since the previous update in seconds.
    fn update(&mut self, engine: &mut Engine, dt: f32);

    /// Record draw commands for one frame. The render pass is already
    /// open on the frame's command buffer.
    fn render(&mut self, engine: &mut Engine, frame: &FrameContext) -> anyhow::Result<()>;

    /// Handle a window resize. The framework has already recreated the
    /// render target; recreate size-dependent resources here.
    #[allow(unused_variables)]
    fn on_resize(&mut self, engine: &mut Engine, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle a window event. Return `true` to consume it.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Release application resources. The GPU is idle when called.
    #[allow(unused_variables)]
    fn cleanup(&mut self, engine: &mut Engine) {}
}
