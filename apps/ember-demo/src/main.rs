//! Sprite rendering demo.
//!
//! Draws a pair of sprites orbiting the window center through one view.

use anyhow::Context as _;
use ember_app::{run_app, AppConfig, EmberApp, Engine, FrameContext};
use ember_core::Color;
use ember_scene::{RenderTechnique, Renderable, Shape, TechniqueConfig, View};
use glam::Vec3;

struct DemoApp {
    view: Option<View>,
    technique: Option<RenderTechnique>,
    sprites: Vec<Renderable>,
    elapsed: f32,
}

impl EmberApp for DemoApp {
    fn init(engine: &mut Engine) -> anyhow::Result<Self> {
        let extent = engine.target().extent();

        let view = unsafe { View::new(engine.gpu(), extent.width, extent.height) }
            .context("creating view")?;

        let technique = unsafe {
            RenderTechnique::new(
                engine.gpu(),
                engine.target().render_pass(),
                TechniqueConfig {
                    vertex_shader: ember_shaders::sprite_vertex_shader().to_vec(),
                    fragment_shader: ember_shaders::sprite_fragment_shader().to_vec(),
                    samples: engine.target().sample_count(),
                    ..TechniqueConfig::default()
                },
            )
        }
        .context("creating sprite technique")?;

        let mut sprites = Vec::new();
        for color in [Color::from_rgb8(220, 90, 60), Color::from_rgb8(70, 140, 220)] {
            let shape = Shape::sprite(96.0, 96.0, color);
            let mut sprite = unsafe { Renderable::new(engine.gpu(), &shape) }
                .context("creating sprite")?;
            sprite.transform_mut().set_origin(Vec3::new(48.0, 48.0, 0.0));
            sprites.push(sprite);
        }

        tracing::info!(sprites = sprites.len(), "Demo scene ready");

        Ok(Self {
            view: Some(view),
            technique: Some(technique),
            sprites,
            elapsed: 0.0,
        })
    }

    fn update(&mut self, engine: &mut Engine, dt: f32) {
        self.elapsed += dt;

        let extent = engine.target().extent();
        let center = Vec3::new(extent.width as f32 / 2.0, extent.height as f32 / 2.0, 0.0);

        for (i, sprite) in self.sprites.iter_mut().enumerate() {
            let phase = self.elapsed + i as f32 * std::f32::consts::PI;
            let orbit = Vec3::new(phase.cos(), phase.sin(), 0.0) * 150.0;
            let transform = sprite.transform_mut();
            transform.move_to(center + orbit);
            transform.rotate(dt);
        }
    }

    fn render(&mut self, engine: &mut Engine, frame: &FrameContext) -> anyhow::Result<()> {
        let view = self.view.as_mut().context("view missing")?;
        let technique = self.technique.as_ref().context("technique missing")?;

        view.upload().context("uploading view")?;
        for sprite in &mut self.sprites {
            sprite.upload().context("uploading sprite")?;
        }

        unsafe {
            technique.bind(
                engine.gpu(),
                frame.command_buffer,
                view.viewport(),
                view.scissor(),
            );

            for sprite in &mut self.sprites {
                sprite.bind_to_view(engine.gpu(), technique, view)?;
            }
            view.mark_descriptors_clean();

            for sprite in &self.sprites {
                sprite.draw(engine.gpu(), frame.command_buffer, technique, view);
            }
        }

        Ok(())
    }

    fn on_resize(&mut self, _engine: &mut Engine, width: u32, height: u32) -> anyhow::Result<()> {
        if let Some(view) = self.view.as_mut() {
            view.fit(width, height);
        }
        Ok(())
    }

    fn cleanup(&mut self, engine: &mut Engine) {
        unsafe {
            if let Some(technique) = self.technique.take() {
                for sprite in self.sprites.drain(..) {
                    if let Err(e) = sprite.destroy(engine.gpu(), &technique) {
                        tracing::error!("Failed to destroy sprite: {e}");
                    }
                }
                technique.destroy(engine.gpu());
            }
            if let Some(view) = self.view.take() {
                view.destroy(engine.gpu());
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    run_app::<DemoApp>(
        AppConfig::new("Ember Sprite Demo")
            .with_size(1280, 720)
            .with_vsync(true),
    )
}
