//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ember_gpu::{GpuContextBuilder, RendererOptions, TargetConfig};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::EmberApp;
use crate::engine::Engine;

/// How long the loop sleeps between polls while rendering is disabled.
const DISABLED_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Application configuration.
#[derive(Clone)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Renderer construction options.
    pub renderer_options: RendererOptions,
    /// Render target configuration.
    pub target: TargetConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Ember Engine".to_string(),
            width: 1280,
            height: 720,
            target_fps: None,
            vsync: true,
            validation: cfg!(debug_assertions),
            renderer_options: RendererOptions::empty(),
            target: TargetConfig::default(),
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the target FPS.
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self.target.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set renderer options.
    pub fn with_renderer_options(mut self, options: RendererOptions) -> Self {
        self.renderer_options = options;
        self
    }

    /// Set the render target configuration.
    pub fn with_target(mut self, target: TargetConfig) -> Self {
        self.target = target;
        self
    }
}

/// Run an EmberApp with the given configuration.
///
/// Initializes logging, creates the window and GPU context, and runs the
/// event loop until the application exits.
pub fn run_app<A: EmberApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
    };

    if let Err(e) = event_loop.run_app(&mut runner) {
        error!("Event loop error: {e}");
    }

    Ok(())
}

/// Internal application runner implementing winit's ApplicationHandler.
struct AppRunner<A: EmberApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
}

struct AppState<A: EmberApp> {
    engine: Engine,
    app: A,
    target_frame_time: Option<Duration>,
}

impl<A: EmberApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready");
            }
            Err(e) => {
                error!("Failed to initialize application: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.render_frame() {
                        error!("Render error: {e}");
                    }
                    state.engine.window.request_redraw();
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.handle_resize(size.width, size.height) {
                        error!("Resize error: {e}");
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.engine.window.request_redraw();
        }
    }
}

impl<A: EmberApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));

        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let mut builder = GpuContextBuilder::new()
            .app_name(&self.config.title)
            .validation(self.config.validation)
            .options(self.config.renderer_options);

        // Probe present support against the real window so the present
        // queue family is picked correctly.
        if let (Ok(display), Ok(handle)) = (window.display_handle(), window.window_handle()) {
            builder = builder.present_probe(display.as_raw(), handle.as_raw());
        }

        let gpu = builder.build()?;
        info!("GPU: {}", gpu.info().summary());

        let mut target_config = self.config.target;
        target_config.vsync = self.config.vsync;

        let mut engine = unsafe { Engine::new(window, gpu, target_config)? };
        let app = A::init(&mut engine)?;

        let target_frame_time = self
            .config
            .target_fps
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)));

        Ok(AppState {
            engine,
            app,
            target_frame_time,
        })
    }
}

impl<A: EmberApp> AppState<A> {
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();

        let dt = {
            let now = Instant::now();
            let dt = now.duration_since(self.engine.last_frame_time).as_secs_f32();
            self.engine.last_frame_time = now;
            dt
        };

        self.app.update(&mut self.engine, dt);

        // Flush any transfers the update staged before the draw submission.
        self.engine.submit_transfers()?;

        let Some(frame) = self.engine.begin_frame()? else {
            // Minimized or lost surface: stop presenting without spinning.
            thread::sleep(DISABLED_POLL_INTERVAL);
            return Ok(());
        };

        if let Err(e) = self.app.render(&mut self.engine, &frame) {
            // Free the slot so the next frame can begin cleanly.
            self.engine.abort_frame()?;
            return Err(e);
        }

        self.engine.present()?;

        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }

        Ok(())
    }

    fn handle_resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        self.engine.resize(width, height)?;

        if self.engine.rendering_enabled() {
            self.app.on_resize(&mut self.engine, width, height)?;
        }

        Ok(())
    }

    fn cleanup(&mut self) {
        info!(frames = self.engine.frame_count, "Shutting down");

        if let Err(e) = self.engine.gpu().wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        self.app.cleanup(&mut self.engine);

        if let Err(e) = self.engine.cleanup() {
            error!("Engine cleanup failed: {e}");
        }
    }
}
