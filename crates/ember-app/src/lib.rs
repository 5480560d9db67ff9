//! Application framework for the Ember engine.
//!
//! Provides the `EmberApp` trait, the engine context and the winit event
//! loop runner.

pub mod app;
pub mod engine;
pub mod runner;

pub use app::EmberApp;
pub use engine::Engine;
pub use runner::{run_app, AppConfig};

pub use ember_gpu::FrameContext;
