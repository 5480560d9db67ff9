//! Views, renderables and the asynchronous upload protocol for the Ember
//! engine.
//!
//! Scene-side mutation only sets dirty flags; GPU-visible writes happen
//! exactly once per frame through `upload`, on the submission thread.

pub mod binding;
pub mod renderable;
pub mod resource;
pub mod shape;
pub mod technique;
pub mod view;

pub use binding::{Binding, BindingSet, FIRST_USER_BINDING};
pub use renderable::{needs_rebuild, Renderable};
pub use resource::UniformBuffer;
pub use shape::Shape;
pub use technique::{RenderTechnique, TechniqueConfig};
pub use view::{View, ViewId, ViewUniform};
