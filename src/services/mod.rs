pub mod content_store;
pub mod renderer;

pub use content_store::*;
pub use renderer::*;
