//! Line rendering: shader variant selection, uniforms and draw calls per visible tile.

pub mod atlas;
pub mod line_program;
pub mod line_renderer;
pub mod pass;
pub mod transform;

pub use line_program::LineProgram;
pub use line_renderer::{BucketSource, LineFrame, LineRenderer, RenderPhase};
pub use transform::Transform;
