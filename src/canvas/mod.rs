//! Drawing surface and its mount lifecycle

mod font;
mod host;
pub(crate) mod surface;

pub use host::{CanvasHost, Container, ResizeObserver};
pub use surface::{CanvasError, PixmapSurface, Rgba, Surface, SurfaceFactory, SurfaceSize};
