//! Drawing surfaces
//!
//! The render loop only talks to the [`Surface`] trait. [`PixmapSurface`] is the
//! raster implementation used by the binary.

use super::font;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tiny_skia::{Color, Paint, PathBuilder, Pixmap, Rect, Stroke, Transform};

/// Canvas errors
#[derive(Error, Debug)]
pub enum CanvasError {
    #[error("Invalid surface size {0}x{1}")]
    InvalidSize(u32, u32),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Export not supported by this surface")]
    ExportUnsupported,

    #[error("Canvas host must be mounted from within a tokio runtime")]
    NoRuntime,
}

/// Size of a surface in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both dimensions greater than zero
    pub fn is_drawable(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// 8-bit RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

/// Something the render loop can draw into
pub trait Surface: Send {
    fn size(&self) -> SurfaceSize;

    fn resize(&mut self, size: SurfaceSize) -> Result<(), CanvasError>;

    fn clear(&mut self, color: Rgba);

    fn stroke_polyline(&mut self, points: &[(f32, f32)], color: Rgba, width: f32);

    /// Static centered message
    fn caption(&mut self, text: &str, color: Rgba);

    fn save_png(&self, _path: &Path) -> Result<(), CanvasError> {
        Err(CanvasError::ExportUnsupported)
    }
}

/// Creates surfaces for a canvas host
pub trait SurfaceFactory: Send + Sync {
    fn create(&self, size: SurfaceSize) -> Result<Box<dyn Surface>, CanvasError>;
}

impl<F> SurfaceFactory for F
where
    F: Fn(SurfaceSize) -> Result<Box<dyn Surface>, CanvasError> + Send + Sync,
{
    fn create(&self, size: SurfaceSize) -> Result<Box<dyn Surface>, CanvasError> {
        self(size)
    }
}

/// Raster surface backed by a tiny-skia pixmap
pub struct PixmapSurface {
    pixmap: Pixmap,
    caption: Option<String>,
}

impl PixmapSurface {
    pub fn new(size: SurfaceSize) -> Result<Self, CanvasError> {
        let pixmap = Pixmap::new(size.width, size.height)
            .ok_or(CanvasError::InvalidSize(size.width, size.height))?;
        Ok(Self {
            pixmap,
            caption: None,
        })
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    /// Text of the caption drawn since the last clear
    pub fn caption_text(&self) -> Option<&str> {
        self.caption.as_deref()
    }

    pub fn factory() -> impl SurfaceFactory {
        |size: SurfaceSize| -> Result<Box<dyn Surface>, CanvasError> {
            Ok(Box::new(PixmapSurface::new(size)?))
        }
    }
}

impl PixmapSurface {
    fn draw_glyph(&mut self, c: char, x: u32, y: u32, scale: u32, paint: &Paint) {
        for (dy, bits) in font::glyph(c).iter().enumerate() {
            for dx in 0..font::GLYPH_WIDTH {
                if bits & (0x10 >> dx) == 0 {
                    continue;
                }
                let px = (x + dx * scale) as f32;
                let py = (y + dy as u32 * scale) as f32;
                if let Some(rect) = Rect::from_xywh(px, py, scale as f32, scale as f32) {
                    self.pixmap
                        .fill_rect(rect, paint, Transform::identity(), None);
                }
            }
        }
    }
}

fn paint_for(color: Rgba) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color.r, color.g, color.b, color.a);
    paint.anti_alias = true;
    paint
}

impl Surface for PixmapSurface {
    fn size(&self) -> SurfaceSize {
        SurfaceSize::new(self.pixmap.width(), self.pixmap.height())
    }

    fn resize(&mut self, size: SurfaceSize) -> Result<(), CanvasError> {
        if size == self.size() {
            return Ok(());
        }
        self.pixmap = Pixmap::new(size.width, size.height)
            .ok_or(CanvasError::InvalidSize(size.width, size.height))?;
        Ok(())
    }

    fn clear(&mut self, color: Rgba) {
        self.pixmap
            .fill(Color::from_rgba8(color.r, color.g, color.b, color.a));
        self.caption = None;
    }

    fn stroke_polyline(&mut self, points: &[(f32, f32)], color: Rgba, width: f32) {
        let Some((&(x0, y0), rest)) = points.split_first() else {
            return;
        };
        if rest.is_empty() {
            return;
        }

        let mut builder = PathBuilder::new();
        builder.move_to(x0, y0);
        for &(x, y) in rest {
            builder.line_to(x, y);
        }
        let Some(path) = builder.finish() else {
            return;
        };

        let stroke = Stroke {
            width,
            ..Stroke::default()
        };
        self.pixmap
            .stroke_path(&path, &paint_for(color), &stroke, Transform::identity(), None);
    }

    fn caption(&mut self, text: &str, color: Rgba) {
        let width = self.pixmap.width();
        let height = self.pixmap.height();
        let max_chars = (width * 9 / 10 / font::CELL_WIDTH).max(1) as usize;
        let lines = font::wrap(text, max_chars);
        let longest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) as u32;
        if longest > 0 {
            // Integer scale so glyph pixels stay crisp
            let scale = (width * 9 / 10 / (longest * font::CELL_WIDTH))
                .min(height / 2 / (lines.len() as u32 * font::CELL_HEIGHT))
                .clamp(1, 4);
            let mut paint = paint_for(color);
            paint.anti_alias = false;

            let block_height = lines.len() as u32 * font::CELL_HEIGHT * scale;
            let top = height.saturating_sub(block_height) / 2;
            for (row, line) in lines.iter().enumerate() {
                let line_width = line.chars().count() as u32 * font::CELL_WIDTH * scale;
                let x0 = width.saturating_sub(line_width) / 2;
                let y0 = top + row as u32 * font::CELL_HEIGHT * scale;
                for (i, c) in line.chars().enumerate() {
                    let x = x0 + i as u32 * font::CELL_WIDTH * scale;
                    self.draw_glyph(c, x, y0, scale, &paint);
                }
            }
        }
        self.caption = Some(text.to_string());
    }

    fn save_png(&self, path: &Path) -> Result<(), CanvasError> {
        self.pixmap
            .save_png(path)
            .map_err(|e| CanvasError::Export(e.to_string()))?;
        if let Some(ref caption) = self.caption {
            tracing::info!("Frame saved to {} ({})", path.display(), caption);
        } else {
            tracing::info!("Frame saved to {}", path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Recorded drawing call
    #[derive(Debug, Clone, PartialEq)]
    pub enum DrawOp {
        Clear(Rgba),
        Polyline(Vec<(f32, f32)>),
        Caption(String),
        Resize(SurfaceSize),
    }

    /// Surface double that records every call into a shared log
    pub struct RecordingSurface {
        size: SurfaceSize,
        pub log: Arc<Mutex<Vec<DrawOp>>>,
    }

    impl RecordingSurface {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                size: SurfaceSize::new(width, height),
                log: Arc::default(),
            }
        }

        pub fn ops(&self) -> Vec<DrawOp> {
            self.log.lock().unwrap().clone()
        }

        pub fn take_ops(&self) -> Vec<DrawOp> {
            std::mem::take(&mut *self.log.lock().unwrap())
        }
    }

    impl Surface for RecordingSurface {
        fn size(&self) -> SurfaceSize {
            self.size
        }

        fn resize(&mut self, size: SurfaceSize) -> Result<(), CanvasError> {
            self.size = size;
            self.log.lock().unwrap().push(DrawOp::Resize(size));
            Ok(())
        }

        fn clear(&mut self, color: Rgba) {
            self.log.lock().unwrap().push(DrawOp::Clear(color));
        }

        fn stroke_polyline(&mut self, points: &[(f32, f32)], _color: Rgba, _width: f32) {
            self.log.lock().unwrap().push(DrawOp::Polyline(points.to_vec()));
        }

        fn caption(&mut self, text: &str, _color: Rgba) {
            self.log.lock().unwrap().push(DrawOp::Caption(text.to_string()));
        }
    }
}
