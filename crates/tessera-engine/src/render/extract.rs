//! Pixel read-back and image comparison.

use crate::device::{BackendError, PixelRect};
use crate::texture::RenderTexture;

use super::error::RenderError;
use super::renderer::Renderer;

/// Tightly packed RGBA8 image, top row first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pixels {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Pixels {
    /// RGBA of the pixel at `(x, y)`.
    pub fn get(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y * self.width + x) * 4) as usize;
        self.data.get(i..i + 4).map(|p| [p[0], p[1], p[2], p[3]])
    }
}

impl Renderer {
    /// Reads the whole screen, or `target`, back to the CPU.
    ///
    /// Pending batches are flushed first so the result includes everything
    /// submitted so far.
    pub fn extract_pixels(&mut self, target: Option<&RenderTexture>) -> Result<Pixels, RenderError> {
        self.check_alive()?;
        self.stop_for_readback()?;
        let ctx = self.context_mut();
        if !ctx.registry.is_valid() || ctx.backend.is_lost() {
            return Err(RenderError::Backend(BackendError::ContextLost));
        }
        ctx.bind_render_target(target, None, None, 0)?;
        let (width, height) = match target {
            Some(rt) => (rt.base().pixel_width(), rt.base().pixel_height()),
            None => ctx.backend.screen_size(),
        };
        let data = ctx.backend.read_pixels(PixelRect::new(0, 0, width, height))?;
        Ok(Pixels { width, height, data })
    }
}

/// Per-channel image comparison with a tolerance.
#[derive(Debug, Copy, Clone, Default)]
pub struct ImageDiff {
    /// Largest channel difference still counted as equal.
    pub tolerance: u8,
}

/// Outcome of [`ImageDiff::compare`].
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct DiffReport {
    pub total_pixels: usize,
    pub differing_pixels: usize,
    pub max_delta: u8,
}

impl DiffReport {
    pub fn is_match(&self) -> bool {
        self.differing_pixels == 0
    }

    /// Fraction of differing pixels.
    pub fn ratio(&self) -> f32 {
        if self.total_pixels == 0 { 0.0 } else { self.differing_pixels as f32 / self.total_pixels as f32 }
    }
}

impl ImageDiff {
    pub const fn new(tolerance: u8) -> Self {
        Self { tolerance }
    }

    /// Compares two images of the same size. Images of different sizes
    /// differ everywhere.
    pub fn compare(&self, actual: &Pixels, expected: &Pixels) -> DiffReport {
        let total = (expected.width * expected.height) as usize;
        if actual.width != expected.width || actual.height != expected.height {
            return DiffReport { total_pixels: total, differing_pixels: total, max_delta: u8::MAX };
        }

        let mut report = DiffReport { total_pixels: total, ..DiffReport::default() };
        for (a, e) in actual.data.chunks_exact(4).zip(expected.data.chunks_exact(4)) {
            let delta = a.iter().zip(e).map(|(x, y)| x.abs_diff(*y)).max().unwrap_or(0);
            report.max_delta = report.max_delta.max(delta);
            if delta > self.tolerance {
                report.differing_pixels += 1;
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(px: &[[u8; 4]]) -> Pixels {
        Pixels { width: px.len() as u32, height: 1, data: px.concat() }
    }

    #[test]
    fn tolerance_absorbs_rounding() {
        let a = image(&[[10, 10, 10, 255], [0, 0, 0, 0]]);
        let b = image(&[[11, 9, 10, 255], [0, 0, 0, 0]]);
        let report = ImageDiff::new(1).compare(&a, &b);
        assert!(report.is_match());
        assert_eq!(report.max_delta, 1);
        assert!(!ImageDiff::new(0).compare(&a, &b).is_match());
    }

    #[test]
    fn size_mismatch_differs_everywhere() {
        let a = image(&[[0; 4]]);
        let b = image(&[[0; 4], [0; 4]]);
        let report = ImageDiff::new(255).compare(&a, &b);
        assert_eq!(report.differing_pixels, 2);
        assert_eq!(report.ratio(), 1.0);
    }

    #[test]
    fn pixel_lookup_is_bounds_checked() {
        let img = image(&[[1, 2, 3, 4]]);
        assert_eq!(img.get(0, 0), Some([1, 2, 3, 4]));
        assert_eq!(img.get(1, 0), None);
    }
}
