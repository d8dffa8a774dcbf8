use crate::coords::{Rect, Vec2};
use crate::device::{NativeFramebuffer, PixelRect};
use crate::resource::ResourceId;

/// Everything that describes the currently bound render target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundTarget {
    /// Base texture id of the render texture, `None` for the screen.
    pub texture: Option<ResourceId>,
    pub framebuffer: Option<NativeFramebuffer>,
    pub mip_level: u32,
    /// Region of scene space being drawn.
    pub source: Rect,
    /// Region of the target receiving it, in logical units.
    pub destination: Rect,
    pub resolution: f32,
    /// `destination` in physical pixels of the bound mip level.
    pub viewport: PixelRect,
}

impl BoundTarget {
    /// Maps a scene-space rectangle to physical pixels of this target.
    pub fn to_pixels(&self, rect: Rect) -> PixelRect {
        let sx = self.destination.width() / self.source.width().max(f32::EPSILON);
        let sy = self.destination.height() / self.source.height().max(f32::EPSILON);
        let scale = self.resolution / (1u32 << self.mip_level) as f32;

        let map = |p: Vec2| {
            Vec2::new(
                ((p.x - self.source.x()) * sx + self.destination.x()) * scale,
                ((p.y - self.source.y()) * sy + self.destination.y()) * scale,
            )
        };
        let r = rect.normalized();
        let min = map(r.origin);
        let max = map(r.max());
        let x0 = min.x.round() as i32;
        let y0 = min.y.round() as i32;
        let x1 = (max.x.round() as i32).max(x0);
        let y1 = (max.y.round() as i32).max(y0);
        PixelRect::new(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32)
    }
}

/// Keeps track of the bound render target so rebinding the same target with
/// the same frames costs nothing.
#[derive(Debug, Default)]
pub struct RenderTargetSystem {
    current: Option<BoundTarget>,
}

impl RenderTargetSystem {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn current(&self) -> Option<&BoundTarget> {
        self.current.as_ref()
    }

    pub(crate) fn set(&mut self, target: BoundTarget) {
        self.current = Some(target);
    }

    /// Forgets the binding, e.g. after a resize or a context loss.
    pub fn reset(&mut self) {
        self.current = None;
    }
}

/// Physical viewport of `destination` on mip level `mip_level`.
pub fn viewport_for(destination: Rect, resolution: f32, mip_level: u32) -> PixelRect {
    let shift = |v: f32| ((v * resolution).round() as i64 >> mip_level) as i32;
    let size = |v: f32| (((v * resolution).round().max(0.0) as u64 >> mip_level) as u32).max(1);
    PixelRect::new(
        shift(destination.x()),
        shift(destination.y()),
        size(destination.width()),
        size(destination.height()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(source: Rect, destination: Rect, resolution: f32, mip_level: u32) -> BoundTarget {
        BoundTarget {
            texture: None,
            framebuffer: None,
            mip_level,
            source,
            destination,
            resolution,
            viewport: viewport_for(destination, resolution, mip_level),
        }
    }

    #[test]
    fn viewport_scales_by_resolution() {
        let vp = viewport_for(Rect::new(10.0, 5.0, 100.0, 50.0), 2.0, 0);
        assert_eq!(vp, PixelRect::new(20, 10, 200, 100));
    }

    #[test]
    fn viewport_shrinks_with_mip_level() {
        let vp = viewport_for(Rect::from_size(64.0, 32.0), 1.0, 2);
        assert_eq!(vp, PixelRect::new(0, 0, 16, 8));
        let tiny = viewport_for(Rect::from_size(2.0, 2.0), 1.0, 4);
        assert_eq!(tiny, PixelRect::new(0, 0, 1, 1));
    }

    #[test]
    fn scene_rect_maps_through_frames() {
        let t = target(Rect::new(100.0, 100.0, 50.0, 50.0), Rect::from_size(100.0, 100.0), 1.0, 0);
        assert_eq!(t.to_pixels(Rect::new(110.0, 120.0, 10.0, 5.0)), PixelRect::new(20, 40, 20, 10));
    }

    #[test]
    fn scene_rect_honours_resolution() {
        let t = target(Rect::from_size(10.0, 10.0), Rect::from_size(10.0, 10.0), 2.0, 0);
        assert_eq!(t.to_pixels(Rect::new(1.0, 1.0, 2.0, 2.0)), PixelRect::new(2, 2, 4, 4));
    }
}
