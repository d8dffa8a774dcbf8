use crate::coords::{Matrix, Rect, Vec2};
use crate::paint::{premultiply_tint, BlendMode, Color};
use crate::texture::Texture;

use super::renderable::{impl_any, BatchElement, Indices, Renderable, BATCH};

const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

/// Textured quad.
///
/// `anchor` is the normalized point of the untrimmed frame that sits at the
/// node's origin (`0.5, 0.5` centers the sprite).
#[derive(Debug, Clone)]
pub struct Sprite {
    texture: Texture,
    anchor: Vec2,
    pub tint: Color,
    pub blend: BlendMode,

    vertices: [f32; 8],
    /// `(world_id, texture update id, anchor generation)` of `vertices`.
    cached: Option<(u64, u64, u64)>,
    anchor_id: u64,
}

impl Sprite {
    pub fn new(texture: Texture) -> Self {
        Self {
            texture,
            anchor: Vec2::ZERO,
            tint: Color::WHITE,
            blend: BlendMode::Normal,
            vertices: [0.0; 8],
            cached: None,
            anchor_id: 0,
        }
    }

    pub fn with_anchor(mut self, anchor: Vec2) -> Self {
        self.set_anchor(anchor);
        self
    }

    pub fn with_tint(mut self, tint: Color) -> Self {
        self.tint = tint;
        self
    }

    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    #[inline]
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn set_texture(&mut self, texture: Texture) {
        self.texture = texture;
        self.cached = None;
    }

    #[inline]
    pub fn anchor(&self) -> Vec2 {
        self.anchor
    }

    pub fn set_anchor(&mut self, anchor: Vec2) {
        if self.anchor != anchor {
            self.anchor = anchor;
            self.anchor_id += 1;
        }
    }

    /// Quad corners in local space: left, right, top, bottom.
    fn local_edges(&self) -> (f32, f32, f32, f32) {
        let orig = self.texture.orig();
        match self.texture.trim() {
            Some(trim) => {
                let x0 = trim.x() - self.anchor.x * orig.width();
                let y0 = trim.y() - self.anchor.y * orig.height();
                (x0, x0 + trim.width(), y0, y0 + trim.height())
            }
            None => {
                let x0 = -self.anchor.x * orig.width();
                let y0 = -self.anchor.y * orig.height();
                (x0, x0 + orig.width(), y0, y0 + orig.height())
            }
        }
    }

    /// Recomputes world-space corners (top-left, top-right, bottom-right,
    /// bottom-left) unless transform, frame and anchor are unchanged.
    pub fn calculate_vertices(&mut self, world: &Matrix, world_id: u64) -> &[f32; 8] {
        let key = (world_id, self.texture.update_id(), self.anchor_id);
        if self.cached == Some(key) {
            return &self.vertices;
        }
        let (x0, x1, y0, y1) = self.local_edges();
        let corners = [(x0, y0), (x1, y0), (x1, y1), (x0, y1)];
        for (i, (x, y)) in corners.into_iter().enumerate() {
            let p = world.apply(Vec2::new(x, y));
            self.vertices[i * 2] = p.x;
            self.vertices[i * 2 + 1] = p.y;
        }
        self.cached = Some(key);
        &self.vertices
    }

    #[inline]
    pub fn vertex_data(&self) -> &[f32; 8] {
        &self.vertices
    }
}

impl Renderable for Sprite {
    fn plugin(&self) -> &'static str {
        BATCH
    }

    fn local_bounds(&self) -> Option<Rect> {
        let (x0, x1, y0, y1) = self.local_edges();
        Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
    }

    fn batch(&mut self, world: &Matrix, world_id: u64, world_alpha: f32) -> Option<BatchElement<'_>> {
        self.calculate_vertices(world, world_id);
        Some(BatchElement {
            texture: &self.texture,
            vertices: &self.vertices,
            uvs: self.texture.uvs(),
            indices: Indices::U16(&QUAD_INDICES),
            color: premultiply_tint(self.tint, world_alpha),
            vertex_colors: None,
            blend: self.blend,
        })
    }

    impl_any!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::{BaseTexture, BaseTextureOptions};

    fn texture(w: u32, h: u32) -> Texture {
        let px = vec![255; (w * h * 4) as usize];
        Texture::from_base(BaseTexture::from_pixels(w, h, px, BaseTextureOptions::default()))
    }

    #[test]
    fn anchor_centers_quad() {
        let mut s = Sprite::new(texture(10, 20)).with_anchor(Vec2::new(0.5, 0.5));
        let v = s.calculate_vertices(&Matrix::translation(100.0, 100.0), 1);
        assert_eq!(v, &[95.0, 90.0, 105.0, 90.0, 105.0, 110.0, 95.0, 110.0]);
    }

    #[test]
    fn trimmed_frame_is_offset_inside_orig() {
        let base = BaseTexture::from_pixels(32, 32, vec![0; 32 * 32 * 4], BaseTextureOptions::default());
        let t = Texture::from_frame(
            &base,
            Rect::new(0.0, 0.0, 8.0, 8.0),
            Some(Rect::from_size(16.0, 16.0)),
            Some(Rect::new(4.0, 2.0, 8.0, 8.0)),
        );
        let mut s = Sprite::new(t);
        let v = s.calculate_vertices(&Matrix::IDENTITY, 1);
        assert_eq!(v, &[4.0, 2.0, 12.0, 2.0, 12.0, 10.0, 4.0, 10.0]);
    }

    #[test]
    fn vertices_are_cached_by_world_id() {
        let mut s = Sprite::new(texture(4, 4));
        s.calculate_vertices(&Matrix::IDENTITY, 7);
        // Same id: the new matrix is ignored.
        let v = *s.calculate_vertices(&Matrix::translation(50.0, 0.0), 7);
        assert_eq!(v[0], 0.0);
        let v = *s.calculate_vertices(&Matrix::translation(50.0, 0.0), 8);
        assert_eq!(v[0], 50.0);
    }

    #[test]
    fn batch_color_is_premultiplied_by_world_alpha() {
        let mut s = Sprite::new(texture(4, 4)).with_tint(Color::from_hex(0xff0000));
        let el = s.batch(&Matrix::IDENTITY, 1, 0.5).unwrap();
        assert_eq!(el.color.to_rgba8(), [128, 0, 0, 128]);
        assert_eq!(el.area(), 16.0);
    }
}
