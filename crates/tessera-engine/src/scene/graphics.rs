use std::f32::consts::TAU;

use crate::coords::{Matrix, Rect, Vec2};
use crate::paint::{premultiply_tint, BlendMode, Color};
use crate::texture::Texture;

use super::renderable::{impl_any, transform_points, BatchElement, Indices, Renderable, BATCH};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Shape {
    Rect(Rect),
    Polygon,
    Circle,
}

/// Filled vector shapes, tessellated on the CPU.
///
/// Drawn through the batch renderer with the white texture so it shares
/// batches with sprites. Also usable as a mask source; a graphics holding
/// exactly one rectangle lets masks take the scissor path.
#[derive(Debug, Clone)]
pub struct Graphics {
    texture: Texture,
    pub tint: Color,
    pub blend: BlendMode,

    shapes: Vec<Shape>,
    points: Vec<f32>,
    uvs: Vec<f32>,
    colors: Vec<Color>,
    indices: Vec<u32>,

    world: Vec<f32>,
    cached: Option<(u64, u64)>,
    geometry_id: u64,
}

impl Default for Graphics {
    fn default() -> Self {
        Self::new()
    }
}

impl Graphics {
    pub fn new() -> Self {
        Self {
            texture: Texture::white(),
            tint: Color::WHITE,
            blend: BlendMode::Normal,
            shapes: Vec::new(),
            points: Vec::new(),
            uvs: Vec::new(),
            colors: Vec::new(),
            indices: Vec::new(),
            world: Vec::new(),
            cached: None,
            geometry_id: 0,
        }
    }

    pub fn fill_rect(&mut self, rect: Rect, color: Color) -> &mut Self {
        let r = rect.normalized();
        let (x0, y0, x1, y1) = (r.x(), r.y(), r.x() + r.width(), r.y() + r.height());
        self.push_fan(&[Vec2::new(x0, y0), Vec2::new(x1, y0), Vec2::new(x1, y1), Vec2::new(x0, y1)], color);
        self.shapes.push(Shape::Rect(r));
        self
    }

    /// Fills a convex polygon (fan triangulation from the first point).
    pub fn fill_polygon(&mut self, points: &[Vec2], color: Color) -> &mut Self {
        if points.len() >= 3 {
            self.push_fan(points, color);
            self.shapes.push(Shape::Polygon);
        }
        self
    }

    pub fn fill_circle(&mut self, center: Vec2, radius: f32, color: Color) -> &mut Self {
        let segments = ((radius.abs().sqrt() * 6.0).ceil() as usize).clamp(8, 256);
        let points: Vec<Vec2> = (0..segments)
            .map(|i| {
                let (s, c) = (i as f32 / segments as f32 * TAU).sin_cos();
                Vec2::new(center.x + c * radius, center.y + s * radius)
            })
            .collect();
        self.push_fan(&points, color);
        self.shapes.push(Shape::Circle);
        self
    }

    pub fn clear(&mut self) -> &mut Self {
        self.shapes.clear();
        self.points.clear();
        self.uvs.clear();
        self.colors.clear();
        self.indices.clear();
        self.geometry_id += 1;
        self
    }

    fn push_fan(&mut self, points: &[Vec2], color: Color) {
        let first = self.points.len() / 2;
        let Some(first) = u32::try_from(first).ok().filter(|f| f.checked_add(points.len() as u32).is_some()) else {
            log::warn!("graphics: dropped a {}-point shape past the 32-bit index range", points.len());
            return;
        };
        for p in points {
            self.points.extend_from_slice(&[p.x, p.y]);
            self.uvs.extend_from_slice(&[0.0, 0.0]);
            self.colors.push(color);
        }
        for i in 1..points.len().saturating_sub(1) as u32 {
            self.indices.extend_from_slice(&[first, first + i, first + i + 1]);
        }
        self.geometry_id += 1;
    }

    /// The single axis-aligned rectangle this graphics consists of, if any.
    pub fn as_rect(&self) -> Option<Rect> {
        match self.shapes.as_slice() {
            [Shape::Rect(r)] => Some(*r),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Local-space triangles: positions and indices.
    pub fn triangles(&self) -> (&[f32], &[u32]) {
        (&self.points, &self.indices)
    }
}

impl Renderable for Graphics {
    fn plugin(&self) -> &'static str {
        BATCH
    }

    fn local_bounds(&self) -> Option<Rect> {
        if self.points.is_empty() {
            return None;
        }
        Some(Rect::bounding(self.points.chunks_exact(2).map(|p| Vec2::new(p[0], p[1]))))
    }

    fn batch(&mut self, world: &Matrix, world_id: u64, world_alpha: f32) -> Option<BatchElement<'_>> {
        if self.indices.is_empty() {
            return None;
        }
        let key = (world_id, self.geometry_id);
        if self.cached != Some(key) {
            transform_points(world, &self.points, &mut self.world);
            self.cached = Some(key);
        }
        Some(BatchElement {
            texture: &self.texture,
            vertices: &self.world,
            uvs: &self.uvs,
            indices: Indices::U32(&self.indices),
            color: premultiply_tint(self.tint, world_alpha),
            vertex_colors: Some(&self.colors),
            blend: self.blend,
        })
    }

    impl_any!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_rect_is_reported() {
        let mut g = Graphics::new();
        g.fill_rect(Rect::new(10.0, 10.0, -5.0, 5.0), Color::BLACK);
        assert_eq!(g.as_rect(), Some(Rect::new(5.0, 10.0, 5.0, 5.0)));
        g.fill_rect(Rect::from_size(1.0, 1.0), Color::BLACK);
        assert_eq!(g.as_rect(), None);
    }

    #[test]
    fn polygon_fan_indices() {
        let mut g = Graphics::new();
        g.fill_rect(Rect::from_size(1.0, 1.0), Color::WHITE);
        g.fill_polygon(
            &[Vec2::new(0.0, 0.0), Vec2::new(4.0, 0.0), Vec2::new(4.0, 4.0), Vec2::new(2.0, 6.0), Vec2::new(0.0, 4.0)],
            Color::WHITE,
        );
        let (points, indices) = g.triangles();
        assert_eq!(points.len(), 18);
        assert_eq!(&indices[6..], &[4, 5, 6, 4, 6, 7, 4, 7, 8]);
    }

    #[test]
    fn circle_area_is_close() {
        let mut g = Graphics::new();
        g.fill_circle(Vec2::new(0.0, 0.0), 10.0, Color::WHITE);
        let area = g.batch(&Matrix::IDENTITY, 1, 1.0).unwrap().area();
        let exact = std::f32::consts::PI * 100.0;
        assert!((area - exact).abs() / exact < 0.03);
    }

    #[test]
    fn indices_continue_past_the_16_bit_range() {
        let mut g = Graphics::new();
        for _ in 0..300 {
            g.fill_circle(Vec2::new(0.0, 0.0), 2000.0, Color::WHITE);
        }
        let (points, indices) = g.triangles();
        assert_eq!(points.len() / 2, 300 * 256);
        assert_eq!(indices.iter().copied().max(), Some(300 * 256 - 1));
        assert_eq!(indices.len(), 300 * 254 * 3);
    }

    #[test]
    fn empty_graphics_does_not_batch() {
        let mut g = Graphics::new();
        assert!(g.batch(&Matrix::IDENTITY, 1, 1.0).is_none());
    }
}
