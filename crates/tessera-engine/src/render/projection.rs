use crate::coords::{Matrix, Rect};

/// Maps the source frame of the bound target onto clip space.
///
/// Both the screen and render textures are addressed top-left first, so a
/// single convention covers every target: the source frame's top edge lands
/// on clip `y = 1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectionSystem {
    projection: Matrix,
    source: Rect,
}

impl ProjectionSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes the projection for `source`. Returns the new matrix.
    pub fn update(&mut self, source: Rect) -> Matrix {
        self.source = source;
        self.projection = projection_for(source);
        self.projection
    }

    #[inline]
    pub fn matrix(&self) -> &Matrix {
        &self.projection
    }

    #[inline]
    pub fn source_frame(&self) -> Rect {
        self.source
    }
}

/// Orthographic projection of `source` (scene units) onto `[-1, 1]²`.
pub fn projection_for(source: Rect) -> Matrix {
    let w = if source.width() == 0.0 { 1.0 } else { source.width() };
    let h = if source.height() == 0.0 { 1.0 } else { source.height() };
    let a = 2.0 / w;
    let d = -2.0 / h;
    Matrix::new(a, 0.0, 0.0, d, -1.0 - source.x() * a, 1.0 - source.y() * d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Vec2;

    #[test]
    fn source_corners_map_to_clip_corners() {
        let m = projection_for(Rect::new(10.0, 20.0, 100.0, 50.0));
        assert!(m.apply(Vec2::new(10.0, 20.0)).approx_eq(Vec2::new(-1.0, 1.0), 1e-6));
        assert!(m.apply(Vec2::new(110.0, 70.0)).approx_eq(Vec2::new(1.0, -1.0), 1e-6));
        assert!(m.apply(Vec2::new(60.0, 45.0)).approx_eq(Vec2::ZERO, 1e-6));
    }

    #[test]
    fn degenerate_source_stays_finite() {
        let m = projection_for(Rect::new(0.0, 0.0, 0.0, 0.0));
        assert!(m.a.is_finite() && m.d.is_finite());
    }
}
