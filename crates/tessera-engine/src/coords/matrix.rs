use super::Vec2;

/// 2D affine transform.
///
/// ```text
/// | a  c  tx |
/// | b  d  ty |
/// | 0  0  1  |
/// ```
///
/// `apply` maps a point from the matrix's local space into its parent space.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0);

    #[inline]
    pub const fn new(a: f32, b: f32, c: f32, d: f32, tx: f32, ty: f32) -> Self {
        Self { a, b, c, d, tx, ty }
    }

    #[inline]
    pub const fn translation(x: f32, y: f32) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, x, y)
    }

    #[inline]
    pub const fn scaling(sx: f32, sy: f32) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    pub fn rotation(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        Self::new(c, s, -s, c, 0.0, 0.0)
    }

    #[inline]
    pub fn apply(&self, p: Vec2) -> Vec2 {
        Vec2::new(
            self.a * p.x + self.c * p.y + self.tx,
            self.b * p.x + self.d * p.y + self.ty,
        )
    }

    /// `self = self * m`: `m` is applied first, then `self`.
    pub fn append(&mut self, m: &Matrix) -> &mut Self {
        let (a1, b1, c1, d1) = (self.a, self.b, self.c, self.d);

        self.a = m.a * a1 + m.b * c1;
        self.b = m.a * b1 + m.b * d1;
        self.c = m.c * a1 + m.d * c1;
        self.d = m.c * b1 + m.d * d1;
        self.tx = m.tx * a1 + m.ty * c1 + self.tx;
        self.ty = m.tx * b1 + m.ty * d1 + self.ty;
        self
    }

    /// `self = m * self`: `self` is applied first, then `m`.
    pub fn prepend(&mut self, m: &Matrix) -> &mut Self {
        let mut out = *m;
        out.append(self);
        *self = out;
        self
    }

    /// Returns `self * m` without mutating either operand.
    #[inline]
    pub fn then(&self, m: &Matrix) -> Matrix {
        let mut out = *self;
        out.append(m);
        out
    }

    /// Rebuilds the matrix from decomposed transform components.
    #[allow(clippy::too_many_arguments)]
    pub fn set_transform(
        &mut self,
        position: Vec2,
        pivot: Vec2,
        scale: Vec2,
        rotation: f32,
        skew: Vec2,
    ) -> &mut Self {
        let (sx, cx) = (rotation + skew.y).sin_cos();
        let (sy_neg, sy) = (rotation - skew.x).sin_cos();

        self.a = cx * scale.x;
        self.b = sx * scale.x;
        self.c = -sy_neg * scale.y;
        self.d = sy * scale.y;
        self.tx = position.x - (pivot.x * self.a + pivot.y * self.c);
        self.ty = position.y - (pivot.x * self.b + pivot.y * self.d);
        self
    }

    /// Returns the inverse, or `None` for a singular matrix.
    pub fn inverse(&self) -> Option<Matrix> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() <= f32::EPSILON {
            return None;
        }
        let inv = 1.0 / det;
        Some(Matrix::new(
            self.d * inv,
            -self.b * inv,
            -self.c * inv,
            self.a * inv,
            (self.c * self.ty - self.d * self.tx) * inv,
            -(self.a * self.ty - self.b * self.tx) * inv,
        ))
    }

    /// True when the matrix maps axis-aligned rectangles onto axis-aligned
    /// rectangles (no rotation other than multiples of 90°, no skew).
    pub fn is_axis_aligned(&self) -> bool {
        const EPS: f32 = 1e-5;
        (self.b.abs() <= EPS && self.c.abs() <= EPS) || (self.a.abs() <= EPS && self.d.abs() <= EPS)
    }

    /// Column-major 3×3 representation as expected by GLSL `mat3`.
    pub fn to_mat3(&self) -> [f32; 9] {
        [
            self.a, self.b, 0.0,
            self.c, self.d, 0.0,
            self.tx, self.ty, 1.0,
        ]
    }

    pub fn approx_eq(&self, other: &Matrix, eps: f32) -> bool {
        (self.a - other.a).abs() <= eps
            && (self.b - other.b).abs() <= eps
            && (self.c - other.c).abs() <= eps
            && (self.d - other.d).abs() <= eps
            && (self.tx - other.tx).abs() <= eps
            && (self.ty - other.ty).abs() <= eps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::f32::consts::FRAC_PI_2;

    #[test]
    fn append_applies_rhs_first() {
        let mut m = Matrix::translation(10.0, 0.0);
        m.append(&Matrix::scaling(2.0, 2.0));
        assert_eq!(m.apply(Vec2::new(1.0, 1.0)), Vec2::new(12.0, 2.0));
    }

    #[test]
    fn prepend_applies_lhs_first() {
        let mut m = Matrix::translation(10.0, 0.0);
        m.prepend(&Matrix::scaling(2.0, 2.0));
        assert_eq!(m.apply(Vec2::new(1.0, 1.0)), Vec2::new(22.0, 2.0));
    }

    #[test]
    fn inverse_round_trips_point() {
        let mut m = Matrix::default();
        m.set_transform(Vec2::new(5.0, -3.0), Vec2::new(1.0, 2.0), Vec2::new(2.0, 0.5), 0.7, Vec2::ZERO);
        let inv = m.inverse().unwrap();
        let p = Vec2::new(13.0, 7.5);
        assert!(inv.apply(m.apply(p)).approx_eq(p, 1e-4));
    }

    #[test]
    fn singular_matrix_has_no_inverse() {
        assert!(Matrix::scaling(0.0, 1.0).inverse().is_none());
    }

    #[test]
    fn quarter_turn_is_axis_aligned() {
        assert!(Matrix::rotation(FRAC_PI_2).is_axis_aligned());
        assert!(!Matrix::rotation(0.3).is_axis_aligned());
    }

    #[test]
    fn set_transform_honours_pivot() {
        let mut m = Matrix::default();
        m.set_transform(Vec2::new(100.0, 100.0), Vec2::new(10.0, 10.0), Vec2::ONE, 0.0, Vec2::ZERO);
        assert_eq!(m.apply(Vec2::new(10.0, 10.0)), Vec2::new(100.0, 100.0));
    }

    #[test]
    fn mat3_is_column_major() {
        let m = Matrix::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0);
        assert_eq!(m.to_mat3(), [1.0, 2.0, 0.0, 3.0, 4.0, 0.0, 5.0, 6.0, 1.0]);
    }
}
