//! Fixed-point triangle rasterization, texture sampling and blending.

use crate::device::{PixelRect, ScaleMode, WrapMode};
use crate::paint::{BlendFactor, BlendFactors};

/// Sub-pixel precision of vertex positions (1/256 px).
const SUBPIXEL_BITS: i64 = 8;
const SUBPIXEL: f32 = (1 << SUBPIXEL_BITS) as f32;

/// Tightly packed RGBA8 image.
#[derive(Debug, Clone, Default)]
pub(crate) struct Surface {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn from_pixels(width: u32, height: u32, pixels: &[u8]) -> Self {
        let mut s = Self::new(width, height);
        let n = s.pixels.len().min(pixels.len());
        s.pixels[..n].copy_from_slice(&pixels[..n]);
        s
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.index(x, y);
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2], self.pixels[i + 3]]
    }

    #[inline]
    pub fn put(&mut self, x: u32, y: u32, c: [u8; 4]) {
        let i = self.index(x, y);
        self.pixels[i..i + 4].copy_from_slice(&c);
    }

    pub fn fill(&mut self, c: [u8; 4]) {
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&c);
        }
    }

    /// Rows inside `rect`, top first; texels outside the surface read as 0.
    pub fn read(&self, rect: PixelRect) -> Vec<u8> {
        let mut out = Vec::with_capacity(rect.width as usize * rect.height as usize * 4);
        for y in rect.y..rect.y + rect.height as i32 {
            for x in rect.x..rect.x + rect.width as i32 {
                if x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height {
                    out.extend_from_slice(&self.get(x as u32, y as u32));
                } else {
                    out.extend_from_slice(&[0; 4]);
                }
            }
        }
        out
    }

    /// Next mip level: 2×2 box filter, odd edges clamped.
    pub fn downsample(&self) -> Surface {
        let w = (self.width / 2).max(1);
        let h = (self.height / 2).max(1);
        let mut out = Surface::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let mut acc = [0u32; 4];
                for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    let sx = (x * 2 + dx).min(self.width - 1);
                    let sy = (y * 2 + dy).min(self.height - 1);
                    let c = self.get(sx, sy);
                    for i in 0..4 {
                        acc[i] += c[i] as u32;
                    }
                }
                out.put(x, y, acc.map(|v| ((v + 2) / 4) as u8));
            }
        }
        out
    }
}

// ── sampling ──────────────────────────────────────────────────────────────

fn wrap_coord(i: i64, size: u32, mode: WrapMode) -> u32 {
    let n = size as i64;
    let v = match mode {
        WrapMode::Clamp => i.clamp(0, n - 1),
        WrapMode::Repeat => i.rem_euclid(n),
        WrapMode::MirroredRepeat => {
            let period = i.rem_euclid(2 * n);
            if period < n { period } else { 2 * n - 1 - period }
        }
    };
    v as u32
}

fn texel(s: &Surface, x: i64, y: i64, wrap: WrapMode) -> [f32; 4] {
    let c = s.get(wrap_coord(x, s.width, wrap), wrap_coord(y, s.height, wrap));
    c.map(|v| v as f32 / 255.0)
}

/// Samples normalized `uv`; an empty surface reads transparent black.
pub(crate) fn sample(s: &Surface, uv: [f32; 2], scale: ScaleMode, wrap: WrapMode) -> [f32; 4] {
    if s.width == 0 || s.height == 0 {
        return [0.0; 4];
    }
    let u = uv[0] * s.width as f32;
    let v = uv[1] * s.height as f32;

    match scale {
        ScaleMode::Nearest => texel(s, u.floor() as i64, v.floor() as i64, wrap),
        ScaleMode::Linear => {
            let fu = u - 0.5;
            let fv = v - 0.5;
            let x0 = fu.floor();
            let y0 = fv.floor();
            let tx = fu - x0;
            let ty = fv - y0;
            let (x0, y0) = (x0 as i64, y0 as i64);

            let c00 = texel(s, x0, y0, wrap);
            let c10 = texel(s, x0 + 1, y0, wrap);
            let c01 = texel(s, x0, y0 + 1, wrap);
            let c11 = texel(s, x0 + 1, y0 + 1, wrap);

            let mut out = [0.0; 4];
            for i in 0..4 {
                let top = c00[i] + (c10[i] - c00[i]) * tx;
                let bottom = c01[i] + (c11[i] - c01[i]) * tx;
                out[i] = top + (bottom - top) * ty;
            }
            out
        }
    }
}

// ── blending ──────────────────────────────────────────────────────────────

fn factor(f: BlendFactor, src: [f32; 4], dst: [f32; 4], channel: usize) -> f32 {
    match f {
        BlendFactor::Zero => 0.0,
        BlendFactor::One => 1.0,
        BlendFactor::SrcAlpha => src[3],
        BlendFactor::OneMinusSrcAlpha => 1.0 - src[3],
        BlendFactor::SrcColor => src[channel],
        BlendFactor::OneMinusSrcColor => 1.0 - src[channel],
        BlendFactor::DstColor => dst[channel],
        BlendFactor::OneMinusDstColor => 1.0 - dst[channel],
        BlendFactor::DstAlpha => dst[3],
        BlendFactor::OneMinusDstAlpha => 1.0 - dst[3],
    }
}

#[inline]
pub(crate) fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

/// Additive blend equation; `None` writes the source unchanged.
pub(crate) fn blend(src: [f32; 4], dst: [u8; 4], factors: Option<BlendFactors>) -> [u8; 4] {
    let Some(f) = factors else {
        return src.map(quantize);
    };
    let d = dst.map(|v| v as f32 / 255.0);
    let mut out = [0u8; 4];
    for i in 0..3 {
        let v = src[i] * factor(f.src_rgb, src, d, i) + d[i] * factor(f.dst_rgb, src, d, i);
        out[i] = quantize(v);
    }
    let a = src[3] * factor(f.src_alpha, src, d, 3) + d[3] * factor(f.dst_alpha, src, d, 3);
    out[3] = quantize(a);
    out
}

// ── triangles ─────────────────────────────────────────────────────────────

/// Post-viewport vertex in target pixels.
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct ScreenVertex {
    pub x: f32,
    pub y: f32,
    pub uv: [f32; 2],
    pub color: [f32; 4],
    pub texture_id: f32,
}

/// Interpolated fragment inputs.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Fragment {
    pub uv: [f32; 2],
    pub color: [f32; 4],
    pub texture_id: f32,
}

#[inline]
fn edge(ax: i64, ay: i64, bx: i64, by: i64, px: i64, py: i64) -> i64 {
    (bx - ax) * (py - ay) - (by - ay) * (px - ax)
}

/// Top edges (horizontal, interior below) and left edges (running upward)
/// own the pixel centers that lie exactly on them.
#[inline]
fn is_top_left(ax: i64, ay: i64, bx: i64, by: i64) -> bool {
    let dx = bx - ax;
    let dy = by - ay;
    (dy == 0 && dx > 0) || dy < 0
}

/// Calls `shade(x, y, fragment)` for every covered pixel center inside `clip`.
///
/// Adjacent triangles sharing an edge never cover the same pixel.
pub(crate) fn rasterize_triangle(
    tri: [ScreenVertex; 3],
    clip: PixelRect,
    mut shade: impl FnMut(u32, u32, Fragment),
) {
    if clip.is_empty() {
        return;
    }
    let fx = |v: f32| (v * SUBPIXEL).round() as i64;

    let mut v = tri;
    let mut p: [(i64, i64); 3] = [(fx(v[0].x), fx(v[0].y)), (fx(v[1].x), fx(v[1].y)), (fx(v[2].x), fx(v[2].y))];

    let mut area = edge(p[0].0, p[0].1, p[1].0, p[1].1, p[2].0, p[2].1);
    if area == 0 {
        return;
    }
    if area < 0 {
        v.swap(1, 2);
        p.swap(1, 2);
        area = -area;
    }

    let min_x = (p.iter().map(|q| q.0).min().unwrap_or(0) >> SUBPIXEL_BITS).max(clip.x as i64);
    let min_y = (p.iter().map(|q| q.1).min().unwrap_or(0) >> SUBPIXEL_BITS).max(clip.y as i64);
    let max_x = ((p.iter().map(|q| q.0).max().unwrap_or(0) >> SUBPIXEL_BITS) + 1)
        .min(clip.x as i64 + clip.width as i64 - 1);
    let max_y = ((p.iter().map(|q| q.1).max().unwrap_or(0) >> SUBPIXEL_BITS) + 1)
        .min(clip.y as i64 + clip.height as i64 - 1);

    let tl0 = is_top_left(p[1].0, p[1].1, p[2].0, p[2].1);
    let tl1 = is_top_left(p[2].0, p[2].1, p[0].0, p[0].1);
    let tl2 = is_top_left(p[0].0, p[0].1, p[1].0, p[1].1);
    let inside = |w: i64, top_left: bool| w > 0 || (w == 0 && top_left);

    let half = 1i64 << (SUBPIXEL_BITS - 1);
    let inv_area = 1.0 / area as f32;

    for y in min_y..=max_y {
        if y < 0 {
            continue;
        }
        let cy = (y << SUBPIXEL_BITS) + half;
        for x in min_x..=max_x {
            if x < 0 {
                continue;
            }
            let cx = (x << SUBPIXEL_BITS) + half;
            let w0 = edge(p[1].0, p[1].1, p[2].0, p[2].1, cx, cy);
            let w1 = edge(p[2].0, p[2].1, p[0].0, p[0].1, cx, cy);
            let w2 = edge(p[0].0, p[0].1, p[1].0, p[1].1, cx, cy);
            if !(inside(w0, tl0) && inside(w1, tl1) && inside(w2, tl2)) {
                continue;
            }

            let b = [w0 as f32 * inv_area, w1 as f32 * inv_area, w2 as f32 * inv_area];
            let lerp2 = |f: fn(&ScreenVertex) -> [f32; 2]| {
                let (a, c, d) = (f(&v[0]), f(&v[1]), f(&v[2]));
                [a[0] * b[0] + c[0] * b[1] + d[0] * b[2], a[1] * b[0] + c[1] * b[1] + d[1] * b[2]]
            };
            let uv = lerp2(|s| s.uv);
            let mut color = [0.0; 4];
            for (i, c) in color.iter_mut().enumerate() {
                *c = v[0].color[i] * b[0] + v[1].color[i] * b[1] + v[2].color[i] * b[2];
            }

            shade(x as u32, y as u32, Fragment { uv, color, texture_id: v[0].texture_id });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vert(x: f32, y: f32) -> ScreenVertex {
        ScreenVertex { x, y, color: [1.0; 4], ..Default::default() }
    }

    #[test]
    fn quad_halves_cover_each_pixel_once() {
        let mut hits = vec![0u32; 16 * 16];
        let clip = PixelRect::new(0, 0, 16, 16);
        let (a, b, c, d) = (vert(2.0, 2.0), vert(12.0, 2.0), vert(12.0, 9.0), vert(2.0, 9.0));
        for tri in [[a, b, c], [a, c, d]] {
            rasterize_triangle(tri, clip, |x, y, _| hits[(y * 16 + x) as usize] += 1);
        }
        let covered: u32 = hits.iter().sum();
        assert_eq!(covered, 10 * 7);
        assert!(hits.iter().all(|h| *h <= 1));
    }

    #[test]
    fn degenerate_triangle_draws_nothing() {
        let mut n = 0;
        rasterize_triangle(
            [vert(0.0, 0.0), vert(5.0, 5.0), vert(10.0, 10.0)],
            PixelRect::new(0, 0, 16, 16),
            |_, _, _| n += 1,
        );
        assert_eq!(n, 0);
    }

    #[test]
    fn clip_rect_bounds_coverage() {
        let mut n = 0;
        let (a, b, c) = (vert(0.0, 0.0), vert(16.0, 0.0), vert(0.0, 16.0));
        rasterize_triangle([a, b, c], PixelRect::new(0, 0, 4, 4), |x, y, _| {
            assert!(x < 4 && y < 4);
            n += 1;
        });
        assert_eq!(n, 16);
    }

    #[test]
    fn normal_blend_is_premultiplied_over() {
        let normal = crate::paint::BlendMode::Normal.factors();
        let out = blend([0.5, 0.0, 0.0, 0.5], [0, 0, 255, 255], Some(normal));
        assert_eq!(out, [128, 0, 128, 255]);
    }

    #[test]
    fn nearest_sample_picks_texel() {
        let mut s = Surface::new(2, 1);
        s.put(1, 0, [255, 0, 0, 255]);
        let c = sample(&s, [0.75, 0.5], ScaleMode::Nearest, WrapMode::Clamp);
        assert_eq!(c, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn downsample_averages_blocks() {
        let mut s = Surface::new(2, 2);
        s.put(0, 0, [255, 255, 255, 255]);
        let m = s.downsample();
        assert_eq!((m.width, m.height), (1, 1));
        assert_eq!(m.get(0, 0), [64, 64, 64, 64]);
    }
}
