use bytemuck::{Pod, Zeroable};

use crate::coords::{Matrix, Rect, Vec2};
use crate::device::{BufferUsage, VertexFormat};
use crate::geometry::{Buffer, Geometry};
use crate::paint::{BlendMode, Color};
use crate::shader::UniformGroup;
use crate::texture::Texture;

use super::renderable::{impl_any, Renderable, PARTICLE};

/// Quads addressable by a 16-bit index buffer.
pub const MAX_PARTICLES: usize = (u16::MAX as usize + 1) / 4;

/// One quad of a [`ParticleContainer`]. Particles have no children and no
/// transform hierarchy of their own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub position: Vec2,
    pub scale: Vec2,
    pub rotation: f32,
    pub alpha: f32,
    pub tint: Color,
    /// Region of the container's base texture; `None` uses the container
    /// texture's frame.
    pub frame: Option<Rect>,
}

impl Default for Particle {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            scale: Vec2::ONE,
            rotation: 0.0,
            alpha: 1.0,
            tint: Color::WHITE,
            frame: None,
        }
    }
}

impl Particle {
    pub fn at(x: f32, y: f32) -> Self {
        Self { position: Vec2::new(x, y), ..Default::default() }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct ParticleVertex {
    position: [f32; 2],
    uv: [f32; 2],
    color: [u8; 4],
}

/// Many small quads sharing one base texture, drawn with a single draw
/// call by the particle renderer.
#[derive(Debug)]
pub struct ParticleContainer {
    texture: Texture,
    particles: Vec<Particle>,
    pub anchor: Vec2,
    pub tint: Color,
    pub blend: BlendMode,

    vertices: Buffer,
    indices: Buffer,
    geometry: Geometry,
    uniforms: UniformGroup,
    scratch: Vec<ParticleVertex>,
    index_capacity: usize,
    dirty: bool,
    warned_capacity: bool,
}

impl ParticleContainer {
    pub fn new(texture: Texture) -> Self {
        let vertices = Buffer::vertex::<ParticleVertex>(&[], BufferUsage::Dynamic);
        let indices = Buffer::index_u16(&[], BufferUsage::Static);
        let stride = std::mem::size_of::<ParticleVertex>() as u32;
        let geometry = Geometry::new()
            .add_attribute("aVertexPosition", &vertices, VertexFormat::Float32x2, stride, 0)
            .add_attribute("aTextureCoord", &vertices, VertexFormat::Float32x2, stride, 8)
            .add_attribute("aColor", &vertices, VertexFormat::Unorm8x4, stride, 16)
            .add_index(&indices);

        Self {
            texture,
            particles: Vec::new(),
            anchor: Vec2::ZERO,
            tint: Color::WHITE,
            blend: BlendMode::Normal,
            vertices,
            indices,
            geometry,
            uniforms: UniformGroup::new(),
            scratch: Vec::new(),
            index_capacity: 0,
            dirty: true,
            warned_capacity: false,
        }
    }

    pub fn push(&mut self, particle: Particle) {
        self.particles.push(particle);
        self.dirty = true;
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Mutable access; the vertex buffer is rebuilt on the next render.
    pub fn particles_mut(&mut self) -> &mut Vec<Particle> {
        self.dirty = true;
        &mut self.particles
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    #[inline]
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    /// Number of particles that fit the index range.
    pub fn drawable_len(&self) -> usize {
        self.particles.len().min(MAX_PARTICLES)
    }

    /// Rebuilds the CPU vertex data if particles changed since the last call.
    pub(crate) fn update_buffers(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;

        let count = self.drawable_len();
        if count < self.particles.len() && !self.warned_capacity {
            log::warn!(
                "particle container holds {} particles; only the first {MAX_PARTICLES} are drawn",
                self.particles.len()
            );
            self.warned_capacity = true;
        }

        if count > self.index_capacity {
            let capacity = count.next_power_of_two().min(MAX_PARTICLES);
            let mut indices = Vec::with_capacity(capacity * 6);
            for q in 0..capacity as u16 {
                let v = q * 4;
                indices.extend_from_slice(&[v, v + 1, v + 2, v, v + 2, v + 3]);
            }
            self.indices.update(indices.as_slice());
            self.index_capacity = capacity;
        }

        let base = self.texture.base();
        let (bw, bh) = (base.width().max(f32::EPSILON), base.height().max(f32::EPSILON));
        let default_frame = self.texture.frame();
        let default_uvs = *self.texture.uvs();

        self.scratch.clear();
        for p in &self.particles[..count] {
            let frame = p.frame.unwrap_or(default_frame);
            let uvs = match p.frame {
                None => default_uvs,
                Some(f) => {
                    let (u0, v0) = (f.x() / bw, f.y() / bh);
                    let (u1, v1) = ((f.x() + f.width()) / bw, (f.y() + f.height()) / bh);
                    [u0, v0, u1, v0, u1, v1, u0, v1]
                }
            };

            let mut m = Matrix::default();
            m.set_transform(p.position, Vec2::ZERO, p.scale, p.rotation, Vec2::ZERO);
            let x0 = -self.anchor.x * frame.width();
            let y0 = -self.anchor.y * frame.height();
            let (x1, y1) = (x0 + frame.width(), y0 + frame.height());
            let color = p.tint.with_alpha_factor(p.alpha).to_rgba8();

            for (i, (x, y)) in [(x0, y0), (x1, y0), (x1, y1), (x0, y1)].into_iter().enumerate() {
                let pos = m.apply(Vec2::new(x, y));
                self.scratch.push(ParticleVertex {
                    position: [pos.x, pos.y],
                    uv: [uvs[i * 2], uvs[i * 2 + 1]],
                    color,
                });
            }
        }
        self.vertices.update(self.scratch.as_slice());
    }

    /// Split borrow used by the particle renderer.
    pub(crate) fn parts_mut(&mut self) -> (&Geometry, &Texture, &mut UniformGroup) {
        (&self.geometry, &self.texture, &mut self.uniforms)
    }

    pub fn destroy(&self) {
        self.geometry.destroy();
    }
}

impl Renderable for ParticleContainer {
    fn plugin(&self) -> &'static str {
        PARTICLE
    }

    fn local_bounds(&self) -> Option<Rect> {
        if self.particles.is_empty() {
            return None;
        }
        let f = self.texture.frame();
        Some(Rect::bounding(self.particles.iter().flat_map(|p| {
            let x0 = p.position.x - self.anchor.x * f.width() * p.scale.x;
            let y0 = p.position.y - self.anchor.y * f.height() * p.scale.y;
            [Vec2::new(x0, y0), Vec2::new(x0 + f.width() * p.scale.x, y0 + f.height() * p.scale.y)]
        })))
    }

    impl_any!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::{BaseTexture, BaseTextureOptions};

    fn container() -> ParticleContainer {
        let base = BaseTexture::from_pixels(8, 8, vec![255; 256], BaseTextureOptions::default());
        ParticleContainer::new(Texture::from_frame(&base, Rect::from_size(4.0, 4.0), None, None))
    }

    #[test]
    fn vertex_layout_is_twenty_bytes() {
        assert_eq!(std::mem::size_of::<ParticleVertex>(), 20);
    }

    #[test]
    fn buffers_rebuild_only_when_dirty() {
        let mut c = container();
        c.push(Particle::at(10.0, 0.0));
        c.push(Particle::at(20.0, 0.0));
        c.update_buffers();
        assert_eq!(c.vertices.byte_len(), 2 * 4 * 20);
        assert_eq!(c.geometry.element_count(), 12);

        let id = c.vertices.update_id();
        c.update_buffers();
        assert_eq!(c.vertices.update_id(), id);

        c.particles_mut()[0].position.x = 0.0;
        c.update_buffers();
        assert!(c.vertices.update_id() > id);
    }

    #[test]
    fn particle_frame_overrides_uvs() {
        let mut c = container();
        c.push(Particle { frame: Some(Rect::new(4.0, 4.0, 4.0, 4.0)), ..Particle::at(0.0, 0.0) });
        c.update_buffers();
        let data = c.vertices.data();
        let vertex = |i: usize| bytemuck::pod_read_unaligned::<ParticleVertex>(&data[i * 20..(i + 1) * 20]);
        assert_eq!(vertex(0).uv, [0.5, 0.5]);
        assert_eq!(vertex(2).uv, [1.0, 1.0]);
        assert_eq!(vertex(2).position, [4.0, 4.0]);
    }
}
