use crate::coords::{Matrix, Rect, Vec2};
use crate::device::{BufferUsage, VertexFormat};
use crate::geometry::{Buffer, Geometry};
use crate::paint::{premultiply_tint, BlendMode, Color};
use crate::shader::{Shader, UniformGroup};
use crate::texture::Texture;

use super::renderable::{impl_any, transform_points, BatchElement, Indices, Renderable, BATCH, MESH};

/// Meshes with at most this many vertices and the default material are
/// merged into sprite batches.
pub const BATCHABLE_SIZE: usize = 100;

/// Indexed triangle mesh with a texture and an optional custom shader.
#[derive(Debug)]
pub struct Mesh {
    geometry: Geometry,
    positions: Buffer,
    uv_buffer: Buffer,
    index_buffer: Buffer,

    local: Vec<f32>,
    uvs: Vec<f32>,
    indices: Vec<u16>,

    texture: Texture,
    shader: Option<Shader>,
    uniforms: UniformGroup,
    pub tint: Color,
    pub blend: BlendMode,

    world: Vec<f32>,
    cached: Option<(u64, u64)>,
    positions_id: u64,
}

impl Mesh {
    /// `positions` and `uvs` hold `x, y` / `u, v` pairs, one per vertex.
    pub fn new(positions: Vec<f32>, uvs: Vec<f32>, indices: Vec<u16>, texture: Texture) -> Self {
        debug_assert_eq!(positions.len(), uvs.len());
        let position_buffer = Buffer::vertex(&positions, BufferUsage::Dynamic);
        let uv_buffer = Buffer::vertex(&uvs, BufferUsage::Static);
        let index_buffer = Buffer::index_u16(&indices, BufferUsage::Static);
        let geometry = Geometry::new()
            .add_attribute("aVertexPosition", &position_buffer, VertexFormat::Float32x2, 0, 0)
            .add_attribute("aTextureCoord", &uv_buffer, VertexFormat::Float32x2, 0, 0)
            .add_index(&index_buffer);

        Self {
            geometry,
            positions: position_buffer,
            uv_buffer,
            index_buffer,
            local: positions,
            uvs,
            indices,
            texture,
            shader: None,
            uniforms: UniformGroup::new(),
            tint: Color::WHITE,
            blend: BlendMode::Normal,
            world: Vec::new(),
            cached: None,
            positions_id: 0,
        }
    }

    /// Two-triangle quad covering the texture's frame.
    pub fn quad(texture: Texture) -> Self {
        let (w, h) = (texture.width(), texture.height());
        let positions = vec![0.0, 0.0, w, 0.0, w, h, 0.0, h];
        let uvs = texture.uvs().to_vec();
        Self::new(positions, uvs, vec![0, 1, 2, 0, 2, 3], texture)
    }

    /// Replaces the default material.
    pub fn with_shader(mut self, shader: Shader) -> Self {
        self.shader = Some(shader);
        self
    }

    pub fn set_positions(&mut self, positions: &[f32]) {
        self.positions.update(positions);
        self.local.clear();
        self.local.extend_from_slice(positions);
        self.positions_id += 1;
    }

    pub fn set_uvs(&mut self, uvs: &[f32]) {
        self.uv_buffer.update(uvs);
        self.uvs.clear();
        self.uvs.extend_from_slice(uvs);
    }

    pub fn set_indices(&mut self, indices: &[u16]) {
        self.index_buffer.update(indices);
        self.indices.clear();
        self.indices.extend_from_slice(indices);
    }

    #[inline]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[inline]
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn set_texture(&mut self, texture: Texture) {
        self.texture = texture;
    }

    pub fn shader(&self) -> Option<&Shader> {
        self.shader.as_ref()
    }

    pub fn shader_mut(&mut self) -> Option<&mut Shader> {
        self.shader.as_mut()
    }

    /// Built-in material values (`translationMatrix`, `uColor`, `uSampler`).
    pub fn uniforms(&self) -> &UniformGroup {
        &self.uniforms
    }

    pub fn uniforms_mut(&mut self) -> &mut UniformGroup {
        &mut self.uniforms
    }

    /// Split borrow used by the mesh renderer.
    pub(crate) fn parts_mut(&mut self) -> (&Geometry, &Texture, Option<&Shader>, &mut UniformGroup) {
        (&self.geometry, &self.texture, self.shader.as_ref(), &mut self.uniforms)
    }

    pub fn vertex_count(&self) -> usize {
        self.local.len() / 2
    }

    pub fn is_batchable(&self) -> bool {
        self.shader.is_none() && self.vertex_count() <= BATCHABLE_SIZE
    }

    pub fn destroy(&self) {
        self.geometry.destroy();
    }
}

impl Renderable for Mesh {
    fn plugin(&self) -> &'static str {
        if self.is_batchable() { BATCH } else { MESH }
    }

    fn local_bounds(&self) -> Option<Rect> {
        if self.local.is_empty() {
            return None;
        }
        Some(Rect::bounding(self.local.chunks_exact(2).map(|p| Vec2::new(p[0], p[1]))))
    }

    fn batch(&mut self, world: &Matrix, world_id: u64, world_alpha: f32) -> Option<BatchElement<'_>> {
        if !self.is_batchable() {
            return None;
        }
        let key = (world_id, self.positions_id);
        if self.cached != Some(key) {
            transform_points(world, &self.local, &mut self.world);
            self.cached = Some(key);
        }
        Some(BatchElement {
            texture: &self.texture,
            vertices: &self.world,
            uvs: &self.uvs,
            indices: Indices::U16(&self.indices),
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
    use crate::shader::builtin::mesh_program;
    use crate::texture::{BaseTexture, BaseTextureOptions};

    fn texture() -> Texture {
        Texture::from_base(BaseTexture::from_pixels(2, 2, vec![255; 16], BaseTextureOptions::default()))
    }

    #[test]
    fn small_default_mesh_goes_to_the_batch() {
        let m = Mesh::quad(texture());
        assert_eq!(m.plugin(), BATCH);
        let custom = Mesh::quad(texture()).with_shader(Shader::new(mesh_program(false), UniformGroup::new()));
        assert_eq!(custom.plugin(), MESH);
    }

    #[test]
    fn large_mesh_uses_its_own_plugin() {
        let n = BATCHABLE_SIZE + 1;
        let m = Mesh::new(vec![0.0; n * 2], vec![0.0; n * 2], vec![], texture());
        assert_eq!(m.plugin(), MESH);
    }

    #[test]
    fn set_positions_refreshes_world_vertices() {
        let mut m = Mesh::quad(texture());
        let before = m.positions.update_id();
        m.batch(&Matrix::IDENTITY, 1, 1.0);
        m.set_positions(&[0.0, 0.0, 4.0, 0.0, 4.0, 4.0, 0.0, 4.0]);
        assert!(m.positions.update_id() > before);
        let el = m.batch(&Matrix::IDENTITY, 1, 1.0).unwrap();
        assert_eq!(el.vertices[2], 4.0);
    }
}
