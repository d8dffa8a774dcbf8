use std::collections::HashMap;

use crate::device::Topology;
use crate::paint::BlendMode;
use crate::scene::BatchElement;
use crate::shader::builtin::batch_program;
use crate::shader::{Program, UniformGroup, UniformValue};
use crate::texture::{AlphaMode, BaseTexture};

use super::super::context::RenderContext;
use super::super::error::RenderError;
use super::super::plugin::{RenderObject, RenderPlugin};
use super::vertex::{BatchGeometry, BatchVertex};

/// Highest vertex count addressable with 16-bit indices.
const MAX_INDEXED_VERTICES: usize = u16::MAX as usize + 1;

/// An accepted element, already converted to batch vertices.
#[derive(Debug)]
struct PendingElement {
    base: BaseTexture,
    straight_alpha: bool,
    blend: BlendMode,
    vertex_start: usize,
    vertex_count: usize,
    index_count: usize,
}

/// Contiguous index range drawn with one call.
#[derive(Debug)]
struct DrawBatch {
    textures: Vec<BaseTexture>,
    straight_alpha: bool,
    blend: BlendMode,
    index_start: u32,
    index_count: u32,
}

/// Merges sprites, graphics and small meshes into as few draws as possible.
///
/// Elements are buffered in submission order. On flush they are split into
/// draws whenever the blend mode or alpha variant changes, or when another
/// distinct base texture would exceed the texture unit budget; all vertices
/// of a flush are uploaded once.
pub struct BatchRenderer {
    max_textures: u32,
    max_vertices: usize,
    /// Premultiplied and straight-alpha variants.
    programs: [Program; 2],
    samplers: UniformGroup,

    vertices: Vec<BatchVertex>,
    indices: Vec<u16>,
    elements: Vec<PendingElement>,

    pool: Vec<BatchGeometry>,
    flush_index: usize,
}

impl BatchRenderer {
    pub fn new(ctx: &RenderContext) -> Self {
        let max_textures = ctx.max_texture_units();
        let mut samplers = UniformGroup::new_static();
        for unit in 0..max_textures {
            samplers.set(&format!("uSampler{unit}"), UniformValue::Sampler(unit));
        }
        Self {
            max_textures,
            max_vertices: ctx.options().max_batch_vertices.clamp(4, MAX_INDEXED_VERTICES),
            programs: [batch_program(max_textures, false), batch_program(max_textures, true)],
            samplers,
            vertices: Vec::new(),
            indices: Vec::new(),
            elements: Vec::new(),
            pool: Vec::new(),
            flush_index: 0,
        }
    }

    /// Texture units a single draw of this renderer may use.
    pub fn max_textures(&self) -> u32 {
        self.max_textures
    }

    /// Elements waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.elements.len()
    }

    /// Queues one element. Invalid or degenerate elements are dropped and
    /// counted in [`FrameStats::skipped`](crate::render::FrameStats).
    pub fn push(&mut self, ctx: &mut RenderContext, element: &BatchElement<'_>) -> Result<(), RenderError> {
        let base = element.texture.base();
        if !element.texture.is_valid() {
            if base.is_destroyed() {
                log::warn!("batch: skipped element with destroyed texture {}", base.id());
            }
            ctx.stats.skipped += 1;
            return Ok(());
        }

        let count = element.vertex_count();
        let area = element.area();
        if count == 0 || element.indices.is_empty() || area.is_nan() || area <= 0.0 {
            ctx.stats.skipped += 1;
            return Ok(());
        }
        if element.uvs.len() < count * 2
            || element.vertex_colors.is_some_and(|c| c.len() < count)
            || element.indices.iter().any(|i| i >= count)
        {
            log::warn!("batch: skipped malformed element ({count} vertices, {} indices)", element.indices.len());
            ctx.stats.skipped += 1;
            return Ok(());
        }

        if count > self.max_vertices {
            return self.push_split(ctx, element);
        }
        if self.vertices.len() + count > self.max_vertices {
            self.flush(ctx)?;
        }

        let vertex_start = self.vertices.len();
        self.vertices.extend((0..count).map(|i| batch_vertex(element, i)));
        self.indices.extend(element.indices.iter().map(|i| (vertex_start + i) as u16));
        self.close_piece(element, vertex_start, self.indices.len() - element.indices.len());
        Ok(())
    }

    /// Appends an element larger than one flush triangle by triangle,
    /// flushing whenever the next triangle's new corners would not fit.
    fn push_split(&mut self, ctx: &mut RenderContext, element: &BatchElement<'_>) -> Result<(), RenderError> {
        log::debug!("batch: splitting element of {} vertices", element.vertex_count());
        let mut remap: HashMap<usize, u16> = HashMap::new();
        let mut vertex_start = self.vertices.len();
        let mut index_start = self.indices.len();

        for t in 0..element.indices.len() / 3 {
            let corners = [t * 3, t * 3 + 1, t * 3 + 2].map(|n| element.indices.get(n).unwrap_or(0));
            let fresh = corners.iter().filter(|c| !remap.contains_key(c)).count();
            if self.vertices.len() + fresh > self.max_vertices {
                self.close_piece(element, vertex_start, index_start);
                self.flush(ctx)?;
                remap.clear();
                vertex_start = self.vertices.len();
                index_start = self.indices.len();
            }
            for c in corners {
                let local = match remap.get(&c) {
                    Some(&local) => local,
                    None => {
                        let local = self.vertices.len() as u16;
                        self.vertices.push(batch_vertex(element, c));
                        remap.insert(c, local);
                        local
                    }
                };
                self.indices.push(local);
            }
        }
        self.close_piece(element, vertex_start, index_start);
        Ok(())
    }

    /// Records the vertices and indices appended since the given offsets as
    /// one pending element.
    fn close_piece(&mut self, element: &BatchElement<'_>, vertex_start: usize, index_start: usize) {
        let index_count = self.indices.len() - index_start;
        if index_count == 0 {
            return;
        }
        let base = element.texture.base();
        self.elements.push(PendingElement {
            base: base.clone(),
            straight_alpha: base.alpha_mode() == AlphaMode::Unpremultiplied,
            blend: element.blend,
            vertex_start,
            vertex_count: self.vertices.len() - vertex_start,
            index_count,
        });
    }

    /// Splits the pending elements into draws and assigns texture slots.
    fn build_batches(&mut self) -> Vec<DrawBatch> {
        let mut batches: Vec<DrawBatch> = Vec::new();
        let mut index_start = 0u32;

        for el in &self.elements {
            let slot = match batches.last_mut() {
                Some(b) if b.blend == el.blend && b.straight_alpha == el.straight_alpha => {
                    match b.textures.iter().position(|t| t.ptr_eq(&el.base)) {
                        Some(slot) => Some(slot),
                        None if (b.textures.len() as u32) < self.max_textures => {
                            b.textures.push(el.base.clone());
                            Some(b.textures.len() - 1)
                        }
                        None => None,
                    }
                }
                _ => None,
            };
            let slot = match slot {
                Some(slot) => slot,
                None => {
                    batches.push(DrawBatch {
                        textures: vec![el.base.clone()],
                        straight_alpha: el.straight_alpha,
                        blend: el.blend,
                        index_start,
                        index_count: 0,
                    });
                    0
                }
            };

            for v in &mut self.vertices[el.vertex_start..el.vertex_start + el.vertex_count] {
                v.texture_id = slot as f32;
            }
            if let Some(b) = batches.last_mut() {
                b.index_count += el.index_count as u32;
            }
            index_start += el.index_count as u32;
        }
        batches
    }
}

/// Vertex `i` of a validated element, colors premultiplied and combined.
fn batch_vertex(element: &BatchElement<'_>, i: usize) -> BatchVertex {
    let color = match element.vertex_colors {
        Some(colors) => colors[i].multiply(element.color),
        None => element.color,
    };
    BatchVertex {
        position: [element.vertices[i * 2], element.vertices[i * 2 + 1]],
        uv: [element.uvs[i * 2], element.uvs[i * 2 + 1]],
        color: color.to_rgba8(),
        texture_id: 0.0,
    }
}

impl RenderPlugin for BatchRenderer {
    fn begin_frame(&mut self, _ctx: &mut RenderContext) {
        self.flush_index = 0;
    }

    fn render(&mut self, ctx: &mut RenderContext, object: RenderObject<'_>) -> Result<(), RenderError> {
        match object.content.batch(object.world, object.world_id, object.world_alpha) {
            Some(element) => self.push(ctx, &element),
            None => Ok(()),
        }
    }

    fn flush(&mut self, ctx: &mut RenderContext) -> Result<(), RenderError> {
        if self.elements.is_empty() {
            return Ok(());
        }
        let batches = self.build_batches();

        if self.flush_index == self.pool.len() {
            self.pool.push(BatchGeometry::new());
        }
        let geometry = &self.pool[self.flush_index];
        self.flush_index += 1;
        geometry.vertices.update(self.vertices.as_slice());
        geometry.indices.update(self.indices.as_slice());

        self.vertices.clear();
        self.indices.clear();
        self.elements.clear();

        for batch in &batches {
            let program = &self.programs[batch.straight_alpha as usize];
            let compiled = ctx.shaders.bind(
                ctx.backend.as_mut(),
                &mut ctx.registry,
                &mut ctx.textures,
                program,
                &[&ctx.globals, &self.samplers],
            )?;
            ctx.geometry.bind(ctx.backend.as_mut(), &mut ctx.registry, &geometry.geometry, &compiled)?;
            for (unit, base) in batch.textures.iter().enumerate() {
                ctx.textures.bind(ctx.backend.as_mut(), &mut ctx.registry, base, unit as u32)?;
            }
            ctx.state.set_blend_mode(ctx.backend.as_mut(), batch.blend);
            ctx.backend.draw(Topology::Triangles, batch.index_start, batch.index_count, 1)?;
            ctx.stats.batches += 1;
        }
        Ok(())
    }

    fn destroy(&mut self, _ctx: &mut RenderContext) {
        for g in self.pool.drain(..) {
            g.destroy();
        }
        self.vertices.clear();
        self.indices.clear();
        self.elements.clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::coords::{Rect, Vec2};
    use crate::device::SoftwareBackend;
    use crate::paint::{BlendMode, Color};
    use crate::render::{RenderOptions, Renderer, RendererOptions};
    use crate::scene::{Graphics, Node, Scene, Sprite};
    use crate::texture::{BaseTexture, BaseTextureOptions, Texture};

    fn renderer(units: u32) -> Renderer {
        let options = RendererOptions::sized(16.0, 16.0).with_texture_units(units);
        Renderer::new(Box::new(SoftwareBackend::new(16, 16)), options)
    }

    fn solid(rgba: [u8; 4]) -> Texture {
        Texture::from_base(BaseTexture::from_pixels(2, 2, rgba.repeat(4), BaseTextureOptions::default()))
    }

    #[test]
    fn same_texture_sprites_share_one_draw() {
        let mut r = renderer(16);
        let mut scene = Scene::new();
        let tex = solid([255, 0, 0, 255]);
        for i in 0..10 {
            scene.add(Node::with_content(Sprite::new(tex.clone())).at(i as f32, 0.0));
        }
        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.skipped, 0);
    }

    #[test]
    fn texture_budget_splits_the_batch() {
        let mut r = renderer(2);
        let mut scene = Scene::new();
        for c in [[255, 0, 0, 255], [0, 255, 0, 255], [0, 0, 255, 255]] {
            scene.add(Node::with_content(Sprite::new(solid(c))));
        }
        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert_eq!(stats.draw_calls, 2);
    }

    #[test]
    fn reused_texture_does_not_count_twice_against_the_budget() {
        let mut r = renderer(2);
        let mut scene = Scene::new();
        let (a, b) = (solid([255, 0, 0, 255]), solid([0, 255, 0, 255]));
        for t in [&a, &b, &a, &b, &a] {
            scene.add(Node::with_content(Sprite::new(t.clone())));
        }
        assert_eq!(r.render(&mut scene, RenderOptions::default()).unwrap().draw_calls, 1);
    }

    #[test]
    fn blend_change_starts_a_new_draw() {
        let mut r = renderer(16);
        let mut scene = Scene::new();
        let tex = solid([255, 255, 255, 255]);
        for blend in [BlendMode::Normal, BlendMode::Normal, BlendMode::Add, BlendMode::Normal] {
            scene.add(Node::with_content(Sprite::new(tex.clone()).with_blend(blend)));
        }
        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert_eq!(stats.draw_calls, 3);
    }

    #[test]
    fn invalid_and_degenerate_elements_are_skipped() {
        let mut r = renderer(16);
        let mut scene = Scene::new();
        scene.add(Node::with_content(Sprite::new(Texture::from_base(BaseTexture::pending(
            BaseTextureOptions::default(),
        )))));
        scene.add(Node::with_content(Sprite::new(solid([255; 4]))).with_scale(0.0, 1.0));
        scene.add(Node::with_content(Sprite::new(solid([255; 4]))));

        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.draw_calls, 1);
    }

    #[test]
    fn graphics_join_sprite_batches() {
        let mut r = renderer(16);
        let mut scene = Scene::new();
        let mut g = Graphics::new();
        g.fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), Color::WHITE);
        g.fill_circle(Vec2::new(8.0, 8.0), 3.0, Color::from_hex(0x00ff00));
        scene.add(Node::with_content(g));
        scene.add(Node::with_content(Sprite::new(solid([255, 0, 0, 255]))).at(12.0, 12.0));

        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert_eq!(stats.draw_calls, 1);
        let px = r.extract_pixels(None).unwrap();
        assert_eq!(px.get(1, 1), Some([255, 255, 255, 255]));
        assert_eq!(px.get(8, 8), Some([0, 255, 0, 255]));
        assert_eq!(px.get(12, 12), Some([255, 0, 0, 255]));
    }

    #[test]
    fn small_vertex_budget_flushes_early() {
        let options = RendererOptions { max_batch_vertices: 8, ..RendererOptions::sized(16.0, 16.0) };
        let mut r = Renderer::new(Box::new(SoftwareBackend::new(16, 16)), options);
        let mut scene = Scene::new();
        let tex = solid([255; 4]);
        for _ in 0..3 {
            scene.add(Node::with_content(Sprite::new(tex.clone())));
        }
        // Two quads fit per flush.
        assert_eq!(r.render(&mut scene, RenderOptions::default()).unwrap().draw_calls, 2);
    }

    #[test]
    fn graphics_larger_than_the_budget_is_split_across_flushes() {
        let options = RendererOptions { max_batch_vertices: 8, ..RendererOptions::sized(16.0, 16.0) };
        let mut r = Renderer::new(Box::new(SoftwareBackend::new(16, 16)), options);
        let mut scene = Scene::new();
        let mut g = Graphics::new();
        // 15 segments: 13 fan triangles, six fit in each flush.
        g.fill_circle(Vec2::new(8.0, 8.0), 6.0, Color::from_hex(0x00ff00));
        scene.add(Node::with_content(g));

        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert_eq!(stats.skipped, 0);
        assert_eq!(stats.draw_calls, 3);
        let px = r.extract_pixels(None).unwrap();
        for (x, y) in [(4, 8), (12, 8), (8, 4), (8, 12), (5, 5), (11, 11), (11, 5), (5, 11)] {
            assert_eq!(px.get(x, y), Some([0, 255, 0, 255]), "pixel ({x}, {y})");
        }
    }

    #[test]
    fn graphics_past_the_default_budget_still_draws() {
        let mut r = renderer(16);
        let mut scene = Scene::new();
        let mut g = Graphics::new();
        for _ in 0..70 {
            g.fill_circle(Vec2::new(8.0, 8.0), 2000.0, Color::WHITE);
        }
        scene.add(Node::with_content(g));

        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert_eq!(stats.skipped, 0);
        assert_eq!(stats.draw_calls, 2);
        let px = r.extract_pixels(None).unwrap();
        assert_eq!(px.get(8, 8), Some([255, 255, 255, 255]));
        assert_eq!(px.get(0, 15), Some([255, 255, 255, 255]));
    }
}
