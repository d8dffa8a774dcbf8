use indextree::NodeId;

use crate::coords::{Matrix, Rect, Vec2};
use crate::device::{Backend, BackendStats};
use crate::paint::Color;
use crate::scene::{Graphics, MaskSource, Renderable, Scene};

use super::context::RenderContext;
use super::error::RenderError;
use super::mask::{MaskKind, MaskSystem};
use super::options::{RenderOptions, RendererOptions};
use super::plugin::{PluginRegistry, RenderObject, RenderPlugin};

/// Counters of the last [`Renderer::render`] call.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct FrameStats {
    pub draw_calls: u32,
    /// Draws issued by plugins (equals `draw_calls` unless a backend splits
    /// or merges draws).
    pub batches: u32,
    /// Objects not drawn because their texture or geometry was unusable.
    pub skipped: u32,
    /// True when the frame was abandoned because the context was lost.
    pub dropped: bool,
    pub backend: BackendStats,
}

/// Resolved geometry of a mask for this frame.
enum MaskShape {
    Rect { rect: Rect, world: Matrix },
    Node(NodeId),
    Missing,
}

/// Draws a [`Scene`] through a [`Backend`].
///
/// Holds the render systems, the plugin instances and the mask stack. The
/// renderer recovers from context loss on its own: a frame rendered while
/// the context is lost is dropped, and the next frame re-creates every
/// native object lazily.
pub struct Renderer {
    ctx: RenderContext,
    plugins: Vec<(String, Box<dyn RenderPlugin>)>,
    active: Option<usize>,
    masks: MaskSystem,
    destroyed: bool,
}

impl Renderer {
    /// Renderer with the built-in plugins.
    pub fn new(backend: Box<dyn Backend>, options: RendererOptions) -> Self {
        Self::with_plugins(backend, options, &PluginRegistry::with_defaults())
    }

    pub fn with_plugins(mut backend: Box<dyn Backend>, options: RendererOptions, plugins: &PluginRegistry) -> Self {
        let size = options.pixel_size();
        if backend.screen_size() != size {
            backend.resize_screen(size.0, size.1);
        }
        let ctx = RenderContext::new(backend, options);
        let plugins = plugins.instantiate(&ctx);
        log::debug!(
            "renderer plugins: {}",
            plugins.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>().join(", ")
        );
        Self { ctx, plugins, active: None, masks: MaskSystem::new(), destroyed: false }
    }

    /// Adds or replaces a plugin on a live renderer.
    pub fn register_plugin(
        &mut self,
        name: &str,
        factory: impl Fn(&RenderContext) -> Box<dyn RenderPlugin> + 'static,
    ) -> Result<(), RenderError> {
        self.check_alive()?;
        let plugin = factory(&self.ctx);
        match self.plugins.iter().position(|(n, _)| n == name) {
            Some(index) => {
                if self.active == Some(index) {
                    self.stop_active()?;
                }
                let (_, mut old) = std::mem::replace(&mut self.plugins[index], (name.to_string(), plugin));
                old.destroy(&mut self.ctx);
                log::debug!("renderer: plugin `{name}` replaced");
            }
            None => self.plugins.push((name.to_string(), plugin)),
        }
        Ok(())
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.iter().any(|(n, _)| n == name)
    }

    // ── frame ─────────────────────────────────────────────────────────────

    /// Draws `scene` to the screen or to `options.render_texture`.
    pub fn render(&mut self, scene: &mut Scene, options: RenderOptions<'_>) -> Result<FrameStats, RenderError> {
        self.check_alive()?;
        self.ctx.backend.reset_stats();
        self.ctx.stats = FrameStats::default();

        match self.render_frame(scene, &options) {
            Ok(()) => {}
            Err(e) if e.is_context_lost() => {
                log::warn!("renderer: context lost during the frame; frame dropped");
                self.ctx.registry.mark_lost();
                self.abort_frame();
                self.ctx.stats.dropped = true;
            }
            Err(e) => {
                self.abort_frame();
                return Err(e);
            }
        }

        let backend = self.ctx.backend.stats();
        self.ctx.stats.draw_calls = backend.draw_calls;
        self.ctx.stats.backend = backend;
        Ok(self.ctx.stats)
    }

    fn render_frame(&mut self, scene: &mut Scene, options: &RenderOptions<'_>) -> Result<(), RenderError> {
        if !self.prepare()? {
            log::debug!("renderer: context still lost; frame dropped");
            self.ctx.stats.dropped = true;
            return Ok(());
        }

        if !options.skip_update_transform {
            scene.update_transforms(options.transform.as_ref());
        }
        for (_, plugin) in self.plugins.iter_mut() {
            plugin.begin_frame(&mut self.ctx);
        }

        self.ctx.bind_render_target(options.render_texture, None, None, 0)?;
        self.ctx.state.apply_defaults(self.ctx.backend.as_mut());
        if options.clear.unwrap_or(self.ctx.options.clear_before_render) {
            let color = match options.render_texture {
                Some(_) => Color::TRANSPARENT,
                None => self.ctx.options.background,
            };
            self.ctx.backend.clear(Some(color.to_array()), Some(0))?;
        }

        let root = scene.root();
        self.render_node(scene, root)?;
        self.stop_active()?;

        if !self.masks.is_balanced() {
            log::error!("renderer: {} masks left on the stack at frame end", self.masks.depth());
            self.masks.reset();
        }
        self.ctx.backend.end_frame()?;
        Ok(())
    }

    /// Syncs the registry with the backend. Returns `false` while the
    /// context cannot be restored.
    fn prepare(&mut self) -> Result<bool, RenderError> {
        let generation = self.ctx.registry.generation();
        let was_valid = self.ctx.registry.is_valid();
        if !self.ctx.registry.prepare(self.ctx.backend.as_mut())? {
            return Ok(false);
        }
        if !was_valid || self.ctx.registry.generation() != generation {
            log::info!("renderer: context generation {} ready", self.ctx.registry.generation());
            self.ctx.reset_systems();
            self.active = None;
        }
        self.ctx.registry.collect_garbage(self.ctx.backend.as_mut());
        self.ctx.shaders.prune(self.ctx.backend.as_mut(), &mut self.ctx.registry);
        self.ctx.geometry.prune(&self.ctx.registry);
        self.ctx.textures.prune(&self.ctx.registry);
        Ok(true)
    }

    fn abort_frame(&mut self) {
        if let Some(index) = self.active.take() {
            if let Err(e) = self.plugins[index].1.stop(&mut self.ctx) {
                log::debug!("renderer: discarded pending work: {e}");
            }
        }
        self.masks.reset();
        self.ctx.target.reset();
        self.ctx.state.reset();
    }

    fn render_node(&mut self, scene: &mut Scene, id: NodeId) -> Result<(), RenderError> {
        let Some(node) = scene.node(id) else { return Ok(()) };
        if !node.visible || node.world_alpha() <= 0.0 {
            return Ok(());
        }
        let mask = node.mask();
        let draw_content = node.renderable && node.content().is_some();

        if let Some(mask) = mask {
            self.push_mask(scene, id, mask)?;
        }
        if draw_content {
            self.render_content(scene, id)?;
        }
        for child in scene.paint_order(id) {
            self.render_node(scene, child)?;
        }
        if let Some(mask) = mask {
            self.pop_mask(scene, id, mask)?;
        }
        Ok(())
    }

    fn render_content(&mut self, scene: &mut Scene, id: NodeId) -> Result<(), RenderError> {
        let Some(node) = scene.node_mut(id) else { return Ok(()) };
        let world = *node.world_transform();
        let world_id = node.transform.world_id();
        let world_alpha = node.world_alpha();
        let Some(content) = node.content_mut() else { return Ok(()) };
        self.draw(content, &world, world_id, world_alpha)
    }

    fn draw(
        &mut self,
        content: &mut dyn Renderable,
        world: &Matrix,
        world_id: u64,
        world_alpha: f32,
    ) -> Result<(), RenderError> {
        let index = self.activate(content.plugin())?;
        let object = RenderObject { content, world, world_id, world_alpha };
        self.plugins[index].1.render(&mut self.ctx, object)
    }

    /// Makes `name` the active plugin, stopping the previous one.
    fn activate(&mut self, name: &str) -> Result<usize, RenderError> {
        let index = self
            .plugins
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| RenderError::UnknownPlugin(name.to_string()))?;
        if self.active != Some(index) {
            self.stop_active()?;
            self.plugins[index].1.start(&mut self.ctx)?;
            self.active = Some(index);
        }
        Ok(index)
    }

    fn stop_active(&mut self) -> Result<(), RenderError> {
        match self.active.take() {
            Some(index) => self.plugins[index].1.stop(&mut self.ctx),
            None => Ok(()),
        }
    }

    // ── masks ─────────────────────────────────────────────────────────────

    fn mask_shape(scene: &Scene, owner: NodeId, mask: MaskSource) -> MaskShape {
        match mask {
            MaskSource::Rect(rect) => match scene.node(owner) {
                Some(node) => MaskShape::Rect { rect, world: *node.world_transform() },
                None => MaskShape::Missing,
            },
            MaskSource::Node(id) => {
                let Some(node) = scene.node(id) else { return MaskShape::Missing };
                match scene.get::<Graphics>(id).and_then(Graphics::as_rect) {
                    Some(rect) => MaskShape::Rect { rect, world: *node.world_transform() },
                    None => MaskShape::Node(id),
                }
            }
        }
    }

    fn push_mask(&mut self, scene: &mut Scene, owner: NodeId, mask: MaskSource) -> Result<(), RenderError> {
        self.stop_active()?;
        let shape = Self::mask_shape(scene, owner, mask);

        if let MaskShape::Missing = shape {
            log::warn!("renderer: mask of node {owner:?} is gone; drawing unmasked");
            self.masks.push_skipped();
            return Ok(());
        }
        if let MaskShape::Rect { rect, world } = &shape {
            if let (true, Some(target)) = (world.is_axis_aligned(), self.ctx.target.current()) {
                let r = rect.normalized();
                let corners = [r.origin, Vec2::new(r.max().x, r.y()), r.max(), Vec2::new(r.x(), r.max().y)];
                let bounds = Rect::bounding(corners.into_iter().map(|p| world.apply(p)));
                let pixels = target.to_pixels(bounds);
                self.masks.push_scissor(&mut self.ctx, pixels);
                return Ok(());
            }
        }

        self.masks.begin_stencil_push(&mut self.ctx)?;
        self.draw_mask(scene, &shape)?;
        self.masks.end_stencil_push(&mut self.ctx);
        Ok(())
    }

    fn pop_mask(&mut self, scene: &mut Scene, owner: NodeId, mask: MaskSource) -> Result<(), RenderError> {
        self.stop_active()?;
        if self.masks.begin_pop(&mut self.ctx)? == MaskKind::Stencil {
            let shape = Self::mask_shape(scene, owner, mask);
            self.draw_mask(scene, &shape)?;
            self.masks.end_stencil_pop(&mut self.ctx);
        }
        Ok(())
    }

    /// Draws the mask shape with whatever stencil state is set, then flushes.
    fn draw_mask(&mut self, scene: &mut Scene, shape: &MaskShape) -> Result<(), RenderError> {
        match shape {
            MaskShape::Rect { rect, world } => {
                let mut graphics = Graphics::new();
                graphics.fill_rect(*rect, Color::WHITE);
                self.draw(&mut graphics, world, 0, 1.0)?;
            }
            MaskShape::Node(id) => {
                let Some(node) = scene.node_mut(*id) else { return Ok(()) };
                let world = *node.world_transform();
                let world_id = node.transform.world_id();
                if let Some(content) = node.content_mut() {
                    self.draw(content, &world, world_id, 1.0)?;
                }
            }
            MaskShape::Missing => {}
        }
        self.stop_active()
    }

    // ── lifecycle ─────────────────────────────────────────────────────────

    /// Resizes the screen (logical units).
    pub fn resize(&mut self, width: f32, height: f32) -> Result<(), RenderError> {
        self.check_alive()?;
        self.ctx.options.width = width.max(1.0);
        self.ctx.options.height = height.max(1.0);
        let (w, h) = self.ctx.options.pixel_size();
        self.ctx.backend.resize_screen(w, h);
        self.ctx.target.reset();
        log::debug!("renderer: resized to {w}x{h} px");
        Ok(())
    }

    /// Releases every plugin and native object. The renderer is unusable
    /// afterwards; calling `destroy` again is a no-op.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        if let Err(e) = self.stop_active() {
            log::debug!("renderer: pending work discarded on destroy: {e}");
        }
        for (_, plugin) in self.plugins.iter_mut() {
            plugin.destroy(&mut self.ctx);
        }
        self.plugins.clear();
        self.ctx.registry.release_all(self.ctx.backend.as_mut());
        self.masks.reset();
        self.destroyed = true;
        log::info!("renderer destroyed");
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub(crate) fn check_alive(&self) -> Result<(), RenderError> {
        if self.destroyed { Err(RenderError::Destroyed) } else { Ok(()) }
    }

    // ── accessors ─────────────────────────────────────────────────────────

    pub fn context(&self) -> &RenderContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut RenderContext {
        &mut self.ctx
    }

    pub fn backend(&self) -> &dyn Backend {
        self.ctx.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn Backend {
        self.ctx.backend.as_mut()
    }

    /// Concrete backend, e.g. the software backend in tests.
    pub fn backend_as<T: Backend + 'static>(&self) -> Option<&T> {
        self.ctx.backend.as_any().downcast_ref::<T>()
    }

    pub fn backend_as_mut<T: Backend + 'static>(&mut self) -> Option<&mut T> {
        self.ctx.backend.as_any_mut().downcast_mut::<T>()
    }

    pub fn options(&self) -> &RendererOptions {
        &self.ctx.options
    }

    pub fn masks(&self) -> &MaskSystem {
        &self.masks
    }

    pub(crate) fn stop_for_readback(&mut self) -> Result<(), RenderError> {
        self.stop_active()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use core::f32::consts::FRAC_PI_4;

    use super::*;
    use crate::device::{PixelRect, ScaleMode, SoftwareBackend, StencilState};
    use crate::render::{ImageDiff, Pixels};
    use crate::scene::{Mesh, Node, Particle, ParticleContainer, Sprite};
    use crate::shader::builtin::mesh_program;
    use crate::shader::{Program, Shader, UniformGroup};
    use crate::texture::{BaseTexture, BaseTextureOptions, RenderTexture, Texture};

    fn renderer(size: u32) -> Renderer {
        let options = RendererOptions::sized(size as f32, size as f32);
        Renderer::new(Box::new(SoftwareBackend::new(size, size)), options)
    }

    fn solid(rgba: [u8; 4]) -> Texture {
        Texture::from_base(BaseTexture::from_pixels(2, 2, rgba.repeat(4), BaseTextureOptions::default()))
    }

    fn software(r: &mut Renderer) -> &mut SoftwareBackend {
        r.backend_as_mut::<SoftwareBackend>().unwrap()
    }

    /// White square covering `size`×`size` units from the node origin.
    fn white_square(size: f32) -> Node {
        Node::with_content(Sprite::new(solid([255; 4]))).with_scale(size / 2.0, size / 2.0)
    }

    // ── drawing ───────────────────────────────────────────────────────────

    #[test]
    fn sprite_covers_its_frame() {
        let mut r = renderer(8);
        let mut scene = Scene::new();
        scene.add(Node::with_content(Sprite::new(solid([255, 0, 0, 255]))).at(2.0, 2.0).with_scale(2.0, 2.0));
        r.render(&mut scene, RenderOptions::default()).unwrap();

        let px = r.extract_pixels(None).unwrap();
        assert_eq!(px.get(3, 3), Some([255, 0, 0, 255]));
        assert_eq!(px.get(5, 5), Some([255, 0, 0, 255]));
        assert_eq!(px.get(1, 1), Some([0, 0, 0, 255]));
        assert_eq!(px.get(6, 6), Some([0, 0, 0, 255]));
    }

    #[test]
    fn node_alpha_reaches_the_batch_premultiplied() {
        let mut r = renderer(4);
        let mut scene = Scene::new();
        scene.add(white_square(4.0).with_alpha(0.5));
        r.render(&mut scene, RenderOptions::default()).unwrap();

        let px = r.extract_pixels(None).unwrap();
        let [red, green, blue, alpha] = px.get(1, 1).unwrap();
        assert!(red.abs_diff(128) <= 1 && green == red && blue == red);
        assert_eq!(alpha, 255);
    }

    #[test]
    fn render_transform_offsets_the_scene() {
        let mut r = renderer(8);
        let mut scene = Scene::new();
        scene.add(white_square(2.0));
        let options = RenderOptions::default().with_transform(Matrix::translation(4.0, 4.0));
        r.render(&mut scene, options).unwrap();

        let px = r.extract_pixels(None).unwrap();
        assert_eq!(px.get(0, 0), Some([0, 0, 0, 255]));
        assert_eq!(px.get(4, 4), Some([255, 255, 255, 255]));
    }

    #[test]
    fn invisible_and_transparent_subtrees_are_not_drawn() {
        let mut r = renderer(4);
        let mut scene = Scene::new();
        let hidden = scene.add(Node::container());
        scene.node_mut(hidden).unwrap().visible = false;
        scene.add_to(hidden, white_square(4.0));
        let faded = scene.add(Node::container().with_alpha(0.0));
        scene.add_to(faded, white_square(4.0));

        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert_eq!(stats.draw_calls, 0);
    }

    #[test]
    fn custom_shader_mesh_interrupts_the_batch() {
        let mut r = renderer(8);
        let mut scene = Scene::new();
        let tex = solid([255; 4]);
        scene.add(Node::with_content(Sprite::new(tex.clone())));
        let mesh = Mesh::quad(tex.clone()).with_shader(Shader::new(mesh_program(false), UniformGroup::new()));
        scene.add(Node::with_content(mesh).at(4.0, 4.0));
        scene.add(Node::with_content(Sprite::new(tex)).at(2.0, 0.0));

        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert_eq!(stats.draw_calls, 3);
        let px = r.extract_pixels(None).unwrap();
        assert_eq!(px.get(4, 4), Some([255, 255, 255, 255]));
    }

    #[test]
    fn broken_custom_shader_skips_only_its_mesh() {
        let mut r = renderer(8);
        let mut scene = Scene::new();
        scene.add(Node::with_content(Sprite::new(solid([255, 0, 0, 255]))));
        let broken = Program::new("broken", "#version 450\nvoid main() { oops }\n", "void main() {}");
        let mesh = Mesh::quad(solid([255; 4])).with_shader(Shader::new(broken, UniformGroup::new()));
        scene.add(Node::with_content(mesh).at(4.0, 4.0));
        scene.add(Node::with_content(Sprite::new(solid([0, 0, 255, 255]))).at(6.0, 0.0));

        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert_eq!(stats.skipped, 1);
        let px = r.extract_pixels(None).unwrap();
        assert_eq!(px.get(1, 1), Some([255, 0, 0, 255]));
        assert_eq!(px.get(7, 1), Some([0, 0, 255, 255]));
        assert_eq!(px.get(5, 5), Some([0, 0, 0, 255]));

        // The failure is cached: the next frame skips again without a relink.
        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.backend.program_links, 0);
    }

    #[test]
    fn dropped_custom_shader_is_released() {
        let mut r = renderer(8);
        let mut scene = Scene::new();
        let base = mesh_program(false);
        let program = Program::with_defines("marked", base.vertex_source(), base.fragment_source(), &[("MARKED", "1")]);
        let mesh = Mesh::quad(solid([255; 4])).with_shader(Shader::new(program, UniformGroup::new()));
        let node = scene.add(Node::with_content(mesh));
        r.render(&mut scene, RenderOptions::default()).unwrap();
        let programs = software(&mut r).live_programs();
        assert!(r.context_mut().geometry.cached_layouts() >= 1);

        scene.destroy(node);
        r.render(&mut scene, RenderOptions::default()).unwrap();
        assert_eq!(software(&mut r).live_programs(), programs - 1);
        assert_eq!(r.context_mut().geometry.cached_layouts(), 0);
    }

    #[test]
    fn particles_draw_with_one_call() {
        let mut r = renderer(16);
        let mut scene = Scene::new();
        let mut particles = ParticleContainer::new(solid([0, 0, 255, 255]));
        for i in 0..50 {
            particles.push(Particle::at((i % 8) as f32 * 2.0, (i / 8) as f32 * 2.0));
        }
        scene.add(Node::with_content(particles));

        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert_eq!(stats.draw_calls, 1);
        let px = r.extract_pixels(None).unwrap();
        assert_eq!(px.get(0, 0), Some([0, 0, 255, 255]));
    }

    #[test]
    fn spritesheet_frames_batch_and_match_reference() {
        // 16×16 sheet: red, green / blue, white quadrants of 8×8.
        let colors = [[255, 0, 0, 255], [0, 255, 0, 255], [0, 0, 255, 255], [255, 255, 255, 255]];
        let mut sheet = Vec::with_capacity(16 * 16 * 4);
        for y in 0..16 {
            for x in 0..16 {
                sheet.extend_from_slice(&colors[(y / 8) * 2 + x / 8]);
            }
        }
        let options = BaseTextureOptions { scale_mode: ScaleMode::Nearest, ..BaseTextureOptions::default() };
        let base = BaseTexture::from_pixels(16, 16, sheet, options);
        let frames: Vec<Texture> = (0..4)
            .map(|i| {
                let frame = Rect::new((i % 2) as f32 * 8.0, (i / 2) as f32 * 8.0, 8.0, 8.0);
                Texture::from_frame(&base, frame, None, None)
            })
            .collect();

        let mut r = renderer(40);
        let mut scene = Scene::new();
        for i in 0..100 {
            let (cx, cy) = (i % 10, i / 10);
            let sprite = Sprite::new(frames[(cx + cy) % 4].clone());
            scene.add(Node::with_content(sprite).at(cx as f32 * 4.0, cy as f32 * 4.0).with_scale(0.5, 0.5));
        }
        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert_eq!(stats.draw_calls, 1);

        let mut expected = Pixels { width: 40, height: 40, data: Vec::with_capacity(40 * 40 * 4) };
        for y in 0..40usize {
            for x in 0..40usize {
                expected.data.extend_from_slice(&colors[(x / 4 + y / 4) % 4]);
            }
        }
        let actual = r.extract_pixels(None).unwrap();
        let report = ImageDiff::new(2).compare(&actual, &expected);
        assert!(report.is_match(), "{report:?}");
    }

    // ── render targets ────────────────────────────────────────────────────

    #[test]
    fn render_texture_receives_the_scene() {
        let mut r = renderer(8);
        let rt = RenderTexture::new(4.0, 4.0, 1.0);
        let mut scene = Scene::new();
        scene.add(white_square(2.0));
        r.render(&mut scene, RenderOptions::to_texture(&rt)).unwrap();

        let px = r.extract_pixels(Some(&rt)).unwrap();
        assert_eq!((px.width, px.height), (4, 4));
        assert_eq!(px.get(0, 0), Some([255, 255, 255, 255]));
        assert_eq!(px.get(3, 3), Some([0, 0, 0, 0]));
        // The screen was not touched.
        assert!(software(&mut r).screen_pixels().iter().all(|v| *v == 0));
    }

    #[test]
    fn render_texture_can_be_drawn_afterwards() {
        let mut r = renderer(8);
        let rt = RenderTexture::new(4.0, 4.0, 1.0);
        let mut offscreen = Scene::new();
        let mut g = Graphics::new();
        g.fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), Color::from_hex(0x00ff00));
        offscreen.add(Node::with_content(g));
        r.render(&mut offscreen, RenderOptions::to_texture(&rt)).unwrap();

        let mut scene = Scene::new();
        scene.add(Node::with_content(Sprite::new(rt.texture().clone())).at(4.0, 4.0));
        r.render(&mut scene, RenderOptions::default()).unwrap();
        let px = r.extract_pixels(None).unwrap();
        assert_eq!(px.get(5, 5), Some([0, 255, 0, 255]));
        assert_eq!(px.get(1, 1), Some([0, 0, 0, 255]));
    }

    #[test]
    fn rebinding_the_same_target_is_free() {
        let mut r = renderer(8);
        let rt = RenderTexture::new(4.0, 4.0, 1.0);
        let ctx = r.context_mut();
        assert!(ctx.bind_render_target(Some(&rt), None, None, 0).unwrap());
        let bound = *ctx.target.current().unwrap();
        let before = ctx.backend.stats();

        assert!(!ctx.bind_render_target(Some(&rt), None, None, 0).unwrap());
        let after = ctx.backend.stats();
        assert_eq!(before.framebuffer_binds, after.framebuffer_binds);
        assert_eq!(before.viewport_changes, after.viewport_changes);
        assert_eq!(*ctx.target.current().unwrap(), bound);
    }

    #[test]
    fn frames_and_mip_level_shape_the_viewport() {
        let mut r = renderer(8);
        let options = BaseTextureOptions { mipmap: true, ..BaseTextureOptions::default() };
        let rt = RenderTexture::with_options(8.0, 8.0, options, false);
        let ctx = r.context_mut();

        ctx.bind_render_target(Some(&rt), Some(Rect::new(10.0, 10.0, 4.0, 4.0)), None, 1).unwrap();
        let bound = *ctx.target.current().unwrap();
        assert_eq!(bound.viewport, PixelRect::new(0, 0, 4, 4));
        assert!(ctx.projection.matrix().apply(Vec2::new(10.0, 10.0)).approx_eq(Vec2::new(-1.0, 1.0), 1e-6));
        assert_eq!(software(&mut r).current_viewport(), PixelRect::new(0, 0, 4, 4));
    }

    #[test]
    fn resolution_scales_the_screen() {
        let options = RendererOptions::sized(4.0, 4.0).with_resolution(2.0);
        let mut r = Renderer::new(Box::new(SoftwareBackend::new(1, 1)), options);
        assert_eq!(r.backend().screen_size(), (8, 8));

        let mut scene = Scene::new();
        scene.add(white_square(2.0));
        r.render(&mut scene, RenderOptions::default()).unwrap();
        let px = r.extract_pixels(None).unwrap();
        assert_eq!(px.get(3, 3), Some([255, 255, 255, 255]));
        assert_eq!(px.get(4, 4), Some([0, 0, 0, 255]));
    }

    #[test]
    fn resize_reallocates_the_screen() {
        let mut r = renderer(4);
        r.resize(20.0, 10.0).unwrap();
        assert_eq!(r.backend().screen_size(), (20, 10));
        let mut scene = Scene::new();
        scene.add(white_square(20.0));
        r.render(&mut scene, RenderOptions::default()).unwrap();
        assert_eq!(r.extract_pixels(None).unwrap().get(19, 9), Some([255, 255, 255, 255]));
    }

    // ── masks ─────────────────────────────────────────────────────────────

    #[test]
    fn rect_mask_clips_with_scissor() {
        let mut r = renderer(8);
        let mut scene = Scene::new();
        let clip = scene.add(Node::container().at(2.0, 2.0));
        scene.set_mask(clip, Some(MaskSource::Rect(Rect::new(0.0, 0.0, 4.0, 4.0))));
        scene.add_to(clip, white_square(8.0));

        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert!(stats.backend.scissor_changes >= 2);

        let px = r.extract_pixels(None).unwrap();
        assert_eq!(px.get(3, 3), Some([255, 255, 255, 255]));
        assert_eq!(px.get(1, 1), Some([0, 0, 0, 255]));
        assert_eq!(px.get(6, 6), Some([0, 0, 0, 255]));
        assert!(r.masks().is_balanced());
        assert_eq!(software(&mut r).current_scissor(), None);
    }

    #[test]
    fn rotated_mask_clips_with_stencil() {
        let mut r = renderer(16);
        let mut scene = Scene::new();
        let clip = scene.add(Node::container().at(8.0, 8.0).with_rotation(FRAC_PI_4));
        scene.set_mask(clip, Some(MaskSource::Rect(Rect::new(-3.0, -3.0, 6.0, 6.0))));
        scene.add_to(clip, white_square(32.0).at(-16.0, -16.0));

        r.render(&mut scene, RenderOptions::default()).unwrap();
        let px = r.extract_pixels(None).unwrap();
        assert_eq!(px.get(8, 8), Some([255, 255, 255, 255]));
        assert_eq!(px.get(1, 1), Some([0, 0, 0, 255]));
        assert_eq!(px.get(8, 1), Some([0, 0, 0, 255]));

        let backend = software(&mut r);
        assert_eq!(backend.current_stencil(), StencilState::DISABLED);
        assert_eq!(backend.screen_stencil(8, 8), 0);
        assert!(r.masks().is_balanced());
    }

    #[test]
    fn graphics_node_mask_limits_children() {
        let mut r = renderer(16);
        let mut scene = Scene::new();
        let clip = scene.add(Node::container());
        let mut shape = Graphics::new();
        shape.fill_circle(Vec2::new(8.0, 8.0), 4.0, Color::WHITE);
        let mask = scene.add_to(clip, Node::with_content(shape));
        scene.set_mask(clip, Some(MaskSource::Node(mask)));
        scene.add_to(clip, white_square(16.0));

        r.render(&mut scene, RenderOptions::default()).unwrap();
        let px = r.extract_pixels(None).unwrap();
        assert_eq!(px.get(8, 8), Some([255, 255, 255, 255]));
        assert_eq!(px.get(1, 1), Some([0, 0, 0, 255]));
        assert_eq!(px.get(14, 14), Some([0, 0, 0, 255]));
    }

    #[test]
    fn rect_graphics_mask_takes_the_scissor_path() {
        let mut r = renderer(8);
        let mut scene = Scene::new();
        let clip = scene.add(Node::container());
        let mut shape = Graphics::new();
        shape.fill_rect(Rect::new(0.0, 0.0, 4.0, 8.0), Color::WHITE);
        let mask = scene.add_to(clip, Node::with_content(shape));
        scene.set_mask(clip, Some(MaskSource::Node(mask)));
        scene.add_to(clip, white_square(8.0));

        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert!(stats.backend.scissor_changes >= 2);
        let px = r.extract_pixels(None).unwrap();
        assert_eq!(px.get(2, 2), Some([255, 255, 255, 255]));
        assert_eq!(px.get(6, 2), Some([0, 0, 0, 255]));
    }

    fn nested_rotated_masks(depth: usize) -> Scene {
        let mut scene = Scene::new();
        let mut parent = scene.root();
        for _ in 0..depth {
            let clip = scene.add_to(parent, Node::container().with_rotation(0.1));
            scene.set_mask(clip, Some(MaskSource::Rect(Rect::new(0.0, 0.0, 8.0, 8.0))));
            parent = clip;
        }
        scene.add_to(parent, white_square(8.0));
        scene
    }

    #[test]
    fn stencil_depth_within_limit_balances() {
        let options = RendererOptions::sized(8.0, 8.0).with_stencil_bits(2);
        let mut r = Renderer::new(Box::new(SoftwareBackend::new(8, 8)), options);
        let mut scene = nested_rotated_masks(3);
        r.render(&mut scene, RenderOptions::default()).unwrap();
        assert!(r.masks().is_balanced());
        assert_eq!(software(&mut r).screen_stencil(4, 4), 0);
    }

    #[test]
    fn stencil_overflow_is_an_error_and_recoverable() {
        let options = RendererOptions::sized(8.0, 8.0).with_stencil_bits(2);
        let mut r = Renderer::new(Box::new(SoftwareBackend::new(8, 8)), options);
        let mut scene = nested_rotated_masks(4);
        let err = r.render(&mut scene, RenderOptions::default()).unwrap_err();
        assert!(matches!(err, RenderError::MaskOverflow { depth: 4, max: 3 }));
        assert!(r.masks().is_balanced());

        let mut ok = nested_rotated_masks(1);
        assert!(r.render(&mut ok, RenderOptions::default()).is_ok());
    }

    #[test]
    fn destroyed_mask_node_draws_unmasked() {
        let mut r = renderer(8);
        let mut scene = Scene::new();
        let clip = scene.add(Node::container());
        let mask = scene.add(Node::with_content(Graphics::new()));
        scene.set_mask(clip, Some(MaskSource::Node(mask)));
        scene.destroy(mask);
        scene.add_to(clip, white_square(8.0));

        r.render(&mut scene, RenderOptions::default()).unwrap();
        assert_eq!(r.extract_pixels(None).unwrap().get(6, 6), Some([255, 255, 255, 255]));
    }

    // ── context loss ──────────────────────────────────────────────────────

    #[test]
    fn context_loss_recovery_is_pixel_identical() {
        let mut r = renderer(16);
        let mut scene = Scene::new();
        let clip = scene.add(Node::container().at(8.0, 8.0).with_rotation(0.3));
        scene.set_mask(clip, Some(MaskSource::Rect(Rect::new(-6.0, -6.0, 12.0, 12.0))));
        scene.add_to(clip, Node::with_content(Sprite::new(solid([255, 0, 0, 255]))).at(-8.0, -8.0).with_scale(4.0, 4.0));
        scene.add(Node::with_content(Sprite::new(solid([0, 0, 255, 128]))).at(1.0, 1.0).with_scale(3.0, 3.0));

        r.render(&mut scene, RenderOptions::default()).unwrap();
        let before = r.extract_pixels(None).unwrap();

        software(&mut r).lose_context();
        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert!(!stats.dropped);
        assert!(stats.backend.texture_allocs >= 2);
        let after = r.extract_pixels(None).unwrap();
        assert_eq!(before, after);
    }

    /// Loses the software context while drawing, once per armed flag.
    struct LosesContext(Rc<Cell<bool>>);

    impl RenderPlugin for LosesContext {
        fn render(&mut self, ctx: &mut RenderContext, _object: RenderObject<'_>) -> Result<(), RenderError> {
            if self.0.replace(false) {
                if let Some(backend) = ctx.backend.as_any_mut().downcast_mut::<SoftwareBackend>() {
                    backend.lose_context();
                }
            }
            Ok(())
        }
    }

    #[test]
    fn context_lost_mid_frame_drops_it_and_recovers() {
        let mut r = renderer(8);
        let armed = Rc::new(Cell::new(false));
        let flag = armed.clone();
        r.register_plugin("custom", move |_| Box::new(LosesContext(flag.clone())) as Box<dyn RenderPlugin>)
            .unwrap();
        let mut scene = Scene::new();
        scene.add(Node::with_content(Sprite::new(solid([255, 0, 0, 255]))));
        scene.add(Node::with_content(Custom));
        scene.add(Node::with_content(Sprite::new(solid([0, 255, 0, 255]))).at(4.0, 4.0));

        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert_eq!(stats.draw_calls, 2);
        let before = r.extract_pixels(None).unwrap();

        armed.set(true);
        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert!(stats.dropped);
        assert!(r.masks().is_balanced());

        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert!(!stats.dropped);
        assert_eq!(stats.draw_calls, 2);
        assert_eq!(r.extract_pixels(None).unwrap(), before);
    }

    #[test]
    fn unrestorable_context_drops_frames() {
        let mut r = renderer(4);
        let mut scene = Scene::new();
        scene.add(white_square(4.0));
        r.render(&mut scene, RenderOptions::default()).unwrap();

        let backend = software(&mut r);
        backend.lose_context();
        backend.set_restorable(false);
        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert!(stats.dropped);
        assert_eq!(stats.draw_calls, 0);

        software(&mut r).set_restorable(true);
        let stats = r.render(&mut scene, RenderOptions::default()).unwrap();
        assert!(!stats.dropped);
        assert_eq!(stats.draw_calls, 1);
    }

    #[test]
    fn released_textures_are_collected() {
        let mut r = renderer(4);
        let mut scene = Scene::new();
        let node = scene.add(Node::with_content(Sprite::new(solid([255; 4]))));
        r.render(&mut scene, RenderOptions::default()).unwrap();
        let live = software(&mut r).live_textures();

        scene.destroy(node);
        r.render(&mut scene, RenderOptions::default()).unwrap();
        assert_eq!(software(&mut r).live_textures(), live - 1);
    }

    // ── plugins / lifecycle ───────────────────────────────────────────────

    #[derive(Debug)]
    struct Custom;

    impl Renderable for Custom {
        fn plugin(&self) -> &'static str {
            "custom"
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    struct Counting(Rc<Cell<u32>>);

    impl RenderPlugin for Counting {
        fn render(&mut self, _ctx: &mut RenderContext, _object: RenderObject<'_>) -> Result<(), RenderError> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn unknown_plugin_is_reported() {
        let mut r = renderer(4);
        let mut scene = Scene::new();
        scene.add(Node::with_content(Custom));
        let err = r.render(&mut scene, RenderOptions::default()).unwrap_err();
        assert!(matches!(err, RenderError::UnknownPlugin(name) if name == "custom"));
    }

    #[test]
    fn registered_plugin_receives_its_objects() {
        let mut r = renderer(4);
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        r.register_plugin("custom", move |_| Box::new(Counting(counter.clone())) as Box<dyn RenderPlugin>).unwrap();
        assert!(r.has_plugin("custom"));

        let mut scene = Scene::new();
        scene.add(Node::with_content(Custom));
        scene.add(Node::with_content(Custom));
        r.render(&mut scene, RenderOptions::default()).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn destroy_releases_everything_and_is_final() {
        let mut r = renderer(4);
        let mut scene = Scene::new();
        scene.add(white_square(4.0));
        r.render(&mut scene, RenderOptions::default()).unwrap();

        r.destroy();
        r.destroy();
        let backend = software(&mut r);
        assert_eq!(backend.live_textures(), 0);
        assert_eq!(backend.live_buffers(), 0);
        assert_eq!(backend.live_programs(), 0);
        assert!(matches!(r.render(&mut scene, RenderOptions::default()), Err(RenderError::Destroyed)));
        assert!(matches!(r.resize(2.0, 2.0), Err(RenderError::Destroyed)));
    }
}
