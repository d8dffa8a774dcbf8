use anyhow::Result;
use tessera_engine::coords::{Rect, Vec2};
use tessera_engine::core::{App, AppControl, FrameCtx};
use tessera_engine::device::{GpuInit, WgpuBackend};
use tessera_engine::logging::{init_logging, LoggingConfig};
use tessera_engine::paint::{BlendMode, Color};
use tessera_engine::render::{RenderOptions, RendererOptions};
use tessera_engine::scene::{Graphics, MaskSource, Node, NodeId, Particle, ParticleContainer, Scene, Sprite};
use tessera_engine::texture::{BaseTexture, BaseTextureOptions, RenderTexture, Texture};
use tessera_engine::window::{Runtime, RuntimeConfig};

const GRID: usize = 12;
/// Frame at which the device is destroyed to exercise context restore.
const LOSS_FRAME: u64 = 600;

/// Sprite field, a masked container, a particle ring and a live thumbnail
/// rendered through a render texture.
struct Studio {
    scene: Scene,
    sprites: Vec<NodeId>,
    spinner: NodeId,
    ring: NodeId,

    thumb_scene: Scene,
    thumb_root: NodeId,
    thumbnail: RenderTexture,
}

impl Studio {
    fn new() -> Self {
        let checker = Texture::from_base(checkerboard(32, 8));
        let mut scene = Scene::new();

        let mut sprites = Vec::with_capacity(GRID * GRID);
        let field = scene.add(Node::container().at(40.0, 40.0));
        for row in 0..GRID {
            for col in 0..GRID {
                let tint = Color::from_straight(col as f32 / GRID as f32, row as f32 / GRID as f32, 0.8, 1.0);
                let sprite = Sprite::new(checker.clone())
                    .with_anchor(Vec2::splat(0.5))
                    .with_tint(tint);
                let node = Node::with_content(sprite).at(col as f32 * 40.0, row as f32 * 40.0);
                sprites.push(scene.add_to(field, node));
            }
        }

        // Rectangle mask on an axis-aligned container takes the scissor path;
        // the rotating spinner is clipped by a circle, which needs the stencil.
        let panel = scene.add(Node::container().at(560.0, 40.0));
        scene.set_mask(panel, Some(MaskSource::Rect(Rect::from_size(300.0, 200.0))));
        let mut backdrop = Graphics::new();
        backdrop.fill_rect(Rect::from_size(300.0, 200.0), Color::from_hex(0x1e2433));
        scene.add_to(panel, Node::with_content(backdrop));
        let spinner = scene.add_to(panel, Node::container().at(150.0, 100.0));
        for i in 0..6 {
            let bar = Sprite::new(Texture::white())
                .with_anchor(Vec2::new(0.0, 0.5))
                .with_tint(Color::from_hex_alpha(0xf2a541, 0.8))
                .with_blend(BlendMode::Add);
            let node = Node::with_content(bar)
                .with_scale(180.0, 12.0)
                .with_rotation(i as f32 * std::f32::consts::TAU / 6.0);
            scene.add_to(spinner, node);
        }
        let mut circle = Graphics::new();
        circle.fill_circle(Vec2::new(150.0, 100.0), 90.0, Color::WHITE);
        let circle_mask = scene.add_to(panel, Node::with_content(circle));
        scene.set_mask(spinner, Some(MaskSource::Node(circle_mask)));

        let mut particles = ParticleContainer::new(Texture::white());
        for i in 0..256 {
            let angle = i as f32 * std::f32::consts::TAU / 256.0;
            particles.push(Particle {
                position: Vec2::new(angle.cos() * 120.0, angle.sin() * 120.0),
                scale: Vec2::splat(4.0),
                tint: Color::from_straight(0.4, 0.9, 1.0, 1.0),
                ..Particle::default()
            });
        }
        let ring = scene.add(Node::with_content(particles).at(710.0, 420.0));

        let thumbnail = RenderTexture::new(160.0, 120.0, 1.0);
        let mut thumb_scene = Scene::new();
        let thumb_root = thumb_scene.add(Node::container().at(80.0, 60.0));
        for i in 0..4 {
            let sprite = Sprite::new(checker.clone()).with_anchor(Vec2::splat(0.5));
            let node = Node::with_content(sprite)
                .with_scale(1.5, 1.5)
                .at((i as f32 - 1.5) * 36.0, 0.0);
            thumb_scene.add_to(thumb_root, node);
        }
        scene.add(Node::with_content(Sprite::new(thumbnail.texture().clone())).at(560.0, 300.0));

        Self { scene, sprites, spinner, ring, thumb_scene, thumb_root, thumbnail }
    }

    fn animate(&mut self, t: f32) {
        for (i, &id) in self.sprites.iter().enumerate() {
            if let Some(node) = self.scene.node_mut(id) {
                node.transform.set_rotation(t + i as f32 * 0.05);
            }
        }
        if let Some(node) = self.scene.node_mut(self.spinner) {
            node.transform.set_rotation(t * 0.7);
        }
        if let Some(node) = self.scene.node_mut(self.ring) {
            node.transform.set_rotation(-t * 0.3);
        }
        if let Some(node) = self.thumb_scene.node_mut(self.thumb_root) {
            node.transform.set_rotation(t);
        }
    }
}

impl App for Studio {
    fn on_frame(&mut self, ctx: &mut FrameCtx<'_>) -> AppControl {
        if ctx.time.frame_index == LOSS_FRAME {
            if let Some(backend) = ctx.renderer.backend_as_mut::<WgpuBackend>() {
                backend.simulate_context_loss();
            }
        }

        self.animate(ctx.time.elapsed as f32);

        if let Err(e) = ctx.renderer.render(&mut self.thumb_scene, RenderOptions::to_texture(&self.thumbnail)) {
            log::warn!("thumbnail: {e}");
        }
        ctx.render(&mut self.scene)
    }
}

/// Two-tone checkerboard in premultiplied RGBA8.
fn checkerboard(size: u32, cell: u32) -> BaseTexture {
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let on = ((x / cell) + (y / cell)) % 2 == 0;
            pixels.extend_from_slice(if on { &[255, 255, 255, 255] } else { &[90, 90, 90, 255] });
        }
    }
    BaseTexture::from_pixels(size, size, pixels, BaseTextureOptions::default())
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let config = RuntimeConfig {
        title: "Tessera Studio".to_string(),
        renderer: RendererOptions::default().with_background(Color::from_hex(0x101218)),
        ..RuntimeConfig::default()
    };
    Runtime::run(config, GpuInit::default(), Studio::new())
}
