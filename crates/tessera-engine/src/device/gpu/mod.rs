//! wgpu implementation of [`Backend`].
//!
//! wgpu has no global state machine, so this backend keeps one on the CPU:
//! setters only update [`DrawState`], and every `draw` snapshots that state
//! into a recorded pass. Recorded passes are encoded and submitted in one
//! command buffer when:
//! - a resource referenced by a recorded draw is rewritten or deleted
//! - pixels are read back, mipmaps are generated or the screen is resized
//! - the frame ends
//!
//! The screen is an offscreen RGBA8 texture with a stencil plane; the
//! window surface receives it through [`SurfacePresenter`](super::SurfacePresenter).

mod blit;
mod pipeline;
mod program;
mod readback;
mod uniforms;

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::paint::BlendFactors;
use crate::shader::{CompiledProgram, UniformInfo, UniformType, UniformValue};

use super::{
    Backend, BackendError, BackendInfo, BackendStats, BufferKind, BufferUsage, GpuInit, IndexFormat,
    NativeBuffer, NativeFramebuffer, NativeProgram, NativeTexture, PixelRect, ScaleMode,
    StencilState, TextureDesc, Topology, VertexArrayDesc, WrapMode,
};

use blit::Blitter;
use pipeline::{PipelineKey, StencilKey, VertexSource, COLOR_FORMAT, STENCIL_FORMAT};
use program::GpuProgram;
use uniforms::{write_std140, UniformArena};

/// Upper bound on texture units regardless of device limits.
const MAX_TEXTURE_UNITS: u32 = 16;

// ── native objects ────────────────────────────────────────────────────────

struct GpuBuffer {
    buffer: wgpu::Buffer,
    /// Requested capacity; the native buffer is padded to 4 bytes.
    capacity: usize,
    /// CPU copy used to widen writes to the copy alignment.
    shadow: Vec<u8>,
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    /// Single-level views, used as attachments and mip sources.
    mip_views: Vec<wgpu::TextureView>,
    sampler: wgpu::Sampler,
    desc: TextureDesc,
}

impl GpuTexture {
    fn new(device: &wgpu::Device, desc: &TextureDesc, label: &str) -> Self {
        let levels = desc.mip_levels.max(1);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: desc.width.max(1),
                height: desc.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mip_views = mip_views(&texture, levels);

        let address = match desc.wrap_mode {
            WrapMode::Clamp => wgpu::AddressMode::ClampToEdge,
            WrapMode::Repeat => wgpu::AddressMode::Repeat,
            WrapMode::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
        };
        let filter = match desc.scale_mode {
            ScaleMode::Nearest => wgpu::FilterMode::Nearest,
            ScaleMode::Linear => wgpu::FilterMode::Linear,
        };
        let mipmap_filter = match (levels > 1, desc.scale_mode) {
            (true, ScaleMode::Linear) => wgpu::MipmapFilterMode::Linear,
            _ => wgpu::MipmapFilterMode::Nearest,
        };
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(label),
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter,
            ..Default::default()
        });

        Self { texture, view, mip_views, sampler, desc: *desc }
    }

    fn level_size(&self, mip: u32) -> (u32, u32) {
        ((self.desc.width.max(1) >> mip).max(1), (self.desc.height.max(1) >> mip).max(1))
    }
}

fn mip_views(texture: &wgpu::Texture, levels: u32) -> Vec<wgpu::TextureView> {
    (0..levels)
        .map(|mip| {
            texture.create_view(&wgpu::TextureViewDescriptor {
                base_mip_level: mip,
                mip_level_count: Some(1),
                ..Default::default()
            })
        })
        .collect()
}

fn stencil_texture(device: &wgpu::Device, width: u32, height: u32, levels: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("tessera stencil"),
        size: wgpu::Extent3d { width: width.max(1), height: height.max(1), depth_or_array_layers: 1 },
        mip_level_count: levels.max(1),
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: STENCIL_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    })
}

struct GpuFramebuffer {
    color: NativeTexture,
    /// Per-mip stencil views.
    stencil: Option<Vec<wgpu::TextureView>>,
}

/// Offscreen back-buffer presented to the window.
struct Screen {
    color: GpuTexture,
    stencil_view: wgpu::TextureView,
}

impl Screen {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let desc = TextureDesc {
            width: width.max(1),
            height: height.max(1),
            mip_levels: 1,
            scale_mode: ScaleMode::Nearest,
            wrap_mode: WrapMode::Clamp,
            render_target: true,
        };
        let color = GpuTexture::new(device, &desc, "tessera screen");
        let stencil = stencil_texture(device, desc.width, desc.height, 1);
        let stencil_view = stencil.create_view(&wgpu::TextureViewDescriptor::default());
        Self { color, stencil_view }
    }
}

// ── recorded work ─────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Target {
    framebuffer: Option<NativeFramebuffer>,
    mip: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
enum Resource {
    Buffer(u32),
    Texture(u32),
    Program(u32),
    Framebuffer(u32),
}

struct RecordedDraw {
    pipeline: wgpu::RenderPipeline,
    program: NativeProgram,
    /// Arena offsets, parallel to the program's blocks.
    block_offsets: Vec<u32>,
    /// Texture per program slot; `None` samples the fallback texture.
    textures: Vec<Option<NativeTexture>>,
    vertex: Vec<VertexSource>,
    index: Option<(NativeBuffer, IndexFormat)>,
    viewport: PixelRect,
    scissor: PixelRect,
    stencil_ref: u32,
    first: u32,
    count: u32,
    instances: u32,
}

struct RecordedPass {
    target: Target,
    color_clear: Option<[f32; 4]>,
    stencil_clear: Option<u8>,
    draws: Vec<RecordedDraw>,
}

/// GL-style state consumed by the next draw.
#[derive(Clone)]
struct DrawState {
    target: Target,
    target_size: (u32, u32),
    target_color: Option<NativeTexture>,
    target_has_stencil: bool,
    viewport: PixelRect,
    scissor: Option<PixelRect>,
    stencil: StencilState,
    blend: Option<BlendFactors>,
    color_write: bool,
    program: Option<NativeProgram>,
    units: Vec<Option<NativeTexture>>,
    vertex_array: VertexArrayDesc,
}

impl DrawState {
    fn new(units: u32, width: u32, height: u32) -> Self {
        Self {
            target: Target { framebuffer: None, mip: 0 },
            target_size: (width, height),
            target_color: None,
            target_has_stencil: true,
            viewport: PixelRect::new(0, 0, width, height),
            scissor: None,
            stencil: StencilState::DISABLED,
            blend: None,
            color_write: true,
            program: None,
            units: vec![None; units as usize],
            vertex_array: VertexArrayDesc::default(),
        }
    }
}

// ── backend ───────────────────────────────────────────────────────────────

/// [`Backend`] on top of a wgpu device.
pub struct WgpuBackend {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    device_desc: (wgpu::Features, wgpu::Limits),
    lost: Arc<AtomicBool>,
    generation: u64,

    info: BackendInfo,
    stats: BackendStats,
    next_handle: u32,

    buffers: HashMap<u32, GpuBuffer>,
    textures: HashMap<u32, GpuTexture>,
    programs: HashMap<u32, GpuProgram>,
    framebuffers: HashMap<u32, GpuFramebuffer>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,

    screen: Screen,
    fallback: GpuTexture,
    blitter: Blitter,
    arena: UniformArena,

    state: DrawState,
    passes: Vec<RecordedPass>,
    pending: HashSet<Resource>,
}

async fn request_device(
    adapter: &wgpu::Adapter,
    features: wgpu::Features,
    limits: wgpu::Limits,
) -> Result<(wgpu::Device, wgpu::Queue)> {
    adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("tessera device"),
            required_features: features,
            required_limits: limits,
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        })
        .await
        .context("failed to create wgpu device/queue")
}

fn watch_device_loss(device: &wgpu::Device) -> Arc<AtomicBool> {
    let lost = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&lost);
    device.set_device_lost_callback(move |reason, message| {
        log::warn!("wgpu: device lost ({reason:?}): {message}");
        flag.store(true, Ordering::SeqCst);
    });
    lost
}

fn fallback_texture(device: &wgpu::Device, queue: &wgpu::Queue) -> GpuTexture {
    let desc = TextureDesc {
        width: 1,
        height: 1,
        mip_levels: 1,
        scale_mode: ScaleMode::Nearest,
        wrap_mode: WrapMode::Clamp,
        render_target: false,
    };
    let texture = GpuTexture::new(device, &desc, "tessera fallback texture");
    upload_level(queue, &texture.texture, 0, 1, 1, &[0, 0, 0, 255]);
    texture
}

fn upload_level(queue: &wgpu::Queue, texture: &wgpu::Texture, mip_level: u32, width: u32, height: u32, pixels: &[u8]) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        pixels,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * 4),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
    );
}

impl WgpuBackend {
    /// Instance over every platform backend.
    pub fn create_instance() -> wgpu::Instance {
        wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        })
    }

    /// Acquires an adapter and device. Pass the window surface when one
    /// exists so the adapter can present to it.
    pub async fn new(
        instance: &wgpu::Instance,
        compatible_surface: Option<&wgpu::Surface<'_>>,
        init: &GpuInit,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface,
                force_fallback_adapter: false,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let (device, queue) =
            request_device(&adapter, init.required_features, init.required_limits.clone()).await?;
        let lost = watch_device_loss(&device);

        let limits = device.limits();
        let info = BackendInfo {
            name: "wgpu",
            max_texture_units: MAX_TEXTURE_UNITS
                .min(limits.max_sampled_textures_per_shader_stage)
                .min(limits.max_samplers_per_shader_stage),
            stencil_bits: 8,
            max_texture_size: limits.max_texture_dimension_2d,
        };
        log::info!(
            "wgpu: {} ({:?}), {} texture units",
            adapter.get_info().name,
            adapter.get_info().backend,
            info.max_texture_units
        );

        let screen = Screen::new(&device, width, height);
        let fallback = fallback_texture(&device, &queue);
        let blitter = Blitter::new(&device);
        let arena = UniformArena::new(limits.min_uniform_buffer_offset_alignment);
        let state = DrawState::new(info.max_texture_units, width.max(1), height.max(1));

        Ok(Self {
            adapter,
            device,
            queue,
            device_desc: (init.required_features, init.required_limits.clone()),
            lost,
            generation: 1,
            info,
            stats: BackendStats::default(),
            next_handle: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            programs: HashMap::new(),
            framebuffers: HashMap::new(),
            pipelines: HashMap::new(),
            screen,
            fallback,
            blitter,
            arena,
            state,
            passes: Vec::new(),
            pending: HashSet::new(),
        })
    }

    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Destroys the device, as a driver reset would.
    pub fn simulate_context_loss(&mut self) {
        log::warn!("wgpu: destroying device generation {}", self.generation);
        self.passes.clear();
        self.pending.clear();
        self.device.destroy();
        self.lost.store(true, Ordering::SeqCst);
    }

    /// Copies the screen onto `dst` (a surface texture view).
    pub(crate) fn present_to(&mut self, dst: &wgpu::TextureView, format: wgpu::TextureFormat) -> Result<(), BackendError> {
        self.check()?;
        self.flush()?;
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("tessera present encoder"),
        });
        self.blitter.blit(&self.device, &mut encoder, &self.screen.color.view, dst, format);
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    // ── internals ─────────────────────────────────────────────────────────

    fn check(&self) -> Result<(), BackendError> {
        if self.lost.load(Ordering::SeqCst) { Err(BackendError::ContextLost) } else { Ok(()) }
    }

    fn alloc_handle(&mut self) -> u32 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    /// Submits recorded passes first when they reference `resource`.
    fn flush_if_pending(&mut self, resource: Resource) -> Result<(), BackendError> {
        if self.pending.contains(&resource) {
            log::trace!("wgpu: flushing for {resource:?}");
            self.flush()?;
        }
        Ok(())
    }

    fn texture(&self, texture: NativeTexture) -> Result<&GpuTexture, BackendError> {
        self.textures
            .get(&texture.0)
            .ok_or(BackendError::UnknownHandle { kind: "texture", handle: texture.0 })
    }

    /// Color and stencil views of `target`.
    fn attachment(&self, target: Target) -> Option<(wgpu::TextureView, Option<wgpu::TextureView>)> {
        match target.framebuffer {
            None => Some((self.screen.color.view.clone(), Some(self.screen.stencil_view.clone()))),
            Some(fb) => {
                let fb = self.framebuffers.get(&fb.0)?;
                let color = self.textures.get(&fb.color.0)?.mip_views.get(target.mip as usize)?.clone();
                let stencil = fb.stencil.as_ref().and_then(|v| v.get(target.mip as usize)).cloned();
                Some((color, stencil))
            }
        }
    }

    fn bind_group(&self, program: &GpuProgram, group: u32, draw: &RecordedDraw, arena: Option<&wgpu::Buffer>) -> wgpu::BindGroup {
        let mut entries: Vec<wgpu::BindGroupEntry<'_>> = Vec::new();
        if let Some(arena) = arena {
            for block in program.blocks.iter().filter(|b| b.group == group) {
                entries.push(wgpu::BindGroupEntry {
                    binding: block.binding,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: arena,
                        offset: 0,
                        size: NonZeroU64::new(block.data.len() as u64),
                    }),
                });
            }
        }
        for (slot, texture) in program.textures.iter().zip(&draw.textures) {
            if slot.group != group {
                continue;
            }
            let tex = texture
                .and_then(|t| self.textures.get(&t.0))
                .unwrap_or(&self.fallback);
            entries.push(wgpu::BindGroupEntry {
                binding: slot.binding,
                resource: wgpu::BindingResource::TextureView(&tex.view),
            });
            if let Some(binding) = slot.sampler_binding {
                entries.push(wgpu::BindGroupEntry {
                    binding,
                    resource: wgpu::BindingResource::Sampler(&tex.sampler),
                });
            }
        }
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&program.name),
            layout: &program.group_layouts[group as usize],
            entries: &entries,
        })
    }

    /// Encodes and submits every recorded pass.
    fn flush(&mut self) -> Result<(), BackendError> {
        if self.passes.is_empty() {
            return Ok(());
        }
        let passes = std::mem::take(&mut self.passes);
        self.pending.clear();
        let arena = self.arena.upload(&self.device, &self.queue);

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("tessera frame encoder"),
        });
        let mut bind_groups: HashMap<(u32, u32, Vec<Option<NativeTexture>>), wgpu::BindGroup> = HashMap::new();
        let mut draws = 0usize;

        for pass in &passes {
            let Some((color, stencil)) = self.attachment(pass.target) else {
                log::warn!("wgpu: dropping pass for a deleted target {:?}", pass.target);
                continue;
            };
            let color_load = match pass.color_clear {
                Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                    r: r as f64,
                    g: g as f64,
                    b: b as f64,
                    a: a as f64,
                }),
                None => wgpu::LoadOp::Load,
            };
            let stencil_load = match pass.stencil_clear {
                Some(s) => wgpu::LoadOp::Clear(s as u32),
                None => wgpu::LoadOp::Load,
            };

            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("tessera pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color,
                    resolve_target: None,
                    ops: wgpu::Operations { load: color_load, store: wgpu::StoreOp::Store },
                    depth_slice: None,
                })],
                depth_stencil_attachment: stencil.as_ref().map(|view| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: None,
                    stencil_ops: Some(wgpu::Operations { load: stencil_load, store: wgpu::StoreOp::Store }),
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            for draw in &pass.draws {
                let Some(program) = self.programs.get(&draw.program.0) else { continue };
                rpass.set_pipeline(&draw.pipeline);

                for group in 0..program.group_layouts.len() as u32 {
                    let textures: Vec<Option<NativeTexture>> = program
                        .textures
                        .iter()
                        .zip(&draw.textures)
                        .filter(|(slot, _)| slot.group == group)
                        .map(|(_, t)| *t)
                        .collect();
                    let bind_group = bind_groups
                        .entry((draw.program.0, group, textures))
                        .or_insert_with(|| self.bind_group(program, group, draw, arena.as_ref()));
                    let offsets: Vec<u32> = program
                        .blocks
                        .iter()
                        .zip(&draw.block_offsets)
                        .filter(|(b, _)| b.group == group)
                        .map(|(_, o)| *o)
                        .collect();
                    rpass.set_bind_group(group, &*bind_group, &offsets);
                }

                let mut missing = false;
                for (slot, source) in draw.vertex.iter().enumerate() {
                    match self.buffers.get(&source.buffer.0) {
                        Some(b) => rpass.set_vertex_buffer(slot as u32, b.buffer.slice(source.base as u64..)),
                        None => missing = true,
                    }
                }
                if missing {
                    continue;
                }

                let v = draw.viewport;
                rpass.set_viewport(v.x as f32, v.y as f32, v.width as f32, v.height as f32, 0.0, 1.0);
                let s = draw.scissor;
                rpass.set_scissor_rect(s.x as u32, s.y as u32, s.width, s.height);
                if stencil.is_some() {
                    rpass.set_stencil_reference(draw.stencil_ref);
                }

                let instances = 0..draw.instances.max(1);
                match draw.index {
                    Some((buffer, format)) => {
                        let Some(b) = self.buffers.get(&buffer.0) else { continue };
                        let format = match format {
                            IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
                            IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
                        };
                        rpass.set_index_buffer(b.buffer.slice(..), format);
                        rpass.draw_indexed(draw.first..draw.first + draw.count, 0, instances);
                    }
                    None => rpass.draw(draw.first..draw.first + draw.count, instances),
                }
                draws += 1;
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        self.arena.reset();
        log::trace!("wgpu: submitted {} passes, {draws} draws", passes.len());
        Ok(())
    }

    fn mark_pending(&mut self, draw: &RecordedDraw) {
        self.pending.insert(Resource::Program(draw.program.0));
        for source in &draw.vertex {
            self.pending.insert(Resource::Buffer(source.buffer.0));
        }
        if let Some((buffer, _)) = draw.index {
            self.pending.insert(Resource::Buffer(buffer.0));
        }
        for texture in draw.textures.iter().flatten() {
            self.pending.insert(Resource::Texture(texture.0));
        }
        if let Some(fb) = self.state.target.framebuffer {
            self.pending.insert(Resource::Framebuffer(fb.0));
        }
        if let Some(color) = self.state.target_color {
            self.pending.insert(Resource::Texture(color.0));
        }
    }

    fn reset_device_objects(&mut self) {
        self.buffers.clear();
        self.textures.clear();
        self.programs.clear();
        self.framebuffers.clear();
        self.pipelines.clear();
        self.passes.clear();
        self.pending.clear();
        let (w, h) = self.screen_size();
        self.screen = Screen::new(&self.device, w, h);
        self.fallback = fallback_texture(&self.device, &self.queue);
        self.blitter = Blitter::new(&self.device);
        self.arena.invalidate(self.device.limits().min_uniform_buffer_offset_alignment);
        self.state = DrawState::new(self.info.max_texture_units, w, h);
    }
}

impl Backend for WgpuBackend {
    fn info(&self) -> &BackendInfo {
        &self.info
    }

    fn stats(&self) -> BackendStats {
        self.stats
    }

    fn reset_stats(&mut self) {
        self.stats = BackendStats::default();
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn restore(&mut self) -> Result<u64, BackendError> {
        if !self.is_lost() {
            return Ok(self.generation);
        }
        let (features, limits) = self.device_desc.clone();
        let (device, queue) = pollster::block_on(request_device(&self.adapter, features, limits)).map_err(|e| {
            log::warn!("wgpu: device restore failed: {e:#}");
            BackendError::ContextLost
        })?;
        self.lost = watch_device_loss(&device);
        self.device = device;
        self.queue = queue;
        self.generation += 1;
        self.reset_device_objects();
        log::info!("wgpu: device restored as generation {}", self.generation);
        Ok(self.generation)
    }

    // ── buffers ───────────────────────────────────────────────────────────

    fn create_buffer(&mut self, kind: BufferKind, _usage: BufferUsage, capacity: usize) -> Result<NativeBuffer, BackendError> {
        self.check()?;
        let padded = capacity.max(4).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT as usize);
        let usage = match kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
        };
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(match kind {
                BufferKind::Vertex => "tessera vertex buffer",
                BufferKind::Index => "tessera index buffer",
            }),
            size: padded as u64,
            usage: usage | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let h = self.alloc_handle();
        self.buffers.insert(h, GpuBuffer { buffer, capacity, shadow: vec![0; padded] });
        self.stats.buffer_allocs += 1;
        Ok(NativeBuffer(h))
    }

    fn write_buffer(&mut self, buffer: NativeBuffer, offset: usize, data: &[u8]) -> Result<(), BackendError> {
        self.check()?;
        self.flush_if_pending(Resource::Buffer(buffer.0))?;
        let b = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or(BackendError::UnknownHandle { kind: "buffer", handle: buffer.0 })?;
        let end = offset + data.len();
        if end > b.capacity {
            return Err(BackendError::Unsupported(format!(
                "write of {end} bytes exceeds buffer capacity {}",
                b.capacity
            )));
        }
        b.shadow[offset..end].copy_from_slice(data);

        let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
        let start = offset - offset % align;
        let stop = end.next_multiple_of(align).min(b.shadow.len());
        if stop > start {
            self.queue.write_buffer(&b.buffer, start as u64, &b.shadow[start..stop]);
        }
        self.stats.buffer_writes += 1;
        Ok(())
    }

    fn delete_buffer(&mut self, buffer: NativeBuffer) {
        if self.flush_if_pending(Resource::Buffer(buffer.0)).is_err() {
            self.passes.clear();
            self.pending.clear();
        }
        self.buffers.remove(&buffer.0);
    }

    // ── textures ──────────────────────────────────────────────────────────

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<NativeTexture, BackendError> {
        self.check()?;
        if desc.width > self.info.max_texture_size || desc.height > self.info.max_texture_size {
            return Err(BackendError::Unsupported(format!(
                "texture {}x{} exceeds {}",
                desc.width, desc.height, self.info.max_texture_size
            )));
        }
        let texture = GpuTexture::new(&self.device, desc, "tessera texture");
        let h = self.alloc_handle();
        self.textures.insert(h, texture);
        self.stats.texture_allocs += 1;
        Ok(NativeTexture(h))
    }

    fn write_texture(&mut self, texture: NativeTexture, mip_level: u32, width: u32, height: u32, pixels: &[u8]) -> Result<(), BackendError> {
        self.check()?;
        self.flush_if_pending(Resource::Texture(texture.0))?;
        let t = self.texture(texture)?;
        if mip_level >= t.desc.mip_levels.max(1) {
            return Err(BackendError::Unsupported(format!("mip level {mip_level} out of range")));
        }
        let level = t.level_size(mip_level);
        if level != (width, height) || pixels.len() != (width * height * 4) as usize {
            return Err(BackendError::Unsupported(format!(
                "upload {width}x{height} does not match level {}x{}",
                level.0, level.1
            )));
        }
        upload_level(&self.queue, &t.texture, mip_level, width, height, pixels);
        self.stats.texture_writes += 1;
        Ok(())
    }

    fn generate_mipmaps(&mut self, texture: NativeTexture) -> Result<(), BackendError> {
        self.check()?;
        self.flush_if_pending(Resource::Texture(texture.0))?;
        let Some(t) = self.textures.get(&texture.0) else {
            return Err(BackendError::UnknownHandle { kind: "texture", handle: texture.0 });
        };
        if t.mip_views.len() < 2 {
            return Ok(());
        }
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("tessera mipmap encoder"),
        });
        for level in 1..t.mip_views.len() {
            self.blitter.blit(&self.device, &mut encoder, &t.mip_views[level - 1], &t.mip_views[level], COLOR_FORMAT);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn delete_texture(&mut self, texture: NativeTexture) {
        if self.flush_if_pending(Resource::Texture(texture.0)).is_err() {
            self.passes.clear();
            self.pending.clear();
        }
        self.textures.remove(&texture.0);
        for unit in self.state.units.iter_mut() {
            if *unit == Some(texture) {
                *unit = None;
            }
        }
    }

    // ── programs ──────────────────────────────────────────────────────────

    fn create_program(&mut self, program: &CompiledProgram) -> Result<NativeProgram, BackendError> {
        self.check()?;
        let gpu = GpuProgram::new(&self.device, program);
        let h = self.alloc_handle();
        self.programs.insert(h, gpu);
        self.stats.program_links += 1;
        Ok(NativeProgram(h))
    }

    fn delete_program(&mut self, program: NativeProgram) {
        if self.flush_if_pending(Resource::Program(program.0)).is_err() {
            self.passes.clear();
            self.pending.clear();
        }
        self.programs.remove(&program.0);
        self.pipelines.retain(|key, _| key.program != program);
        if self.state.program == Some(program) {
            self.state.program = None;
        }
    }

    // ── framebuffers ──────────────────────────────────────────────────────

    fn create_framebuffer(&mut self, color: NativeTexture, stencil: bool) -> Result<NativeFramebuffer, BackendError> {
        self.check()?;
        let tex = self.texture(color)?;
        let stencil = stencil.then(|| {
            let levels = tex.desc.mip_levels.max(1);
            let plane = stencil_texture(&self.device, tex.desc.width, tex.desc.height, levels);
            mip_views(&plane, levels)
        });
        let h = self.alloc_handle();
        self.framebuffers.insert(h, GpuFramebuffer { color, stencil });
        Ok(NativeFramebuffer(h))
    }

    fn delete_framebuffer(&mut self, framebuffer: NativeFramebuffer) {
        if self.flush_if_pending(Resource::Framebuffer(framebuffer.0)).is_err() {
            self.passes.clear();
            self.pending.clear();
        }
        self.framebuffers.remove(&framebuffer.0);
        if self.state.target.framebuffer == Some(framebuffer) {
            let (w, h) = self.screen_size();
            self.state.target = Target { framebuffer: None, mip: 0 };
            self.state.target_size = (w, h);
            self.state.target_color = None;
            self.state.target_has_stencil = true;
        }
    }

    // ── screen ────────────────────────────────────────────────────────────

    fn resize_screen(&mut self, width: u32, height: u32) {
        if self.flush().is_err() {
            self.passes.clear();
            self.pending.clear();
        }
        self.screen = Screen::new(&self.device, width, height);
        if self.state.target.framebuffer.is_none() {
            self.state.target_size = (width.max(1), height.max(1));
        }
    }

    fn screen_size(&self) -> (u32, u32) {
        (self.screen.color.desc.width, self.screen.color.desc.height)
    }

    // ── state ─────────────────────────────────────────────────────────────

    fn bind_framebuffer(&mut self, framebuffer: Option<NativeFramebuffer>, mip_level: u32) -> Result<(), BackendError> {
        self.check()?;
        match framebuffer {
            None => {
                self.state.target_size = self.screen_size();
                self.state.target_color = None;
                self.state.target_has_stencil = true;
            }
            Some(fb) => {
                let entry = self
                    .framebuffers
                    .get(&fb.0)
                    .ok_or(BackendError::UnknownHandle { kind: "framebuffer", handle: fb.0 })?;
                let (color, has_stencil) = (entry.color, entry.stencil.is_some());
                let tex = self.texture(color)?;
                if mip_level >= tex.desc.mip_levels.max(1) {
                    return Err(BackendError::Unsupported(format!("mip level {mip_level} out of range")));
                }
                self.state.target_size = tex.level_size(mip_level);
                self.state.target_color = Some(color);
                self.state.target_has_stencil = has_stencil;
            }
        }
        self.state.target = Target { framebuffer, mip: mip_level };
        self.stats.framebuffer_binds += 1;
        Ok(())
    }

    fn set_viewport(&mut self, rect: PixelRect) {
        self.state.viewport = rect;
        self.stats.viewport_changes += 1;
    }

    fn set_scissor(&mut self, rect: Option<PixelRect>) {
        self.state.scissor = rect;
        self.stats.scissor_changes += 1;
    }

    fn set_stencil(&mut self, state: StencilState) {
        self.state.stencil = state;
        self.stats.stencil_changes += 1;
    }

    fn set_blend(&mut self, blend: Option<BlendFactors>) {
        self.state.blend = blend;
        self.stats.blend_changes += 1;
    }

    fn set_color_write(&mut self, enabled: bool) {
        self.state.color_write = enabled;
    }

    fn use_program(&mut self, program: NativeProgram) -> Result<(), BackendError> {
        self.check()?;
        if !self.programs.contains_key(&program.0) {
            return Err(BackendError::UnknownHandle { kind: "program", handle: program.0 });
        }
        self.state.program = Some(program);
        Ok(())
    }

    fn set_uniform(&mut self, program: NativeProgram, info: &UniformInfo, value: &UniformValue) -> Result<(), BackendError> {
        self.check()?;
        let p = self
            .programs
            .get_mut(&program.0)
            .ok_or(BackendError::UnknownHandle { kind: "program", handle: program.0 })?;
        self.stats.uniform_writes += 1;

        if info.ty == UniformType::Texture2D {
            if let UniformValue::Sampler(unit) = value {
                if let Some(slot) = p.textures.iter_mut().find(|s| s.group == info.group && s.binding == info.binding) {
                    slot.unit = *unit;
                }
            }
            return Ok(());
        }
        let name = p.name.clone();
        let Some(block) = p.block_mut(info.group, info.binding) else {
            return Err(BackendError::Unsupported(format!("uniform `{}` has no block in `{name}`", info.name)));
        };
        if !write_std140(&mut block.data, info, value) {
            return Err(BackendError::Unsupported(format!("uniform `{}` overflows its block in `{name}`", info.name)));
        }
        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<NativeTexture>) -> Result<(), BackendError> {
        self.check()?;
        if let Some(t) = texture {
            self.texture(t)?;
        }
        let slot = self
            .state
            .units
            .get_mut(unit as usize)
            .ok_or(BackendError::Unsupported(format!("texture unit {unit} out of range")))?;
        *slot = texture;
        Ok(())
    }

    fn bind_vertex_array(&mut self, layout: &VertexArrayDesc) -> Result<(), BackendError> {
        self.check()?;
        let buffers = layout.attributes.iter().map(|a| a.buffer).chain(layout.index.map(|(b, _)| b));
        for buffer in buffers {
            if !self.buffers.contains_key(&buffer.0) {
                return Err(BackendError::UnknownHandle { kind: "buffer", handle: buffer.0 });
            }
        }
        self.state.vertex_array = layout.clone();
        Ok(())
    }

    // ── commands ──────────────────────────────────────────────────────────

    fn clear(&mut self, color: Option<[f32; 4]>, stencil: Option<u8>) -> Result<(), BackendError> {
        self.check()?;
        let target = self.state.target;
        let stencil = stencil.filter(|_| self.state.target_has_stencil);
        match self.passes.last_mut() {
            Some(pass) if pass.target == target && pass.draws.is_empty() => {
                pass.color_clear = color.or(pass.color_clear);
                pass.stencil_clear = stencil.or(pass.stencil_clear);
            }
            _ => self.passes.push(RecordedPass { target, color_clear: color, stencil_clear: stencil, draws: Vec::new() }),
        }
        if let Some(fb) = target.framebuffer {
            self.pending.insert(Resource::Framebuffer(fb.0));
        }
        if let Some(color) = self.state.target_color {
            self.pending.insert(Resource::Texture(color.0));
        }
        Ok(())
    }

    fn draw(&mut self, topology: Topology, first: u32, count: u32, instances: u32) -> Result<(), BackendError> {
        self.check()?;
        let handle = self
            .state
            .program
            .ok_or(BackendError::Unsupported("draw without a program".into()))?;
        let program = self
            .programs
            .get(&handle.0)
            .ok_or(BackendError::UnknownHandle { kind: "program", handle: handle.0 })?;
        self.stats.draw_calls += 1;

        let vao = &self.state.vertex_array;
        if let Some((location, _)) = program
            .attributes
            .iter()
            .find(|(location, _)| !vao.attributes.iter().any(|a| a.location == *location))
        {
            return Err(BackendError::Unsupported(format!(
                "program `{}` reads unbound attribute {location}",
                program.name
            )));
        }

        let (width, height) = self.state.target_size;
        let bounds = PixelRect::new(0, 0, width, height);
        let viewport = self.state.viewport.intersect(bounds);
        if viewport != self.state.viewport {
            log::trace!("wgpu: viewport {:?} clamped to {:?}", self.state.viewport, viewport);
        }
        let scissor = match self.state.scissor {
            Some(s) => s.intersect(bounds),
            None => bounds,
        };
        if viewport.is_empty() || scissor.is_empty() || count == 0 {
            return Ok(());
        }

        let (slots, vertex) = pipeline::vertex_slots(vao);
        let key = PipelineKey {
            program: handle,
            slots,
            topology,
            strip_index: vao.index.map(|(_, f)| f).filter(|_| topology == Topology::TriangleStrip),
            blend: self.state.blend,
            stencil: StencilKey::new(self.state.stencil, self.state.target_has_stencil),
            color_write: self.state.color_write,
        };
        let pipeline = match self.pipelines.get(&key) {
            Some(p) => p.clone(),
            None => {
                let p = pipeline::create_pipeline(&self.device, program, &key);
                self.pipelines.insert(key, p.clone());
                p
            }
        };

        let block_offsets = program.blocks.iter().map(|b| self.arena.push(&b.data)).collect();
        let target_color = self.state.target_color;
        let textures = program
            .textures
            .iter()
            .map(|slot| {
                self.state
                    .units
                    .get(slot.unit as usize)
                    .copied()
                    .flatten()
                    .filter(|t| Some(*t) != target_color && self.textures.contains_key(&t.0))
            })
            .collect();

        let draw = RecordedDraw {
            pipeline,
            program: handle,
            block_offsets,
            textures,
            vertex,
            index: vao.index,
            viewport,
            scissor,
            stencil_ref: self.state.stencil.reference as u32,
            first,
            count,
            instances,
        };
        self.mark_pending(&draw);

        let target = self.state.target;
        match self.passes.last_mut() {
            Some(pass) if pass.target == target => pass.draws.push(draw),
            _ => self.passes.push(RecordedPass { target, color_clear: None, stencil_clear: None, draws: vec![draw] }),
        }
        Ok(())
    }

    fn read_pixels(&mut self, rect: PixelRect) -> Result<Vec<u8>, BackendError> {
        self.check()?;
        self.flush()?;
        let (width, height) = self.state.target_size;
        let rect = rect.intersect(PixelRect::new(0, 0, width, height));
        let mip = self.state.target.mip;
        let texture = match self.state.target_color {
            None => &self.screen.color.texture,
            Some(color) => &self.texture(color)?.texture,
        };
        readback::read_texture(&self.device, &self.queue, texture, mip, rect)
    }

    fn end_frame(&mut self) -> Result<(), BackendError> {
        self.check()?;
        self.flush()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
