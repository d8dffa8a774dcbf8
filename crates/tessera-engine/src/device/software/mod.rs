//! CPU reference backend.
//!
//! Deterministic implementation of [`Backend`] used for tests and headless
//! rendering. It emulates the built-in program family by attribute and
//! uniform names instead of executing shader code:
//!
//! - position: `aVertexPosition`, transformed by `translationMatrix` (when
//!   present) and then `projectionMatrix`
//! - color: `aColor` (normalized bytes) times the `tint` and `uColor` uniforms
//! - texture: unit of `uSampler{aTextureId}` for batch programs, `uSampler`
//!   otherwise; `STRAIGHT_ALPHA=1` premultiplies samples
//!
//! Context loss can be simulated with [`SoftwareBackend::lose_context`].

mod raster;

use std::any::Any;
use std::collections::HashMap;

use crate::paint::BlendFactors;
use crate::shader::{CompiledProgram, UniformInfo, UniformType, UniformValue};

use super::{
    Backend, BackendError, BackendInfo, BackendStats, BufferKind, BufferUsage, IndexFormat,
    NativeBuffer, NativeFramebuffer, NativeProgram, NativeTexture, PixelRect, StencilFunc,
    StencilOp, StencilState, TextureDesc, Topology, VertexArrayDesc, VertexFormat,
};

use raster::{blend, rasterize_triangle, sample, ScreenVertex, Surface};

const IDENTITY_MAT3: [f32; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

struct SoftBuffer {
    data: Vec<u8>,
}

struct SoftTexture {
    desc: TextureDesc,
    levels: Vec<Surface>,
}

struct SoftFramebuffer {
    color: u32,
    /// One stencil plane per color mip level.
    stencil: Option<Vec<Vec<u8>>>,
}

struct SoftProgram {
    attributes: Vec<(String, u32)>,
    uniforms: HashMap<String, UniformValue>,
    samplers: HashMap<String, u32>,
    straight_alpha: bool,
    batched: bool,
}

impl SoftProgram {
    fn location(&self, name: &str) -> Option<u32> {
        self.attributes.iter().find(|(n, _)| n == name).map(|(_, l)| *l)
    }

    fn mat3(&self, name: &str) -> [f32; 9] {
        match self.uniforms.get(name).map(|v| v.as_floats()) {
            Some(m) if m.len() == 9 => {
                let mut out = [0.0; 9];
                out.copy_from_slice(&m);
                out
            }
            _ => IDENTITY_MAT3,
        }
    }

    fn vec4(&self, name: &str) -> [f32; 4] {
        match self.uniforms.get(name).map(|v| v.as_floats()) {
            Some(v) if v.len() == 4 => [v[0], v[1], v[2], v[3]],
            _ => [1.0; 4],
        }
    }
}

#[derive(Clone)]
struct PipelineState {
    framebuffer: Option<(u32, u32)>,
    viewport: PixelRect,
    scissor: Option<PixelRect>,
    stencil: StencilState,
    blend: Option<BlendFactors>,
    color_write: bool,
    program: Option<u32>,
    units: Vec<Option<u32>>,
    vertex_array: VertexArrayDesc,
}

impl PipelineState {
    fn new(units: u32, width: u32, height: u32) -> Self {
        Self {
            framebuffer: None,
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

/// Deterministic software rasterizer.
pub struct SoftwareBackend {
    info: BackendInfo,
    stats: BackendStats,
    generation: u64,
    lost: bool,
    restorable: bool,
    next_handle: u32,
    buffers: HashMap<u32, SoftBuffer>,
    textures: HashMap<u32, SoftTexture>,
    programs: HashMap<u32, SoftProgram>,
    framebuffers: HashMap<u32, SoftFramebuffer>,
    screen: Surface,
    screen_stencil: Vec<u8>,
    state: PipelineState,
    frames: u64,
}

impl SoftwareBackend {
    pub const DEFAULT_TEXTURE_UNITS: u32 = 16;

    pub fn new(width: u32, height: u32) -> Self {
        let units = Self::DEFAULT_TEXTURE_UNITS;
        Self {
            info: BackendInfo {
                name: "software",
                max_texture_units: units,
                stencil_bits: 8,
                max_texture_size: 4096,
            },
            stats: BackendStats::default(),
            generation: 1,
            lost: false,
            restorable: true,
            next_handle: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            programs: HashMap::new(),
            framebuffers: HashMap::new(),
            screen: Surface::new(width, height),
            screen_stencil: vec![0; width as usize * height as usize],
            state: PipelineState::new(units, width, height),
            frames: 0,
        }
    }

    pub fn with_texture_units(mut self, units: u32) -> Self {
        let units = units.max(1);
        self.info.max_texture_units = units;
        self.state.units = vec![None; units as usize];
        self
    }

    pub fn with_stencil_bits(mut self, bits: u32) -> Self {
        self.info.stencil_bits = bits.min(8);
        self
    }

    // ── test hooks ────────────────────────────────────────────────────────

    /// Invalidates every native handle, like a lost WebGL context.
    pub fn lose_context(&mut self) {
        log::debug!("software backend: context generation {} lost", self.generation);
        self.lost = true;
        self.buffers.clear();
        self.textures.clear();
        self.programs.clear();
        self.framebuffers.clear();
        self.screen.fill([0; 4]);
        let (w, h) = (self.screen.width, self.screen.height);
        self.state = PipelineState::new(self.info.max_texture_units, w, h);
    }

    /// When false, `restore` keeps failing with `ContextLost`.
    pub fn set_restorable(&mut self, restorable: bool) {
        self.restorable = restorable;
    }

    pub fn screen_pixels(&self) -> &[u8] {
        &self.screen.pixels
    }

    /// Pixels of one mip level of a live texture.
    pub fn texture_pixels(&self, texture: NativeTexture, mip_level: u32) -> Option<&[u8]> {
        self.textures
            .get(&texture.0)
            .and_then(|t| t.levels.get(mip_level as usize))
            .map(|s| s.pixels.as_slice())
    }

    /// Stencil value of the screen at `(x, y)`.
    pub fn screen_stencil(&self, x: u32, y: u32) -> u8 {
        self.screen_stencil[(y * self.screen.width + x) as usize]
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    pub fn current_scissor(&self) -> Option<PixelRect> {
        self.state.scissor
    }

    pub fn current_stencil(&self) -> StencilState {
        self.state.stencil
    }

    pub fn current_viewport(&self) -> PixelRect {
        self.state.viewport
    }

    // ── internals ─────────────────────────────────────────────────────────

    fn check(&self) -> Result<(), BackendError> {
        if self.lost { Err(BackendError::ContextLost) } else { Ok(()) }
    }

    fn alloc_handle(&mut self) -> u32 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    /// Moves the bound color/stencil planes out so they can be written while
    /// other textures are sampled.
    fn take_target(&mut self) -> Result<(Surface, Option<Vec<u8>>), BackendError> {
        match self.state.framebuffer {
            None => Ok((
                std::mem::take(&mut self.screen),
                Some(std::mem::take(&mut self.screen_stencil)),
            )),
            Some((fb_id, mip)) => {
                let fb = self
                    .framebuffers
                    .get_mut(&fb_id)
                    .ok_or(BackendError::UnknownHandle { kind: "framebuffer", handle: fb_id })?;
                let stencil = fb
                    .stencil
                    .as_mut()
                    .and_then(|planes| planes.get_mut(mip as usize))
                    .map(std::mem::take);
                let color_id = fb.color;
                let tex = self
                    .textures
                    .get_mut(&color_id)
                    .ok_or(BackendError::UnknownHandle { kind: "texture", handle: color_id })?;
                let level = tex
                    .levels
                    .get_mut(mip as usize)
                    .ok_or(BackendError::Unsupported(format!("mip level {mip} out of range")))?;
                Ok((std::mem::take(level), stencil))
            }
        }
    }

    fn put_target(&mut self, color: Surface, stencil: Option<Vec<u8>>) {
        match self.state.framebuffer {
            None => {
                self.screen = color;
                if let Some(s) = stencil {
                    self.screen_stencil = s;
                }
            }
            Some((fb_id, mip)) => {
                let Some(fb) = self.framebuffers.get_mut(&fb_id) else { return };
                if let (Some(planes), Some(s)) = (fb.stencil.as_mut(), stencil) {
                    if let Some(plane) = planes.get_mut(mip as usize) {
                        *plane = s;
                    }
                }
                let color_id = fb.color;
                if let Some(level) = self
                    .textures
                    .get_mut(&color_id)
                    .and_then(|t| t.levels.get_mut(mip as usize))
                {
                    *level = color;
                }
            }
        }
    }

    fn read_attr(&self, name: &str, program: &SoftProgram, index: u32, instance: u32) -> Option<[f32; 4]> {
        let location = program.location(name)?;
        let attr = self
            .state
            .vertex_array
            .attributes
            .iter()
            .find(|a| a.location == location)?;
        let buffer = self.buffers.get(&attr.buffer.0)?;
        let element = if attr.instanced { instance } else { index };
        let start = attr.offset as usize + element as usize * attr.stride as usize;
        let bytes = buffer.data.get(start..start + attr.format.size() as usize)?;

        let f = |i: usize| f32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Some(match attr.format {
            VertexFormat::Float32 => [f(0), 0.0, 0.0, 1.0],
            VertexFormat::Float32x2 => [f(0), f(4), 0.0, 1.0],
            VertexFormat::Float32x3 => [f(0), f(4), f(8), 1.0],
            VertexFormat::Float32x4 => [f(0), f(4), f(8), f(12)],
            VertexFormat::Unorm8x4 => [
                bytes[0] as f32 / 255.0,
                bytes[1] as f32 / 255.0,
                bytes[2] as f32 / 255.0,
                bytes[3] as f32 / 255.0,
            ],
        })
    }

    fn vertex_indices(&self, first: u32, count: u32) -> Result<Vec<u32>, BackendError> {
        match self.state.vertex_array.index {
            None => Ok((first..first + count).collect()),
            Some((buffer, format)) => {
                let data = &self
                    .buffers
                    .get(&buffer.0)
                    .ok_or(BackendError::UnknownHandle { kind: "buffer", handle: buffer.0 })?
                    .data;
                let size = format.size() as usize;
                let mut out = Vec::with_capacity(count as usize);
                for i in first..first + count {
                    let at = i as usize * size;
                    let Some(b) = data.get(at..at + size) else { break };
                    out.push(match format {
                        IndexFormat::Uint16 => u16::from_le_bytes([b[0], b[1]]) as u32,
                        IndexFormat::Uint32 => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
                    });
                }
                Ok(out)
            }
        }
    }

    fn transform_vertex(&self, program: &SoftProgram, index: u32, instance: u32, viewport: PixelRect) -> ScreenVertex {
        let pos = self
            .read_attr("aVertexPosition", program, index, instance)
            .unwrap_or([0.0, 0.0, 0.0, 1.0]);
        let uv = self
            .read_attr("aTextureCoord", program, index, instance)
            .unwrap_or([0.0; 4]);
        let color = self.read_attr("aColor", program, index, instance).unwrap_or([1.0; 4]);
        let texture_id = self
            .read_attr("aTextureId", program, index, instance)
            .map(|v| v[0])
            .unwrap_or(0.0);

        let apply = |m: &[f32; 9], x: f32, y: f32| (m[0] * x + m[3] * y + m[6], m[1] * x + m[4] * y + m[7]);
        let (x, y) = apply(&program.mat3("translationMatrix"), pos[0], pos[1]);
        let (cx, cy) = apply(&program.mat3("projectionMatrix"), x, y);

        let tint = program.vec4("tint");
        let u_color = program.vec4("uColor");
        let mut c = [0.0; 4];
        for i in 0..4 {
            c[i] = color[i] * tint[i] * u_color[i];
        }

        ScreenVertex {
            x: viewport.x as f32 + (cx + 1.0) * 0.5 * viewport.width as f32,
            y: viewport.y as f32 + (1.0 - cy) * 0.5 * viewport.height as f32,
            uv: [uv[0], uv[1]],
            color: c,
            texture_id,
        }
    }

    fn shade(&self, program: &SoftProgram, uv: [f32; 2], color: [f32; 4], texture_id: f32) -> [f32; 4] {
        let sampler = if program.batched {
            format!("uSampler{}", (texture_id + 0.5) as u32)
        } else {
            "uSampler".to_string()
        };

        let texel = match program
            .samplers
            .get(&sampler)
            .and_then(|unit| self.state.units.get(*unit as usize).copied().flatten())
            .and_then(|t| self.textures.get(&t))
        {
            Some(tex) => match tex.levels.first() {
                Some(level) => sample(level, uv, tex.desc.scale_mode, tex.desc.wrap_mode),
                None => [0.0; 4],
            },
            None if program.samplers.is_empty() => [1.0; 4],
            None => [0.0, 0.0, 0.0, 1.0],
        };

        let texel = if program.straight_alpha {
            [texel[0] * texel[3], texel[1] * texel[3], texel[2] * texel[3], texel[3]]
        } else {
            texel
        };

        [texel[0] * color[0], texel[1] * color[1], texel[2] * color[2], texel[3] * color[3]]
    }

    fn rasterize(
        &self,
        target: &mut Surface,
        mut stencil: Option<&mut Vec<u8>>,
        triangles: &[[ScreenVertex; 3]],
        program: &SoftProgram,
    ) {
        let bounds = PixelRect::new(0, 0, target.width, target.height);
        let mut clip = self.state.viewport.intersect(bounds);
        if let Some(s) = self.state.scissor {
            clip = clip.intersect(s);
        }
        let st = self.state.stencil;
        let width = target.width;

        for tri in triangles {
            rasterize_triangle(*tri, clip, |x, y, frag| {
                let si = (y * width + x) as usize;
                if st.enabled {
                    if let Some(plane) = stencil.as_deref_mut() {
                        let stored = plane[si];
                        let pass = match st.func {
                            StencilFunc::Always => true,
                            StencilFunc::Equal => stored == st.reference,
                        };
                        if !pass {
                            return;
                        }
                        plane[si] = match st.pass_op {
                            StencilOp::Keep => stored,
                            StencilOp::IncrementClamp => stored.saturating_add(1),
                            StencilOp::DecrementClamp => stored.saturating_sub(1),
                        };
                    }
                }
                if !self.state.color_write {
                    return;
                }
                let src = self.shade(program, frag.uv, frag.color, frag.texture_id);
                let dst = target.get(x, y);
                target.put(x, y, blend(src, dst, self.state.blend));
            });
        }
    }
}

impl Backend for SoftwareBackend {
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
        self.lost
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn restore(&mut self) -> Result<u64, BackendError> {
        if !self.lost {
            return Ok(self.generation);
        }
        if !self.restorable {
            return Err(BackendError::ContextLost);
        }
        self.lost = false;
        self.generation += 1;
        log::debug!("software backend: restored as generation {}", self.generation);
        Ok(self.generation)
    }

    // ── buffers ───────────────────────────────────────────────────────────

    fn create_buffer(
        &mut self,
        _kind: BufferKind,
        _usage: BufferUsage,
        capacity: usize,
    ) -> Result<NativeBuffer, BackendError> {
        self.check()?;
        let h = self.alloc_handle();
        self.buffers.insert(h, SoftBuffer { data: vec![0; capacity] });
        self.stats.buffer_allocs += 1;
        Ok(NativeBuffer(h))
    }

    fn write_buffer(&mut self, buffer: NativeBuffer, offset: usize, data: &[u8]) -> Result<(), BackendError> {
        self.check()?;
        let b = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or(BackendError::UnknownHandle { kind: "buffer", handle: buffer.0 })?;
        let end = offset + data.len();
        if end > b.data.len() {
            return Err(BackendError::Unsupported(format!(
                "write of {end} bytes exceeds buffer capacity {}",
                b.data.len()
            )));
        }
        b.data[offset..end].copy_from_slice(data);
        self.stats.buffer_writes += 1;
        Ok(())
    }

    fn delete_buffer(&mut self, buffer: NativeBuffer) {
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
        let mut levels = Vec::new();
        let (mut w, mut h) = (desc.width.max(1), desc.height.max(1));
        for _ in 0..desc.mip_levels.max(1) {
            levels.push(Surface::new(w, h));
            w = (w / 2).max(1);
            h = (h / 2).max(1);
        }
        let handle = self.alloc_handle();
        self.textures.insert(handle, SoftTexture { desc: *desc, levels });
        self.stats.texture_allocs += 1;
        Ok(NativeTexture(handle))
    }

    fn write_texture(
        &mut self,
        texture: NativeTexture,
        mip_level: u32,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<(), BackendError> {
        self.check()?;
        let t = self
            .textures
            .get_mut(&texture.0)
            .ok_or(BackendError::UnknownHandle { kind: "texture", handle: texture.0 })?;
        let level = t
            .levels
            .get_mut(mip_level as usize)
            .ok_or(BackendError::Unsupported(format!("mip level {mip_level} out of range")))?;
        if (level.width, level.height) != (width, height) {
            return Err(BackendError::Unsupported(format!(
                "upload {width}x{height} does not match level {}x{}",
                level.width, level.height
            )));
        }
        *level = Surface::from_pixels(width, height, pixels);
        self.stats.texture_writes += 1;
        Ok(())
    }

    fn generate_mipmaps(&mut self, texture: NativeTexture) -> Result<(), BackendError> {
        self.check()?;
        let t = self
            .textures
            .get_mut(&texture.0)
            .ok_or(BackendError::UnknownHandle { kind: "texture", handle: texture.0 })?;
        for i in 1..t.levels.len() {
            t.levels[i] = t.levels[i - 1].downsample();
        }
        Ok(())
    }

    fn delete_texture(&mut self, texture: NativeTexture) {
        self.textures.remove(&texture.0);
        for unit in self.state.units.iter_mut() {
            if *unit == Some(texture.0) {
                *unit = None;
            }
        }
    }

    // ── programs ──────────────────────────────────────────────────────────

    fn create_program(&mut self, program: &CompiledProgram) -> Result<NativeProgram, BackendError> {
        self.check()?;
        let attributes = program
            .info
            .attributes
            .iter()
            .map(|a| (a.name.clone(), a.location))
            .collect();
        let handle = self.alloc_handle();
        self.programs.insert(
            handle,
            SoftProgram {
                attributes,
                uniforms: HashMap::new(),
                samplers: HashMap::new(),
                straight_alpha: program.define(crate::shader::builtin::STRAIGHT_ALPHA) == Some("1"),
                batched: program.info.attribute("aTextureId").is_some(),
            },
        );
        self.stats.program_links += 1;
        Ok(NativeProgram(handle))
    }

    fn delete_program(&mut self, program: NativeProgram) {
        self.programs.remove(&program.0);
        if self.state.program == Some(program.0) {
            self.state.program = None;
        }
    }

    // ── framebuffers ──────────────────────────────────────────────────────

    fn create_framebuffer(&mut self, color: NativeTexture, stencil: bool) -> Result<NativeFramebuffer, BackendError> {
        self.check()?;
        let tex = self
            .textures
            .get(&color.0)
            .ok_or(BackendError::UnknownHandle { kind: "texture", handle: color.0 })?;
        let stencil = stencil.then(|| {
            tex.levels
                .iter()
                .map(|l| vec![0u8; l.width as usize * l.height as usize])
                .collect()
        });
        let handle = self.alloc_handle();
        self.framebuffers
            .insert(handle, SoftFramebuffer { color: color.0, stencil });
        Ok(NativeFramebuffer(handle))
    }

    fn delete_framebuffer(&mut self, framebuffer: NativeFramebuffer) {
        self.framebuffers.remove(&framebuffer.0);
        if matches!(self.state.framebuffer, Some((fb, _)) if fb == framebuffer.0) {
            self.state.framebuffer = None;
        }
    }

    // ── screen ────────────────────────────────────────────────────────────

    fn resize_screen(&mut self, width: u32, height: u32) {
        self.screen = Surface::new(width, height);
        self.screen_stencil = vec![0; width as usize * height as usize];
    }

    fn screen_size(&self) -> (u32, u32) {
        (self.screen.width, self.screen.height)
    }

    // ── state ─────────────────────────────────────────────────────────────

    fn bind_framebuffer(&mut self, framebuffer: Option<NativeFramebuffer>, mip_level: u32) -> Result<(), BackendError> {
        self.check()?;
        if let Some(fb) = framebuffer {
            if !self.framebuffers.contains_key(&fb.0) {
                return Err(BackendError::UnknownHandle { kind: "framebuffer", handle: fb.0 });
            }
        }
        self.state.framebuffer = framebuffer.map(|fb| (fb.0, mip_level));
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
        self.state.program = Some(program.0);
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
                p.samplers.insert(info.name.clone(), *unit);
            }
        } else {
            p.uniforms.insert(info.name.clone(), value.clone());
        }
        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<NativeTexture>) -> Result<(), BackendError> {
        self.check()?;
        if let Some(t) = texture {
            if !self.textures.contains_key(&t.0) {
                return Err(BackendError::UnknownHandle { kind: "texture", handle: t.0 });
            }
        }
        let slot = self
            .state
            .units
            .get_mut(unit as usize)
            .ok_or(BackendError::Unsupported(format!("texture unit {unit} out of range")))?;
        *slot = texture.map(|t| t.0);
        Ok(())
    }

    fn bind_vertex_array(&mut self, layout: &VertexArrayDesc) -> Result<(), BackendError> {
        self.check()?;
        for attr in &layout.attributes {
            if !self.buffers.contains_key(&attr.buffer.0) {
                return Err(BackendError::UnknownHandle { kind: "buffer", handle: attr.buffer.0 });
            }
        }
        self.state.vertex_array = layout.clone();
        Ok(())
    }

    // ── commands ──────────────────────────────────────────────────────────

    fn clear(&mut self, color: Option<[f32; 4]>, stencil: Option<u8>) -> Result<(), BackendError> {
        self.check()?;
        let (mut target, mut plane) = self.take_target()?;
        if let Some(c) = color {
            target.fill(c.map(raster::quantize));
        }
        if let (Some(s), Some(p)) = (stencil, plane.as_mut()) {
            p.iter_mut().for_each(|v| *v = s);
        }
        self.put_target(target, plane);
        Ok(())
    }

    fn draw(&mut self, topology: Topology, first: u32, count: u32, instances: u32) -> Result<(), BackendError> {
        self.check()?;
        let program_id = self
            .state
            .program
            .ok_or(BackendError::Unsupported("draw without a program".into()))?;
        let indices = self.vertex_indices(first, count)?;
        let viewport = self.state.viewport;

        let mut triangles = Vec::new();
        {
            let program = self
                .programs
                .get(&program_id)
                .ok_or(BackendError::UnknownHandle { kind: "program", handle: program_id })?;
            for instance in 0..instances.max(1) {
                let verts: Vec<ScreenVertex> = indices
                    .iter()
                    .map(|i| self.transform_vertex(program, *i, instance, viewport))
                    .collect();
                match topology {
                    Topology::Triangles => {
                        for t in verts.chunks_exact(3) {
                            triangles.push([t[0], t[1], t[2]]);
                        }
                    }
                    Topology::TriangleStrip => {
                        for i in 2..verts.len() {
                            if i % 2 == 0 {
                                triangles.push([verts[i - 2], verts[i - 1], verts[i]]);
                            } else {
                                triangles.push([verts[i - 1], verts[i - 2], verts[i]]);
                            }
                        }
                    }
                }
            }
        }

        let (mut target, mut plane) = self.take_target()?;
        if let Some(program) = self.programs.get(&program_id) {
            self.rasterize(&mut target, plane.as_mut(), &triangles, program);
        }
        self.put_target(target, plane);
        self.stats.draw_calls += 1;
        Ok(())
    }

    fn read_pixels(&mut self, rect: PixelRect) -> Result<Vec<u8>, BackendError> {
        self.check()?;
        let (target, plane) = self.take_target()?;
        let out = target.read(rect);
        self.put_target(target, plane);
        Ok(out)
    }

    fn end_frame(&mut self) -> Result<(), BackendError> {
        self.check()?;
        self.frames += 1;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calls_fail_while_lost() {
        let mut b = SoftwareBackend::new(8, 8);
        let buf = b.create_buffer(BufferKind::Vertex, BufferUsage::Static, 16).unwrap();
        b.lose_context();
        assert!(matches!(b.write_buffer(buf, 0, &[0; 4]), Err(BackendError::ContextLost)));
        assert_eq!(b.restore().unwrap(), 2);
        assert!(matches!(
            b.write_buffer(buf, 0, &[0; 4]),
            Err(BackendError::UnknownHandle { kind: "buffer", .. })
        ));
    }

    #[test]
    fn clear_fills_bound_render_target() {
        let mut b = SoftwareBackend::new(8, 8);
        let desc = TextureDesc {
            width: 4,
            height: 4,
            mip_levels: 1,
            scale_mode: Default::default(),
            wrap_mode: Default::default(),
            render_target: true,
        };
        let tex = b.create_texture(&desc).unwrap();
        let fb = b.create_framebuffer(tex, true).unwrap();
        b.bind_framebuffer(Some(fb), 0).unwrap();
        b.clear(Some([1.0, 0.0, 0.0, 1.0]), Some(0)).unwrap();

        let px = b.texture_pixels(tex, 0).unwrap();
        assert_eq!(&px[..4], &[255, 0, 0, 255]);
        assert!(b.screen_pixels().iter().all(|v| *v == 0));
    }

    #[test]
    fn mipmaps_fill_lower_levels() {
        let mut b = SoftwareBackend::new(1, 1);
        let desc = TextureDesc {
            width: 2,
            height: 2,
            mip_levels: 2,
            scale_mode: Default::default(),
            wrap_mode: Default::default(),
            render_target: false,
        };
        let tex = b.create_texture(&desc).unwrap();
        b.write_texture(tex, 0, 2, 2, &[255; 16]).unwrap();
        b.generate_mipmaps(tex).unwrap();
        assert_eq!(b.texture_pixels(tex, 1).unwrap(), &[255, 255, 255, 255]);
    }
}
