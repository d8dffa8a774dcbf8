//! Render pipeline keys and their wgpu translation.
//!
//! GL-style state (blend, stencil, color mask, vertex layout) is baked into
//! wgpu pipelines. Every distinct combination seen at draw time becomes one
//! cached pipeline.

use crate::device::{
    NativeBuffer, NativeProgram, StencilFunc, StencilOp, StencilState, Topology, VertexArrayDesc,
    VertexFormat,
};
use crate::paint::{BlendFactor, BlendFactors};

use super::program::GpuProgram;

pub(super) const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub(super) const STENCIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Stencil8;

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub(super) struct AttributeKey {
    pub location: u32,
    pub format: VertexFormat,
    /// Offset relative to the slot's base offset.
    pub offset: u32,
}

/// One wgpu vertex buffer slot.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub(super) struct VertexSlotKey {
    pub stride: u32,
    pub instanced: bool,
    pub attributes: Vec<AttributeKey>,
}

/// Where a vertex slot reads from.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(super) struct VertexSource {
    pub buffer: NativeBuffer,
    pub base: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub(super) enum StencilKey {
    /// Target has no stencil plane.
    NoAttachment,
    Disabled,
    Test(StencilFunc, StencilOp),
}

impl StencilKey {
    pub fn new(state: StencilState, has_attachment: bool) -> Self {
        match (has_attachment, state.enabled) {
            (false, _) => StencilKey::NoAttachment,
            (true, false) => StencilKey::Disabled,
            (true, true) => StencilKey::Test(state.func, state.pass_op),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub(super) struct PipelineKey {
    pub program: NativeProgram,
    pub slots: Vec<VertexSlotKey>,
    pub topology: Topology,
    pub strip_index: Option<crate::device::IndexFormat>,
    pub blend: Option<BlendFactors>,
    pub stencil: StencilKey,
    pub color_write: bool,
}

/// Splits the attribute pointers of `desc` into wgpu vertex buffer slots.
///
/// Attributes of the same buffer, stride and step mode share a slot as long
/// as they fit inside one stride from the slot's lowest offset.
pub(super) fn vertex_slots(desc: &VertexArrayDesc) -> (Vec<VertexSlotKey>, Vec<VertexSource>) {
    let mut attrs = desc.attributes.clone();
    for a in &mut attrs {
        if a.stride == 0 {
            a.stride = a.format.size();
        }
    }
    attrs.sort_by_key(|a| (a.buffer.0, a.instanced, a.stride, a.offset));

    let mut keys: Vec<VertexSlotKey> = Vec::new();
    let mut sources: Vec<VertexSource> = Vec::new();
    for a in attrs {
        let stride = a.stride;
        let fits = match (keys.last(), sources.last()) {
            (Some(k), Some(s)) => {
                s.buffer == a.buffer
                    && k.stride == stride
                    && k.instanced == a.instanced
                    && a.offset.checked_sub(s.base).is_some_and(|d| d + a.format.size() <= stride)
            }
            _ => false,
        };
        if !fits {
            keys.push(VertexSlotKey { stride, instanced: a.instanced, attributes: Vec::new() });
            sources.push(VertexSource { buffer: a.buffer, base: a.offset });
        }
        if let (Some(k), Some(s)) = (keys.last_mut(), sources.last()) {
            k.attributes.push(AttributeKey { location: a.location, format: a.format, offset: a.offset - s.base });
        }
    }
    (keys, sources)
}

fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32 => wgpu::VertexFormat::Float32,
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        VertexFormat::Unorm8x4 => wgpu::VertexFormat::Unorm8x4,
    }
}

fn blend_factor(f: BlendFactor) -> wgpu::BlendFactor {
    match f {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::SrcColor => wgpu::BlendFactor::Src,
        BlendFactor::OneMinusSrcColor => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::DstColor => wgpu::BlendFactor::Dst,
        BlendFactor::OneMinusDstColor => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
    }
}

fn blend_state(f: BlendFactors) -> wgpu::BlendState {
    wgpu::BlendState {
        color: wgpu::BlendComponent {
            src_factor: blend_factor(f.src_rgb),
            dst_factor: blend_factor(f.dst_rgb),
            operation: wgpu::BlendOperation::Add,
        },
        alpha: wgpu::BlendComponent {
            src_factor: blend_factor(f.src_alpha),
            dst_factor: blend_factor(f.dst_alpha),
            operation: wgpu::BlendOperation::Add,
        },
    }
}

fn depth_stencil(key: StencilKey) -> Option<wgpu::DepthStencilState> {
    let (compare, pass_op) = match key {
        StencilKey::NoAttachment => return None,
        StencilKey::Disabled => (wgpu::CompareFunction::Always, wgpu::StencilOperation::Keep),
        StencilKey::Test(func, op) => (
            match func {
                StencilFunc::Always => wgpu::CompareFunction::Always,
                StencilFunc::Equal => wgpu::CompareFunction::Equal,
            },
            match op {
                StencilOp::Keep => wgpu::StencilOperation::Keep,
                StencilOp::IncrementClamp => wgpu::StencilOperation::IncrementClamp,
                StencilOp::DecrementClamp => wgpu::StencilOperation::DecrementClamp,
            },
        ),
    };
    let face = wgpu::StencilFaceState {
        compare,
        fail_op: wgpu::StencilOperation::Keep,
        depth_fail_op: wgpu::StencilOperation::Keep,
        pass_op,
    };
    Some(wgpu::DepthStencilState {
        format: STENCIL_FORMAT,
        depth_write_enabled: false,
        depth_compare: wgpu::CompareFunction::Always,
        stencil: wgpu::StencilState { front: face, back: face, read_mask: 0xff, write_mask: 0xff },
        bias: wgpu::DepthBiasState::default(),
    })
}

pub(super) fn create_pipeline(device: &wgpu::Device, program: &GpuProgram, key: &PipelineKey) -> wgpu::RenderPipeline {
    let attributes: Vec<Vec<wgpu::VertexAttribute>> = key
        .slots
        .iter()
        .map(|slot| {
            slot.attributes
                .iter()
                .map(|a| wgpu::VertexAttribute {
                    format: vertex_format(a.format),
                    offset: a.offset as u64,
                    shader_location: a.location,
                })
                .collect()
        })
        .collect();
    let buffers: Vec<wgpu::VertexBufferLayout<'_>> = key
        .slots
        .iter()
        .zip(&attributes)
        .map(|(slot, attrs)| wgpu::VertexBufferLayout {
            array_stride: slot.stride as u64,
            step_mode: if slot.instanced { wgpu::VertexStepMode::Instance } else { wgpu::VertexStepMode::Vertex },
            attributes: attrs,
        })
        .collect();

    let (topology, strip_index_format) = match key.topology {
        Topology::Triangles => (wgpu::PrimitiveTopology::TriangleList, None),
        Topology::TriangleStrip => (
            wgpu::PrimitiveTopology::TriangleStrip,
            key.strip_index.map(|f| match f {
                crate::device::IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
                crate::device::IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
            }),
        ),
    };

    log::debug!("wgpu: building pipeline for `{}` ({:?}, blend {:?})", program.name, key.stencil, key.blend);

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&program.name),
        layout: Some(&program.layout),
        vertex: wgpu::VertexState {
            module: &program.vertex,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            buffers: &buffers,
        },
        fragment: Some(wgpu::FragmentState {
            module: &program.fragment,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: COLOR_FORMAT,
                blend: key.blend.map(blend_state),
                write_mask: if key.color_write { wgpu::ColorWrites::ALL } else { wgpu::ColorWrites::empty() },
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology,
            strip_index_format,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: depth_stencil(key.stencil),
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::VertexAttributeDesc;

    fn attr(location: u32, buffer: u32, format: VertexFormat, offset: u32, stride: u32) -> VertexAttributeDesc {
        VertexAttributeDesc { location, buffer: NativeBuffer(buffer), format, offset, stride, instanced: false }
    }

    #[test]
    fn interleaved_attributes_share_a_slot() {
        let desc = VertexArrayDesc {
            attributes: vec![
                attr(0, 1, VertexFormat::Float32x2, 0, 24),
                attr(1, 1, VertexFormat::Float32x2, 8, 24),
                attr(2, 1, VertexFormat::Unorm8x4, 16, 24),
                attr(3, 1, VertexFormat::Float32, 20, 24),
            ],
            index: None,
        };
        let (slots, sources) = vertex_slots(&desc);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].attributes.len(), 4);
        assert_eq!(sources[0].base, 0);
    }

    #[test]
    fn planar_attributes_get_their_own_slots() {
        let desc = VertexArrayDesc {
            attributes: vec![
                attr(0, 1, VertexFormat::Float32x2, 0, 8),
                attr(1, 1, VertexFormat::Float32x2, 64, 8),
                attr(2, 2, VertexFormat::Float32x2, 0, 0),
            ],
            index: None,
        };
        let (slots, sources) = vertex_slots(&desc);
        assert_eq!(slots.len(), 3);
        assert_eq!(sources[1].base, 64);
        assert_eq!(slots[1].attributes[0].offset, 0);
        assert_eq!(slots[2].stride, 8);
    }

    #[test]
    fn stencil_key_tracks_the_attachment() {
        let state = StencilState { enabled: true, func: StencilFunc::Equal, reference: 1, pass_op: StencilOp::Keep };
        assert_eq!(StencilKey::new(state, false), StencilKey::NoAttachment);
        assert_eq!(StencilKey::new(StencilState::DISABLED, true), StencilKey::Disabled);
        assert_eq!(StencilKey::new(state, true), StencilKey::Test(StencilFunc::Equal, StencilOp::Keep));
    }
}
