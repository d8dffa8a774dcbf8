use std::borrow::Cow;
use std::collections::BTreeMap;
use std::num::NonZeroU64;

use crate::shader::{CompiledProgram, StageFlags};

/// A texture binding of a program and the unit feeding it.
#[derive(Debug, Copy, Clone)]
pub(super) struct TextureSlot {
    pub group: u32,
    pub binding: u32,
    pub sampler_binding: Option<u32>,
    pub unit: u32,
}

/// CPU image of one uniform block; snapshotted into the arena per draw.
#[derive(Debug, Clone)]
pub(super) struct BlockShadow {
    pub group: u32,
    pub binding: u32,
    pub data: Vec<u8>,
}

/// Native program: shader modules, bind group layouts and uniform shadows.
pub(super) struct GpuProgram {
    pub name: String,
    pub vertex: wgpu::ShaderModule,
    pub fragment: wgpu::ShaderModule,
    /// One layout per bind group index, dense from 0.
    pub group_layouts: Vec<wgpu::BindGroupLayout>,
    pub layout: wgpu::PipelineLayout,
    pub blocks: Vec<BlockShadow>,
    pub textures: Vec<TextureSlot>,
    /// `(location, components)` of every vertex input.
    pub attributes: Vec<(u32, u32)>,
}

fn visibility(stages: StageFlags) -> wgpu::ShaderStages {
    let mut v = wgpu::ShaderStages::NONE;
    if stages.vertex {
        v |= wgpu::ShaderStages::VERTEX;
    }
    if stages.fragment {
        v |= wgpu::ShaderStages::FRAGMENT;
    }
    v
}

impl GpuProgram {
    pub fn new(device: &wgpu::Device, compiled: &CompiledProgram) -> Self {
        let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{} vertex", compiled.name)),
            source: wgpu::ShaderSource::Naga(Cow::Owned(compiled.vertex.clone())),
        });
        let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{} fragment", compiled.name)),
            source: wgpu::ShaderSource::Naga(Cow::Owned(compiled.fragment.clone())),
        });

        let info = &compiled.info;
        let mut groups: BTreeMap<u32, Vec<wgpu::BindGroupLayoutEntry>> = BTreeMap::new();

        let mut blocks: Vec<BlockShadow> = Vec::with_capacity(info.blocks.len());
        for block in &info.blocks {
            groups.entry(block.group).or_default().push(wgpu::BindGroupLayoutEntry {
                binding: block.binding,
                visibility: visibility(block.stages),
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(block.size as u64),
                },
                count: None,
            });
            blocks.push(BlockShadow { group: block.group, binding: block.binding, data: vec![0; block.size as usize] });
        }
        blocks.sort_by_key(|b| (b.group, b.binding));

        let mut textures = Vec::with_capacity(info.textures.len());
        for (unit, tex) in info.textures.iter().enumerate() {
            let entries = groups.entry(tex.group).or_default();
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: tex.binding,
                visibility: visibility(tex.stages),
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
            if let Some(binding) = tex.sampler_binding {
                entries.push(wgpu::BindGroupLayoutEntry {
                    binding,
                    visibility: visibility(tex.stages),
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                });
            }
            textures.push(TextureSlot {
                group: tex.group,
                binding: tex.binding,
                sampler_binding: tex.sampler_binding,
                unit: unit as u32,
            });
        }

        // Bind group indices must be dense; gaps get an empty layout.
        let group_count = groups.keys().next_back().map_or(0, |g| g + 1);
        let group_layouts: Vec<wgpu::BindGroupLayout> = (0..group_count)
            .map(|g| {
                let entries = groups.get(&g).map(Vec::as_slice).unwrap_or(&[]);
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&format!("{} group {g}", compiled.name)),
                    entries,
                })
            })
            .collect();

        let layout_refs: Vec<&wgpu::BindGroupLayout> = group_layouts.iter().collect();
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} layout", compiled.name)),
            bind_group_layouts: &layout_refs,
            immediate_size: 0,
        });

        Self {
            name: compiled.name.clone(),
            vertex,
            fragment,
            group_layouts,
            layout,
            blocks,
            textures,
            attributes: info.attributes.iter().map(|a| (a.location, a.components)).collect(),
        }
    }

    pub fn block_mut(&mut self, group: u32, binding: u32) -> Option<&mut BlockShadow> {
        self.blocks.iter_mut().find(|b| b.group == group && b.binding == binding)
    }
}
