//! Interface introspection of compiled shader modules.

use wgpu::naga::{self, AddressSpace, ArraySize, Binding, Module, ScalarKind, TypeInner, VectorSize};

use super::ShaderStage;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum UniformType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Int,
    IVec2,
    IVec3,
    IVec4,
    UInt,
    Mat2,
    Mat3,
    Mat4,
    /// Sampled 2D texture; its value is a texture unit.
    Texture2D,
}

impl UniformType {
    /// Float/int component count of a single element.
    pub const fn components(self) -> u32 {
        match self {
            UniformType::Float | UniformType::Int | UniformType::UInt | UniformType::Texture2D => 1,
            UniformType::Vec2 | UniformType::IVec2 => 2,
            UniformType::Vec3 | UniformType::IVec3 => 3,
            UniformType::Vec4 | UniformType::IVec4 | UniformType::Mat2 => 4,
            UniformType::Mat3 => 9,
            UniformType::Mat4 => 16,
        }
    }
}

/// Which stages reference a binding.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct StageFlags {
    pub vertex: bool,
    pub fragment: bool,
}

impl StageFlags {
    fn of(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => StageFlags { vertex: true, fragment: false },
            ShaderStage::Fragment => StageFlags { vertex: false, fragment: true },
        }
    }

    fn merge(&mut self, other: StageFlags) {
        self.vertex |= other.vertex;
        self.fragment |= other.fragment;
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AttributeInfo {
    pub name: String,
    pub location: u32,
    pub components: u32,
}

/// One active uniform after flattening.
///
/// Struct members are reported as `outer.member`, elements of struct arrays
/// as `name[i].field`. Arrays of plain values keep a single entry with
/// `size > 1` and a byte `stride`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UniformInfo {
    pub name: String,
    /// Index in [`ProgramInfo::uniforms`].
    pub location: u32,
    pub ty: UniformType,
    pub size: u32,
    /// Byte offset inside the owning uniform block (0 for textures).
    pub offset: u32,
    pub stride: u32,
    pub group: u32,
    pub binding: u32,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UniformBlockInfo {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub size: u32,
    pub stages: StageFlags,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TextureInfo {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    /// Binding of the paired sampler object (`binding + 1` by convention).
    pub sampler_binding: Option<u32>,
    pub stages: StageFlags,
}

/// Reflected interface of a linked program.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ProgramInfo {
    pub attributes: Vec<AttributeInfo>,
    pub uniforms: Vec<UniformInfo>,
    pub blocks: Vec<UniformBlockInfo>,
    pub textures: Vec<TextureInfo>,
    /// Vertex outputs by location, used for the link check.
    pub varyings_out: Vec<(u32, String)>,
    /// Fragment inputs by location.
    pub varyings_in: Vec<(u32, String)>,
}

impl ProgramInfo {
    pub fn attribute(&self, name: &str) -> Option<&AttributeInfo> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformInfo> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    pub fn has_uniform(&self, name: &str) -> bool {
        self.uniform(name).is_some()
    }

    /// Merges one stage's interface into the program view.
    pub(crate) fn add_stage(&mut self, module: &Module, stage: ShaderStage) {
        let flags = StageFlags::of(stage);

        if let Some(ep) = module.entry_points.iter().find(|ep| ep.stage == stage.naga()) {
            for arg in &ep.function.arguments {
                let (Some(name), Some(Binding::Location { location, .. })) = (&arg.name, &arg.binding)
                else {
                    continue;
                };
                match stage {
                    ShaderStage::Vertex => self.attributes.push(AttributeInfo {
                        name: name.clone(),
                        location: *location,
                        components: components_of(&module.types[arg.ty].inner),
                    }),
                    ShaderStage::Fragment => self.varyings_in.push((*location, name.clone())),
                }
            }

            if stage == ShaderStage::Vertex {
                if let Some(result) = &ep.function.result {
                    if let TypeInner::Struct { members, .. } = &module.types[result.ty].inner {
                        for m in members {
                            if let Some(Binding::Location { location, .. }) = &m.binding {
                                let name = m.name.clone().unwrap_or_default();
                                self.varyings_out.push((*location, name));
                            }
                        }
                    }
                }
            }
        }

        for (_, var) in module.global_variables.iter() {
            let Some(rb) = &var.binding else { continue };
            let name = var.name.clone().unwrap_or_default();

            match var.space {
                AddressSpace::Uniform => {
                    if let Some(block) = self
                        .blocks
                        .iter_mut()
                        .find(|b| b.group == rb.group && b.binding == rb.binding)
                    {
                        block.stages.merge(flags);
                        continue;
                    }

                    let ty = &module.types[var.ty].inner;
                    self.blocks.push(UniformBlockInfo {
                        name: name.clone(),
                        group: rb.group,
                        binding: rb.binding,
                        size: ty.size(module.to_ctx()),
                        stages: flags,
                    });

                    match ty {
                        TypeInner::Struct { members, .. } => {
                            for m in members {
                                let member = m.name.clone().unwrap_or_default();
                                self.flatten(module, &member, m.ty, m.offset, rb.group, rb.binding);
                            }
                        }
                        _ => self.flatten(module, &name, var.ty, 0, rb.group, rb.binding),
                    }
                }
                AddressSpace::Handle => match module.types[var.ty].inner {
                    TypeInner::Image { .. } => {
                        if let Some(t) = self
                            .textures
                            .iter_mut()
                            .find(|t| t.group == rb.group && t.binding == rb.binding)
                        {
                            t.stages.merge(flags);
                            continue;
                        }
                        self.textures.push(TextureInfo {
                            name: name.clone(),
                            group: rb.group,
                            binding: rb.binding,
                            sampler_binding: None,
                            stages: flags,
                        });
                        self.push_uniform(name, UniformType::Texture2D, 1, 0, 0, rb.group, rb.binding);
                    }
                    _ => {}
                },
                _ => {}
            }
        }

        // Pair samplers once every texture of the stage is known.
        for (_, var) in module.global_variables.iter() {
            let (Some(rb), AddressSpace::Handle) = (&var.binding, var.space) else { continue };
            if !matches!(module.types[var.ty].inner, TypeInner::Sampler { .. }) {
                continue;
            }
            if let Some(t) = self
                .textures
                .iter_mut()
                .find(|t| t.group == rb.group && t.binding + 1 == rb.binding)
            {
                t.sampler_binding = Some(rb.binding);
            }
        }
    }

    fn flatten(
        &mut self,
        module: &Module,
        name: &str,
        ty: naga::Handle<naga::Type>,
        offset: u32,
        group: u32,
        binding: u32,
    ) {
        match &module.types[ty].inner {
            TypeInner::Struct { members, .. } => {
                for m in members {
                    let member = m.name.clone().unwrap_or_default();
                    self.flatten(module, &format!("{name}.{member}"), m.ty, offset + m.offset, group, binding);
                }
            }
            TypeInner::Array { base, size, stride } => {
                let count = match size {
                    ArraySize::Constant(n) => n.get(),
                    _ => 1,
                };
                if let TypeInner::Struct { .. } = module.types[*base].inner {
                    for i in 0..count {
                        self.flatten(module, &format!("{name}[{i}]"), *base, offset + i * stride, group, binding);
                    }
                } else if let Some(ut) = uniform_type(&module.types[*base].inner) {
                    self.push_uniform(name.to_string(), ut, count, offset, *stride, group, binding);
                }
            }
            inner => match uniform_type(inner) {
                Some(ut) => self.push_uniform(name.to_string(), ut, 1, offset, 0, group, binding),
                None => log::debug!("reflect: uniform `{name}` has an unsupported type; skipped"),
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push_uniform(
        &mut self,
        name: String,
        ty: UniformType,
        size: u32,
        offset: u32,
        stride: u32,
        group: u32,
        binding: u32,
    ) {
        let location = self.uniforms.len() as u32;
        self.uniforms.push(UniformInfo { name, location, ty, size, offset, stride, group, binding });
    }
}

fn uniform_type(inner: &TypeInner) -> Option<UniformType> {
    match *inner {
        TypeInner::Scalar(s) => match s.kind {
            ScalarKind::Float => Some(UniformType::Float),
            ScalarKind::Sint => Some(UniformType::Int),
            ScalarKind::Uint => Some(UniformType::UInt),
            _ => None,
        },
        TypeInner::Vector { size, scalar } => match (scalar.kind, size) {
            (ScalarKind::Float, VectorSize::Bi) => Some(UniformType::Vec2),
            (ScalarKind::Float, VectorSize::Tri) => Some(UniformType::Vec3),
            (ScalarKind::Float, VectorSize::Quad) => Some(UniformType::Vec4),
            (ScalarKind::Sint, VectorSize::Bi) => Some(UniformType::IVec2),
            (ScalarKind::Sint, VectorSize::Tri) => Some(UniformType::IVec3),
            (ScalarKind::Sint, VectorSize::Quad) => Some(UniformType::IVec4),
            _ => None,
        },
        TypeInner::Matrix { columns, rows, .. } => match (columns, rows) {
            (VectorSize::Bi, VectorSize::Bi) => Some(UniformType::Mat2),
            (VectorSize::Tri, VectorSize::Tri) => Some(UniformType::Mat3),
            (VectorSize::Quad, VectorSize::Quad) => Some(UniformType::Mat4),
            _ => None,
        },
        _ => None,
    }
}

fn components_of(inner: &TypeInner) -> u32 {
    match *inner {
        TypeInner::Scalar(_) => 1,
        TypeInner::Vector { size, .. } => size as u32,
        _ => 0,
    }
}
