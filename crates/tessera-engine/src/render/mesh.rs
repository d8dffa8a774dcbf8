use crate::paint::premultiply_tint;
use crate::scene::Mesh;
use crate::shader::builtin::mesh_program;
use crate::shader::{Program, UniformValue};
use crate::texture::AlphaMode;

use super::context::RenderContext;
use super::error::RenderError;
use super::plugin::{RenderObject, RenderPlugin};

/// Draws meshes that cannot join a batch, one draw call each.
pub struct MeshRenderer {
    programs: [Program; 2],
}

impl Default for MeshRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshRenderer {
    pub fn new() -> Self {
        Self { programs: [mesh_program(false), mesh_program(true)] }
    }
}

impl RenderPlugin for MeshRenderer {
    fn render(&mut self, ctx: &mut RenderContext, object: RenderObject<'_>) -> Result<(), RenderError> {
        let Some(mesh) = object.content.as_any_mut().downcast_mut::<Mesh>() else {
            log::warn!("mesh renderer received a non-mesh object; skipped");
            ctx.stats.skipped += 1;
            return Ok(());
        };
        let color = premultiply_tint(mesh.tint, object.world_alpha);
        let blend = mesh.blend;
        let (geometry, texture, shader, uniforms) = mesh.parts_mut();

        if !texture.is_valid() || geometry.element_count() == 0 {
            ctx.stats.skipped += 1;
            return Ok(());
        }

        uniforms.set("translationMatrix", UniformValue::Mat3(object.world.to_mat3()));
        uniforms.set("uColor", UniformValue::Vec4(color.to_array()));
        uniforms.set_texture("uSampler", texture.clone());

        let straight = texture.base().alpha_mode() == AlphaMode::Unpremultiplied;
        let program = shader.map_or(&self.programs[straight as usize], |s| &s.program);
        let custom = shader.map(|s| &s.uniforms);
        let mut groups = vec![&ctx.globals, &*uniforms];
        groups.extend(custom);

        let compiled = match ctx.shaders.bind(
            ctx.backend.as_mut(),
            &mut ctx.registry,
            &mut ctx.textures,
            program,
            &groups,
        ) {
            Ok(c) => c,
            // Broken custom shaders were already reported once by the compiler.
            Err(RenderError::Shader(_)) => {
                ctx.stats.skipped += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        ctx.geometry.bind(ctx.backend.as_mut(), &mut ctx.registry, geometry, &compiled)?;
        ctx.state.set_blend_mode(ctx.backend.as_mut(), blend);
        ctx.backend.draw(geometry.topology, 0, geometry.element_count(), geometry.instance_count)?;
        ctx.stats.batches += 1;
        Ok(())
    }
}
