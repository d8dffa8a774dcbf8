use crate::device::Topology;
use crate::paint::premultiply_tint;
use crate::scene::ParticleContainer;
use crate::shader::builtin::particle_program;
use crate::shader::{Program, UniformValue};
use crate::texture::AlphaMode;

use super::context::RenderContext;
use super::error::RenderError;
use super::plugin::{RenderObject, RenderPlugin};

/// Draws a [`ParticleContainer`] with a single call, sharing one texture and
/// one transform across all particles.
pub struct ParticleRenderer {
    programs: [Program; 2],
}

impl Default for ParticleRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ParticleRenderer {
    pub fn new() -> Self {
        Self { programs: [particle_program(false), particle_program(true)] }
    }
}

impl RenderPlugin for ParticleRenderer {
    fn render(&mut self, ctx: &mut RenderContext, object: RenderObject<'_>) -> Result<(), RenderError> {
        let Some(container) = object.content.as_any_mut().downcast_mut::<ParticleContainer>() else {
            log::warn!("particle renderer received a non-particle object; skipped");
            ctx.stats.skipped += 1;
            return Ok(());
        };
        let count = container.drawable_len();
        if count == 0 {
            return Ok(());
        }
        if !container.texture().is_valid() {
            ctx.stats.skipped += 1;
            return Ok(());
        }

        container.update_buffers();
        let color = premultiply_tint(container.tint, object.world_alpha);
        let blend = container.blend;
        let (geometry, texture, uniforms) = container.parts_mut();

        uniforms.set("translationMatrix", UniformValue::Mat3(object.world.to_mat3()));
        uniforms.set("uColor", UniformValue::Vec4(color.to_array()));
        uniforms.set_texture("uSampler", texture.clone());

        let straight = texture.base().alpha_mode() == AlphaMode::Unpremultiplied;
        let compiled = ctx.shaders.bind(
            ctx.backend.as_mut(),
            &mut ctx.registry,
            &mut ctx.textures,
            &self.programs[straight as usize],
            &[&ctx.globals, &*uniforms],
        )?;
        ctx.geometry.bind(ctx.backend.as_mut(), &mut ctx.registry, geometry, &compiled)?;
        ctx.state.set_blend_mode(ctx.backend.as_mut(), blend);
        ctx.backend.draw(Topology::Triangles, 0, count as u32 * 6, 1)?;
        ctx.stats.batches += 1;
        Ok(())
    }
}
