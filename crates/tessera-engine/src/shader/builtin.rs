//! Built-in program family.

use super::preprocess::expand_multi_texture;
use super::Program;

const BATCH_VERT: &str = include_str!("glsl/batch.vert");
const BATCH_FRAG: &str = include_str!("glsl/batch.frag");
const MESH_VERT: &str = include_str!("glsl/mesh.vert");
const PARTICLE_VERT: &str = include_str!("glsl/particle.vert");
const TEXTURED_FRAG: &str = include_str!("glsl/textured.frag");

/// Define selecting the shader variant for straight-alpha textures.
pub const STRAIGHT_ALPHA: &str = "STRAIGHT_ALPHA";

fn alpha_define(straight_alpha: bool) -> [(&'static str, &'static str); 1] {
    [(STRAIGHT_ALPHA, if straight_alpha { "1" } else { "0" })]
}

/// Multi-texture batch program reading `units` textures per draw.
pub fn batch_program(units: u32, straight_alpha: bool) -> Program {
    let fragment = expand_multi_texture(BATCH_FRAG, units);
    Program::with_defines(
        format!("batch{units}"),
        BATCH_VERT,
        &fragment,
        &alpha_define(straight_alpha),
    )
}

pub fn mesh_program(straight_alpha: bool) -> Program {
    Program::with_defines("mesh", MESH_VERT, TEXTURED_FRAG, &alpha_define(straight_alpha))
}

pub fn particle_program(straight_alpha: bool) -> Program {
    Program::with_defines("particle", PARTICLE_VERT, TEXTURED_FRAG, &alpha_define(straight_alpha))
}
