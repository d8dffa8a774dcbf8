use wgpu::naga;

use super::reflect::ProgramInfo;
use super::{Program, ProgramKey, ShaderError, ShaderStage};

/// CPU-side result of compiling a [`Program`]: validated IR for both stages
/// plus the reflected interface. Kept for the program's lifetime so native
/// programs can be re-created after a context loss.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub key: ProgramKey,
    pub name: String,
    pub vertex: naga::Module,
    pub fragment: naga::Module,
    pub info: ProgramInfo,
    pub defines: Vec<(String, String)>,
}

impl CompiledProgram {
    pub fn define(&self, name: &str) -> Option<&str> {
        self.defines
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// GLSL front end + validator.
pub struct ShaderCompiler {
    frontend: naga::front::glsl::Frontend,
    validator: naga::valid::Validator,
}

impl Default for ShaderCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderCompiler {
    pub fn new() -> Self {
        Self {
            frontend: naga::front::glsl::Frontend::default(),
            validator: naga::valid::Validator::new(
                naga::valid::ValidationFlags::all(),
                naga::valid::Capabilities::default(),
            ),
        }
    }

    /// Compiles both stages and checks that they link.
    ///
    /// The vertex stage is compiled first; a failure there is reported without
    /// attempting the fragment stage.
    pub fn compile(&mut self, program: &Program) -> Result<CompiledProgram, ShaderError> {
        let vertex = self.compile_stage(program, ShaderStage::Vertex)?;
        let fragment = self.compile_stage(program, ShaderStage::Fragment)?;

        let mut info = ProgramInfo::default();
        info.add_stage(&vertex, ShaderStage::Vertex);
        info.add_stage(&fragment, ShaderStage::Fragment);

        link(program.name(), &info)?;
        info.attributes.sort_by_key(|a| a.location);

        log::debug!(
            "compiled program `{}` ({} attributes, {} uniforms, {} textures)",
            program.name(),
            info.attributes.len(),
            info.uniforms.len(),
            info.textures.len()
        );

        Ok(CompiledProgram {
            key: program.key(),
            name: program.name().to_string(),
            vertex,
            fragment,
            info,
            defines: program.defines().to_vec(),
        })
    }

    fn compile_stage(
        &mut self,
        program: &Program,
        stage: ShaderStage,
    ) -> Result<naga::Module, ShaderError> {
        let source = program.source(stage);
        let options = naga::front::glsl::Options::from(stage.naga());

        let module = self
            .frontend
            .parse(&options, source)
            .map_err(|e| ShaderError::Compile {
                program: program.name().to_string(),
                stage,
                log: e.emit_to_string(source),
            })?;

        if !module.entry_points.iter().any(|ep| ep.stage == stage.naga()) {
            return Err(ShaderError::MissingEntryPoint {
                program: program.name().to_string(),
                stage,
            });
        }

        self.validator
            .validate(&module)
            .map_err(|e| ShaderError::Compile {
                program: program.name().to_string(),
                stage,
                log: e.emit_to_string(source),
            })?;

        Ok(module)
    }
}

/// Every fragment input must be fed by a vertex output at the same location.
fn link(program: &str, info: &ProgramInfo) -> Result<(), ShaderError> {
    for (location, name) in &info.varyings_in {
        if !info.varyings_out.iter().any(|(l, _)| l == location) {
            return Err(ShaderError::Link {
                program: program.to_string(),
                log: format!("fragment input `{name}` at location {location} has no vertex output"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::{builtin, UniformType};

    #[test]
    fn batch_program_reflects_attributes_and_samplers() {
        let mut compiler = ShaderCompiler::new();
        let compiled = compiler.compile(&builtin::batch_program(4, false)).unwrap();

        let names: Vec<&str> = compiled.info.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["aVertexPosition", "aTextureCoord", "aColor", "aTextureId"]);

        let proj = compiled.info.uniform("projectionMatrix").unwrap();
        assert_eq!(proj.ty, UniformType::Mat3);
        assert_eq!(compiled.info.uniform("tint").unwrap().offset, 48);

        assert_eq!(compiled.info.textures.len(), 4);
        assert_eq!(compiled.info.textures[3].name, "uSampler3");
        assert_eq!(compiled.info.textures[3].sampler_binding, Some(7));
    }

    #[test]
    fn compile_error_names_failing_stage() {
        let vs = "#version 450\nvoid main() { gl_Position = vec4(0.0); }\n";
        let fs = "#version 450\nlayout(location = 0) out vec4 c;\nvoid main() { c = undefined_fn(); }\n";
        let err = ShaderCompiler::new().compile(&Program::new("broken", vs, fs)).unwrap_err();
        match err {
            ShaderError::Compile { stage, log, .. } => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(!log.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unmatched_varying_fails_link() {
        let vs = "#version 450\nvoid main() { gl_Position = vec4(0.0); }\n";
        let fs = "#version 450\nlayout(location = 3) in vec4 vMissing;\n\
                  layout(location = 0) out vec4 c;\nvoid main() { c = vMissing; }\n";
        let err = ShaderCompiler::new().compile(&Program::new("unlinked", vs, fs)).unwrap_err();
        assert!(matches!(err, ShaderError::Link { .. }));
    }

    #[test]
    fn struct_arrays_flatten_to_indexed_fields() {
        let vs = "#version 450\n\
                  struct Light { vec4 color; vec2 pos; };\n\
                  layout(set = 0, binding = 0) uniform Lights { Light lights[2]; float gain; };\n\
                  void main() { gl_Position = lights[0].color * gain + vec4(lights[1].pos, 0.0, 0.0); }\n";
        let fs = "#version 450\nlayout(location = 0) out vec4 c;\nvoid main() { c = vec4(1.0); }\n";
        let compiled = ShaderCompiler::new().compile(&Program::new("lights", vs, fs)).unwrap();
        assert!(compiled.info.has_uniform("lights[0].color"));
        assert!(compiled.info.has_uniform("lights[1].pos"));
        assert!(compiled.info.has_uniform("gain"));
        assert_eq!(compiled.info.uniform("lights[1].color").unwrap().offset, 32);
    }
}
