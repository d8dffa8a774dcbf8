//! Shader programs: preprocessing, compilation to naga IR, interface
//! reflection and uniform upload.

pub mod builtin;
mod compiler;
mod error;
pub mod preprocess;
mod program;
mod reflect;
mod system;
mod uniform;

pub use compiler::{CompiledProgram, ShaderCompiler};
pub use error::{ShaderError, ShaderStage};
pub use program::{Program, ProgramKey, Shader};
pub use reflect::{
    AttributeInfo, ProgramInfo, StageFlags, TextureInfo, UniformBlockInfo, UniformInfo, UniformType,
};
pub use system::ShaderSystem;
pub use uniform::{GroupEntry, UniformGroup, UniformValue};
