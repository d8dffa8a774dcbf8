use thiserror::Error;
use wgpu::naga;

/// Pipeline stage of a shader source.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub(crate) fn naga(self) -> naga::ShaderStage {
        match self {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ShaderError {
    /// The stage did not parse or validate; `log` is the compiler diagnostic.
    #[error("{stage} shader `{program}` failed to compile:\n{log}")]
    Compile {
        program: String,
        stage: ShaderStage,
        log: String,
    },

    /// Both stages compiled but their interfaces disagree.
    #[error("program `{program}` failed to link: {log}")]
    Link { program: String, log: String },

    #[error("program `{program}` has no entry point for the {stage} stage")]
    MissingEntryPoint { program: String, stage: ShaderStage },
}
