use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use super::preprocess::preprocess;
use super::{ShaderStage, UniformGroup};

/// Cache key of a program: hash of both preprocessed sources.
pub type ProgramKey = u64;

/// Immutable vertex + fragment source pair, already preprocessed.
///
/// Cheap to clone; programs with identical sources share one key and
/// therefore one compiled native program.
#[derive(Debug, Clone)]
pub struct Program {
    inner: Rc<ProgramSource>,
}

#[derive(Debug)]
struct ProgramSource {
    name: String,
    vertex: String,
    fragment: String,
    defines: Vec<(String, String)>,
    key: ProgramKey,
}

/// Non-owning reference used by caches keyed on [`ProgramKey`].
#[derive(Debug, Clone)]
pub(crate) struct ProgramWatch(Weak<ProgramSource>);

impl ProgramWatch {
    pub(crate) fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl Program {
    pub fn new(name: impl Into<String>, vertex: &str, fragment: &str) -> Self {
        Self::with_defines(name, vertex, fragment, &[])
    }

    pub fn with_defines(
        name: impl Into<String>,
        vertex: &str,
        fragment: &str,
        defines: &[(&str, &str)],
    ) -> Self {
        let defines: Vec<(String, String)> = defines
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let vertex = preprocess(vertex, ShaderStage::Vertex, &defines);
        let fragment = preprocess(fragment, ShaderStage::Fragment, &defines);

        let mut hasher = DefaultHasher::new();
        vertex.hash(&mut hasher);
        fragment.hash(&mut hasher);
        let key = hasher.finish();

        Self {
            inner: Rc::new(ProgramSource {
                name: name.into(),
                vertex,
                fragment,
                defines,
                key,
            }),
        }
    }

    #[inline]
    pub fn key(&self) -> ProgramKey {
        self.inner.key
    }

    /// Watch that stays alive only as long as some clone of this program.
    pub(crate) fn watch(&self) -> ProgramWatch {
        ProgramWatch(Rc::downgrade(&self.inner))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[inline]
    pub fn vertex_source(&self) -> &str {
        &self.inner.vertex
    }

    #[inline]
    pub fn fragment_source(&self) -> &str {
        &self.inner.fragment
    }

    pub fn defines(&self) -> &[(String, String)] {
        &self.inner.defines
    }

    pub fn source(&self, stage: ShaderStage) -> &str {
        match stage {
            ShaderStage::Vertex => self.vertex_source(),
            ShaderStage::Fragment => self.fragment_source(),
        }
    }
}

/// A program paired with its own mutable uniform values.
#[derive(Debug)]
pub struct Shader {
    pub program: Program,
    pub uniforms: UniformGroup,
}

impl Shader {
    pub fn new(program: Program, uniforms: UniformGroup) -> Self {
        Self { program, uniforms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VS: &str = "#version 450\nvoid main() { gl_Position = vec4(0.0); }\n";
    const FS: &str = "#version 450\nlayout(location = 0) out vec4 c;\nvoid main() { c = vec4(1.0); }\n";

    #[test]
    fn identical_sources_share_a_key() {
        let a = Program::new("a", VS, FS);
        let b = Program::new("b", VS, FS);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn defines_change_the_key() {
        let a = Program::with_defines("a", VS, FS, &[("STRAIGHT_ALPHA", "0")]);
        let b = Program::with_defines("a", VS, FS, &[("STRAIGHT_ALPHA", "1")]);
        assert_ne!(a.key(), b.key());
        assert!(b.fragment_source().contains("#define STRAIGHT_ALPHA 1"));
    }
}
