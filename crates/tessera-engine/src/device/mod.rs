//! Native rendering backends.
//!
//! This module is responsible for:
//! - the [`Backend`] trait: the GL-style context every render system talks to
//! - the wgpu implementation and the window surface it presents to
//! - the deterministic software implementation used headless and in tests

mod backend;
mod error;
mod gpu;
mod init;
mod software;
mod surface;

pub use backend::{
    Backend, BackendInfo, BackendStats, BufferKind, BufferUsage, IndexFormat, NativeBuffer,
    NativeFramebuffer, NativeProgram, NativeTexture, PixelRect, ScaleMode, StencilFunc, StencilOp,
    StencilState, TextureDesc, Topology, VertexArrayDesc, VertexAttributeDesc, VertexFormat,
    WrapMode,
};
pub use error::{BackendError, SurfaceErrorAction};
pub use gpu::WgpuBackend;
pub use init::GpuInit;
pub use software::SoftwareBackend;
pub use surface::SurfacePresenter;
