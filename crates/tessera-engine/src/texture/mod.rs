//! Textures: shared pixel sources, views onto them, and render targets.

mod base;
mod render_texture;
mod system;
#[allow(clippy::module_inception)]
mod texture;

pub use base::{AlphaMode, BaseTexture, BaseTextureOptions, TextureSource};
pub use render_texture::RenderTexture;
pub use system::TextureSystem;
pub use texture::{Texture, TextureUvs};
