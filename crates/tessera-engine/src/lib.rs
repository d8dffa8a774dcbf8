//! Tessera: batching and render-pipeline core of a 2D engine.
//!
//! A [`render::Renderer`] draws a [`scene::Scene`] through a
//! [`device::Backend`], a GL-style context implemented on wgpu
//! ([`device::WgpuBackend`]) and on the CPU ([`device::SoftwareBackend`]).
//! Native objects live in a [`resource::ResourceRegistry`] and are rebuilt
//! lazily after a context loss.

pub mod coords;
pub mod paint;

pub mod device;
pub mod resource;

pub mod geometry;
pub mod shader;
pub mod texture;

pub mod render;
pub mod scene;

pub mod core;
pub mod logging;
pub mod time;
pub mod window;
