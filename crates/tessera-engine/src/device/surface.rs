//! Window surface that receives the backend's screen each frame.

use anyhow::{Context, Result};
use winit::dpi::PhysicalSize;

use super::{Backend, BackendError, GpuInit, SurfaceErrorAction, WgpuBackend};

fn choose_surface_format(caps: &wgpu::SurfaceCapabilities, prefer_srgb: bool) -> Option<wgpu::TextureFormat> {
    let preferred: &[wgpu::TextureFormat] = if prefer_srgb {
        &[wgpu::TextureFormat::Bgra8UnormSrgb, wgpu::TextureFormat::Rgba8UnormSrgb]
    } else {
        &[wgpu::TextureFormat::Bgra8Unorm, wgpu::TextureFormat::Rgba8Unorm]
    };
    preferred
        .iter()
        .copied()
        .find(|f| caps.formats.contains(f))
        .or_else(|| caps.formats.first().copied())
}

fn choose_alpha_mode(caps: &wgpu::SurfaceCapabilities, requested: Option<wgpu::CompositeAlphaMode>) -> wgpu::CompositeAlphaMode {
    requested
        .filter(|m| caps.alpha_modes.contains(m))
        .or_else(|| caps.alpha_modes.first().copied())
        .unwrap_or(wgpu::CompositeAlphaMode::Auto)
}

/// Swapchain bound to a window for the lifetime `'w`.
///
/// Reconfigures itself when the backend's device generation changes, so a
/// restored device presents without the caller rebuilding anything.
pub struct SurfacePresenter<'w> {
    surface: wgpu::Surface<'w>,
    config: wgpu::SurfaceConfiguration,
    /// Format the screen is copied through.
    view_format: wgpu::TextureFormat,
    size: PhysicalSize<u32>,
    generation: u64,
}

impl<'w> SurfacePresenter<'w> {
    pub fn new(surface: wgpu::Surface<'w>, backend: &WgpuBackend, init: &GpuInit, size: PhysicalSize<u32>) -> Result<Self> {
        anyhow::ensure!(size.width > 0 && size.height > 0, "window has zero size");

        let caps = surface.get_capabilities(backend.adapter());
        let format = choose_surface_format(&caps, init.prefer_srgb).context("no supported surface formats")?;
        let view_format = format.remove_srgb_suffix();

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width,
            height: size.height,
            present_mode: init.present_mode,
            alpha_mode: choose_alpha_mode(&caps, init.alpha_mode),
            view_formats: if view_format == format { vec![] } else { vec![view_format] },
            desired_maximum_frame_latency: init.desired_maximum_frame_latency,
        };
        surface.configure(backend.device(), &config);
        log::info!("surface: {format:?} {}x{}", size.width, size.height);

        Ok(Self { surface, config, view_format, size, generation: backend.generation() })
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    /// Reconfigures after a window resize. A zero size is recorded and the
    /// configuration deferred until the window is visible again.
    pub fn resize(&mut self, backend: &WgpuBackend, new_size: PhysicalSize<u32>) {
        self.size = new_size;
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(backend.device(), &self.config);
    }

    /// Copies the backend's screen onto the next surface texture and
    /// presents it.
    pub fn present(&mut self, backend: &mut WgpuBackend) -> Result<(), BackendError> {
        if self.size.width == 0 || self.size.height == 0 || backend.is_lost() {
            return Ok(());
        }
        if self.generation != backend.generation() {
            log::debug!("surface: reconfiguring for device generation {}", backend.generation());
            self.surface.configure(backend.device(), &self.config);
            self.generation = backend.generation();
        }

        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(err) => {
                return match self.handle_surface_error(backend, err) {
                    SurfaceErrorAction::Fatal => Err(BackendError::OutOfMemory),
                    _ => Ok(()),
                };
            }
        };
        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor {
            format: Some(self.view_format),
            ..Default::default()
        });
        backend.present_to(&view, self.view_format)?;
        frame.present();
        Ok(())
    }

    fn handle_surface_error(&mut self, backend: &WgpuBackend, err: wgpu::SurfaceError) -> SurfaceErrorAction {
        match err {
            wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => {
                if self.size.width > 0 && self.size.height > 0 {
                    self.surface.configure(backend.device(), &self.config);
                }
                log::debug!("surface: {err}; reconfigured");
                SurfaceErrorAction::Reconfigured
            }
            wgpu::SurfaceError::OutOfMemory => {
                log::error!("surface: out of memory");
                SurfaceErrorAction::Fatal
            }
            wgpu::SurfaceError::Timeout | wgpu::SurfaceError::Other => {
                log::debug!("surface: {err}; frame skipped");
                SurfaceErrorAction::SkipFrame
            }
        }
    }
}
