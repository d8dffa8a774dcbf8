use winit::window::{Window, WindowId};

use crate::render::{FrameStats, RenderOptions, Renderer};
use crate::scene::Scene;
use crate::time::FrameTime;
use crate::window::RuntimeCtx;

use super::app::AppControl;

/// The window a frame is rendered for.
pub struct WindowCtx<'a> {
    pub id: WindowId,
    pub window: &'a Window,
}

impl WindowCtx<'_> {
    /// Inner size in logical pixels; matches the renderer's scene units.
    pub fn logical_size(&self) -> (f32, f32) {
        let size = self.window.inner_size().to_logical::<f64>(self.window.scale_factor());
        (size.width as f32, size.height as f32)
    }

    pub fn scale_factor(&self) -> f32 {
        self.window.scale_factor() as f32
    }
}

/// Per-frame context passed to [`App::on_frame`](super::App::on_frame).
pub struct FrameCtx<'a> {
    pub window: WindowCtx<'a>,
    pub renderer: &'a mut Renderer,
    pub time: FrameTime,
    pub runtime: &'a mut RuntimeCtx,
}

impl FrameCtx<'_> {
    /// Renders `scene` to the screen with default options.
    ///
    /// Errors other than a destroyed renderer are logged and the frame is
    /// skipped; a lost context is recovered by the renderer on a later frame.
    pub fn render(&mut self, scene: &mut Scene) -> AppControl {
        match self.renderer.render(scene, RenderOptions::default()) {
            Ok(stats) => {
                self.log_stats(&stats);
                AppControl::Continue
            }
            Err(e) if self.renderer.is_destroyed() => {
                log::error!("frame {}: {e}", self.time.frame_index);
                AppControl::Exit
            }
            Err(e) => {
                log::error!("frame {}: {e}", self.time.frame_index);
                AppControl::Continue
            }
        }
    }

    fn log_stats(&self, stats: &FrameStats) {
        if stats.dropped {
            log::debug!("frame {}: dropped (context lost)", self.time.frame_index);
        } else {
            log::trace!(
                "frame {}: {} draws, {} skipped",
                self.time.frame_index,
                stats.draw_calls,
                stats.skipped
            );
        }
    }
}
