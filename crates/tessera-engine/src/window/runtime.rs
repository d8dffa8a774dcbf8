use std::collections::HashMap;

use anyhow::{Context, Result};
use ouroboros::self_referencing;
use winit::application::ApplicationHandler;
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::core::{App as CoreApp, AppControl, FrameCtx, WindowCtx};
use crate::device::{BackendError, GpuInit, SurfacePresenter, WgpuBackend};
use crate::render::{Renderer, RendererOptions};
use crate::time::FrameClock;

/// Window configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub title: String,
    pub initial_size: LogicalSize<f64>,
    /// Renderer settings; the size and resolution are taken from the window.
    pub renderer: RendererOptions,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            title: "tessera".to_string(),
            initial_size: LogicalSize::new(1280.0, 720.0),
            renderer: RendererOptions::default(),
        }
    }
}

/// Commands issued by the app; applied after the current callback returns.
#[derive(Default)]
pub struct RuntimeCtx {
    commands: Vec<Command>,
}

impl RuntimeCtx {
    pub fn create_window(&mut self, config: RuntimeConfig) {
        self.commands.push(Command::CreateWindow(config));
    }

    pub fn close_window(&mut self, id: WindowId) {
        self.commands.push(Command::CloseWindow(id));
    }

    pub fn exit(&mut self) {
        self.commands.push(Command::Exit);
    }
}

enum Command {
    CreateWindow(RuntimeConfig),
    CloseWindow(WindowId),
    Exit,
}

/// Runs the winit event loop, one [`Renderer`] per window.
pub struct Runtime;

impl Runtime {
    pub fn run<A>(initial: RuntimeConfig, gpu_init: GpuInit, app: A) -> Result<()>
    where
        A: 'static + CoreApp,
    {
        let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
        let mut state = AppState::new(initial, gpu_init, app);
        event_loop
            .run_app(&mut state)
            .context("winit event loop terminated with error")?;
        Ok(())
    }
}

#[self_referencing]
struct WindowEntry {
    clock: FrameClock,
    window: Window,

    #[borrows(window)]
    #[covariant]
    presenter: SurfacePresenter<'this>,
}

/// A window, its surface and the renderer drawing into it.
struct WindowSlot {
    entry: WindowEntry,
    renderer: Renderer,
}

impl WindowSlot {
    fn open(event_loop: &ActiveEventLoop, config: RuntimeConfig, gpu_init: &GpuInit) -> Result<(WindowId, Self)> {
        let attrs = Window::default_attributes()
            .with_title(config.title)
            .with_inner_size(config.initial_size);
        let window = event_loop.create_window(attrs).context("failed to create window")?;
        let id = window.id();

        let mut backend_slot: Option<WgpuBackend> = None;
        let entry = WindowEntryTryBuilder {
            clock: FrameClock::default(),
            window,
            presenter_builder: |w| {
                let size = w.inner_size();
                let instance = WgpuBackend::create_instance();
                let surface = instance.create_surface(w).context("failed to create wgpu surface")?;
                let backend = pollster::block_on(WgpuBackend::new(
                    &instance,
                    Some(&surface),
                    gpu_init,
                    size.width.max(1),
                    size.height.max(1),
                ))?;
                let presenter = SurfacePresenter::new(surface, &backend, gpu_init, size)?;
                backend_slot = Some(backend);
                Ok::<_, anyhow::Error>(presenter)
            },
        }
        .try_build()?;
        let backend = backend_slot.context("wgpu backend was not created")?;

        let (logical, scale) = entry.with_window(|w| {
            let scale = w.scale_factor();
            (w.inner_size().to_logical::<f64>(scale), scale)
        });
        let options = RendererOptions {
            width: logical.width as f32,
            height: logical.height as f32,
            resolution: scale as f32,
            ..config.renderer
        };
        let renderer = Renderer::new(Box::new(backend), options);
        log::info!("window {id:?} opened at {}x{} (scale {scale})", logical.width, logical.height);

        Ok((id, Self { entry, renderer }))
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        let Self { entry, renderer } = self;
        if let Some(backend) = renderer.backend_as_mut::<WgpuBackend>() {
            entry.with_presenter_mut(|p| p.resize(backend, size));
        }
        if size.width == 0 || size.height == 0 || renderer.is_destroyed() {
            return;
        }
        let logical = entry.with_window(|w| size.to_logical::<f64>(w.scale_factor()));
        if let Err(e) = renderer.resize(logical.width as f32, logical.height as f32) {
            log::error!("resize failed: {e}");
        }
    }

    fn request_redraw(&self) {
        self.entry.with_window(|w| w.request_redraw());
    }
}

struct AppState<A>
where
    A: CoreApp + 'static,
{
    initial: RuntimeConfig,
    gpu_init: GpuInit,
    app: A,

    windows: HashMap<WindowId, WindowSlot>,
    exit_requested: bool,
}

impl<A> AppState<A>
where
    A: CoreApp + 'static,
{
    fn new(initial: RuntimeConfig, gpu_init: GpuInit, app: A) -> Self {
        Self { initial, gpu_init, app, windows: HashMap::new(), exit_requested: false }
    }

    fn open_window(&mut self, event_loop: &ActiveEventLoop, config: RuntimeConfig) -> Result<WindowId> {
        let (id, slot) = WindowSlot::open(event_loop, config, &self.gpu_init)?;
        slot.request_redraw();
        self.windows.insert(id, slot);
        Ok(id)
    }

    fn apply_commands(&mut self, event_loop: &ActiveEventLoop, mut ctx: RuntimeCtx) {
        for cmd in ctx.commands.drain(..) {
            match cmd {
                Command::CreateWindow(cfg) => {
                    if let Err(e) = self.open_window(event_loop, cfg) {
                        log::error!("failed to create window: {e:#}");
                        self.exit_requested = true;
                    }
                }
                Command::CloseWindow(id) => {
                    self.windows.remove(&id);
                }
                Command::Exit => self.exit_requested = true,
            }
        }
        if self.windows.is_empty() {
            self.exit_requested = true;
        }
        if self.exit_requested {
            event_loop.exit();
        }
    }

    /// Lets the app draw, then presents the screen to the window.
    fn redraw(&mut self, window_id: WindowId, runtime: &mut RuntimeCtx) -> AppControl {
        let Some(slot) = self.windows.get_mut(&window_id) else {
            return AppControl::Continue;
        };
        let app = &mut self.app;
        let WindowSlot { entry, renderer } = slot;
        let mut control = AppControl::Continue;

        entry.with_mut(|fields| {
            let time = fields.clock.tick();
            {
                let mut ctx = FrameCtx {
                    window: WindowCtx { id: window_id, window: fields.window },
                    renderer: &mut *renderer,
                    time,
                    runtime: &mut *runtime,
                };
                control = app.on_frame(&mut ctx);
            }
            if renderer.is_destroyed() {
                return;
            }

            fields.window.pre_present_notify();
            let Some(backend) = renderer.backend_as_mut::<WgpuBackend>() else { return };
            match fields.presenter.present(backend) {
                Ok(()) | Err(BackendError::ContextLost) => {}
                Err(e) => {
                    log::error!("present failed: {e}");
                    control = AppControl::Exit;
                }
            }
        });
        control
    }
}

impl<A> ApplicationHandler for AppState<A>
where
    A: CoreApp + 'static,
{
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if !self.windows.is_empty() {
            return;
        }
        if let Err(e) = self.open_window(event_loop, self.initial.clone()) {
            log::error!("failed to create initial window: {e:#}");
            self.exit_requested = true;
            event_loop.exit();
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exit_requested {
            event_loop.exit();
            return;
        }
        event_loop.set_control_flow(ControlFlow::Wait);
        // Continuous redraw.
        for slot in self.windows.values() {
            slot.request_redraw();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if self.exit_requested {
            event_loop.exit();
            return;
        }
        if self.app.on_window_event(window_id, &event) == AppControl::Exit {
            self.exit_requested = true;
            event_loop.exit();
            return;
        }

        match &event {
            WindowEvent::CloseRequested => {
                self.windows.remove(&window_id);
                if self.windows.is_empty() {
                    self.exit_requested = true;
                    event_loop.exit();
                }
            }

            WindowEvent::Resized(new_size) => {
                if let Some(slot) = self.windows.get_mut(&window_id) {
                    slot.resize(*new_size);
                    slot.request_redraw();
                }
            }

            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(slot) = self.windows.get_mut(&window_id) {
                    let size = slot.entry.with_window(|w| w.inner_size());
                    slot.resize(size);
                    slot.request_redraw();
                }
            }

            WindowEvent::RedrawRequested => {
                let mut runtime = RuntimeCtx::default();
                if self.redraw(window_id, &mut runtime) == AppControl::Exit {
                    runtime.exit();
                }
                self.apply_commands(event_loop, runtime);
            }

            _ => {}
        }
    }
}
