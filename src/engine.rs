use thiserror::Error;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::window::WindowId;

use asset::{Assets, Config};
use gpu::Gpu;
use rendering::Framework;
use ui::Gui;
use windowing::{EngineWindow, WindowConfig};

use crate::camera::Camera;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Asset(#[from] asset::AssetError),
    #[error(transparent)]
    Gpu(#[from] gpu::GpuError),
    #[error(transparent)]
    Ui(#[from] ui::UiError),
    #[error(transparent)]
    Render(#[from] rendering::RenderError),
    #[error(transparent)]
    Window(#[from] windowing::window::WindowError),
    #[error(transparent)]
    EventLoop(#[from] winit::error::EventLoopError),
}

/// Everything that exists once the window is up. Owned here and passed by
/// reference down the call stack; there is no global context.
struct EngineState {
    window: EngineWindow,
    gpu: Gpu,
    assets: Assets,
    gui: Gui,
    camera: Camera,
    framework: Framework,
}

pub struct Engine {
    config: Config,
    window_config: WindowConfig,
    state: Option<EngineState>,
    result: Result<(), EngineError>,
}

impl Engine {
    pub fn new(config: Config) -> Engine {
        Engine {
            config,
            window_config: WindowConfig::default(),
            state: None,
            result: Ok(()),
        }
    }

    pub fn into_result(self) -> Result<(), EngineError> {
        self.result
    }

    fn create_state(&mut self, event_loop: &ActiveEventLoop) -> Result<EngineState, EngineError> {
        let window = EngineWindow::new(event_loop, &self.window_config)?;

        let gpu = Gpu::new(&window)?;
        let assets = Assets::load(&self.config, &gpu)?;
        let gui = Gui::new(&gpu, window.inner_size())?;

        let extent = gui.swapchain_info().extent;
        let camera = Camera::new(extent[0] as f32 / extent[1].max(1) as f32);

        let thread_count = std::thread::available_parallelism()
            .map(|parallelism| parallelism.get().saturating_sub(1))
            .unwrap_or(1)
            .max(1);

        let framework = Framework::new(
            &gpu,
            &assets,
            &gui,
            self.config.frame_graph_index,
            self.config.root(),
            thread_count,
        )?;

        info!("engine up");

        Ok(EngineState {
            window,
            gpu,
            assets,
            gui,
            camera,
            framework,
        })
    }

    fn tick(&mut self) -> Result<(), EngineError> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };

        let camera_state = state.camera.state();
        state.framework.tick(
            &state.gpu,
            &state.assets,
            &mut state.gui,
            &mut state.window,
            &camera_state,
        )?;

        Ok(())
    }
}

impl ApplicationHandler for Engine {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match self.create_state(event_loop) {
            Ok(state) => self.state = Some(state),
            Err(err) => {
                error!("failed to start the engine: {err}");
                self.result = Err(err);
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                if let Some(state) = self.state.as_mut() {
                    state.window.set_should_close();
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = self.state.as_mut() {
                    state.window.set_framebuffer_resized(true);
                    state.camera.resize([size.width, size.height]);
                }
            }
            WindowEvent::Occluded(occluded) => {
                if let Some(state) = self.state.as_mut() {
                    state.window.set_iconified(occluded);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.tick() {
                    error!("frame failed: {err}");
                    self.result = Err(err);
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(state) = self.state.as_ref() else {
            return;
        };

        // A close request is honored between frames.
        if state.window.should_close() {
            event_loop.exit();
            return;
        }

        state.window.request_redraw();
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = self.state.as_ref() {
            let _ = state.gpu.wait_idle();
        }
    }
}
